//! Signed session cookie.
//!
//! `SessionLayer` reads and verifies `portrait.sid` on every request and
//! injects a [`SessionHandle`]. A cookie is only issued when a handler asks
//! for a session key that did not exist yet.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tower::{Layer, Service, ServiceExt};

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "portrait.sid";
const MAX_AGE_SECS: u64 = 24 * 60 * 60;
const SESSION_ID_BYTES: usize = 16;

/// Secret and cookie attributes shared by every request.
#[derive(Clone)]
pub struct SessionKeys {
    secret: Arc<[u8]>,
    secure: bool,
}

impl SessionKeys {
    pub fn new(secret: &[u8], secure: bool) -> Self {
        Self {
            secret: Arc::from(secret),
            secure,
        }
    }

    /// Per-process secret: sessions do not survive a restart.
    pub fn random(secure: bool) -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(&secret, secure)
    }

    fn signature(&self, session_id: &str) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(session_id.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn sign(&self, session_id: &str) -> Option<String> {
        Some(format!("{session_id}.{}", self.signature(session_id)?))
    }

    /// The session id inside `value`, if its signature checks out.
    pub fn verify(&self, value: &str) -> Option<String> {
        let (session_id, signature) = value.rsplit_once('.')?;
        if session_id.is_empty() {
            return None;
        }
        let expected = hex::decode(signature).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(session_id.as_bytes());
        mac.verify_slice(&expected).ok()?;
        Some(session_id.to_string())
    }

    pub fn set_cookie_header(&self, session_id: &str) -> Option<HeaderValue> {
        let signed = self.sign(session_id)?;
        let secure = if self.secure { "; Secure" } else { "" };
        HeaderValue::from_str(&format!(
            "{COOKIE_NAME}={signed}; Path=/; Max-Age={MAX_AGE_SECS}; HttpOnly; SameSite=Lax{secure}"
        ))
        .ok()
    }

    fn from_headers(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(name, _)| *name == COOKIE_NAME)
            .find_map(|(_, value)| self.verify(value))
    }
}

/// Request-scoped view of the session, stored in request extensions.
#[derive(Clone, Debug, Default)]
pub struct SessionHandle {
    existing: Option<String>,
    issued: Arc<OnceLock<String>>,
}

impl SessionHandle {
    /// The verified session id the browser sent, if any.
    pub fn existing(&self) -> Option<&str> {
        self.existing.as_deref()
    }

    /// The session id, minting one (and a cookie for it) when absent.
    pub fn get_or_issue(&self) -> String {
        if let Some(id) = &self.existing {
            return id.clone();
        }
        self.issued.get_or_init(new_session_id).clone()
    }

    fn newly_issued(&self) -> Option<&str> {
        self.issued.get().map(String::as_str)
    }
}

fn new_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct SessionLayer {
    keys: SessionKeys,
}

impl SessionLayer {
    pub fn new(keys: SessionKeys) -> Self {
        Self { keys }
    }
}

impl<S> Layer<S> for SessionLayer {
    type Service = SessionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            keys: self.keys.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SessionService<S> {
    inner: S,
    keys: SessionKeys,
}

impl<S> Service<Request> for SessionService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let keys = self.keys.clone();

        let handle = SessionHandle {
            existing: keys.from_headers(req.headers()),
            issued: Arc::default(),
        };
        req.extensions_mut().insert(handle.clone());

        Box::pin(async move {
            let mut response = ready.oneshot(req).await.into_response();
            if let Some(session_id) = handle.newly_issued() {
                match keys.set_cookie_header(session_id) {
                    Some(cookie) => {
                        response.headers_mut().append(SET_COOKIE, cookie);
                    }
                    None => tracing::warn!(event = "session_cookie_not_issued"),
                }
            }
            Ok(response)
        })
    }
}
