//! Rejects `/getgather/*` traffic from cloud-provider networks.
//!
//! The network's reverse-DNS domain comes from geolocation, so nothing is
//! blocked when geolocation is not configured.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Json;
use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use portrait_core::error::{ApiError, codes};
use rand::Rng;
use tower::{Layer, Service, ServiceExt};

use crate::services::geolocation::{Geolocator, client_ip};

const GUARDED_PREFIX: &str = "/getgather/";
const DEFAULT_DELAY_MS: RangeInclusive<u64> = 3_000..=8_000;

const BLOCKED_DOMAINS: &[&str] = &[
    "amazonaws.com",
    "compute.amazonaws.com",
    "google.com",
    "googleusercontent.com",
    "cloud.google.com",
    "gcp.gvt2.com",
    "microsoft.com",
    "azure.com",
    "cloudapp.net",
    "alibaba.com",
    "aliyun.com",
    "alibabacloud.com",
    "digitalocean.com",
    "oracle.com",
    "oraclecloud.com",
    "ovh.net",
    "ovhcloud.com",
    "linode.com",
    "hetzner.com",
    "hetzner.de",
    "vultr.com",
    "tencent.com",
    "tencentcloud.com",
    "ibm.com",
    "softlayer.com",
    "choopa.com",
    "leaseweb.com",
    "contabo.com",
    "cloudsigma.com",
];

pub fn is_blocked_domain(domain: &str) -> bool {
    let domain = domain.trim().to_ascii_lowercase();
    !domain.is_empty() && BLOCKED_DOMAINS.iter().any(|blocked| domain.contains(blocked))
}

#[derive(Clone)]
pub struct IpBlockLayer {
    geo: Arc<Geolocator>,
    delay_ms: RangeInclusive<u64>,
}

impl IpBlockLayer {
    pub fn new(geo: Arc<Geolocator>) -> Self {
        Self {
            geo,
            delay_ms: DEFAULT_DELAY_MS,
        }
    }

    /// Override the random delay applied before rejecting.
    pub fn with_delay_ms(mut self, delay_ms: RangeInclusive<u64>) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

impl<S> Layer<S> for IpBlockLayer {
    type Service = IpBlockService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IpBlockService {
            inner,
            geo: self.geo.clone(),
            delay_ms: self.delay_ms.clone(),
        }
    }
}

#[derive(Clone)]
pub struct IpBlockService<S> {
    inner: S,
    geo: Arc<Geolocator>,
    delay_ms: RangeInclusive<u64>,
}

impl<S> Service<Request> for IpBlockService<S>
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

    fn call(&mut self, req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);

        if !req.uri().path().starts_with(GUARDED_PREFIX) || !self.geo.is_enabled() {
            return Box::pin(async move { Ok(ready.oneshot(req).await.into_response()) });
        }

        let geo = self.geo.clone();
        let delay_ms = self.delay_ms.clone();
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = client_ip(req.headers(), peer);

        Box::pin(async move {
            let domain = geo.lookup(&ip).await.and_then(|record| record.domain);
            match domain {
                Some(domain) if is_blocked_domain(&domain) => {
                    tracing::warn!(
                        event = "ip_blocked",
                        ip = %ip,
                        domain = %domain,
                        path = %req.uri().path(),
                    );
                    let wait = rand::thread_rng().gen_range(delay_ms);
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                    Ok(access_denied())
                }
                _ => Ok(ready.oneshot(req).await.into_response()),
            }
        })
    }
}

fn access_denied() -> Response {
    let body = ApiError {
        error: codes::FORBIDDEN.to_string(),
        message: "Access denied.".to_string(),
        field: None,
        received: None,
        request_id: uuid::Uuid::now_v7().to_string(),
        docs_hint: None,
    };
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}
