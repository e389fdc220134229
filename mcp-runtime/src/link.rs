//! Hosted-link account linking: link creation, status polling and the
//! state machine that tracks one linking attempt.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use portrait_core::Brand;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::util;

/// Remote tool that reports whether a hosted link has been completed.
pub const POLL_TOOL: &str = "poll_signin";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_ATTEMPTS: u32 = 120;

const REST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_LINK_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedLink {
    pub link_id: String,
    /// External page the user must visit to finish signing in.
    pub hosted_link_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HostedLink {
    /// Read a link out of a tool or REST payload.
    ///
    /// Tools name the URL `url`; the REST endpoint names it `hosted_link_url`.
    /// A link without either is not a link the user can open.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let link_id = non_empty_str(payload, "link_id")?;
        let hosted_link_url = non_empty_str(payload, "hosted_link_url")
            .or_else(|| non_empty_str(payload, "url"))?;
        Some(Self {
            link_id,
            hosted_link_url,
            message: non_empty_str(payload, "message"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LinkStatus {
    Pending,
    #[serde(rename = "completed")]
    Finished {
        #[serde(skip_serializing_if = "Option::is_none")]
        profile_id: Option<String>,
    },
}

impl LinkStatus {
    /// Integrations disagree on how they report completion: `FINISHED`,
    /// `completed`, or an `auth_completed` flag. Anything else is pending.
    pub fn from_payload(payload: &Value) -> Self {
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase());
        let finished = matches!(
            status.as_deref(),
            Some("finished" | "completed" | "complete")
        ) || payload.get("auth_completed").and_then(Value::as_bool) == Some(true);

        if finished {
            LinkStatus::Finished {
                profile_id: non_empty_str(payload, "profile_id"),
            }
        } else {
            LinkStatus::Pending
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, LinkStatus::Finished { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    NotStarted,
    LinkCreated,
    Polling,
    Finished,
    /// Absorbing: the user never completed the hosted page.
    Abandoned,
}

impl LinkState {
    fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, next),
            (NotStarted, LinkCreated)
                | (LinkCreated, Polling)
                | (Polling, Finished)
                | (LinkCreated | Polling, Abandoned)
        )
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::NotStarted => "not_started",
            LinkState::LinkCreated => "link_created",
            LinkState::Polling => "polling",
            LinkState::Finished => "finished",
            LinkState::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link {link_id} was not completed after {attempts} poll attempt(s)")]
    AuthTimeout { link_id: String, attempts: u32 },
    #[error("link cannot move from {from} to {to}")]
    InvalidTransition { from: LinkState, to: LinkState },
    #[error("link service answered with HTTP {status}")]
    Upstream { status: u16 },
    #[error("link service request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("link service returned an unexpected payload: {0}")]
    Shape(String),
}

/// One linking attempt for one brand.
#[derive(Debug, Clone)]
pub struct LinkSession {
    brand: Brand,
    state: LinkState,
    link: Option<HostedLink>,
    profile_id: Option<String>,
    attempts: u32,
}

impl LinkSession {
    pub fn new(brand: Brand) -> Self {
        Self {
            brand,
            state: LinkState::NotStarted,
            link: None,
            profile_id: None,
            attempts: 0,
        }
    }

    /// Resume tracking a link that was created elsewhere.
    pub fn resume(brand: Brand, link: HostedLink) -> Self {
        Self {
            state: LinkState::LinkCreated,
            link: Some(link),
            ..Self::new(brand)
        }
    }

    pub fn brand(&self) -> Brand {
        self.brand
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn link(&self) -> Option<&HostedLink> {
        self.link.as_ref()
    }

    pub fn link_id(&self) -> Option<&str> {
        self.link.as_ref().map(|link| link.link_id.as_str())
    }

    pub fn profile_id(&self) -> Option<&str> {
        self.profile_id.as_deref()
    }

    /// Poll attempts made so far, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn link_created(&mut self, link: HostedLink) -> Result<(), LinkError> {
        self.transition(LinkState::LinkCreated)?;
        self.link = Some(link);
        Ok(())
    }

    pub fn begin_polling(&mut self) -> Result<(), LinkError> {
        if self.state == LinkState::Polling {
            return Ok(());
        }
        self.transition(LinkState::Polling)
    }

    /// Record one poll answer. Returns true once the link is finished.
    pub fn record_poll(&mut self, status: &LinkStatus) -> Result<bool, LinkError> {
        self.begin_polling()?;
        self.attempts += 1;
        match status {
            LinkStatus::Pending => Ok(false),
            LinkStatus::Finished { profile_id } => {
                self.transition(LinkState::Finished)?;
                self.profile_id = profile_id.clone();
                Ok(true)
            }
        }
    }

    pub fn record_failed_poll(&mut self) {
        self.attempts += 1;
    }

    pub fn abandon(&mut self) -> Result<(), LinkError> {
        self.transition(LinkState::Abandoned)
    }

    fn transition(&mut self, next: LinkState) -> Result<(), LinkError> {
        if !self.state.can_transition_to(next) {
            return Err(LinkError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(
            event = "link_state_changed",
            brand = %self.brand,
            link_id = self.link_id().unwrap_or("-"),
            from = %self.state,
            to = %next,
        );
        self.state = next;
        Ok(())
    }
}

/// Cadence and ceiling for every polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_POLL_ATTEMPTS)
    }
}

/// Poll until the link reports completion or the policy runs out.
///
/// A failed poll counts as an attempt but does not end the loop; only
/// exhausting the policy does, which abandons the session and yields
/// [`LinkError::AuthTimeout`].
pub async fn poll_until_finished<F, Fut, E>(
    session: &mut LinkSession,
    policy: &PollPolicy,
    mut poll: F,
) -> Result<LinkStatus, LinkError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<LinkStatus, E>>,
    E: fmt::Display,
{
    let Some(link_id) = session.link_id().map(str::to_string) else {
        return Err(LinkError::InvalidTransition {
            from: session.state(),
            to: LinkState::Polling,
        });
    };
    session.begin_polling()?;

    for attempt in 1..=policy.max_attempts {
        match poll(link_id.clone()).await {
            Ok(status) => {
                if session.record_poll(&status)? {
                    tracing::info!(
                        event = "link_finished",
                        brand = %session.brand(),
                        link_id = %link_id,
                        attempts = session.attempts(),
                    );
                    return Ok(status);
                }
            }
            Err(err) => {
                session.record_failed_poll();
                tracing::debug!(
                    event = "link_poll_failed",
                    link_id = %link_id,
                    attempt,
                    error = %err,
                );
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    session.abandon()?;
    tracing::warn!(
        event = "link_poll_exhausted",
        brand = %session.brand(),
        link_id = %link_id,
        attempts = policy.max_attempts,
    );
    Err(LinkError::AuthTimeout {
        link_id,
        attempts: policy.max_attempts,
    })
}

/// REST client for the tool service's hosted-link endpoints.
#[derive(Debug, Clone)]
pub struct HostedLinkApi {
    http: reqwest::Client,
    base_url: String,
}

impl HostedLinkApi {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: util::normalize_base_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn create(&self, brand: Brand) -> Result<HostedLink, LinkError> {
        let body = self
            .send(
                self.http
                    .post(util::endpoint(&self.base_url, "api/link/create"))
                    .json(&json!({ "brand_id": brand.id() })),
            )
            .await?;
        HostedLink::from_payload(&body)
            .ok_or_else(|| LinkError::Shape("create response has no link_id".to_string()))
    }

    pub async fn status(&self, link_id: &str) -> Result<LinkStatus, LinkError> {
        if !is_valid_link_id(link_id) {
            return Err(LinkError::Shape(format!("invalid link id `{link_id}`")));
        }
        let url = util::endpoint(&self.base_url, &format!("api/link/status/{link_id}"));
        let body = self.send(self.http.get(url)).await?;
        Ok(LinkStatus::from_payload(&body))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, LinkError> {
        let response = request
            .timeout(REST_TIMEOUT)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(LinkError::Request)?;
        let status = response.status();
        if !status.is_success() {
            return Err(LinkError::Upstream {
                status: status.as_u16(),
            });
        }
        response.json::<Value>().await.map_err(LinkError::Request)
    }
}

/// Link ids end up in URL paths, so only a conservative alphabet is accepted.
pub fn is_valid_link_id(link_id: &str) -> bool {
    !link_id.is_empty()
        && link_id.len() <= MAX_LINK_ID_LEN
        && link_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && link_id != "."
        && link_id != ".."
}

/// Point hosted-link URLs on the tool service's origin at the app origin,
/// where the `/link` reverse proxy serves them. Other URLs pass through.
pub fn rewrite_hosted_url(hosted: &str, upstream_base: &str, app_origin: &str) -> String {
    let (Ok(hosted_url), Ok(upstream), Ok(mut rewritten)) = (
        Url::parse(hosted),
        Url::parse(upstream_base),
        Url::parse(app_origin),
    ) else {
        return hosted.to_string();
    };
    if hosted_url.origin() != upstream.origin() {
        return hosted.to_string();
    }
    rewritten.set_path(hosted_url.path());
    rewritten.set_query(hosted_url.query());
    rewritten.set_fragment(hosted_url.fragment());
    rewritten.to_string()
}

fn non_empty_str(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
