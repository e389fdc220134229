use chrono::Utc;
use serde_json::{Map, Value, json};

const SEGMENT_BASE_URL: &str = "https://api.segment.io/v1";
const SOURCE: &str = "data-portrait";

/// Fire-and-forget Segment HTTP client. Calls never fail the request that
/// triggered them; without a write key they are dropped.
#[derive(Clone)]
pub struct Analytics {
    http: reqwest::Client,
    write_key: Option<String>,
    base_url: String,
}

impl Analytics {
    pub fn new(http: reqwest::Client, write_key: Option<String>) -> Self {
        Self::with_base_url(http, write_key, SEGMENT_BASE_URL)
    }

    pub fn with_base_url(http: reqwest::Client, write_key: Option<String>, base_url: &str) -> Self {
        Self {
            http,
            write_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.write_key.is_some()
    }

    pub fn track(&self, user_id: &str, event: &str, properties: Map<String, Value>) {
        if user_id.is_empty() || event.is_empty() {
            return;
        }
        self.dispatch("track", track_payload(user_id, event, properties));
    }

    pub fn identify(&self, user_id: &str, traits: Map<String, Value>) {
        if user_id.is_empty() {
            return;
        }
        self.dispatch("identify", identify_payload(user_id, traits));
    }

    fn dispatch(&self, kind: &'static str, payload: Value) {
        let Some(write_key) = self.write_key.clone() else {
            tracing::debug!(event = "analytics_dropped", kind, reason = "no_write_key");
            return;
        };
        let request = self
            .http
            .post(format!("{}/{kind}", self.base_url))
            .basic_auth(write_key, Some(""))
            .json(&payload);
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => tracing::warn!(
                    event = "analytics_failed",
                    kind,
                    status = response.status().as_u16(),
                ),
                Err(err) => tracing::warn!(event = "analytics_failed", kind, error = %err),
            }
        });
    }
}

fn track_payload(user_id: &str, event: &str, mut properties: Map<String, Value>) -> Value {
    properties.insert("source".to_string(), json!(SOURCE));
    properties.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    json!({
        "userId": user_id,
        "event": event,
        "properties": properties,
    })
}

/// A user id that looks like an email doubles as the `email` trait.
fn identify_payload(user_id: &str, mut traits: Map<String, Value>) -> Value {
    if !traits.contains_key("email") && user_id.contains('@') {
        traits.insert("email".to_string(), json!(user_id));
    }
    json!({
        "userId": user_id,
        "traits": traits,
    })
}
