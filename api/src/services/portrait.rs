use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
const MODEL: &str = "black-forest-labs/FLUX.1-schnell-Free";
const PROVIDER: &str = "together";
const IMAGE_SIZE: u32 = 1024;
const STEPS: u32 = 4;
const GENERATION_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_PROMPT_PRODUCTS: usize = 20;
const FILE_MARKER: &str = "-portrait-";

pub const IMAGE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum PortraitError {
    #[error("image provider request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("image generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("image provider answered with HTTP {0}")]
    Status(u16),
    #[error("image provider returned no image data")]
    NoImage,
    #[error("image data is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("could not write image file: {0}")]
    Io(#[from] std::io::Error),
}

/// What the user picked in the portrait sidebar.
#[derive(Debug, Clone, Default)]
pub struct PortraitSelections<'a> {
    pub image_style: &'a str,
    pub gender: Option<&'a str>,
    pub traits: &'a [String],
    pub product_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct GeneratedImage {
    /// Path under which the image is served, e.g. `/generated/flux-portrait-ab12cd34.png`
    pub url: String,
    pub filename: String,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GenerationData>,
}

#[derive(Debug, Deserialize)]
struct GenerationData {
    b64_json: Option<String>,
}

/// Together-hosted FLUX image generation, writing results into the public
/// directory.
pub struct PortraitGenerator {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    output_dir: PathBuf,
    url_prefix: String,
}

impl PortraitGenerator {
    pub fn new(http: reqwest::Client, api_key: String, output_dir: PathBuf) -> Self {
        Self::with_base_url(http, api_key, output_dir, TOGETHER_BASE_URL)
    }

    pub fn with_base_url(
        http: reqwest::Client,
        api_key: String,
        output_dir: PathBuf,
        base_url: &str,
    ) -> Self {
        Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            output_dir,
            url_prefix: "/generated".to_string(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn generate(&self, prompt: &str) -> Result<GeneratedImage, PortraitError> {
        tracing::info!(event = "portrait_generation_started", model = MODEL, prompt_len = prompt.len());

        let request = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(GENERATION_TIMEOUT)
            .json(&json!({
                "model": MODEL,
                "prompt": prompt,
                "width": IMAGE_SIZE,
                "height": IMAGE_SIZE,
                "steps": STEPS,
                "n": 1,
                "response_format": "b64_json",
            }));
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                PortraitError::Timeout(GENERATION_TIMEOUT)
            } else {
                PortraitError::Request(err)
            }
        })?;
        if !response.status().is_success() {
            return Err(PortraitError::Status(response.status().as_u16()));
        }
        let body: GenerationResponse = response.json().await.map_err(PortraitError::Request)?;
        let encoded = body
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .ok_or(PortraitError::NoImage)?;

        let bytes = STANDARD.decode(encoded.as_bytes())?;
        let filename = format!("flux{FILE_MARKER}{}.png", random_id(8));
        tokio::fs::create_dir_all(&self.output_dir).await?;
        tokio::fs::write(self.output_dir.join(&filename), &bytes).await?;

        tracing::info!(event = "portrait_generated", filename = %filename, bytes = bytes.len());
        Ok(GeneratedImage {
            url: format!("{}/{filename}", self.url_prefix),
            filename,
            file_size: bytes.len() as u64,
            width: IMAGE_SIZE,
            height: IMAGE_SIZE,
            model: MODEL.to_string(),
            provider: PROVIDER.to_string(),
        })
    }

    /// Delete generated images older than [`IMAGE_MAX_AGE`] now and then
    /// every [`CLEANUP_INTERVAL`].
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let dir = self.output_dir.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(cutoff) = SystemTime::now().checked_sub(IMAGE_MAX_AGE) else {
                    continue;
                };
                match remove_older_than(&dir, cutoff).await {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(event = "portrait_cleanup", removed),
                    Err(err) => tracing::warn!(event = "portrait_cleanup_failed", error = %err),
                }
            }
        })
    }
}

/// Build the image prompt from the user's selections and purchases.
pub fn build_prompt(selections: &PortraitSelections<'_>) -> String {
    let style = match selections.image_style.trim() {
        "" => "realistic",
        style => style,
    };
    let subject = match selections.gender.map(str::trim).filter(|g| !g.is_empty()) {
        Some(gender) => format!("a {} person", gender.to_lowercase()),
        None => "a person".to_string(),
    };

    let mut prompt = format!("A {style} portrait of {subject}");
    let traits: Vec<&str> = selections
        .traits
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if !traits.is_empty() {
        prompt.push_str(&format!(" who is {}", traits.join(", ")));
    }

    let products = distinct_products(&selections.product_names);
    if products.is_empty() {
        prompt.push('.');
    } else {
        prompt.push_str(&format!(
            ", surrounded by items that reflect their purchases: {}.",
            products.join(", ")
        ));
    }
    prompt
}

/// Product names across every order, first occurrence wins.
pub fn product_names_from_orders(orders: &[Value]) -> Vec<String> {
    orders
        .iter()
        .filter_map(|order| order.get("product_names").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn distinct_products(names: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty() && seen.insert(n.to_lowercase()))
        .take(MAX_PROMPT_PRODUCTS)
        .collect()
}

/// Remove generated portraits last modified before `cutoff`.
pub async fn remove_older_than(dir: &Path, cutoff: SystemTime) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_name().to_string_lossy().contains(FILE_MARKER) {
            continue;
        }
        let modified = entry.metadata().await?.modified()?;
        if modified < cutoff {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
