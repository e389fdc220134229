use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::MaxMindCredentials;

const MAXMIND_BASE_URL: &str = "https://geoip.maxmind.com/geoip/v2.1/city";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const UNKNOWN_IP: &str = "unknown";

/// Location context forwarded to the tool service with auth requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct LocationData {
    pub ip: String,
    pub city: Option<String>,
    pub state: Option<String>,
    /// ISO 3166-1 alpha-2 country code
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

/// The parts of a GeoIP2 City answer this server uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CityRecord {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    /// Second-level domain of the network's reverse DNS, when MaxMind knows it.
    pub domain: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Names {
    en: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    names: Names,
}

#[derive(Debug, Default, Deserialize)]
struct Country {
    iso_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Postal {
    code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Traits {
    domain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CityResponse {
    city: Option<Named>,
    #[serde(default)]
    subdivisions: Vec<Named>,
    country: Option<Country>,
    postal: Option<Postal>,
    #[serde(default)]
    traits: Traits,
}

impl From<CityResponse> for CityRecord {
    fn from(raw: CityResponse) -> Self {
        Self {
            city: raw.city.and_then(|c| c.names.en),
            // The most specific subdivision is listed last.
            state: raw.subdivisions.into_iter().next_back().and_then(|s| s.names.en),
            country: raw.country.and_then(|c| c.iso_code),
            postal_code: raw.postal.and_then(|p| p.code),
            domain: raw.traits.domain,
        }
    }
}

struct CacheEntry {
    stored_at: Instant,
    record: CityRecord,
}

/// GeoIP2 City web-service client. Without credentials every lookup misses.
pub struct Geolocator {
    http: reqwest::Client,
    credentials: Option<MaxMindCredentials>,
    base_url: String,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl Geolocator {
    pub fn new(http: reqwest::Client, credentials: Option<MaxMindCredentials>) -> Self {
        Self::with_base_url(http, credentials, MAXMIND_BASE_URL)
    }

    pub fn with_base_url(
        http: reqwest::Client,
        credentials: Option<MaxMindCredentials>,
        base_url: &str,
    ) -> Self {
        Self {
            http,
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    /// Resolve `ip`. Failures are logged and treated as "no data".
    pub async fn lookup(&self, ip: &str) -> Option<CityRecord> {
        if is_unroutable(ip) {
            return None;
        }
        let credentials = self.credentials.as_ref()?;

        if let Some(record) = self.cached(ip) {
            tracing::debug!(event = "geolocation_cache_hit", ip = %ip);
            return Some(record);
        }

        let url = format!("{}/{}", self.base_url, ip);
        let response = self
            .http
            .get(url)
            .basic_auth(&credentials.account_id, Some(&credentials.license_key))
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await;
        let record = match response {
            Ok(response) if response.status().is_success() => {
                match response.json::<CityResponse>().await {
                    Ok(raw) => CityRecord::from(raw),
                    Err(err) => {
                        tracing::warn!(event = "geolocation_failed", ip = %ip, error = %err);
                        return None;
                    }
                }
            }
            Ok(response) => {
                tracing::warn!(
                    event = "geolocation_failed",
                    ip = %ip,
                    status = response.status().as_u16(),
                );
                return None;
            }
            Err(err) => {
                tracing::warn!(event = "geolocation_failed", ip = %ip, error = %err);
                return None;
            }
        };

        self.cache
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(
                ip.to_string(),
                CacheEntry {
                    stored_at: Instant::now(),
                    record: record.clone(),
                },
            );
        Some(record)
    }

    pub async fn locate(&self, ip: &str) -> LocationData {
        let record = self.lookup(ip).await.unwrap_or_default();
        LocationData {
            ip: ip.to_string(),
            city: record.city,
            state: record.state,
            country: record.country,
            postal_code: record.postal_code,
        }
    }

    fn cached(&self, ip: &str) -> Option<CityRecord> {
        let mut cache = self.cache.lock().unwrap_or_else(|poison| poison.into_inner());
        match cache.get(ip) {
            Some(entry) if entry.stored_at.elapsed() < CACHE_TTL => Some(entry.record.clone()),
            Some(_) => {
                cache.remove(ip);
                None
            }
            None => None,
        }
    }
}

/// First `x-forwarded-for` hop, else the socket peer, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

fn is_unroutable(ip: &str) -> bool {
    matches!(ip, UNKNOWN_IP | "127.0.0.1" | "::1") || ip.is_empty()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::{Path, State};
    use axum::http::HeaderValue;
    use axum::routing::get;
    use serde_json::{Value, json};

    use super::*;

    fn credentials() -> MaxMindCredentials {
        MaxMindCredentials {
            account_id: "42".to_string(),
            license_key: "license".to_string(),
        }
    }

    async fn fake_maxmind(hits: Arc<AtomicUsize>) -> String {
        async fn city(
            State(hits): State<Arc<AtomicUsize>>,
            Path(ip): Path<String>,
        ) -> axum::Json<Value> {
            hits.fetch_add(1, Ordering::SeqCst);
            axum::Json(json!({
                "city": { "names": { "en": "Portland" } },
                "subdivisions": [
                    { "names": { "en": "Oregon" } },
                    { "names": { "en": "Multnomah" } }
                ],
                "country": { "iso_code": "US" },
                "postal": { "code": "97201" },
                "traits": { "ip_address": ip, "domain": "compute.amazonaws.com" }
            }))
        }

        let app = Router::new()
            .route("/city/{ip}", get(city))
            .with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("listener has an address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        format!("http://{addr}/city")
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        let peer: SocketAddr = "10.0.0.2:5555".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "10.0.0.2");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[tokio::test]
    async fn lookup_maps_city_answer_and_caches_it() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = fake_maxmind(hits.clone()).await;
        let geo = Geolocator::with_base_url(reqwest::Client::new(), Some(credentials()), &base);

        let record = geo.lookup("198.51.100.4").await.expect("record");
        assert_eq!(record.city.as_deref(), Some("Portland"));
        assert_eq!(record.state.as_deref(), Some("Multnomah"));
        assert_eq!(record.country.as_deref(), Some("US"));
        assert_eq!(record.postal_code.as_deref(), Some("97201"));
        assert_eq!(record.domain.as_deref(), Some("compute.amazonaws.com"));

        let location = geo.locate("198.51.100.4").await;
        assert_eq!(location.ip, "198.51.100.4");
        assert_eq!(location.city.as_deref(), Some("Portland"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loopback_and_unconfigured_lookups_skip_the_network() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = fake_maxmind(hits.clone()).await;

        let configured = Geolocator::with_base_url(reqwest::Client::new(), Some(credentials()), &base);
        assert!(configured.lookup("127.0.0.1").await.is_none());
        assert!(configured.lookup("::1").await.is_none());
        assert!(configured.lookup("unknown").await.is_none());

        let unconfigured = Geolocator::with_base_url(reqwest::Client::new(), None, &base);
        assert!(!unconfigured.is_enabled());
        assert!(unconfigured.lookup("198.51.100.4").await.is_none());
        assert_eq!(
            unconfigured.locate("198.51.100.4").await,
            LocationData {
                ip: "198.51.100.4".to_string(),
                ..LocationData::default()
            }
        );

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
