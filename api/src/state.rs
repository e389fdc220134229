use std::sync::Arc;

use portrait_mcp_runtime::{ClientPool, HostedLinkApi};

use crate::config::Settings;
use crate::middleware::session::SessionKeys;
use crate::services::analytics::Analytics;
use crate::services::geolocation::Geolocator;
use crate::services::portrait::PortraitGenerator;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pool: Arc<ClientPool>,
    pub links: HostedLinkApi,
    /// Client for proxied upstream calls (auth, reverse proxy).
    pub http: reqwest::Client,
    pub sessions: SessionKeys,
    pub geo: Arc<Geolocator>,
    pub analytics: Analytics,
    /// `None` when no image provider key is configured.
    pub portraits: Option<Arc<PortraitGenerator>>,
}
