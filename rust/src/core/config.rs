use std::path::Path;

use serde::Deserialize;

use super::AppCore;

const DEFAULT_API_BASE_URL: &str = "https://api.shedx.app";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) disable_network: Option<bool>,
    pub(super) api_base_url: Option<String>,
    /// Overrides the derived websocket URL when the realtime endpoint lives
    /// somewhere other than the API host.
    pub(super) ws_url: Option<String>,
    /// Show canned demo messages when the first history page fails to load.
    /// Off unless a build explicitly opts in.
    pub(super) demo_fallback: Option<bool>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join("shedx_config.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    serde_json::from_slice::<AppConfig>(&bytes).unwrap_or_default()
}

/// `https://host/api` -> `wss://host/api`, `http://` -> `ws://`. Anything
/// already ws/wss passes through.
pub(super) fn websocket_url(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        return format!("wss://{rest}");
    }
    if let Some(rest) = base.strip_prefix("http://") {
        return format!("ws://{rest}");
    }
    base.to_string()
}

impl AppCore {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("SHEDX_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub(super) fn api_base_url(&self) -> String {
        self.config
            .api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub(super) fn ws_url(&self) -> String {
        match &self.config.ws_url {
            Some(url) => url.clone(),
            None => websocket_url(&self.api_base_url()),
        }
    }

    pub(super) fn demo_fallback_enabled(&self) -> bool {
        self.config.demo_fallback.unwrap_or(false)
    }
}
