use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
/// Page size of `GET /api/messages`; a shorter page means the history is exhausted.
pub const HISTORY_PAGE_SIZE: usize = 10;
const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub reconnect_delay: Duration,
    pub history_page_size: usize,
    pub event_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            history_page_size: HISTORY_PAGE_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientSettings {
    pub fn with_server_url(mut self, server_url: &str) -> Self {
        self.server_url = normalize_server_url(server_url);
        self
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new("client.toml"))
}

pub fn load_settings_from(path: &Path) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

    settings
}

fn apply_file_overrides(settings: &mut ClientSettings, raw: &str) {
    let Ok(file_cfg) = raw.parse::<toml::Table>() else {
        tracing::warn!("ignoring unreadable client config file");
        return;
    };

    if let Some(v) = file_cfg.get("server_url").and_then(|v| v.as_str()) {
        settings.server_url = normalize_server_url(v);
    }
    if let Some(v) = file_cfg.get("reconnect_delay_ms").and_then(|v| v.as_integer()) {
        if let Ok(ms) = u64::try_from(v) {
            settings.reconnect_delay = Duration::from_millis(ms);
        }
    }
}

fn apply_env_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CHAT_SERVER_URL") {
        settings.server_url = normalize_server_url(&v);
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = normalize_server_url(&v);
    }

    if let Some(v) = lookup("APP__RECONNECT_DELAY_MS") {
        if let Ok(ms) = v.parse::<u64>() {
            settings.reconnect_delay = Duration::from_millis(ms);
        }
    }
}

pub fn normalize_server_url(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('/');
    if raw.is_empty() {
        return DEFAULT_SERVER_URL.to_string();
    }
    if raw.contains("://") {
        return raw.to_string();
    }
    format!("http://{raw}")
}

/// Derives the push-channel endpoint (`ws[s]://host/ws?token=...`) from the HTTP base URL.
pub fn push_endpoint(server_url: &str, token: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(server_url)
        .with_context(|| format!("invalid server url '{server_url}'"))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(anyhow!("server url must use http or https, got '{other}'")),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot derive websocket url from '{server_url}'"))?;
    url.set_path("/ws");
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url)
}

/// Endpoint without its query string, safe to log.
pub fn redacted_endpoint(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
