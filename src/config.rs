use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Database {
    pub url: String,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: "sqlite:galley.db?mode=rwc".to_string(),
        }
    }
}

/// The backend the façade talks to.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Api {
    pub base_url: String,
    pub timeout_ms: u64,
    // HEAD target for the connectivity probe
    pub probe_path: String,
}

impl Api {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_ms: 10_000,
            probe_path: "/".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Csrf {
    pub cookie_name: String,
    pub header_name: String,
}

impl Default for Csrf {
    fn default() -> Self {
        Self {
            cookie_name: "csrftoken".to_string(),
            header_name: "X-CSRFToken".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Replay {
    /// Deterministic failures before a request is abandoned. 0 never abandons.
    pub max_attempts: u32,
    pub probe_interval_secs: u64,
}

impl Default for Replay {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            probe_interval_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Management {
    pub listen: String,
    // no auth when unset
    pub secret: Option<String>,
}

impl Default for Management {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3443".to_string(),
            secret: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub api: Api,
    pub csrf: Csrf,
    pub replay: Replay,
    pub management: Management,
}
