use std::{collections::HashMap, fs};

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub database_url: String,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "https://api.aiteni.com/v1".into(),
            database_url: "sqlite://./data/aiteni.db".into(),
            request_timeout_secs: 10,
        }
    }
}

/// Defaults, overridden by `aiteni.toml`, overridden by `AITENI_*` env vars.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("aiteni.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("server_url") {
                settings.server_url = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("request_timeout_secs") {
                if let Ok(parsed) = v.parse::<u64>() {
                    settings.request_timeout_secs = parsed;
                }
            }
        }
    }

    if let Ok(v) = std::env::var("AITENI_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("AITENI_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("AITENI_REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    settings
}
