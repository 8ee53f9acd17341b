use std::{collections::BTreeMap, env, fmt, path::PathBuf, str::FromStr};

use async_trait::async_trait;
use chrono::FixedOffset;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_APP_ENV: &str = "dev";
pub const DEFAULT_CONFIG_ROOT: &str = "configs";
pub const DEFAULT_TENANT: &str = "broker";
pub const DEFAULT_STATE: &str = "MENU";
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = -3;

/// Key/value source for process configuration.
#[async_trait]
pub trait ConfigManagerType: Send + Sync + fmt::Debug {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment after loading `.env.<APP_ENV>` and `.env`
/// from `dir`. Variables already set in the environment win, then the
/// environment-specific file, then the shared one.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    loaded: Vec<PathBuf>,
}

impl EnvConfigManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_APP_ENV.to_string());

        let mut loaded = Vec::new();
        for file in [dir.join(format!(".env.{app_env}")), dir.join(".env")] {
            if !file.exists() {
                debug!("no env file at {}", file.display());
                continue;
            }
            // dotenvy never overrides a variable that is already set
            match dotenvy::from_path(&file) {
                Ok(()) => {
                    info!("Loaded env from {}", file.display());
                    loaded.push(file);
                }
                Err(e) => tracing::warn!("could not load {}: {e}", file.display()),
            }
        }
        Self { loaded }
    }

    pub fn loaded_files(&self) -> &[PathBuf] {
        &self.loaded
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        self.map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set(&self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PUBLIC_BASE_URL {value:?} is not a valid URL: {source}")]
    InvalidBaseUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("CALENDAR_UTC_OFFSET_HOURS {0:?} must be a whole number of hours between -23 and 23")]
    InvalidOffset(String),
    #[error("TENANT_BY_PHONE_NUMBER_ID entry {0:?} must look like `id:tenant`")]
    InvalidTenantMap(String),
}

/// Settings the engine needs at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub app_env: String,
    pub config_root: PathBuf,
    pub public_base_url: Option<Url>,
    pub default_tenant: String,
    pub tenant_by_routing_key: BTreeMap<String, String>,
    pub default_state: String,
    pub utc_offset: FixedOffset,
}

impl AppConfig {
    pub async fn from_manager(config: &dyn ConfigManagerType) -> Result<Self, ConfigError> {
        let get = |key: &'static str| async move {
            config
                .get(key)
                .await
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let public_base_url = match get("PUBLIC_BASE_URL").await {
            Some(value) => Some(
                Url::parse(&value).map_err(|source| ConfigError::InvalidBaseUrl { value, source })?,
            ),
            None => None,
        };

        let utc_offset = match get("CALENDAR_UTC_OFFSET_HOURS").await {
            Some(raw) => parse_offset(&raw)?,
            None => offset_hours(DEFAULT_UTC_OFFSET_HOURS)
                .ok_or_else(|| ConfigError::InvalidOffset(DEFAULT_UTC_OFFSET_HOURS.to_string()))?,
        };

        let tenant_by_routing_key = match get("TENANT_BY_PHONE_NUMBER_ID").await {
            Some(raw) => parse_tenant_map(&raw)?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            app_env: get("APP_ENV").await.unwrap_or_else(|| DEFAULT_APP_ENV.to_string()),
            config_root: get("CONFIG_ROOT")
                .await
                .unwrap_or_else(|| DEFAULT_CONFIG_ROOT.to_string())
                .into(),
            public_base_url,
            default_tenant: get("DEFAULT_TENANT")
                .await
                .unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            tenant_by_routing_key,
            default_state: get("DEFAULT_STATE")
                .await
                .unwrap_or_else(|| DEFAULT_STATE.to_string()),
            utc_offset,
        })
    }
}

fn offset_hours(hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(hours.checked_mul(3600)?)
}

fn parse_offset(raw: &str) -> Result<FixedOffset, ConfigError> {
    i32::from_str(raw)
        .ok()
        .and_then(offset_hours)
        .ok_or_else(|| ConfigError::InvalidOffset(raw.to_string()))
}

/// Parses `id:tenant,id:tenant`. Blank entries are skipped.
pub fn parse_tenant_map(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut map = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, tenant) = entry
            .split_once(':')
            .map(|(id, tenant)| (id.trim(), tenant.trim()))
            .filter(|(id, tenant)| !id.is_empty() && !tenant.is_empty())
            .ok_or_else(|| ConfigError::InvalidTenantMap(entry.to_string()))?;
        map.insert(id.to_string(), tenant.to_string());
    }
    Ok(map)
}
