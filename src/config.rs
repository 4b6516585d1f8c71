use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3002,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional config file, and
    /// `CUBEDB_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);
        config = config.add_source(config::File::with_name("config").required(false));
        config = config.add_source(
            config::Environment::with_prefix("CUBEDB")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Process-wide string parameters from the `CUBE_DB_PARAMS` JSON blob,
/// read once and cached for the process lifetime.
#[derive(Debug, Clone)]
pub struct SystemParams {
    /// Default user id bound to requests that carry no identity.
    pub default_user: String,
    pub params: BTreeMap<String, String>,
}

impl SystemParams {
    fn from_env() -> Self {
        let params: BTreeMap<String, String> = std::env::var("CUBE_DB_PARAMS")
            .ok()
            .and_then(|blob| serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&blob).ok())
            .map(|map| {
                map.into_iter()
                    .map(|(k, v)| {
                        let s = match v {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (k, s)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let default_user = params
            .get("user")
            .cloned()
            .unwrap_or_else(|| "anonymous".to_string());
        SystemParams {
            default_user,
            params,
        }
    }
}

static SYSTEM_PARAMS: OnceLock<SystemParams> = OnceLock::new();

pub fn system_params() -> &'static SystemParams {
    SYSTEM_PARAMS.get_or_init(SystemParams::from_env)
}
