use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {value}")]
    InvalidUrl { var: &'static str, value: String },

    #[error("{var} is not a valid port: {value}")]
    InvalidPort { var: &'static str, value: String },

    #[error("pool configuration error: {0}")]
    Pool(#[from] tokenpool::PoolConfigError),
}

#[derive(Clone, Debug)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

/// Base URLs for every upstream the pipelines talk to. Production values
/// are the defaults; tests point these at mock servers.
#[derive(Clone, Debug)]
pub struct Upstreams {
    pub mojang_api: Url,
    pub mojang_session: Url,
    /// Off-box relay used when Mojang rate limits this box directly.
    pub mojang_proxy: Option<Url>,
    pub steam_api: Url,
    pub xbox_api: Url,
    pub hytale_data: Url,
    pub hytale_oauth: Url,
    pub hytale_services: Url,
    /// Vendor API of last resort, keyed by `NODECRAFT_API_KEY`.
    pub vendor_api: Url,
}

impl Default for Upstreams {
    fn default() -> Self {
        let parse = |s: &str| Url::parse(s).expect("static upstream URL");
        Self {
            mojang_api: parse("https://api.minecraftservices.com/"),
            mojang_session: parse("https://sessionserver.mojang.com/"),
            mojang_proxy: None,
            steam_api: parse("https://api.steampowered.com/"),
            xbox_api: parse("https://xbl.io/api/v2/"),
            hytale_data: parse("https://account-data.hytale.com/"),
            hytale_oauth: parse("https://oauth.hytale.com/"),
            hytale_services: parse("https://account-data.hytale.com/"),
            vendor_api: parse("https://api.nodecraft.com/"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub listener: Listener,
    pub xbox_api_key: Option<String>,
    /// Up to four keys; one is picked at random per call.
    pub steam_api_keys: Vec<String>,
    pub nodecraft_api_key: Option<String>,
    /// When true, persistent-cache reads are skipped. Writes still happen.
    pub bypass_cache: bool,
    /// Raw-TLS-first transport chain for https upstreams.
    pub use_raw_sockets: bool,
    /// Up to three container proxy instances, picked at random.
    pub container_proxy_urls: Vec<Url>,
    pub statsd: Option<(String, u16)>,
    pub upstreams: Upstreams,
    pub pool: tokenpool::PoolConfig,
    /// Directory for the persisted token blob.
    pub token_store_dir: std::path::PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env_or("HOST", "0.0.0.0");
        let port = match std::env::var("PORT") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidPort {
                var: "PORT",
                value,
            })?,
            Err(_) => 8080,
        };

        let mut steam_api_keys = Vec::new();
        for var in ["STEAM_APIKEY", "STEAM_APIKEY2", "STEAM_APIKEY3", "STEAM_APIKEY4"] {
            if let Some(key) = env_non_empty(var) {
                steam_api_keys.push(key);
            }
        }

        let container_proxy_urls = match env_non_empty("CONTAINER_PROXY_URLS") {
            Some(raw) => {
                let mut urls = Vec::new();
                for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    let url = Url::parse(part).map_err(|_| ConfigError::InvalidUrl {
                        var: "CONTAINER_PROXY_URLS",
                        value: part.to_string(),
                    })?;
                    urls.push(url);
                }
                urls.truncate(3);
                urls
            }
            None => Vec::new(),
        };

        let mut upstreams = Upstreams::default();
        if let Some(raw) = env_non_empty("MOJANG_PROXY_URL") {
            let url = Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl {
                var: "MOJANG_PROXY_URL",
                value: raw,
            })?;
            upstreams.mojang_proxy = Some(url);
        }

        let statsd = env_non_empty("STATSD_HOST").map(|host| {
            let port = env_non_empty("STATSD_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8125);
            (host, port)
        });

        Ok(Self {
            listener: Listener { host, port },
            xbox_api_key: env_non_empty("XBOX_APIKEY"),
            steam_api_keys,
            nodecraft_api_key: env_non_empty("NODECRAFT_API_KEY"),
            bypass_cache: env_or("BYPASS_CACHE", "") == "true",
            use_raw_sockets: env_or("USE_RAW_SOCKETS", "true") != "false",
            container_proxy_urls,
            statsd,
            upstreams,
            pool: tokenpool::PoolConfig::from_env()?,
            token_store_dir: env_or("TOKEN_STORE_DIR", "/var/lib/gateway").into(),
        })
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
