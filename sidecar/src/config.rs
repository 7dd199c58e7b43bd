use std::env;
use thiserror::Error;
use url::Url;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8999;
pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_DRPC_URL: &str = "https://main.drpc.org";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not a valid port number: {1}")]
    InvalidPort(&'static str, String),

    #[error("{0} is not a valid URL: {1}")]
    InvalidUrl(&'static str, url::ParseError),

    #[error("port cannot be 0")]
    ZeroPort,
}

/// Network listener address.
#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        Ok(())
    }
}

/// Process-wide configuration, read from the environment exactly once at
/// startup. Request handlers receive it by reference and never consult
/// ambient state themselves.
#[derive(Clone, Debug)]
pub struct Config {
    /// Main listener for JSON-RPC traffic.
    pub listener: Listener,
    /// Metrics listener; disabled unless `DRPC_METRICS_HOST` is set.
    pub metrics_listener: Option<Listener>,
    /// Upstream RPC aggregation service.
    pub drpc_url: Url,
    /// Legacy provider endpoint proxied by the `/test` path.
    pub rpc_provider: Option<Url>,
    /// Skip provider signature verification in the aggregator client.
    pub skip_signature_check: bool,
    /// Skip deep validation of aggregator responses.
    pub skip_response_deep_check: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup, which is
    /// what tests use instead of mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = non_empty(lookup("DRPC_SIDECAR_HOST")).unwrap_or_else(|| DEFAULT_HOST.into());
        let port = parse_port(lookup("DRPC_SIDECAR_PORT"), "DRPC_SIDECAR_PORT", DEFAULT_PORT)?;

        let drpc_url = match non_empty(lookup("DRPC_SIDECAR_URL")) {
            Some(raw) => parse_url(&raw, "DRPC_SIDECAR_URL")?,
            None => parse_url(DEFAULT_DRPC_URL, "DRPC_SIDECAR_URL")?,
        };

        let rpc_provider = non_empty(lookup("DRPC_SIDECAR_RPC_PROVIDER"))
            .map(|raw| parse_url(&raw, "DRPC_SIDECAR_RPC_PROVIDER"))
            .transpose()?;

        let metrics_listener = non_empty(lookup("DRPC_METRICS_HOST"))
            .map(|metrics_host| {
                Ok::<_, ConfigError>(Listener {
                    host: metrics_host,
                    port: parse_port(
                        lookup("DRPC_METRICS_PORT"),
                        "DRPC_METRICS_PORT",
                        DEFAULT_METRICS_PORT,
                    )?,
                })
            })
            .transpose()?;

        Ok(Config {
            listener: Listener { host, port },
            metrics_listener,
            drpc_url,
            rpc_provider,
            skip_signature_check: is_set(lookup("DRPC_SKIP_SIG_CHECK")),
            skip_response_deep_check: is_set(lookup("DRPC_SKIP_RESPONSE_CHECK")),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener.validate()?;
        if let Some(metrics_listener) = &self.metrics_listener {
            metrics_listener.validate()?;
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Boolean flags follow shell convention: any non-empty value enables them.
fn is_set(value: Option<String>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

fn parse_port(
    raw: Option<String>,
    name: &'static str,
    default: u16,
) -> Result<u16, ConfigError> {
    match non_empty(raw) {
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(name, raw)),
        None => Ok(default),
    }
}

fn parse_url(raw: &str, name: &'static str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(name, e))
}
