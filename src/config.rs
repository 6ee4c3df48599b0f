use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 256 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{key}`: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Maps environment variable names onto the flat settings keys.
const ENV_KEYS: &[(&str, &str)] = &[
    ("CUSTOM_AI_BASE_URL", "baseUrl"),
    ("CUSTOM_AI_API_KEY", "apiKey"),
    ("CUSTOM_AI_MODEL", "model"),
    ("CUSTOM_AI_CONNECT_TIMEOUT", "connectTimeoutSeconds"),
    ("CUSTOM_AI_TIMEOUT", "readTimeoutSeconds"),
    ("CUSTOM_AI_ACCEPT_INVALID_CERTS", "acceptInvalidCerts"),
    ("MAX_DOCUMENT_BYTES", "maxDocumentBytes"),
];

/// Connection settings for the OpenAI-compatible completions endpoint.
///
/// Built once at startup and shared read-only by every request.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Skip TLS certificate verification toward the upstream. Self-hosted
    /// endpoints commonly present self-signed certificates, so this is on
    /// unless `acceptInvalidCerts=false` is configured.
    pub accept_invalid_certs: bool,
    pub max_document_bytes: usize,
}

impl UpstreamSettings {
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let raw_base = required(map, "baseUrl")?;
        let base_url = raw_base.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(ConfigError::Invalid { key: "baseUrl", value: raw_base.to_string() });
        }
        Ok(Self {
            base_url: base_url.to_string(),
            api_key: required(map, "apiKey")?.to_string(),
            model: required(map, "model")?.to_string(),
            connect_timeout: Duration::from_secs(parsed(map, "connectTimeoutSeconds", DEFAULT_CONNECT_TIMEOUT_SECS)?),
            read_timeout: Duration::from_secs(parsed(map, "readTimeoutSeconds", DEFAULT_READ_TIMEOUT_SECS)?),
            accept_invalid_certs: parsed_bool(map, "acceptInvalidCerts", true)?,
            max_document_bytes: parsed(map, "maxDocumentBytes", DEFAULT_MAX_DOCUMENT_BYTES)?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let map = ENV_KEYS
            .iter()
            .filter_map(|(var, key)| std::env::var(var).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self::from_map(&map)
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { key: "PORT", value: v })?,
            Err(_) => 8080,
        };
        let ip = match std::env::var("BIND_ADDR") {
            Ok(v) => v.trim().parse::<IpAddr>().map_err(|_| ConfigError::Invalid { key: "BIND_ADDR", value: v })?,
            Err(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        Ok(Self { addr: SocketAddr::new(ip, port) })
    }
}

fn required<'a>(map: &'a HashMap<String, String>, key: &'static str) -> Result<&'a str, ConfigError> {
    map.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parsed<T: std::str::FromStr>(map: &HashMap<String, String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match map.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid { key, value: v.to_string() }),
        None => Ok(default),
    }
}

fn parsed_bool(map: &HashMap<String, String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match map.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: v }),
        },
    }
}
