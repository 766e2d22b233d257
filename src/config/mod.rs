use std::env;
use std::net::IpAddr;

use rocket::figment::providers::{Format as _, Serialized, Toml};
use rocket::figment::{Figment, Profile};
use serde::Deserialize;
use thiserror::Error;

use crate::api::ApiOptions;
use crate::engine::{Format, DEFAULT_MAX_PIXELS};
use crate::kvstore::KvStoreConfig;
use crate::parameters::{Size, SizeLimits};
use crate::processor::{ProcessorConfig, ShardOptions};
use crate::storage::StoragesConfig;

pub const CONFIG_FILE: &str = "App.toml";

/// Length of a hex MD5 key, the upper bound of a shard layout.
const KEY_LENGTH: usize = 32;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Unknown default format {0}")]
    UnknownFormat(String),

    #[error("Default quality should be <= 100, got {0}")]
    InvalidQuality(u8),

    #[error("Shard width {width} x depth {depth} exceeds the key length")]
    InvalidShard { width: usize, depth: usize },

    #[error("Invalid IP address {0}")]
    InvalidIpAddress(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    pub secret_key: Option<String>,
    #[serde(default)]
    pub shard: ShardConfig,
    #[serde(default)]
    pub options: OptionsConfig,
    pub kvstore: Option<KvStoreConfig>,
    pub storage: Option<StoragesConfig>,
    pub allowed_origins: Option<Vec<String>>,
    pub allowed_methods: Option<Vec<String>>,
    pub allowed_headers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShardConfig {
    #[serde(default = "default_shard_width")]
    pub width: usize,
    #[serde(default = "default_shard_depth")]
    pub depth: usize,
    #[serde(default = "default_true")]
    pub rest_only: bool,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            width: default_shard_width(),
            depth: default_shard_depth(),
            rest_only: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OptionsConfig {
    pub default_format: Option<String>,
    pub default_quality: Option<u8>,
    #[serde(default)]
    pub enable_delete: bool,
    #[serde(default)]
    pub enable_upload: bool,
    #[serde(default)]
    pub enable_cascade_delete: bool,
    #[serde(default)]
    pub single_flight: bool,
    #[serde(default = "default_allowed_mimetypes")]
    pub allowed_mimetypes: Vec<String>,
    /// Empty allows any size up to `max_pixels`.
    #[serde(default)]
    pub allowed_sizes: Vec<Size>,
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
    /// Clients allowed to delete and upload.
    #[serde(default)]
    pub allowed_ip_addresses: Vec<String>,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            default_format: None,
            default_quality: None,
            enable_delete: false,
            enable_upload: false,
            enable_cascade_delete: false,
            single_flight: false,
            allowed_mimetypes: default_allowed_mimetypes(),
            allowed_sizes: Vec::new(),
            max_pixels: default_max_pixels(),
            allowed_ip_addresses: Vec::new(),
        }
    }
}

fn default_port() -> u16 {
    3001
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("pixfit/{}", env!("CARGO_PKG_VERSION"))
}

fn default_shard_width() -> usize {
    1
}

fn default_shard_depth() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

fn default_allowed_mimetypes() -> Vec<String> {
    ["image/jpeg", "image/png", "image/gif", "image/bmp", "image/webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl AppConfig {
    /// Validated pipeline settings.
    pub fn processor_config(&self) -> Result<ProcessorConfig, ConfigError> {
        let default_format = match &self.options.default_format {
            Some(name) => Some(Format::from_name(name).ok_or_else(|| ConfigError::UnknownFormat(name.clone()))?),
            None => None,
        };

        if let Some(quality) = self.options.default_quality.filter(|q| *q > 100) {
            return Err(ConfigError::InvalidQuality(quality));
        }

        let ShardConfig { width, depth, rest_only } = self.shard;
        if width.checked_mul(depth).map_or(true, |n| n > KEY_LENGTH) {
            return Err(ConfigError::InvalidShard { width, depth });
        }

        Ok(ProcessorConfig {
            secret_key: self.secret_key.clone().filter(|s| !s.is_empty()),
            shard: ShardOptions { width, depth, rest_only },
            default_format,
            default_quality: self.options.default_quality,
            enable_cascade_delete: self.options.enable_cascade_delete,
            single_flight: self.options.single_flight,
            allowed_mimetypes: self.options.allowed_mimetypes.clone(),
            size_limits: SizeLimits {
                allowed_sizes: self.options.allowed_sizes.clone(),
                max_pixels: self.options.max_pixels,
            },
        })
    }

    /// Optional routes and the clients allowed to use the writing ones.
    pub fn api_options(&self) -> Result<ApiOptions, ConfigError> {
        let allowed_ip_addresses = self
            .options
            .allowed_ip_addresses
            .iter()
            .map(|ip| ip.parse::<IpAddr>().map_err(|_| ConfigError::InvalidIpAddress(ip.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ApiOptions {
            enable_delete: self.options.enable_delete,
            enable_upload: self.options.enable_upload,
            enable_path_routes: self.storage.as_ref().map_or(false, |s| s.src.is_some()),
            allowed_ip_addresses,
        })
    }

    /// CORS is enabled once both origins and methods are configured.
    pub fn cors_enabled(&self) -> bool {
        self.allowed_origins.is_some() && self.allowed_methods.is_some()
    }
}

/// Rocket defaults, then `App.toml`, then environment overrides.
pub fn figment() -> Figment {
    let mut figment = Figment::from(rocket::Config::default()).merge(Toml::file(CONFIG_FILE).nested());

    if let Ok(secret_key) = env::var("PIXFIT_SECRET_KEY") {
        figment = figment.merge(Serialized::global("secret_key", secret_key));
    }

    figment.select(Profile::from_env_or("APP_PROFILE", "default"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [default]
        port = 8080
        secret_key = "abcdef"

        [default.shard]
        width = 2
        depth = 3
        rest_only = false

        [default.options]
        default_format = "png"
        default_quality = 80
        enable_cascade_delete = true
        enable_upload = true
        allowed_mimetypes = ["image/png"]
        allowed_sizes = [{ width = 100, height = 100 }, { width = 320, height = 0 }]
        max_pixels = 1000000
        allowed_ip_addresses = ["127.0.0.1", "::1"]

        [default.kvstore]
        type = "cache"
        max_entries = 10

        [default.storage.src]
        type = "fs"
        location = "/var/pixfit"

        [release]
        port = 80
    "#;

    fn load(toml: &str, profile: &str) -> AppConfig {
        Figment::from(rocket::Config::default())
            .merge(Toml::string(toml).nested())
            .select(profile)
            .extract()
            .unwrap()
    }

    #[test]
    fn loads_sections() {
        let config = load(SAMPLE, "default");

        assert_eq!(config.port, 8080);
        assert_eq!(config.shard.width, 2);
        assert!(!config.shard.rest_only);
        assert_eq!(config.kvstore.as_ref().and_then(|k| k.kind.as_deref()), Some("cache"));
        assert_eq!(config.storage.as_ref().and_then(|s| s.src.as_ref()).map(|s| s.location.as_str()), Some("/var/pixfit"));
        assert!(config.storage.as_ref().map(|s| s.dst.is_none()).unwrap_or(false));
        assert!(!config.cors_enabled());

        let processor = config.processor_config().unwrap();
        assert_eq!(processor.secret_key.as_deref(), Some("abcdef"));
        assert_eq!(processor.default_format, Some(Format::Png));
        assert_eq!(processor.default_quality, Some(80));
        assert!(processor.enable_cascade_delete);
        assert!(!processor.single_flight);
        assert_eq!(processor.allowed_mimetypes, vec!["image/png".to_string()]);
        assert_eq!(
            processor.size_limits.allowed_sizes,
            vec![Size { width: 100, height: 100 }, Size { width: 320, height: 0 }]
        );
        assert_eq!(processor.size_limits.max_pixels, 1_000_000);

        let api = config.api_options().unwrap();
        assert!(api.enable_upload);
        assert!(!api.enable_delete);
        assert!(api.enable_path_routes);
        assert_eq!(api.allowed_ip_addresses.len(), 2);
    }

    #[test]
    fn profile_overrides_default() {
        let config = load(SAMPLE, "release");

        assert_eq!(config.port, 80);
        assert_eq!(config.shard.depth, 3);
    }

    #[test]
    fn defaults() {
        let config = load("[default]\n", "default");

        assert_eq!(config.timeout, 10);
        assert!(config.kvstore.is_none());
        assert!(config.storage.is_none());

        let processor = config.processor_config().unwrap();
        assert!(processor.secret_key.is_none());
        assert_eq!(processor.shard.width, 1);
        assert_eq!(processor.shard.depth, 2);
        assert!(processor.shard.rest_only);
        assert_eq!(processor.allowed_mimetypes.len(), 5);
        assert!(processor.size_limits.allowed_sizes.is_empty());
        assert_eq!(processor.size_limits.max_pixels, DEFAULT_MAX_PIXELS);

        let api = config.api_options().unwrap();
        assert!(!api.enable_path_routes);
        assert!(!api.enable_upload);
        assert!(api.allowed_ip_addresses.is_empty());
    }

    #[test]
    fn empty_secret_disables_signing() {
        let config = load("[default]\nsecret_key = \"\"\n", "default");
        assert!(config.processor_config().unwrap().secret_key.is_none());
    }

    #[test]
    fn rejects_invalid_options() {
        let config = load("[default.options]\ndefault_format = \"tiff\"\n", "default");
        assert_eq!(
            config.processor_config().unwrap_err(),
            ConfigError::UnknownFormat("tiff".to_string())
        );

        let config = load("[default.options]\ndefault_quality = 120\n", "default");
        assert_eq!(config.processor_config().unwrap_err(), ConfigError::InvalidQuality(120));

        let config = load("[default.shard]\nwidth = 8\ndepth = 5\n", "default");
        assert_eq!(
            config.processor_config().unwrap_err(),
            ConfigError::InvalidShard { width: 8, depth: 5 }
        );

        let config = load("[default.options]\nallowed_ip_addresses = [\"localhost\"]\n", "default");
        assert_eq!(
            config.api_options().unwrap_err(),
            ConfigError::InvalidIpAddress("localhost".to_string())
        );
    }

    #[test]
    fn overflowing_shard_layout_is_rejected() {
        let mut config = load("[default]\n", "default");
        config.shard.width = usize::MAX;
        config.shard.depth = 2;

        assert_eq!(
            config.processor_config().unwrap_err(),
            ConfigError::InvalidShard { width: usize::MAX, depth: 2 }
        );
    }

    #[test]
    fn cors_requires_origins_and_methods() {
        let config = load(
            "[default]\nallowed_origins = [\"*\"]\nallowed_methods = [\"GET\"]\n",
            "default",
        );
        assert!(config.cors_enabled());
    }
}
