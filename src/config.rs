//! Application configuration module.
//!
//! The configuration is a JSON document; every field has a default so a
//! missing file or a partial document still yields a runnable server
//! (one plain-HTTP listener on localhost:7649, auth disabled, no mounts).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Region used when a mount does not configure one.
pub const DEFAULT_REGION: &str = "us-west-1";

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Web server configuration
    #[serde(default)]
    pub web: WebConfig,
    /// Mount name -> bucket configuration
    #[serde(default)]
    pub mounts: HashMap<String, MountConfig>,
}

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Addresses the server should bind to
    #[serde(default = "default_bind_addresses")]
    pub bind_addresses: Vec<BindAddress>,
    /// HTTPS certificate configuration, required when any address is HTTPS
    #[serde(default)]
    pub https: HttpsConfig,
    /// Enable HTTP Basic auth
    #[serde(default)]
    pub enable_auth: bool,
    /// Path to the htpasswd credential file
    #[serde(default)]
    pub htpasswd_file: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addresses: default_bind_addresses(),
            https: HttpsConfig::default(),
            enable_auth: false,
            htpasswd_file: String::new(),
        }
    }
}

/// A single listen address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindAddress {
    /// Host name or IP address (IPv4 or IPv6)
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub is_https: bool,
}

impl BindAddress {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_bind_addresses() -> Vec<BindAddress> {
    vec![BindAddress {
        host: "localhost".to_string(),
        port: 7649,
        is_https: false,
    }]
}

/// HTTPS certificate files (both mandatory when HTTPS is requested).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpsConfig {
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub key: String,
}

/// Configuration for a single mount.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountConfig {
    /// Bucket name; if empty, the mount name is used as the bucket
    #[serde(default)]
    pub bucket: String,
    /// S3 region; if empty, DEFAULT_REGION is used
    #[serde(default)]
    pub region: String,
    /// Custom endpoint for S3-compatible stores; empty means AWS
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Path-style addressing (MinIO and friends)
    #[serde(default)]
    pub force_path_style: bool,
}

impl MountConfig {
    /// Resolve the effective bucket name for a mount. Happens once at
    /// startup, never per request.
    pub fn resolved_bucket(&self, mount_name: &str) -> String {
        if self.bucket.is_empty() {
            mount_name.to_string()
        } else {
            self.bucket.clone()
        }
    }

    /// Resolve the effective region name.
    pub fn resolved_region(&self) -> String {
        if self.region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            self.region.clone()
        }
    }
}

/// Load configuration from a JSON file.
pub fn load_config(path: &Path) -> Result<ProxyConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Unable to read the configuration file {:?}", path))?;

    let config: ProxyConfig = serde_json::from_str(&content)
        .with_context(|| format!("Malformed config {:?}", path))?;

    tracing::info!("Loaded configuration from {:?}", path);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ProxyConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.web.bind_addresses.len(), 1);
        assert_eq!(config.web.bind_addresses[0].host, "localhost");
        assert_eq!(config.web.bind_addresses[0].port, 7649);
        assert!(!config.web.bind_addresses[0].is_https);
        assert!(!config.web.enable_auth);
        assert!(config.mounts.is_empty());
    }

    #[test]
    fn test_mount_resolution() {
        let mount = MountConfig::default();
        assert_eq!(mount.resolved_bucket("photos"), "photos");
        assert_eq!(mount.resolved_region(), DEFAULT_REGION);

        let mount = MountConfig {
            bucket: "my-bucket".to_string(),
            region: "eu-central-1".to_string(),
            ..Default::default()
        };
        assert_eq!(mount.resolved_bucket("photos"), "my-bucket");
        assert_eq!(mount.resolved_region(), "eu-central-1");
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "web": {
                "bind_addresses": [
                    { "host": "0.0.0.0", "port": 8443, "is_https": true }
                ],
                "https": { "cert": "/tmp/cert.pem", "key": "/tmp/key.pem" },
                "enable_auth": true,
                "htpasswd_file": "/tmp/htpasswd"
            },
            "mounts": {
                "data": { "region": "eu-west-1", "access_key": "k", "secret_key": "s" }
            }
        }"#;
        let config: ProxyConfig = serde_json::from_str(json).unwrap();
        assert!(config.web.bind_addresses[0].is_https);
        assert_eq!(config.web.bind_addresses[0].address(), "0.0.0.0:8443");
        assert!(config.web.enable_auth);
        assert_eq!(config.mounts["data"].resolved_region(), "eu-west-1");
    }
}
