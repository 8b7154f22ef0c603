//! TLS configuration for HTTPS listeners.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::config::HttpsConfig;

/// Load the certificate chain and private key named in the configuration.
/// Both files are PEM; missing or unparsable files are fatal.
pub fn load_server_config(https: &HttpsConfig) -> Result<Arc<rustls::ServerConfig>> {
    if https.cert.is_empty() || https.key.is_empty() {
        return Err(anyhow!(
            "HTTPS bind address configured but certificate or key file is missing"
        ));
    }

    let mut cert_reader = BufReader::new(
        File::open(&https.cert)
            .with_context(|| format!("Unable to open the certificate file {:?}", https.cert))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Malformed certificate file {:?}", https.cert))?;
    if certs.is_empty() {
        return Err(anyhow!(
            "No certificates found in {:?}",
            https.cert
        ));
    }

    let mut key_reader = BufReader::new(
        File::open(&https.key)
            .with_context(|| format!("Unable to open the key file {:?}", https.key))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("Malformed key file {:?}", https.key))?
        .ok_or_else(|| anyhow!("No private key found in {:?}", https.key))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Certificate and key do not form a usable TLS identity")?;

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_files_are_fatal() {
        let https = HttpsConfig::default();
        assert!(load_server_config(&https).is_err());

        let https = HttpsConfig {
            cert: "/nonexistent/cert.pem".to_string(),
            key: "/nonexistent/key.pem".to_string(),
        };
        assert!(load_server_config(&https).is_err());
    }

    #[test]
    fn test_garbage_pem_is_fatal() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        cert.flush().unwrap();
        let mut key = tempfile::NamedTempFile::new().unwrap();
        writeln!(key, "not a key").unwrap();
        key.flush().unwrap();

        let https = HttpsConfig {
            cert: cert.path().to_string_lossy().into_owned(),
            key: key.path().to_string_lossy().into_owned(),
        };
        assert!(load_server_config(&https).is_err());
    }
}
