//! HTTP Basic authentication against an htpasswd file.
//!
//! Supported hash forms: bcrypt (`$2a$`, `$2b$`, `$2y$`), `{SHA}` and
//! plain text. The file is parsed once at startup; per-request work is a
//! header decode and a hash comparison.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::{engine::general_purpose, Engine as _};
use sha1::{Digest, Sha1};

const REALM: &str = "s3proxy";

/// Parsed credential store, username -> password hash.
pub struct Htpasswd {
    entries: HashMap<String, String>,
}

impl Htpasswd {
    /// Load and parse an htpasswd file. Blank lines and `#` comments are
    /// skipped; a line without a colon is a parse error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read the htpasswd file {:?}", path))?;

        let mut entries = HashMap::new();
        for (num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (user, hash) = line
                .split_once(':')
                .with_context(|| format!("Malformed htpasswd entry at {:?}:{}", path, num + 1))?;
            entries.insert(user.to_string(), hash.to_string());
        }

        tracing::info!("Loaded authentication data from: {:?}", path);
        Ok(Self { entries })
    }

    #[cfg(test)]
    pub fn from_entries(entries: &[(&str, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(u, h)| (u.to_string(), h.to_string()))
                .collect(),
        }
    }

    /// Check a username and password pair against the store.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        let Some(hash) = self.entries.get(user) else {
            return false;
        };

        if hash.starts_with("$2a$") || hash.starts_with("$2b$") || hash.starts_with("$2y$") {
            return bcrypt::verify(password, hash).unwrap_or(false);
        }

        if let Some(encoded) = hash.strip_prefix("{SHA}") {
            let digest = Sha1::digest(password.as_bytes());
            return general_purpose::STANDARD.encode(digest) == encoded;
        }

        // Other crypt forms (e.g. $apr1$) are not supported and never
        // match; plain text is compared directly.
        if hash.starts_with('$') {
            return false;
        }

        hash == password
    }
}

/// Extract the credentials of an `Authorization: Basic` header.
fn decode_basic(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{}\"", REALM),
        )],
        "Unauthorized",
    )
        .into_response()
}

/// Middleware rejecting every request without valid Basic credentials.
pub async fn require_basic_auth(
    State(htpasswd): State<Arc<Htpasswd>>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic);

    match credentials {
        Some((user, password)) if htpasswd.verify(&user, &password) => next.run(request).await,
        Some((user, _)) => {
            tracing::warn!("Rejected credentials for user {:?}", user);
            unauthorized()
        }
        None => unauthorized(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_htpasswd_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "alice:{{SHA}}qUqP5cyxm6YcTAhz05Hph5gvu9M=").unwrap();
        writeln!(file, "bob:secret").unwrap();
        file.flush().unwrap();

        let htpasswd = Htpasswd::load(file.path()).unwrap();
        assert!(htpasswd.verify("alice", "test"));
        assert!(htpasswd.verify("bob", "secret"));
        assert!(!htpasswd.verify("carol", "anything"));
    }

    #[test]
    fn test_load_rejects_malformed_entry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "no-colon-here").unwrap();
        file.flush().unwrap();

        assert!(Htpasswd::load(file.path()).is_err());
    }

    #[test]
    fn test_verify_bcrypt() {
        let hash = bcrypt::hash("hunter2", 4).unwrap();
        let htpasswd = Htpasswd::from_entries(&[("alice", &hash)]);
        assert!(htpasswd.verify("alice", "hunter2"));
        assert!(!htpasswd.verify("alice", "hunter3"));
    }

    #[test]
    fn test_verify_sha() {
        // base64(sha1("test"))
        let htpasswd =
            Htpasswd::from_entries(&[("alice", "{SHA}qUqP5cyxm6YcTAhz05Hph5gvu9M=")]);
        assert!(htpasswd.verify("alice", "test"));
        assert!(!htpasswd.verify("alice", "wrong"));
    }

    #[test]
    fn test_verify_plain() {
        let htpasswd = Htpasswd::from_entries(&[("bob", "secret")]);
        assert!(htpasswd.verify("bob", "secret"));
        assert!(!htpasswd.verify("bob", "Secret"));
    }

    #[test]
    fn test_unsupported_hash_never_matches() {
        let htpasswd =
            Htpasswd::from_entries(&[("carol", "$apr1$x8sCfEfn$SnqKuOS2YHajBqYWDBB/n0")]);
        assert!(!htpasswd.verify("carol", "whatever"));
    }

    #[test]
    fn test_decode_basic() {
        // base64("alice:open sesame")
        let got = decode_basic("Basic YWxpY2U6b3BlbiBzZXNhbWU=").unwrap();
        assert_eq!(got, ("alice".to_string(), "open sesame".to_string()));

        assert!(decode_basic("Bearer abc").is_none());
        assert!(decode_basic("Basic not-base64!!").is_none());
    }
}
