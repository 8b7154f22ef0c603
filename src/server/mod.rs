//! HTTP front end.
//!
//! One listener task per configured bind address, all sharing one router
//! and one virtual filesystem. Every request path is handed to the
//! filesystem; objects are streamed with Range support, mount roots get
//! the rendered listing. A listener failing is fatal for the process.

pub mod tls;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::io::ReaderStream;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::auth::{require_basic_auth, Htpasswd};
use crate::config::ProxyConfig;
use crate::vfs::{FsError, VirtualFs};

/// Build the router: one catch-all handler, optionally wrapped in Basic
/// auth, with request tracing outermost.
pub fn build_router(fs: Arc<VirtualFs>, htpasswd: Option<Arc<Htpasswd>>) -> Router {
    let mut router = Router::new().fallback(serve_path).with_state(fs);

    if let Some(htpasswd) = htpasswd {
        router = router.layer(axum::middleware::from_fn_with_state(
            htpasswd,
            require_basic_auth,
        ));
    }

    router.layer(TraceLayer::new_for_http())
}

async fn serve_path(
    State(fs): State<Arc<VirtualFs>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let raw_path = uri.path();
    let path = urlencoding::decode(raw_path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| raw_path.to_string());

    let mut file = match fs.open(&path).await {
        Ok(file) => file,
        Err(FsError::NotFound) | Err(FsError::InvalidArgument(_)) => {
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            tracing::error!("Cannot serve {:?}: {}", path, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let size = file.size();
    let content_type = file.content_type();
    let last_modified = file.modified().map(format_http_date);

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    // A present but unusable Range header is unsatisfiable, not ignored.
    let range = match range_header {
        Some(value) => match parse_range_header(Some(value), size) {
            Some(range) => Some(range),
            None => {
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{}", size))
                    .body(Body::empty())
                    .unwrap();
            }
        },
        None => None,
    };

    let (status, start, length) = match range {
        Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        None => (StatusCode::OK, 0, size),
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, &content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, length);

    if let Some((start, end)) = range {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, size),
        );
    }

    if let Some(date) = last_modified {
        builder = builder.header(header::LAST_MODIFIED, date);
    }

    if method == Method::HEAD {
        return builder.body(Body::empty()).unwrap();
    }

    if start > 0 {
        if let Err(e) = file.seek(std::io::SeekFrom::Start(start)).await {
            tracing::error!("Cannot seek {:?} to {}: {}", path, start, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let stream = ReaderStream::new(file.take(length));
    builder.body(Body::from_stream(stream)).unwrap()
}

/// Parse a `Range` header against a known size, returning the inclusive
/// `(start, end)` pair. Multi-range requests, malformed specs and ranges
/// starting past the end all come back as `None`.
fn parse_range_header(range_header: Option<&str>, file_size: u64) -> Option<(u64, u64)> {
    let range_str = range_header?;
    if !range_str.starts_with("bytes=") {
        return None;
    }

    let range_spec = &range_str[6..];
    let parts: Vec<&str> = range_spec.split('-').collect();
    if parts.len() != 2 {
        return None;
    }

    let start: u64 = if parts[0].is_empty() {
        // Suffix range: bytes=-500 means the final 500 bytes.
        let suffix_len: u64 = parts[1].parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        file_size.saturating_sub(suffix_len)
    } else {
        parts[0].parse().ok()?
    };

    let end: u64 = if parts[0].is_empty() || parts[1].is_empty() {
        file_size.checked_sub(1)?
    } else {
        parts[1].parse().ok()?
    };

    if start > end || start >= file_size {
        return None;
    }

    Some((start, end.min(file_size - 1)))
}

fn format_http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Bring up every configured listener and park until one of them dies.
/// A listener terminating, for any reason, takes the process down.
pub async fn run(config: ProxyConfig) -> Result<()> {
    let fs = Arc::new(VirtualFs::new(&config));

    let htpasswd = if config.web.enable_auth {
        let path = std::path::Path::new(&config.web.htpasswd_file);
        Some(Arc::new(Htpasswd::load(path).with_context(|| {
            format!(
                "Authentication enabled but the htpasswd file {:?} is unusable",
                config.web.htpasswd_file
            )
        })?))
    } else {
        None
    };

    let needs_tls = config.web.bind_addresses.iter().any(|a| a.is_https);
    let tls_config = if needs_tls {
        Some(tls::load_server_config(&config.web.https)?)
    } else {
        None
    };

    let app = build_router(fs, htpasswd);

    let mut listeners = JoinSet::new();
    for addr in &config.web.bind_addresses {
        let app = app.clone();
        let address = addr.address();

        if addr.is_https {
            let tls = tls_config.clone().expect("TLS config resolved above");
            tracing::info!("Listening on https://{}", address);
            listeners.spawn(serve_https(app, address, tls));
        } else {
            tracing::info!("Listening on http://{}", address);
            listeners.spawn(serve_http(app, address));
        }
    }

    match listeners.join_next().await {
        Some(result) => {
            result.context("Listener task panicked")??;
            Err(anyhow!("Listener terminated unexpectedly"))
        }
        None => Err(anyhow!("No bind addresses configured")),
    }
}

async fn serve_http(app: Router, address: String) -> Result<()> {
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Cannot bind to {}", address))?;
    axum::serve(listener, app)
        .await
        .with_context(|| format!("Server failure on {}", address))
}

async fn serve_https(app: Router, address: String, tls: Arc<rustls::ServerConfig>) -> Result<()> {
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Cannot bind to {}", address))?;
    let acceptor = TlsAcceptor::from(tls);

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .with_context(|| format!("Accept failure on {}", address))?;

        let acceptor = acceptor.clone();
        let app = app.clone();

        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!("TLS handshake with {} failed: {}", peer, e);
                    return;
                }
            };

            let io = TokioIo::new(stream);
            let service = hyper::service::service_fn(move |request| {
                let app = app.clone();
                async move { app.oneshot(request).await }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                tracing::debug!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
