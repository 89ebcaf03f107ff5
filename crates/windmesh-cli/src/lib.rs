//! # Windmesh CLI
//!
//! Helpers shared by the `windmesh` binary's subcommands:
//!
//! - `windmesh registry`: run the service registry
//! - `windmesh gateway`: run the API gateway
//! - `windmesh announce`: keep one backend instance registered until stopped
//! - `windmesh resolve`: print one address for a service name

use anyhow::Result;
use tracing::{error, info};

/// Registry used when neither `--registry` nor the environment names one.
pub const DEFAULT_REGISTRY_URL: &str = "http://localhost:7000";

/// Environment variable consulted before [`DEFAULT_REGISTRY_URL`].
pub const REGISTRY_URL_ENV: &str = "WINDMESH_REGISTRY_URL";

/// Validates that a URL string starts with http://
///
/// Outbound mesh clients speak plain HTTP only, so `https://` is refused
/// here instead of failing on every later call.
pub fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") {
        Ok(())
    } else if url.starts_with("https://") {
        Err(anyhow::anyhow!(
            "Invalid {}: '{}' uses https, which is not supported; use http://",
            description,
            url
        ))
    } else {
        Err(anyhow::anyhow!(
            "Invalid {}: '{}' must start with http://",
            description,
            url
        ))
    }
}

/// Picks the registry URL: flag, then environment, then the default.
pub fn registry_url(flag: Option<String>, env: Option<String>) -> Result<String> {
    let url = flag
        .or(env)
        .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());
    validate_http_url(&url, "registry URL")?;
    Ok(url)
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
///
/// If a handler cannot be installed the error is logged and that signal is
/// never delivered.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, shutting down");
        }
        _ = terminate => {
            info!("SIGTERM received, shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("http://localhost:7000", "registry").is_ok());

        let err = validate_http_url("localhost:7000", "registry URL").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid registry URL: 'localhost:7000' must start with http://"
        );
    }

    #[test]
    fn test_https_is_rejected() {
        let err = validate_http_url("https://registry.internal", "registry URL").unwrap_err();
        assert!(err.to_string().contains("https"));
        assert!(registry_url(Some("https://registry.internal".into()), None).is_err());
    }

    #[test]
    fn test_registry_url_precedence() {
        assert_eq!(
            registry_url(Some("http://flag:1".into()), Some("http://env:2".into())).unwrap(),
            "http://flag:1"
        );
        assert_eq!(registry_url(None, Some("http://env:2".into())).unwrap(), "http://env:2");
        assert_eq!(registry_url(None, None).unwrap(), DEFAULT_REGISTRY_URL);
        assert!(registry_url(Some("flag:1".into()), None).is_err());
    }
}
