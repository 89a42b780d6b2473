// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loaded from environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Process-visible root for per-run artifact directories.
pub const ARTIFACT_ROOT: &str = "/tmp/cosmos/artifacts";

/// Process-visible root for scratch files (temp connector configs).
pub const SCRATCH_ROOT: &str = "/tmp/cosmos/scratch";

/// Task queue the run worker dispatches ingestion workflows onto.
pub const TASK_QUEUE: &str = "cosmos-task-queue";

/// Host-side equivalent of [`ARTIFACT_ROOT`], set when cosmos itself runs in
/// a container and bind-mounts must use host paths.
pub const ARTIFACT_DIR_ENV: &str = "ARTIFACT_DIR";

/// Host-side equivalent of [`SCRATCH_ROOT`].
pub const SCRATCH_SPACE_ENV: &str = "SCRATCH_SPACE";

/// Host directory mounted into every connector container at `/local`.
pub const LOCAL_DIR_ENV: &str = "LOCAL_DIR";

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL for the relational store.
    pub database_url: String,
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// Root directory for per-run artifacts.
    pub artifact_root: PathBuf,
    /// Root directory for scratch files.
    pub scratch_root: PathBuf,
    /// Database connection pool size.
    pub db_pool_size: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("COSMOS_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("COSMOS_DATABASE_URL"))?;

        let port: u16 = std::env::var("COSMOS_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let artifact_root = std::env::var("COSMOS_ARTIFACT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(ARTIFACT_ROOT));

        let scratch_root = std::env::var("COSMOS_SCRATCH_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(SCRATCH_ROOT));

        let db_pool_size = std::env::var("COSMOS_DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            database_url,
            http_addr,
            artifact_root,
            scratch_root,
            db_pool_size,
        })
    }
}

/// Rewrite a process-visible path to its host-visible equivalent.
///
/// Connector containers bind-mount artifact and scratch files, and when
/// cosmos itself runs inside a container those mounts must name paths as the
/// host sees them. When `host_root_env` is set, the `process_root` prefix is
/// trimmed and replaced with the env value; otherwise the path is returned
/// unchanged.
pub fn rewrite_to_host(path: &Path, process_root: &Path, host_root_env: &str) -> PathBuf {
    match std::env::var(host_root_env) {
        Ok(host_root) if !host_root.is_empty() => match path.strip_prefix(process_root) {
            Ok(rest) => PathBuf::from(host_root).join(rest),
            Err(_) => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("COSMOS_DATABASE_URL", "postgres://localhost/cosmos");
        guard.remove("COSMOS_HTTP_PORT");
        guard.remove("COSMOS_ARTIFACT_ROOT");
        guard.remove("COSMOS_SCRATCH_ROOT");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/cosmos");
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.artifact_root, PathBuf::from(ARTIFACT_ROOT));
        assert_eq!(config.scratch_root, PathBuf::from(SCRATCH_ROOT));
        assert_eq!(config.db_pool_size, 10);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("COSMOS_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnvVar("COSMOS_DATABASE_URL")
        ));
    }

    #[test]
    fn test_config_invalid_port() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("COSMOS_DATABASE_URL", "postgres://localhost/cosmos");
        guard.set("COSMOS_HTTP_PORT", "not_a_number");

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::InvalidPort
        ));
    }

    #[test]
    fn test_rewrite_to_host_with_env_set() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("TEST_ARTIFACT_DIR", "/host/artifacts");

        let rewritten = rewrite_to_host(
            Path::new("/tmp/cosmos/artifacts/7/2024-01-01T00:00:00+00:00/catalog"),
            Path::new("/tmp/cosmos/artifacts"),
            "TEST_ARTIFACT_DIR",
        );
        assert_eq!(
            rewritten,
            PathBuf::from("/host/artifacts/7/2024-01-01T00:00:00+00:00/catalog")
        );
    }

    #[test]
    fn test_rewrite_to_host_without_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("TEST_UNSET_DIR");

        let path = Path::new("/tmp/cosmos/artifacts/7/state");
        let rewritten = rewrite_to_host(path, Path::new("/tmp/cosmos/artifacts"), "TEST_UNSET_DIR");
        assert_eq!(rewritten, path);
    }
}
