//! Engine configuration: backend selection and the knobs every backend shares.
//!
//! Loaded once at process startup and passed as explicit context into request
//! handlers rather than kept as an ambient singleton (see `SPEC_FULL.md`
//! Global State notes).

use std::path::PathBuf;

const DEFAULT_MAX_RETURN_NUM: u32 = 80;
const DEFAULT_LOCAL_DB_PATH: &str = "deuce.db";

/// Which [`crate::backend::MetadataBackend`] implementation to construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Embedded relational store, single mutex-guarded connection.
    Local,
    /// Wide-column-style embedded store, column families as partitions.
    Distributed,
}

/// Process-wide engine configuration.
///
/// # Example
/// ```
/// use deuce::config::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_max_return_num(50);
///
/// assert_eq!(config.max_return_num, 50);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: BackendKind,
    /// `metadata_driver.options.path` — filesystem path of the embedded DB.
    pub local_db_path: PathBuf,
    /// `api_configuration.max_returned_num` — pagination cap.
    pub max_return_num: u32,
}

impl EngineConfig {
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_local_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_db_path = path.into();
        self
    }

    pub fn with_max_return_num(mut self, max_return_num: u32) -> Self {
        self.max_return_num = max_return_num;
        self
    }

    /// Builds configuration from the environment, falling back to defaults
    /// for any variable that is unset or fails to parse:
    /// - `DEUCE_BACKEND` (`local` | `distributed`)
    /// - `DEUCE_METADATA_DRIVER_OPTIONS_PATH`
    /// - `DEUCE_API_CONFIGURATION_MAX_RETURNED_NUM`
    pub fn from_env() -> Self {
        let backend = match std::env::var("DEUCE_BACKEND").as_deref() {
            Ok("distributed") => BackendKind::Distributed,
            _ => BackendKind::Local,
        };

        let local_db_path = std::env::var("DEUCE_METADATA_DRIVER_OPTIONS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOCAL_DB_PATH));

        let max_return_num = std::env::var("DEUCE_API_CONFIGURATION_MAX_RETURNED_NUM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETURN_NUM);

        Self {
            backend,
            local_db_path,
            max_return_num,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            local_db_path: PathBuf::from(DEFAULT_LOCAL_DB_PATH),
            max_return_num: DEFAULT_MAX_RETURN_NUM,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.max_return_num, DEFAULT_MAX_RETURN_NUM);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = EngineConfig::default()
            .with_backend(BackendKind::Distributed)
            .with_max_return_num(25)
            .with_local_db_path("/tmp/deuce-test.db");

        assert_eq!(config.backend, BackendKind::Distributed);
        assert_eq!(config.max_return_num, 25);
        assert_eq!(config.local_db_path, PathBuf::from("/tmp/deuce-test.db"));
    }

    // Mutates process-global environment variables; #[serial] keeps it from
    // racing other tests in this module that also read them.
    #[test]
    #[serial]
    fn from_env_reads_backend_and_pagination_overrides() {
        std::env::set_var("DEUCE_BACKEND", "distributed");
        std::env::set_var("DEUCE_API_CONFIGURATION_MAX_RETURNED_NUM", "25");
        std::env::set_var("DEUCE_METADATA_DRIVER_OPTIONS_PATH", "/tmp/deuce-env-test.db");

        let config = EngineConfig::from_env();

        assert_eq!(config.backend, BackendKind::Distributed);
        assert_eq!(config.max_return_num, 25);
        assert_eq!(config.local_db_path, PathBuf::from("/tmp/deuce-env-test.db"));

        std::env::remove_var("DEUCE_BACKEND");
        std::env::remove_var("DEUCE_API_CONFIGURATION_MAX_RETURNED_NUM");
        std::env::remove_var("DEUCE_METADATA_DRIVER_OPTIONS_PATH");
    }

    #[test]
    #[serial]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("DEUCE_BACKEND");
        std::env::remove_var("DEUCE_API_CONFIGURATION_MAX_RETURNED_NUM");
        std::env::remove_var("DEUCE_METADATA_DRIVER_OPTIONS_PATH");

        let config = EngineConfig::from_env();
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.max_return_num, DEFAULT_MAX_RETURN_NUM);
    }
}
