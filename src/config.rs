//! Configuration loading.
//!
//! Two layers, matching SPEC_FULL.md §6:
//!
//! - [`GlobalConfig`] is the per-test-tag JSON document spec.md §6
//!   describes: one JSON object, read once, keyed by test tag. Presence of
//!   a tag enables that group. This is parsed with plain `serde_json`
//!   rather than the `config` crate's multi-source builder, since the
//!   source only ever reads a single file and multi-format/multi-source
//!   layering would add a feature the spec never asks for.
//! - [`AppSettings`] is the ambient application-level configuration (log
//!   level/format, where to find the test config file) loaded the way the
//!   teacher's `AppConfig` is loaded: defaults usable out of the box,
//!   overridable by CLI flags.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// The whole `config.json` document: a map from test tag to that group's
/// config object. A tag's presence enables the group; its shape is
/// group-specific and deserialized lazily by each group from the raw
/// [`serde_json::Value`].
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct GlobalConfig {
    pub groups: HashMap<String, serde_json::Value>,
}

impl GlobalConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.display().to_string();
        let raw = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        let parsed: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path: path_str, source })?;
        Ok(parsed)
    }

    pub fn is_enabled(&self, tag: &str) -> bool {
        self.groups.contains_key(tag)
    }

    /// Deserialize a single group's config section into its strongly typed
    /// shape. Returns `None` if the tag was never enabled.
    pub fn group<T: for<'de> Deserialize<'de>>(&self, tag: &str) -> Option<Result<T, ConfigError>> {
        self.groups.get(tag).map(|value| {
            serde_json::from_value(value.clone()).map_err(|e| ConfigError::MalformedGroup {
                tag: tag.to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Validates every enabled tag's config section against its group's
    /// strongly typed shape, right after loading. spec.md §7 classifies a
    /// malformed config as fatal, aborting before any test group runs — so
    /// this must be called (and its error propagated) before
    /// `scheduler::run`, rather than letting each group's own `config.group
    /// ::<T>(tag)` call silently discard the error and run with zero probes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        use crate::groups::{dns::DnsConfig, route::RouteConfig, tcp::TcpConfig, tls::TlsConfig};

        if let Some(result) = self.group::<RouteConfig>("Route") {
            result?;
        }
        if let Some(result) = self.group::<DnsConfig>("DNS") {
            result?;
        }
        if let Some(result) = self.group::<TcpConfig>("TCP") {
            result?;
        }
        if let Some(result) = self.group::<TlsConfig>("TLS") {
            result?;
        }
        Ok(())
    }
}

/// Ambient application settings: not part of the test-group config file,
/// but the same "sensible defaults, override via CLI flag" shape the
/// teacher uses for its `LoggingConfig`/`GeneralConfig`.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub config_path: String,
    pub log_level: String,
    pub verbose: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            config_path: "config.json".to_string(),
            log_level: "info".to_string(),
            verbose: false,
        }
    }
}
