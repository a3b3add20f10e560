//! Configuration for sync sources.

use crate::error::{SyncError, SyncResult};
use crate::status::SuccessPredicateKind;
use cachesync_storage::PropertyFileStore;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "CACHESYNC_CONFIG_DIR";

/// Application folder under the platform configuration directory.
const APP_DIR_NAME: &str = "cachesync";

/// Historical limit on item key length, in characters.
pub const DEFAULT_MAX_KEY_LEN: usize = 64;

/// How a source takes part in a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncMode {
    /// Exchange changes in both directions.
    TwoWay,
    /// Full comparison: every local item is sent, both directions.
    Slow,
    /// Send local changes only.
    OneWayFromClient,
    /// Receive server changes only.
    OneWayFromServer,
    /// Replace the server's data with every local item.
    RefreshFromClient,
    /// Replace local data with every server item.
    RefreshFromServer,
}

impl SyncMode {
    /// Returns true if local items are sent to the server.
    pub fn sends_client_changes(self) -> bool {
        matches!(
            self,
            SyncMode::TwoWay | SyncMode::Slow | SyncMode::OneWayFromClient | SyncMode::RefreshFromClient
        )
    }

    /// Returns true if server changes are applied locally.
    pub fn receives_server_changes(self) -> bool {
        matches!(
            self,
            SyncMode::TwoWay | SyncMode::Slow | SyncMode::OneWayFromServer | SyncMode::RefreshFromServer
        )
    }

    /// Returns true if the client sends every item instead of changes.
    pub fn is_full_enumeration(self) -> bool {
        matches!(self, SyncMode::Slow | SyncMode::RefreshFromClient)
    }
}

/// Client-wide configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root configuration directory; item caches live below it.
    pub config_dir: PathBuf,
}

impl ClientConfig {
    /// Creates a configuration rooted at `config_dir`.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Resolves the configuration directory from the environment.
    ///
    /// Uses `CACHESYNC_CONFIG_DIR` when set, otherwise the platform
    /// configuration directory joined with `cachesync`.
    pub fn from_env() -> SyncResult<Self> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(Self::new(dir));
            }
        }
        let base = dirs::config_dir().ok_or_else(|| {
            SyncError::Config("cannot determine platform configuration directory".into())
        })?;
        Ok(Self::new(base.join(APP_DIR_NAME)))
    }

    /// Returns the configuration directory.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns the item cache path for a source.
    pub fn cache_path(&self, source_name: &str) -> PathBuf {
        PropertyFileStore::cache_path(&self.config_dir, source_name)
    }
}

/// Configuration of one sync source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Source name (`contact`, `calendar`, `picture`...).
    pub name: String,
    /// Remote database URI on the server.
    pub remote_uri: String,
    /// MIME type of item content.
    pub mime_type: String,
    /// Mode used when the caller does not force one.
    pub preferred_mode: SyncMode,
    /// Status convention of the source's endpoint.
    pub success: SuccessPredicateKind,
    /// Keys longer than this are logged.
    pub max_key_len: usize,
    /// Disabled sources are skipped by a session.
    pub enabled: bool,
}

impl SourceConfig {
    /// Creates a configuration; the success predicate follows the name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            success: SuccessPredicateKind::for_source_name(&name),
            remote_uri: name.clone(),
            name,
            mime_type: "application/octet-stream".into(),
            preferred_mode: SyncMode::TwoWay,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            enabled: true,
        }
    }

    /// Sets the remote URI.
    pub fn with_remote_uri(mut self, uri: impl Into<String>) -> Self {
        self.remote_uri = uri.into();
        self
    }

    /// Sets the MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Sets the preferred sync mode.
    pub fn with_preferred_mode(mut self, mode: SyncMode) -> Self {
        self.preferred_mode = mode;
        self
    }

    /// Overrides the success predicate resolved from the name.
    pub fn with_success_predicate(mut self, kind: SuccessPredicateKind) -> Self {
        self.success = kind;
        self
    }

    /// Sets the key length limit.
    pub fn with_max_key_len(mut self, len: usize) -> Self {
        self.max_key_len = len;
        self
    }

    /// Enables or disables the source.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_config_builder() {
        let config = SourceConfig::new("contact")
            .with_remote_uri("card")
            .with_mime_type("text/x-vcard")
            .with_preferred_mode(SyncMode::Slow)
            .with_max_key_len(32)
            .with_enabled(false);

        assert_eq!(config.name, "contact");
        assert_eq!(config.remote_uri, "card");
        assert_eq!(config.mime_type, "text/x-vcard");
        assert_eq!(config.preferred_mode, SyncMode::Slow);
        assert_eq!(config.success, SuccessPredicateKind::SyncMl);
        assert_eq!(config.max_key_len, 32);
        assert!(!config.enabled);
    }

    #[test]
    fn media_source_resolves_predicate() {
        let config = SourceConfig::new("picture");
        assert_eq!(config.success, SuccessPredicateKind::Media);

        let forced = config.with_success_predicate(SuccessPredicateKind::SyncMl);
        assert_eq!(forced.success, SuccessPredicateKind::SyncMl);
    }

    #[test]
    fn cache_path_under_config_dir() {
        let config = ClientConfig::new("/home/user/.config/cachesync");
        assert_eq!(
            config.cache_path("calendar"),
            PathBuf::from("/home/user/.config/cachesync/item_cache/calendar.dat")
        );
    }

    #[test]
    fn mode_directions() {
        assert!(SyncMode::TwoWay.sends_client_changes());
        assert!(SyncMode::TwoWay.receives_server_changes());
        assert!(!SyncMode::OneWayFromServer.sends_client_changes());
        assert!(!SyncMode::RefreshFromClient.receives_server_changes());
        assert!(SyncMode::Slow.is_full_enumeration());
        assert!(!SyncMode::TwoWay.is_full_enumeration());
    }
}
