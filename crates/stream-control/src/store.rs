//! Shared settings store
//!
//! The one owner of [`StreamSettings`]. The configuration channel mutates it
//! in validated batches; everyone else takes a copy with [`SettingsStore::snapshot`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use stream_protocol::{FieldValue, SettingKey, SettingsError, StreamSettings};
use tracing::{debug, info, warn};

use crate::capabilities::BoardCapabilities;
use crate::error::ControlError;

/// Settings document guarded by a lock, optionally backed by a file
#[derive(Debug)]
pub struct SettingsStore {
    settings: Mutex<StreamSettings>,
    capabilities: BoardCapabilities,
    path: Option<PathBuf>,
}

impl SettingsStore {
    /// Store that never touches disk
    pub fn in_memory(settings: StreamSettings, capabilities: BoardCapabilities) -> Self {
        let mut settings = settings;
        capabilities.normalize(&mut settings);
        Self {
            settings: Mutex::new(settings),
            capabilities,
            path: None,
        }
    }

    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable
    pub fn load_or_default(path: impl Into<PathBuf>, capabilities: BoardCapabilities) -> Self {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<StreamSettings>(&contents) {
                Ok(settings) => {
                    info!(path = %path.display(), "loaded settings");
                    settings
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "settings file unreadable, using defaults");
                    StreamSettings::default()
                }
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no settings file, using defaults");
                StreamSettings::default()
            }
        };

        let mut store = Self::in_memory(settings, capabilities);
        store.path = Some(path);
        store
    }

    pub fn capabilities(&self) -> &BoardCapabilities {
        &self.capabilities
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> StreamSettings {
        self.settings.lock().clone()
    }

    /// Validate and apply a batch of fields
    ///
    /// Either every field is applied or none is. With `persist` the new
    /// document is written to disk before it becomes visible, and a failed
    /// write leaves the store unchanged.
    pub fn apply(
        &self,
        fields: &[(String, FieldValue)],
        persist: bool,
    ) -> Result<StreamSettings, ControlError> {
        let mut guard = self.settings.lock();
        let mut next = guard.clone();

        for (name, value) in fields {
            let key =
                SettingKey::parse(name).ok_or_else(|| SettingsError::UnknownKey(name.clone()))?;
            self.capabilities.check_mutable(key)?;
            next.apply_field(key, value)?;
        }
        self.capabilities.validate(&next)?;

        if persist {
            if let Some(path) = &self.path {
                write_atomic(path, &next)?;
            }
        }

        debug!(fields = fields.len(), persist, "settings applied");
        *guard = next.clone();
        Ok(next)
    }
}

fn write_atomic(path: &Path, settings: &StreamSettings) -> Result<(), ControlError> {
    let persist_err = |reason: String| ControlError::Persist {
        path: path.display().to_string(),
        reason,
    };

    let json = serde_json::to_string_pretty(settings)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| persist_err(e.to_string()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "settings".into());
    let tmp = dir.join(format!(".{file_name}.tmp"));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(persist_err(e.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stream_protocol::Transport;

    fn field(key: &str, value: &str) -> (String, FieldValue) {
        (key.to_string(), FieldValue::infer(value))
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SettingsStore::load_or_default(dir.path().join("absent"), BoardCapabilities::default());
        assert_eq!(store.snapshot(), StreamSettings::default());
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        let store = SettingsStore::load_or_default(&path, BoardCapabilities::default());
        assert_eq!(store.snapshot(), StreamSettings::default());
    }

    #[test]
    fn test_persisted_batch_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::load_or_default(&path, BoardCapabilities::default());

        store
            .apply(&[field("protocol", "udp"), field("port", "9000")], true)
            .unwrap();

        let reloaded = SettingsStore::load_or_default(&path, BoardCapabilities::default());
        assert_eq!(reloaded.snapshot().protocol, Transport::Udp);
        assert_eq!(reloaded.snapshot().port, 9000);
        assert!(!dir.path().join("nested").join(".settings.json.tmp").exists());
    }

    #[test]
    fn test_memory_batch_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::load_or_default(&path, BoardCapabilities::default());

        store.apply(&[field("port", "9100")], false).unwrap();
        assert_eq!(store.snapshot().port, 9100);
        assert!(!path.exists());

        // the next persisted batch writes the whole document
        store.apply(&[field("protocol", "udp")], true).unwrap();
        let reloaded = SettingsStore::load_or_default(&path, BoardCapabilities::default());
        assert_eq!(reloaded.snapshot().port, 9100);
        assert_eq!(reloaded.snapshot().protocol, Transport::Udp);
    }

    #[test]
    fn test_unknown_key_rejects_whole_batch() {
        let store = SettingsStore::in_memory(StreamSettings::default(), BoardCapabilities::default());
        let err = store
            .apply(&[field("port", "9000"), field("colour", "blue")], false)
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::InvalidConfig(SettingsError::UnknownKey(ref k)) if k == "colour"
        ));
        assert_eq!(store.snapshot(), StreamSettings::default());
    }

    #[test]
    fn test_immutable_key_rejected() {
        let caps = BoardCapabilities::for_model(crate::capabilities::BoardModel::Stemlab125_14);
        let store = SettingsStore::in_memory(StreamSettings::default(), caps);
        let err = store.apply(&[field("attenuator", "1:20")], false).unwrap_err();
        assert!(matches!(
            err,
            ControlError::InvalidConfig(SettingsError::Immutable(_))
        ));
    }

    #[test]
    fn test_oversized_udp_configuration_rejected() {
        let store = SettingsStore::in_memory(StreamSettings::default(), BoardCapabilities::default());
        let err = store
            .apply(
                &[
                    field("protocol", "udp"),
                    field("resolution", "16"),
                    field("channels", "both"),
                ],
                false,
            )
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfig(_)));
        assert_eq!(store.snapshot().protocol, Transport::Tcp);
    }

    proptest! {
        #[test]
        fn prop_batch_with_invalid_key_leaves_settings_unchanged(
            port in 1u16..=65535,
            decimation in 1u32..=65536,
            bogus in "[a-z]{3,8}_x",
        ) {
            let store = SettingsStore::in_memory(StreamSettings::default(), BoardCapabilities::default());
            let before = store.snapshot();
            let fields = vec![
                ("port".to_string(), FieldValue::Int(port as i64)),
                ("decimation".to_string(), FieldValue::Int(decimation as i64)),
                (bogus, FieldValue::Str("1".into())),
            ];
            prop_assert!(store.apply(&fields, false).is_err());
            prop_assert_eq!(store.snapshot(), before);
        }
    }
}
