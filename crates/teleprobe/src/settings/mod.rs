//! Settings that admins change at runtime, persisted to disk.

mod model;

use crate::prelude::*;
use crate::storage::{JsonDocument, LoadError, PersistError};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::types::UserId;

pub use model::*;

const APIFY_TOKEN_MIN_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown setting `{name}`. Known settings are: {}", Setting::all_names())]
    UnknownField { name: String },

    #[error("The value of `{setting}` must not be empty")]
    EmptyValue { setting: Setting },

    #[error(
        "Apify API token is too short, it must be at least {} characters long",
        APIFY_TOKEN_MIN_LEN
    )]
    ApifyTokenTooShort,

    #[error("Telegram API ID must consist of digits only")]
    InvalidApiId,

    #[error("Channel username must start with @, for example @my_channel")]
    InvalidChannelUsername,

    #[error("Failed to save the settings, the change did not take effect")]
    PersistenceFailure { source: PersistError },

    #[error("The saved settings could not be loaded, using the defaults")]
    MalformedPersistedState { source: LoadError },
}

impl ConfigError {
    pub(crate) fn is_user_error(&self) -> bool {
        match self {
            Self::UnknownField { .. }
            | Self::EmptyValue { .. }
            | Self::ApifyTokenTooShort
            | Self::InvalidApiId
            | Self::InvalidChannelUsername => true,
            Self::PersistenceFailure { .. } | Self::MalformedPersistedState { .. } => false,
        }
    }
}

impl Setting {
    /// Names come from the admins, so this is the only place where an
    /// unknown setting can show up.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        name.parse().map_err(|_| ConfigError::UnknownField {
            name: name.to_owned(),
        })
    }

    /// Trims the value typed by an admin, and checks that it looks sane.
    pub fn normalize(self, value: &str) -> Result<String, ConfigError> {
        let value = value.trim();

        if value.is_empty() {
            return Err(ConfigError::EmptyValue { setting: self });
        }

        match self {
            Self::ApifyApiToken if value.chars().count() < APIFY_TOKEN_MIN_LEN => {
                return Err(ConfigError::ApifyTokenTooShort);
            }
            Self::TelegramApiId if !value.chars().all(|char| char.is_ascii_digit()) => {
                return Err(ConfigError::InvalidApiId);
            }
            Self::TargetChannelUsername if !value.starts_with('@') || value.len() == 1 => {
                return Err(ConfigError::InvalidChannelUsername);
            }
            _ => {}
        }

        Ok(value.to_owned())
    }
}

/// Single source of truth for the runtime [`Settings`] and the admin list.
///
/// The store is created once at startup and shared between the update
/// handlers. Reads never wait for I/O, writes are serialized, and a change
/// becomes visible only after it was saved to disk.
pub struct ConfigStore {
    doc: JsonDocument<Settings>,
    admin_ids: HashSet<UserId>,
}

impl ConfigStore {
    /// Loads the settings saved at `path`. The settings default to empty
    /// values if the document doesn't exist yet, or it can't be read.
    pub fn load(path: PathBuf, admin_ids: HashSet<UserId>) -> Self {
        let (doc, result) = JsonDocument::<Settings>::load(path);

        if let Err(source) = result {
            let err = ConfigError::MalformedPersistedState { source };
            error!(err = tracing_err(&err), "Starting with empty settings");
        } else {
            info!(path = ?doc.path(), "Settings loaded");
        }

        if admin_ids.is_empty() {
            warn!("The admin list is empty, nobody will be able to use the bot");
        }

        Self { doc, admin_ids }
    }

    /// Returns the last committed snapshot of the settings.
    pub fn get(&self) -> Arc<Settings> {
        self.doc.get()
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub async fn set(&self, setting: Setting, value: impl Into<String>) -> Result<(), ConfigError> {
        let value = value.into();

        let changed = self
            .doc
            .update(|current| {
                if current.get(setting) == value {
                    return None;
                }
                let mut next = current.clone();
                *next.slot_mut(setting) = value;
                Some(next)
            })
            .await
            .map_err(|source| ConfigError::PersistenceFailure { source })?;

        if changed {
            info!(%setting, "Setting updated");
        } else {
            debug!(%setting, "Setting already has the requested value");
        }

        Ok(())
    }

    /// Entry point for the input of the admins. The setting is looked up by
    /// its name as it appears in the settings document, and the value is
    /// [normalized](Setting::normalize) before it is saved.
    ///
    /// Returns the setting that was changed.
    pub async fn set_by_name(&self, name: &str, value: &str) -> Result<Setting, ConfigError> {
        let setting = Setting::from_name(name)?;
        self.set(setting, setting.normalize(value)?).await?;
        Ok(setting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use expect_test::expect;
    use std::path::Path;
    use strum::IntoEnumIterator;

    fn admins(ids: &[u64]) -> HashSet<UserId> {
        ids.iter().copied().map(UserId).collect()
    }

    fn load(path: &Path) -> ConfigStore {
        ConfigStore::load(path.to_owned(), admins(&[1, 2]))
    }

    #[test_log::test(tokio::test)]
    async fn set_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = load(&dir.path().join("settings.json"));

        let setting = store
            .set_by_name("targetChannelUsername", " @mychannel ")
            .await
            .unwrap();

        assert_eq!(setting, Setting::TargetChannelUsername);
        assert_eq!(store.get().target_channel_username, "@mychannel");
    }

    #[test]
    fn setting_values_are_normalized() {
        let valid = [
            (Setting::ApifyApiToken, " apify_api_0123456789abcdef "),
            (Setting::TelegramApiId, "123456"),
            (Setting::TelegramApiHash, "0123abcd"),
            (Setting::TelegramStringSession, "1BVtsOK8Bu"),
            (Setting::TargetChannelUsername, "@news"),
        ];

        for (setting, value) in valid {
            assert_eq!(setting.normalize(value).unwrap(), value.trim());
        }

        assert_matches!(
            Setting::TelegramApiHash.normalize("  "),
            Err(ConfigError::EmptyValue { setting: Setting::TelegramApiHash })
        );
        assert_matches!(
            Setting::ApifyApiToken.normalize("short"),
            Err(ConfigError::ApifyTokenTooShort)
        );
        assert_matches!(
            Setting::TelegramApiId.normalize("12ab"),
            Err(ConfigError::InvalidApiId)
        );
        assert_matches!(
            Setting::TargetChannelUsername.normalize("news"),
            Err(ConfigError::InvalidChannelUsername)
        );
        assert_matches!(
            Setting::TargetChannelUsername.normalize("@"),
            Err(ConfigError::InvalidChannelUsername)
        );
    }

    #[test_log::test(tokio::test)]
    async fn invalid_value_is_rejected_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = load(&path);

        let err = store
            .set_by_name("telegramApiId", "not a number")
            .await
            .unwrap_err();

        assert!(err.is_user_error());
        assert_matches!(err, ConfigError::InvalidApiId);
        assert_eq!(*store.get(), Settings::default());
        assert!(!path.exists());
    }

    #[test_log::test(tokio::test)]
    async fn unknown_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = load(&path);

        store.set(Setting::ApifyApiToken, "token").await.unwrap();
        let before = store.get();
        let doc_before = std::fs::read_to_string(&path).unwrap();

        let err = store.set_by_name("unknownField", "x").await.unwrap_err();

        assert!(err.is_user_error());
        assert_matches!(err, ConfigError::UnknownField { name } if name == "unknownField");
        assert_eq!(*store.get(), *before);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), doc_before);
    }

    #[test_log::test(tokio::test)]
    async fn every_setting_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = load(&path);
        for setting in Setting::iter() {
            store
                .set(setting, format!("value of {setting}"))
                .await
                .unwrap();
        }
        drop(store);

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        test_bat::json::assert_eq(
            doc,
            &expect![[r#"
                {
                  "apifyApiToken": "value of apifyApiToken",
                  "targetChannelUsername": "value of targetChannelUsername",
                  "telegramApiHash": "value of telegramApiHash",
                  "telegramApiId": "value of telegramApiId",
                  "telegramStringSession": "value of telegramStringSession"
                }"#]],
        );

        let store = load(&path);
        for setting in Setting::iter() {
            assert_eq!(store.get().get(setting), format!("value of {setting}"));
        }
    }

    #[test_log::test(tokio::test)]
    async fn setting_the_same_value_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = load(&path);

        store.set(Setting::TelegramApiId, "12345").await.unwrap();
        let doc_after_first = std::fs::read(&path).unwrap();
        let snapshot_after_first = store.get();

        store.set(Setting::TelegramApiId, "12345").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), doc_after_first);
        assert_eq!(*store.get(), *snapshot_after_first);
    }

    #[test_log::test(tokio::test)]
    async fn failed_write_keeps_the_old_value() {
        let dir = tempfile::tempdir().unwrap();

        // The parent "directory" of the document is a regular file, so
        // nothing can ever be written there
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let store = load(&blocker.join("settings.json"));

        let err = store
            .set(Setting::TargetChannelUsername, "@mychannel")
            .await
            .unwrap_err();

        assert_matches!(err, ConfigError::PersistenceFailure { .. });
        assert!(!err.is_user_error());
        assert_eq!(*store.get(), Settings::default());
    }

    #[test_log::test(tokio::test)]
    async fn broken_documents_load_as_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let missing = load(&dir.path().join("missing.json"));
        assert_eq!(*missing.get(), Settings::default());

        for (name, content) in [
            ("empty.json", ""),
            ("garbage.json", "{ not json"),
            ("wrong-shape.json", r#"["apifyApiToken"]"#),
            ("wrong-type.json", r#"{ "apifyApiToken": 42 }"#),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, content).unwrap();

            let store = load(&path);
            assert_eq!(*store.get(), Settings::default(), "{name}");
        }
    }

    #[test_log::test(tokio::test)]
    async fn concurrent_sets_of_different_fields_both_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = load(&path);

        let (first, second) = tokio::join!(
            store.set(Setting::TelegramApiHash, "hash"),
            store.set(Setting::TargetChannelUsername, "@chan"),
        );
        first.unwrap();
        second.unwrap();

        let current = store.get();
        assert_eq!(current.telegram_api_hash, "hash");
        assert_eq!(current.target_channel_username, "@chan");

        let reloaded = load(&path);
        assert_eq!(*reloaded.get(), *current);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn parallel_writers_never_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = Arc::new(load(&path));

        let tasks: Vec<_> = Setting::iter()
            .map(|setting| {
                let store = store.clone();
                tokio::spawn(async move { store.set(setting, setting.name()).await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reloaded = load(&path);
        for setting in Setting::iter() {
            assert_eq!(reloaded.get().get(setting), setting.name());
        }
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn abandoned_set_does_not_overwrite_a_later_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = load(&path);

        let session = "s".repeat(50 * 1024 * 1024);

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_micros(50),
            store.set(Setting::TelegramStringSession, session),
        )
        .await;

        if let Ok(result) = abandoned {
            result.unwrap();
        }

        store
            .set(Setting::TargetChannelUsername, "@second")
            .await
            .unwrap();

        let current = store.get();
        assert_eq!(current.target_channel_username, "@second");

        let reloaded = load(&path);
        assert_eq!(*reloaded.get(), *current);
    }

    #[test]
    fn admin_gating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = ConfigStore::load(path.clone(), admins(&[10, 20]));
        assert!(store.is_admin(UserId(10)));
        assert!(store.is_admin(UserId(20)));
        assert!(!store.is_admin(UserId(30)));

        let nobody = ConfigStore::load(path, admins(&[]));
        assert!(!nobody.is_admin(UserId(10)));
        assert!(!nobody.is_admin(UserId(0)));
    }
}
