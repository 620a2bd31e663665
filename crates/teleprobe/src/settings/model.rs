use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};
use std::fmt;
use strum::IntoEnumIterator;

/// Settings that admins can change at runtime.
///
/// Every field is an empty string until it is explicitly configured. The
/// field names are part of the on-disk format, don't rename them.
#[serde_as]
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[serde_as(as = "DefaultOnNull")]
    pub apify_api_token: String,

    #[serde_as(as = "DefaultOnNull")]
    pub telegram_api_id: String,

    #[serde_as(as = "DefaultOnNull")]
    pub telegram_api_hash: String,

    #[serde_as(as = "DefaultOnNull")]
    pub telegram_string_session: String,

    #[serde_as(as = "DefaultOnNull")]
    pub target_channel_username: String,
}

/// Closed set of the settings that can be changed at runtime.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "camelCase")]
pub enum Setting {
    ApifyApiToken,
    TelegramApiId,
    TelegramApiHash,
    TelegramStringSession,
    TargetChannelUsername,
}

impl Setting {
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Comma-separated list of all setting names, used in help messages.
    pub fn all_names() -> String {
        Self::iter().map(Self::name).collect::<Vec<_>>().join(", ")
    }

    /// Secrets are never displayed back to the chat in full.
    pub fn is_secret(self) -> bool {
        matches!(
            self,
            Self::ApifyApiToken | Self::TelegramApiHash | Self::TelegramStringSession
        )
    }
}

impl Settings {
    pub fn get(&self, setting: Setting) -> &str {
        match setting {
            Setting::ApifyApiToken => &self.apify_api_token,
            Setting::TelegramApiId => &self.telegram_api_id,
            Setting::TelegramApiHash => &self.telegram_api_hash,
            Setting::TelegramStringSession => &self.telegram_string_session,
            Setting::TargetChannelUsername => &self.target_channel_username,
        }
    }

    pub(crate) fn slot_mut(&mut self, setting: Setting) -> &mut String {
        match setting {
            Setting::ApifyApiToken => &mut self.apify_api_token,
            Setting::TelegramApiId => &mut self.telegram_api_id,
            Setting::TelegramApiHash => &mut self.telegram_api_hash,
            Setting::TelegramStringSession => &mut self.telegram_string_session,
            Setting::TargetChannelUsername => &mut self.target_channel_username,
        }
    }

    /// Returns the value of the setting, or [`None`] if it isn't set.
    pub fn require(&self, setting: Setting) -> Option<&str> {
        Some(self.get(setting)).filter(|value| !value.is_empty())
    }

    /// Human-readable value of the setting with secrets masked.
    pub fn display_value(&self, setting: Setting) -> String {
        let value = self.get(setting);
        if value.is_empty() {
            return "<not set>".to_owned();
        }
        if !setting.is_secret() {
            return value.to_owned();
        }
        let visible: String = value.chars().take(4).collect();
        format!("{visible}… ({} chars)", value.chars().count())
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for setting in Setting::iter() {
            map.entry(&setting.name(), &self.display_value(setting));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn setting_names_match_the_document_fields() {
        let settings = Settings {
            apify_api_token: "a".to_owned(),
            telegram_api_id: "b".to_owned(),
            telegram_api_hash: "c".to_owned(),
            telegram_string_session: "d".to_owned(),
            target_channel_username: "e".to_owned(),
        };

        let json = serde_json::to_value(&settings).unwrap();

        for setting in Setting::iter() {
            assert_eq!(json[setting.name()], settings.get(setting), "{setting}");
        }

        expect![[r#"
            apifyApiToken, telegramApiId, telegramApiHash, telegramStringSession, targetChannelUsername"#]]
        .assert_eq(&Setting::all_names());
    }

    #[test]
    fn secrets_are_masked() {
        let settings = Settings {
            apify_api_token: "apify_api_abcdefghijklmnop".to_owned(),
            target_channel_username: "@mychannel".to_owned(),
            ..Default::default()
        };

        test_bat::debug::assert_eq(
            &settings,
            &expect![[r#"
                {
                    "apifyApiToken": "apif… (26 chars)",
                    "telegramApiId": "<not set>",
                    "telegramApiHash": "<not set>",
                    "telegramStringSession": "<not set>",
                    "targetChannelUsername": "@mychannel",
                }"#]],
        );
    }

    #[test]
    fn null_and_unknown_fields_are_tolerated() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "apifyApiToken": null,
                "targetChannelUsername": "@chan",
                "blocked_users": [1, 2, 3]
            }"#,
        )
        .unwrap();

        assert_eq!(settings.apify_api_token, "");
        assert_eq!(settings.target_channel_username, "@chan");
        assert_eq!(settings.require(Setting::TelegramApiId), None);
        assert_eq!(settings.require(Setting::TargetChannelUsername), Some("@chan"));
    }
}
