use super::*;
use crate::ErrorKind;
use assert_matches::assert_matches;
use expect_test::expect;
use std::sync::Arc;

const CHANNEL: ResolvedChannel = ResolvedChannel {
    id: 100,
    access_hash: 7,
};

#[derive(Default)]
struct FakeTelegram {
    authorized: bool,
    log: parking_lot::Mutex<Vec<String>>,
}

impl FakeTelegram {
    fn authorized() -> Arc<Self> {
        Arc::new(Self {
            authorized: true,
            ..Default::default()
        })
    }

    fn push(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

struct FakeConnector(Arc<FakeTelegram>);

struct FakeClient(Arc<FakeTelegram>);

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<Box<dyn SessionClient>, TransportError> {
        self.0.push(format!("connect {}", credentials.api_id));
        Ok(Box::new(FakeClient(self.0.clone())))
    }
}

#[async_trait]
impl SessionClient for FakeClient {
    async fn is_authorized(&mut self) -> Result<bool, TransportError> {
        Ok(self.0.authorized)
    }

    async fn resolve_channel(&mut self, username: &str) -> Result<ResolvedChannel, TransportError> {
        self.0.push(format!("resolve {username}"));
        if username != "@news" {
            return Err("no such channel".into());
        }
        Ok(CHANNEL)
    }

    async fn invite(&mut self, channel: ResolvedChannel, user: UserId) -> Result<(), InviteError> {
        assert_eq!(channel, CHANNEL);
        self.0.push(format!("invite {user}"));
        match user.0 {
            2 => Err(InviteError::PrivacyRestricted),
            3 => Err(InviteError::AlreadyParticipant),
            4 => Err(InviteError::FloodWait {
                wait: Duration::from_secs(30),
            }),
            5 => Err(InviteError::Other {
                source: "internal".into(),
            }),
            _ => Ok(()),
        }
    }

    async fn disconnect(self: Box<Self>) {
        self.0.push("disconnect");
    }
}

fn settings() -> Settings {
    Settings {
        telegram_api_id: "12345".to_owned(),
        telegram_api_hash: "hash".to_owned(),
        telegram_string_session: "session".to_owned(),
        target_channel_username: "@news".to_owned(),
        ..Default::default()
    }
}

fn empty_blocklist(dir: &tempfile::TempDir) -> Blocklist {
    Blocklist::load(dir.path().join("blocklist.json"))
}

#[test_log::test(tokio::test(start_paused = true))]
async fn adds_users_and_reports_failures() {
    let dir = tempfile::tempdir().unwrap();
    let blocklist = empty_blocklist(&dir);
    blocklist.block(UserId(6)).await.unwrap();

    let telegram = FakeTelegram::authorized();
    let connector = FakeConnector(telegram.clone());
    let adder = ChannelAdder::new(Some(&connector)).unwrap();

    let users = [1, 2, 3, 4, 5, 6, 7].map(UserId);

    let start = tokio::time::Instant::now();
    let summary = adder.add_users(&settings(), &users, &blocklist).await.unwrap();

    assert_eq!(
        summary,
        AddSummary {
            added: vec![UserId(1), UserId(7)],
            failed: vec![UserId(2), UserId(3), UserId(4), UserId(5)],
            skipped_blocked: vec![UserId(6)],
        }
    );

    // One second after each added user and the flood wait
    assert_eq!(start.elapsed(), Duration::from_secs(32));

    expect![[r#"
        [
            "connect 12345",
            "resolve @news",
            "invite 1",
            "invite 2",
            "invite 3",
            "invite 4",
            "invite 5",
            "invite 7",
            "disconnect",
        ]
    "#]]
    .assert_debug_eq(&telegram.log());
}

#[test_log::test(tokio::test)]
async fn disconnects_when_the_channel_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let telegram = FakeTelegram::authorized();
    let connector = FakeConnector(telegram.clone());
    let adder = ChannelAdder::new(Some(&connector)).unwrap();

    let settings = Settings {
        target_channel_username: "@missing".to_owned(),
        ..settings()
    };

    let err = adder
        .add_users(&settings, &[UserId(1)], &empty_blocklist(&dir))
        .await
        .unwrap_err();

    assert!(err.is_user_error());
    assert_matches!(
        err.kind(),
        ErrorKind::Membership {
            source: MembershipError::ResolveChannel { .. }
        }
    );
    assert_eq!(telegram.log().last().unwrap(), "disconnect");
}

#[test_log::test(tokio::test)]
async fn refuses_unauthorized_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let telegram = Arc::new(FakeTelegram::default());
    let connector = FakeConnector(telegram.clone());
    let adder = ChannelAdder::new(Some(&connector)).unwrap();

    let err = adder
        .add_users(&settings(), &[UserId(1)], &empty_blocklist(&dir))
        .await
        .unwrap_err();

    assert_matches!(
        err.kind(),
        ErrorKind::Membership {
            source: MembershipError::NotAuthorized
        }
    );
    assert_eq!(telegram.log(), ["connect 12345", "disconnect"]);
}

#[test_log::test(tokio::test)]
async fn missing_settings_fail_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let telegram = FakeTelegram::authorized();
    let connector = FakeConnector(telegram.clone());
    let adder = ChannelAdder::new(Some(&connector)).unwrap();
    let blocklist = empty_blocklist(&dir);

    let settings_without = |setting| {
        let mut settings = settings();
        settings.slot_mut(setting).clear();
        settings
    };

    for setting in [
        Setting::TelegramApiId,
        Setting::TelegramApiHash,
        Setting::TelegramStringSession,
        Setting::TargetChannelUsername,
    ] {
        let err = adder
            .add_users(&settings_without(setting), &[UserId(1)], &blocklist)
            .await
            .unwrap_err();

        assert_matches!(
            err.kind(),
            ErrorKind::Membership {
                source: MembershipError::MissingSetting { setting: actual }
            } if *actual == setting
        );
    }

    let settings = Settings {
        telegram_api_id: "12a".to_owned(),
        ..settings()
    };
    let err = adder
        .add_users(&settings, &[UserId(1)], &blocklist)
        .await
        .unwrap_err();
    assert_matches!(
        err.kind(),
        ErrorKind::Membership {
            source: MembershipError::InvalidApiId { .. }
        }
    );

    assert!(telegram.log().is_empty());
}

#[test]
fn no_transport() {
    let err = ChannelAdder::new(None).err().unwrap();
    assert!(err.is_user_error());
}

#[test]
fn credentials_debug_hides_secrets() {
    let credentials = SessionCredentials::from_settings(&settings()).unwrap();
    expect![[r#"SessionCredentials { api_id: 12345, .. }"#]]
        .assert_eq(&format!("{credentials:?}"));
}
