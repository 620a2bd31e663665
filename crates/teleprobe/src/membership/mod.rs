//! Adding the registered users to the target channel on behalf of a user
//! account.
//!
//! Bots can't invite arbitrary users to channels, so this goes through an
//! MTProto user session described by the runtime [`Settings`]. The transport
//! itself is plugged in via [`SessionConnector`], [`MtprotoConnector`] is the
//! one the bot ships with.

mod mtproto;

use crate::blocklist::Blocklist;
use crate::prelude::*;
use crate::settings::{Setting, Settings};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use teloxide::types::UserId;

pub use mtproto::MtprotoConnector;

/// Pause between two consecutive invites to stay under the rate limits
const INVITE_INTERVAL: Duration = Duration::from_secs(1);

pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub(crate) enum MembershipError {
    #[error("Setting `{setting}` is not configured yet")]
    MissingSetting { setting: Setting },

    #[error("Telegram API ID must be a number, but got `{value}`")]
    InvalidApiId { value: String },

    #[error("This deployment has no MTProto transport, users can't be added to channels")]
    NoTransport,

    #[error("Failed to connect to Telegram with the configured session")]
    Connect { source: TransportError },

    #[error("The configured string session is not authorized, generate a new one")]
    NotAuthorized,

    #[error("Failed to find the channel {channel}")]
    ResolveChannel {
        channel: String,
        source: TransportError,
    },
}

impl MembershipError {
    pub(crate) fn is_user_error(&self) -> bool {
        match self {
            Self::MissingSetting { .. }
            | Self::InvalidApiId { .. }
            | Self::NoTransport
            | Self::NotAuthorized
            | Self::ResolveChannel { .. } => true,
            Self::Connect { .. } => false,
        }
    }
}

/// Reasons for Telegram to refuse an invite
#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("Telegram asked to wait for {} seconds", .wait.as_secs())]
    FloodWait { wait: Duration },

    #[error("The user's privacy settings don't allow adding them to channels")]
    PrivacyRestricted,

    #[error("The user is already a participant of the channel")]
    AlreadyParticipant,

    #[error("Failed to invite the user")]
    Other { source: TransportError },
}

pub struct SessionCredentials {
    pub api_id: i32,
    pub api_hash: String,
    pub string_session: String,
}

impl SessionCredentials {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self, MembershipError> {
        let require = |setting| {
            settings
                .require(setting)
                .ok_or(MembershipError::MissingSetting { setting })
        };

        let api_id = require(Setting::TelegramApiId)?;
        let api_id = api_id
            .parse()
            .map_err(|_| MembershipError::InvalidApiId {
                value: api_id.to_owned(),
            })?;

        Ok(Self {
            api_id,
            api_hash: require(Setting::TelegramApiHash)?.to_owned(),
            string_session: require(Setting::TelegramStringSession)?.to_owned(),
        })
    }
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("api_id", &self.api_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub id: i64,
    pub access_hash: i64,
}

/// Opens MTProto user sessions
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<Box<dyn SessionClient>, TransportError>;
}

/// Connected MTProto user session
#[async_trait]
pub trait SessionClient: Send {
    async fn is_authorized(&mut self) -> Result<bool, TransportError>;

    async fn resolve_channel(&mut self, username: &str) -> Result<ResolvedChannel, TransportError>;

    async fn invite(&mut self, channel: ResolvedChannel, user: UserId) -> Result<(), InviteError>;

    async fn disconnect(self: Box<Self>);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct AddSummary {
    pub(crate) added: Vec<UserId>,
    pub(crate) failed: Vec<UserId>,
    pub(crate) skipped_blocked: Vec<UserId>,
}

pub(crate) struct ChannelAdder<'a> {
    connector: &'a dyn SessionConnector,
    invite_interval: Duration,
}

impl<'a> ChannelAdder<'a> {
    pub(crate) fn new(connector: Option<&'a dyn SessionConnector>) -> Result<Self> {
        let connector = connector.ok_or(MembershipError::NoTransport)?;
        Ok(Self {
            connector,
            invite_interval: INVITE_INTERVAL,
        })
    }

    /// Invites the users one by one. Blocked users are skipped, and the
    /// users Telegram refuses to invite are reported as failed.
    #[instrument(skip_all, fields(users = user_ids.len()))]
    pub(crate) async fn add_users(
        &self,
        settings: &Settings,
        user_ids: &[UserId],
        blocklist: &Blocklist,
    ) -> Result<AddSummary> {
        let credentials = SessionCredentials::from_settings(settings)?;
        let channel = settings
            .require(Setting::TargetChannelUsername)
            .ok_or(MembershipError::MissingSetting {
                setting: Setting::TargetChannelUsername,
            })?;

        let mut client = self
            .connector
            .connect(&credentials)
            .await
            .map_err(|source| MembershipError::Connect { source })?;

        let result = self
            .add_users_imp(client.as_mut(), channel, user_ids, blocklist)
            .await;

        client.disconnect().await;

        result
    }

    async fn add_users_imp(
        &self,
        client: &mut dyn SessionClient,
        channel: &str,
        user_ids: &[UserId],
        blocklist: &Blocklist,
    ) -> Result<AddSummary> {
        let authorized = client
            .is_authorized()
            .await
            .map_err(|source| MembershipError::Connect { source })?;

        if !authorized {
            return Err(MembershipError::NotAuthorized.into());
        }

        let resolved = client.resolve_channel(channel).await.map_err(|source| {
            MembershipError::ResolveChannel {
                channel: channel.to_owned(),
                source,
            }
        })?;

        let mut summary = AddSummary::default();

        for &user_id in user_ids {
            if blocklist.contains(user_id) {
                info!(%user_id, "User is blocked, skipping");
                summary.skipped_blocked.push(user_id);
                continue;
            }

            let result = client.invite(resolved, user_id).await;

            let label = match &result {
                Ok(()) => "ok",
                Err(InviteError::FloodWait { .. }) => "flood_wait",
                Err(InviteError::PrivacyRestricted) => "privacy_restricted",
                Err(InviteError::AlreadyParticipant) => "already_participant",
                Err(InviteError::Other { .. }) => "err",
            };
            metrics::counter!("channel_invites_total", "result" => label).increment(1);

            match result {
                Ok(()) => {
                    info!(%user_id, "Added user to the channel");
                    summary.added.push(user_id);
                    tokio::time::sleep(self.invite_interval).await;
                }
                Err(InviteError::FloodWait { wait }) => {
                    warn!(%user_id, wait_secs = wait.as_secs(), "Flood wait, sleeping");
                    tokio::time::sleep(wait).await;
                    summary.failed.push(user_id);
                }
                Err(err @ (InviteError::PrivacyRestricted | InviteError::AlreadyParticipant)) => {
                    info!(%user_id, err = tracing_err(&err), "User can't be invited");
                    summary.failed.push(user_id);
                }
                Err(err @ InviteError::Other { .. }) => {
                    error!(%user_id, err = tracing_err(&err), "Failed to add user to the channel");
                    summary.failed.push(user_id);
                }
            }
        }

        info!(
            added = summary.added.len(),
            failed = summary.failed.len(),
            skipped_blocked = summary.skipped_blocked.len(),
            "Finished adding users to the channel"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests;
