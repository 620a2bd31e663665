//! MTProto user sessions on top of `grammers`.
//!
//! The string session configured by the admins is in Telethon's format,
//! which is what most session generators produce.

use super::{
    InviteError, ResolvedChannel, SessionClient, SessionConnector, SessionCredentials,
    TransportError,
};
use crate::prelude::*;
use async_trait::async_trait;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use grammers_client::grammers_tl_types as tl;
use grammers_client::session::Session;
use grammers_client::types::Chat;
use grammers_client::{InitParams, InvocationError};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use teloxide::types::UserId;

const STRING_SESSION_VERSION: char = '1';
const AUTH_KEY_LEN: usize = 256;

/// Telethon pads the base64, but the sessions copied by hand often lose it
const STRING_SESSION_BASE64: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, thiserror::Error)]
pub enum StringSessionError {
    #[error("Unsupported string session version, only Telethon sessions (version 1) are supported")]
    UnsupportedVersion,

    #[error("The string session is not valid base64")]
    Base64 { source: base64::DecodeError },

    #[error("The string session has an unexpected length of {len} bytes")]
    InvalidLength { len: usize },
}

/// Authorization of a user account in one of Telegram's data centers.
#[derive(PartialEq, Eq)]
struct StringSession {
    dc_id: i32,
    addr: SocketAddr,
    auth_key: [u8; AUTH_KEY_LEN],
}

impl StringSession {
    /// The layout of the decoded bytes is `dc_id: u8`, then the IPv4 or IPv6
    /// address, `port: u16` (big endian) and the auth key.
    fn parse(input: &str) -> Result<Self, StringSessionError> {
        let input = input.trim();

        let encoded = input
            .strip_prefix(STRING_SESSION_VERSION)
            .ok_or(StringSessionError::UnsupportedVersion)?;

        let bytes = STRING_SESSION_BASE64
            .decode(encoded)
            .map_err(|source| StringSessionError::Base64 { source })?;

        let ip_len = match bytes.len().checked_sub(1 + 2 + AUTH_KEY_LEN) {
            Some(len @ (4 | 16)) => len,
            _ => return Err(StringSessionError::InvalidLength { len: bytes.len() }),
        };

        let (dc_id, rest) = bytes.split_at(1);
        let (ip, rest) = rest.split_at(ip_len);
        let (port, auth_key) = rest.split_at(2);

        let invalid_length = || StringSessionError::InvalidLength { len: bytes.len() };

        let ip = if let Ok(ip) = <[u8; 4]>::try_from(ip) {
            IpAddr::V4(Ipv4Addr::from(ip))
        } else {
            IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(ip).map_err(|_| invalid_length())?))
        };

        let port = u16::from_be_bytes([port[0], port[1]]);

        let auth_key = auth_key.try_into().map_err(|_| invalid_length())?;

        Ok(Self {
            dc_id: dc_id[0].into(),
            addr: SocketAddr::new(ip, port),
            auth_key,
        })
    }

    fn into_session(self) -> Session {
        let session = Session::new();
        session.insert_dc(self.dc_id, self.addr, self.auth_key);

        // The client connects to the data center of the user. The user ID
        // isn't part of the string session, it's not needed for invites.
        session.set_user(0, self.dc_id, false);

        session
    }
}

impl std::fmt::Debug for StringSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringSession")
            .field("dc_id", &self.dc_id)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Connects to Telegram with the `grammers` MTProto client
pub struct MtprotoConnector;

#[async_trait]
impl SessionConnector for MtprotoConnector {
    async fn connect(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<Box<dyn SessionClient>, TransportError> {
        let session = StringSession::parse(&credentials.string_session)?;

        debug!(?session, "Connecting to Telegram with the string session");

        let params = InitParams {
            // Flood waits are handled by the caller
            flood_sleep_threshold: 0,
            // Updates of the user account are never read
            update_queue_limit: Some(0),
            ..Default::default()
        };

        let client = grammers_client::Client::connect(grammers_client::Config {
            session: session.into_session(),
            api_id: credentials.api_id,
            api_hash: credentials.api_hash.clone(),
            params,
        })
        .await?;

        Ok(Box::new(MtprotoClient { client }))
    }
}

struct MtprotoClient {
    client: grammers_client::Client,
}

#[async_trait]
impl SessionClient for MtprotoClient {
    async fn is_authorized(&mut self) -> Result<bool, TransportError> {
        Ok(self.client.is_authorized().await?)
    }

    async fn resolve_channel(&mut self, username: &str) -> Result<ResolvedChannel, TransportError> {
        let username = username.trim().trim_start_matches('@');

        let chat = self
            .client
            .resolve_username(username)
            .await?
            .ok_or_else(|| format!("Nothing is known by the username @{username}"))?;

        let packed = match &chat {
            Chat::Channel(channel) => channel.pack(),
            Chat::Group(group) if group.is_megagroup() => group.pack(),
            Chat::Group(_) | Chat::User(_) => {
                return Err(format!("@{username} is not a channel or a supergroup").into())
            }
        };

        Ok(ResolvedChannel {
            id: packed.id,
            access_hash: packed.access_hash.unwrap_or(0),
        })
    }

    async fn invite(&mut self, channel: ResolvedChannel, user: UserId) -> Result<(), InviteError> {
        let user_id = i64::try_from(user.0).map_err(|err| InviteError::Other {
            source: Box::new(err),
        })?;

        let request = tl::functions::channels::InviteToChannel {
            channel: tl::types::InputChannel {
                channel_id: channel.id,
                access_hash: channel.access_hash,
            }
            .into(),
            // The bot API doesn't expose access hashes, Telegram accepts
            // zero for the users the account has already seen
            users: vec![tl::types::InputUser {
                user_id,
                access_hash: 0,
            }
            .into()],
        };

        let invited: tl::types::messages::InvitedUsers = self
            .client
            .invoke(&request)
            .await
            .map_err(invite_error)?
            .into();

        // Users with strict privacy settings aren't reported as errors
        if !invited.missing_invitees.is_empty() {
            return Err(InviteError::PrivacyRestricted);
        }

        Ok(())
    }

    async fn disconnect(self: Box<Self>) {
        // Dropping the client closes the connection
        drop(self.client);
    }
}

fn invite_error(err: InvocationError) -> InviteError {
    let InvocationError::Rpc(rpc) = &err else {
        return InviteError::Other {
            source: Box::new(err),
        };
    };

    if rpc.is("FLOOD_WAIT") || rpc.is("FLOOD_PREMIUM_WAIT") {
        return InviteError::FloodWait {
            wait: Duration::from_secs(rpc.value.unwrap_or(0).into()),
        };
    }

    if rpc.is("USER_PRIVACY_RESTRICTED") {
        return InviteError::PrivacyRestricted;
    }

    if rpc.is("USER_ALREADY_PARTICIPANT") {
        return InviteError::AlreadyParticipant;
    }

    InviteError::Other {
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use grammers_mtsender::RpcError;

    fn encode(dc_id: u8, ip: &[u8], port: u16) -> String {
        let mut bytes = vec![dc_id];
        bytes.extend_from_slice(ip);
        bytes.extend_from_slice(&port.to_be_bytes());
        bytes.extend((0..AUTH_KEY_LEN).map(|i| i as u8));

        format!(
            "{STRING_SESSION_VERSION}{}",
            base64::engine::general_purpose::URL_SAFE.encode(bytes)
        )
    }

    fn auth_key() -> [u8; AUTH_KEY_LEN] {
        std::array::from_fn(|i| i as u8)
    }

    #[test]
    fn parses_telethon_string_sessions() {
        let session = StringSession::parse(&encode(2, &[149, 154, 167, 51], 443)).unwrap();
        assert_eq!(session.dc_id, 2);
        assert_eq!(session.addr, "149.154.167.51:443".parse().unwrap());
        assert!(session.auth_key == auth_key());

        let ipv6 = Ipv6Addr::new(0x2001, 0x67c, 0x4e8, 0xf002, 0, 0, 0, 0xa);
        let session = StringSession::parse(&encode(4, &ipv6.octets(), 443)).unwrap();
        assert_eq!(session.dc_id, 4);
        assert_eq!(session.addr, SocketAddr::new(ipv6.into(), 443));

        // Without the padding and with stray whitespace around
        let input = encode(2, &[149, 154, 167, 51], 443);
        let input = format!(" {} \n", input.trim_end_matches('='));
        assert_eq!(StringSession::parse(&input).unwrap().dc_id, 2);
    }

    #[test]
    fn rejects_malformed_string_sessions() {
        let valid = encode(2, &[149, 154, 167, 51], 443);

        assert_matches!(
            StringSession::parse(&valid.replacen('1', "2", 1)),
            Err(StringSessionError::UnsupportedVersion)
        );
        assert_matches!(
            StringSession::parse("1not*base64"),
            Err(StringSessionError::Base64 { .. })
        );
        assert_matches!(
            StringSession::parse(&encode(2, &[149, 154, 167], 443)),
            Err(StringSessionError::InvalidLength { len: 262 })
        );
        assert_matches!(
            StringSession::parse(""),
            Err(StringSessionError::UnsupportedVersion)
        );
    }

    #[test]
    fn session_points_to_the_data_center_of_the_user() {
        let session = StringSession::parse(&encode(4, &[149, 154, 167, 92], 443))
            .unwrap()
            .into_session();

        assert_eq!(session.get_user().map(|user| user.dc), Some(4));
        assert_eq!(session.dc_auth_key(4), Some(auth_key()));
        assert_eq!(session.dc_auth_key(2), None);
    }

    fn rpc(name: &str, value: Option<u32>) -> InvocationError {
        InvocationError::Rpc(RpcError {
            code: 400,
            name: name.to_owned(),
            value,
            caused_by: None,
        })
    }

    #[test]
    fn maps_invite_errors() {
        assert_matches!(
            invite_error(rpc("FLOOD_WAIT", Some(17))),
            InviteError::FloodWait { wait } if wait == Duration::from_secs(17)
        );
        assert_matches!(
            invite_error(rpc("USER_PRIVACY_RESTRICTED", None)),
            InviteError::PrivacyRestricted
        );
        assert_matches!(
            invite_error(rpc("USER_ALREADY_PARTICIPANT", None)),
            InviteError::AlreadyParticipant
        );
        assert_matches!(
            invite_error(rpc("USER_ID_INVALID", None)),
            InviteError::Other { .. }
        );
        assert_matches!(
            invite_error(InvocationError::Dropped),
            InviteError::Other { .. }
        );
    }
}
