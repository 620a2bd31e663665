use serde::Deserialize;
use serde_with::{serde_as, json::JsonString};
use std::collections::HashSet;
use std::net::SocketAddr;
use teloxide::types::UserId;
use url::Url;

#[serde_as]
#[derive(Deserialize)]
pub(crate) struct Config {
    pub(crate) bot_token: String,

    /// JSON array of the IDs of the users who can use the bot
    #[serde_as(as = "JsonString")]
    pub(crate) admin_ids: HashSet<UserId>,

    /// The bot uses long polling if this is not set
    pub(crate) webhook_url: Option<Url>,

    #[serde(default = "default_webhook_addr")]
    pub(crate) webhook_addr: SocketAddr,
}

fn default_webhook_addr() -> SocketAddr {
    ([0, 0, 0, 0], 8443).into()
}
