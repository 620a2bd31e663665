use super::{parse_user_id, CommandError};
use crate::membership::{AddSummary, ChannelAdder};
use crate::phones::{self, CheckSummary, PhoneStatus};
use crate::prelude::*;
use crate::settings::Setting;
use crate::{fatal, tg, Result};
use async_trait::async_trait;
use itertools::Itertools;
use strum::IntoEnumIterator;
use teloxide::prelude::*;
use teloxide::types::{InputFile, UserId};
use teloxide::utils::command::BotCommands;

/// Telegram rejects longer messages, such lists are sent as files instead
const MAX_TEXT_LEN: usize = 4000;

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "snake_case", description = "Commands for admins:")]
pub(crate) enum Cmd {
    #[command(description = "show this message")]
    Help,

    #[command(description = "show the current settings (secrets are masked)")]
    Settings,

    #[command(
        parse_with = "split",
        description = "change a setting by its name, e.g. /set targetChannelUsername @news"
    )]
    Set { name: String, value: String },

    #[command(description = "set the Apify API token")]
    SetApifyToken(String),

    #[command(description = "set the Telegram API ID of the user session")]
    SetApiId(String),

    #[command(description = "set the Telegram API hash of the user session")]
    SetApiHash(String),

    #[command(description = "set the string session of the user account")]
    SetStringSession(String),

    #[command(description = "set the channel to add users to, e.g. @news")]
    SetChannel(String),

    #[command(description = "explain how to check phone numbers")]
    Check,

    #[command(description = "add the registered users from the last check to the channel")]
    AddToChannel,

    #[command(description = "list the blocked users")]
    Blocked,

    #[command(description = "never add the user with the given ID to the channel")]
    Block(String),

    #[command(description = "remove the user with the given ID from the blocklist")]
    Unblock(String),

    #[command(description = "download the results of the last check as CSV")]
    ExportResults,

    #[command(description = "download the registered users from the last check as JSON")]
    ExportRegistered,

    #[command(description = "list the IDs of the registered users from the last check")]
    ListIds,
}

impl Cmd {
    /// Whether the message text may contain the value of a secret setting.
    ///
    /// Works on the raw text, so malformed commands are recognized too. A
    /// `/set` with an unknown setting name counts as secret.
    pub(crate) fn may_carry_secret(text: &str) -> bool {
        let mut words = text.split_whitespace();

        let Some(command) = words.next().and_then(|word| word.strip_prefix('/')) else {
            return false;
        };

        let command = command.split('@').next().unwrap_or(command);

        match command.to_ascii_lowercase().as_str() {
            "set_apify_token" | "set_api_hash" | "set_string_session" => true,
            "set" => words
                .next()
                .is_some_and(|name| Setting::from_name(name).map_or(true, Setting::is_secret)),
            _ => false,
        }
    }
}

#[async_trait]
impl tg::cmd::Command for Cmd {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        match self {
            Cmd::Help => {
                ctx.bot.reply_help_md_escaped::<Cmd>(msg).await?;
            }
            Cmd::Settings => {
                ctx.bot.reply_escaped(msg, &describe_settings(ctx)).await?;
            }
            Cmd::Set { name, value } => {
                set_setting(ctx, msg, &name, &value).await?;
            }
            Cmd::SetApifyToken(value) => {
                set_setting(ctx, msg, Setting::ApifyApiToken.name(), &value).await?;
            }
            Cmd::SetApiId(value) => {
                set_setting(ctx, msg, Setting::TelegramApiId.name(), &value).await?;
            }
            Cmd::SetApiHash(value) => {
                set_setting(ctx, msg, Setting::TelegramApiHash.name(), &value).await?;
            }
            Cmd::SetStringSession(value) => {
                set_setting(ctx, msg, Setting::TelegramStringSession.name(), &value).await?;
            }
            Cmd::SetChannel(value) => {
                set_setting(ctx, msg, Setting::TargetChannelUsername.name(), &value).await?;
            }
            Cmd::Check => {
                let text = "📄 Send me a CSV file with phone numbers in the first column, \
                    in international format (e.g. +1234567890). \
                    I'll check which of them are registered in Telegram.";
                ctx.bot.reply_escaped(msg, text).await?;
            }
            Cmd::AddToChannel => add_to_channel(ctx, msg).await?,
            Cmd::Blocked => {
                let blocked = ctx.blocklist.list();
                if blocked.is_empty() {
                    ctx.bot.reply_escaped(msg, "The blocklist is empty").await?;
                } else {
                    let list = blocked.iter().join("\n");
                    let text = format!("🚫 Blocked users ({}):\n{list}", blocked.len());
                    reply_long(ctx, msg, text, "blocked_users.txt").await?;
                }
            }
            Cmd::Block(input) => {
                let user_id = parse_user_id(&input)?;
                let text = if ctx.blocklist.block(user_id).await? {
                    format!("🚫 User {user_id} was blocked")
                } else {
                    format!("User {user_id} is already blocked")
                };
                ctx.bot.reply_escaped(msg, &text).await?;
            }
            Cmd::Unblock(input) => {
                let user_id = parse_user_id(&input)?;
                let text = if ctx.blocklist.unblock(user_id).await? {
                    format!("✅ User {user_id} was unblocked")
                } else {
                    format!("User {user_id} is not blocked")
                };
                ctx.bot.reply_escaped(msg, &text).await?;
            }
            Cmd::ExportResults => {
                let results = last_results(ctx, msg)?;
                let csv = phones::results_to_csv(&results)?;
                let file = InputFile::memory(csv).file_name("results.csv");
                ctx.bot.reply_document(msg, file).await?;
            }
            Cmd::ExportRegistered => {
                let results = last_results(ctx, msg)?;
                if phones::registered_user_ids(&results).is_empty() {
                    return Err(CommandError::NoRegisteredUsers.into());
                }
                let json = phones::registered_to_json(&results);
                let file = InputFile::memory(json).file_name("registered_users.json");
                ctx.bot.reply_document(msg, file).await?;
            }
            Cmd::ListIds => {
                let results = last_results(ctx, msg)?;
                let ids = phones::registered_user_ids(&results);
                if ids.is_empty() {
                    return Err(CommandError::NoRegisteredUsers.into());
                }
                let text = format!(
                    "👥 Registered user IDs ({}):\n{}",
                    ids.len(),
                    ids.iter().join("\n")
                );
                reply_long(ctx, msg, text, "user_ids.txt").await?;
            }
        }

        Ok(())
    }
}

fn describe_settings(ctx: &tg::Ctx) -> String {
    let settings = ctx.settings.get();

    let lines = Setting::iter()
        .map(|setting| format!("• {setting}: {}", settings.display_value(setting)))
        .join("\n");

    let transport = if ctx.session.is_some() {
        "available"
    } else {
        "not configured"
    };

    format!("⚙️ Current settings:\n{lines}\n\nMTProto transport: {transport}")
}

async fn set_setting(ctx: &tg::Ctx, msg: &Message, name: &str, value: &str) -> Result {
    let setting = ctx.settings.set_by_name(name, value).await?;

    let settings = ctx.settings.get();
    let text = format!("✅ {setting} is now {}", settings.display_value(setting));
    ctx.bot.reply_escaped(msg, &text).await?;

    // Secrets shouldn't stay in the chat history
    if setting.is_secret() {
        if let Err(err) = ctx.bot.delete_message(msg.chat.id, msg.id).await {
            warn!(
                err = tracing_err(&err),
                %setting,
                "Failed to delete the message with a secret"
            );
        }
    }

    Ok(())
}

fn admin_id(msg: &Message) -> Result<UserId> {
    let user = msg
        .from
        .as_ref()
        .ok_or_else(|| fatal!("BUG: admin message {} has no sender", msg.id.0))?;
    Ok(user.id)
}

fn last_results(ctx: &tg::Ctx, msg: &Message) -> Result<Vec<PhoneStatus>> {
    Ok(ctx
        .jobs
        .last(admin_id(msg)?)
        .ok_or(CommandError::NoResults)?)
}

async fn add_to_channel(ctx: &tg::Ctx, msg: &Message) -> Result {
    let results = last_results(ctx, msg)?;
    let user_ids = phones::registered_user_ids(&results);

    if user_ids.is_empty() {
        return Err(CommandError::NoRegisteredUsers.into());
    }

    let adder = ChannelAdder::new(ctx.session.as_deref())?;
    let settings = ctx.settings.get();

    let summary = CheckSummary::new(&results);
    let text = format!(
        "⏳ Adding {} registered users (out of {} checked numbers) to {}...",
        user_ids.len(),
        summary.total,
        settings.target_channel_username,
    );
    ctx.bot.reply_escaped(msg, &text).await?;

    let summary = adder
        .add_users(&settings, &user_ids, &ctx.blocklist)
        .await?;

    ctx.bot
        .reply_escaped(msg, &describe_add_summary(&summary))
        .await?;

    Ok(())
}

fn describe_add_summary(summary: &AddSummary) -> String {
    format!(
        "✅ Added: {}\n❌ Failed: {}\n🚫 Skipped (blocked): {}",
        summary.added.len(),
        summary.failed.len(),
        summary.skipped_blocked.len(),
    )
}

/// Sends the text as a message, or as a file if it's too long for a message.
async fn reply_long(ctx: &tg::Ctx, msg: &Message, text: String, file_name: &str) -> Result {
    if text.len() <= MAX_TEXT_LEN {
        ctx.bot.reply_escaped(msg, &text).await?;
        return Ok(());
    }

    let file = InputFile::memory(text.into_bytes()).file_name(file_name.to_owned());
    ctx.bot.reply_document(msg, file).await?;

    Ok(())
}
