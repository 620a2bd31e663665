pub(crate) mod admin;

use crate::prelude::*;
use crate::util::DynResult;
use crate::{tg, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use teloxide::macros::BotCommands;
use teloxide::types::{Message, User, UserId};
use teloxide::utils::markdown;

#[derive(Debug, thiserror::Error)]
pub(crate) enum CommandError {
    #[error("`{input}` is not a valid Telegram user ID")]
    InvalidUserId { input: String },

    #[error("There are no phone check results yet, send a CSV file with phone numbers first")]
    NoResults,

    #[error("None of the checked phone numbers is registered in Telegram")]
    NoRegisteredUsers,

    #[error("Only CSV files with phone numbers are supported")]
    NotCsv,

    #[error("The file is too big ({actual} bytes), the maximum is {max} bytes")]
    FileTooBig { actual: u32, max: u32 },
}

pub(crate) fn parse_user_id(input: &str) -> Result<UserId, CommandError> {
    let input = input.trim();
    input
        .parse()
        .map(UserId)
        .map_err(|_| CommandError::InvalidUserId {
            input: input.to_owned(),
        })
}

#[async_trait]
pub(crate) trait Command: fmt::Debug + Send + Sync + 'static {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result;
}

pub(crate) fn handle<'a, C: Command>(
) -> impl Fn(Arc<tg::Ctx>, Message, C) -> BoxFuture<'a, DynResult> {
    move |ctx, msg, cmd| {
        let name = command_name(&cmd);
        let span = info_span!(
            "handle_command",
            sender = msg.from.as_ref().map(User::debug_id).as_deref(),
            chat = %msg.chat.debug_id(),
            cmd = %name,
        );

        let fut = async move {
            debug!("Processing command");

            let result = cmd.handle(&ctx, &msg).await;

            let status = if result.is_ok() { "ok" } else { "err" };
            metrics::counter!("tg_commands_total", "cmd" => name, "result" => status)
                .increment(1);

            if let Err(err) = &result {
                report_error(&ctx, &msg, err).await;
            }
            result.map_err(Into::into)
        };

        Box::pin(fut.instrument(span))
    }
}

/// Only the variant name is logged, the arguments may contain secrets
fn command_name(cmd: &impl fmt::Debug) -> String {
    let debug = format!("{cmd:?}");
    debug
        .split(|char: char| !char.is_alphanumeric() && char != '_')
        .next()
        .unwrap_or_default()
        .to_owned()
}

/// Tells the admin what went wrong, along with the error ID to look up
/// the logs.
pub(crate) async fn report_error(ctx: &tg::Ctx, msg: &Message, err: &crate::Error) {
    let span = warn_span!("err", err = tracing_err(err), id = err.id());
    async {
        if !err.is_user_error() {
            warn!("Handler returned an error");
        }

        let reply_msg = markdown::code_block(&err.display_chain().to_string());

        let msg_result = ctx.bot.reply(msg, reply_msg).await;

        if let Err(err) = msg_result {
            warn!(
                err = tracing_err(&err),
                "Failed to reply with the error message to the user"
            );
        }
    }
    .instrument(span)
    .await;
}

/// Special case for the `/start` command in PM with the bot.
///
/// We don't want this command to appear in the help message, so we handle
/// it separately
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "snake_case")]
pub(crate) enum StartCommand {
    #[command(description = "unreachable")]
    Start,
}

#[async_trait]
impl Command for StartCommand {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        admin::Cmd::Help.handle(ctx, msg).await
    }
}

pub(crate) fn filter_pm_with_bot(msg: Message) -> bool {
    msg.chat.is_private()
}
