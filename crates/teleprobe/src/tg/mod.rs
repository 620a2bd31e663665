//! Telegram surface of the bot

mod cmd;
mod config;
mod upload;

use crate::blocklist::Blocklist;
use crate::jobs::JobResults;
use crate::membership::SessionConnector;
use crate::prelude::*;
use crate::settings::ConfigStore;
use crate::util::encoding;
use crate::util::DynResult;
use crate::{http, Result};
use dptree::di::DependencyMap;
use std::sync::Arc;
use teloxide::adaptors::{CacheMe, DefaultParseMode, Throttle, Trace};
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, UpdateKind};
use teloxide::update_listeners::webhooks;
use teloxide::utils::command::BotCommands;

pub(crate) use cmd::CommandError;
pub(crate) use config::*;

pub(crate) type Bot = Trace<CacheMe<DefaultParseMode<Throttle<teloxide::Bot>>>>;

pub(crate) struct Ctx {
    bot: Bot,

    /// File downloads are implemented only for the bare bot, not for the
    /// adaptors
    downloader: teloxide::Bot,

    settings: Arc<ConfigStore>,
    blocklist: Arc<Blocklist>,
    jobs: JobResults,
    http: http::Client,
    session: Option<Arc<dyn SessionConnector>>,
}

impl Ctx {
    fn is_admin(&self, msg: &Message) -> bool {
        msg.from
            .as_ref()
            .is_some_and(|user| self.settings.is_admin(user.id))
    }
}

pub(crate) struct RunBotOptions {
    pub(crate) tg_cfg: Config,
    pub(crate) settings: Arc<ConfigStore>,
    pub(crate) blocklist: Arc<Blocklist>,
    pub(crate) jobs: JobResults,
    pub(crate) session: Option<Arc<dyn SessionConnector>>,
}

pub(crate) async fn run_bot(opts: RunBotOptions) -> Result {
    let mut di = DependencyMap::new();

    let downloader = teloxide::Bot::new(opts.tg_cfg.bot_token.clone());

    let bot: Bot = downloader
        .clone()
        .throttle(Default::default())
        .parse_mode(ParseMode::MarkdownV2)
        .cache_me()
        // Verbose responses would dump `getUpdates` with the admins' secrets
        .trace(
            teloxide::adaptors::trace::Settings::TRACE_REQUESTS_VERBOSE
                | teloxide::adaptors::trace::Settings::TRACE_RESPONSES,
        );

    if opts.session.is_none() {
        warn!("No MTProto transport is configured, /add_to_channel is disabled");
    }

    di.insert(Arc::new(Ctx {
        bot: bot.clone(),
        downloader,
        settings: opts.settings,
        blocklist: opts.blocklist,
        jobs: opts.jobs,
        http: http::create_client()?,
        session: opts.session,
    }));

    info!("Starting bot...");

    bot.set_my_commands(cmd::admin::Cmd::bot_commands()).await?;

    let handler = dptree::entry()
        .inspect(|update: Update| {
            metrics::counter!("tg_updates_total", "kind" => update.kind.discriminator())
                .increment(1);
            if carries_secret(&update) {
                trace!(target: "tg_update", update_id = update.id.0, "<update with a secret>");
                return;
            }
            trace!(
                target: "tg_update",
                "{}",
                encoding::to_json_string_pretty(&update),
            );
        })
        .branch(
            Update::filter_message()
                .filter(|msg: Message, ctx: Arc<Ctx>| !ctx.is_admin(&msg))
                .endpoint(handle_non_admin),
        )
        .branch(
            Update::filter_message()
                .filter_command::<cmd::StartCommand>()
                .endpoint(cmd::handle::<cmd::StartCommand>()),
        )
        .branch(
            Update::filter_message()
                .filter_command::<cmd::admin::Cmd>()
                .endpoint(cmd::handle::<cmd::admin::Cmd>()),
        )
        .branch(
            Update::filter_message()
                .filter_map(upload::filter_document)
                .endpoint(upload::handle),
        )
        .branch(
            Update::filter_message()
                .filter(cmd::filter_pm_with_bot)
                .endpoint(handle_unrecognized),
        )
        .inspect(|update: Update| {
            metrics::counter!("tg_updates_skipped_total", "kind" => update.kind.discriminator())
                .increment(1);
        });

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(di)
        // We don't handle all possible updates, so to suppress the warning
        // about them we have a noop default handler here
        .default_handler(|_| std::future::ready(()))
        .enable_ctrlc_handler()
        .build();

    match opts.tg_cfg.webhook_url {
        Some(url) => {
            info!(%url, addr = %opts.tg_cfg.webhook_addr, "Receiving updates via webhook");

            let options = webhooks::Options::new(opts.tg_cfg.webhook_addr, url);
            let listener = webhooks::axum(bot, options).await?;

            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("Webhook listener failed"),
                )
                .await;
        }
        None => {
            info!("Receiving updates via long polling");
            dispatcher.dispatch().await;
        }
    }

    info!("Bot stopped");

    Ok(())
}

fn carries_secret(update: &Update) -> bool {
    match &update.kind {
        UpdateKind::Message(msg) | UpdateKind::EditedMessage(msg) => {
            msg.text().is_some_and(cmd::admin::Cmd::may_carry_secret)
        }
        _ => false,
    }
}

async fn handle_non_admin(ctx: Arc<Ctx>, msg: Message) -> DynResult {
    info!(
        sender = msg.from.as_ref().map(|user| user.debug_id()).as_deref(),
        chat = %msg.chat.debug_id(),
        "Ignoring a message from a non-admin"
    );

    // Don't make noise in group chats
    if !msg.chat.is_private() {
        return Ok(());
    }

    ctx.bot
        .reply_escaped(&msg, "⛔ You are not allowed to use this bot.")
        .await?;

    Ok(())
}

async fn handle_unrecognized(ctx: Arc<Ctx>, msg: Message) -> DynResult {
    ctx.bot
        .reply_escaped(
            &msg,
            "I didn't understand that. Send /help to see the available commands, \
            or send a CSV file with phone numbers to check them.",
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(kind: &str, text: &str) -> Update {
        let mut json = serde_json::json!({ "update_id": 1 });
        json[kind] = serde_json::json!({
            "message_id": 2,
            "date": 0,
            "edit_date": 1,
            "chat": { "id": 10, "type": "private", "first_name": "Admin" },
            "from": { "id": 10, "is_bot": false, "first_name": "Admin" },
            "text": text,
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn updates_with_secrets_are_not_dumped() {
        assert!(carries_secret(&update("message", "/set_string_session 1BVtsOK8Bu")));
        assert!(carries_secret(&update(
            "edited_message",
            "/set apifyApiToken apify_api_0123456789abcdef"
        )));
        assert!(!carries_secret(&update("message", "/settings")));
        assert!(!carries_secret(&update("message", "/set_channel @news")));
    }
}
