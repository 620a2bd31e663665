//! Phone lists that admins upload as CSV documents

use super::cmd::{report_error, CommandError};
use crate::apify;
use crate::phones::{self, CheckSummary};
use crate::prelude::*;
use crate::util::DynResult;
use crate::{tg, Result};
use std::sync::Arc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{Document, InputFile, User};

/// Bots can't download bigger files via the Bot API
const MAX_FILE_SIZE: u32 = 20 * 1024 * 1024;

pub(crate) fn filter_document(msg: Message) -> Option<Document> {
    msg.document().cloned()
}

pub(crate) async fn handle(ctx: Arc<tg::Ctx>, msg: Message, doc: Document) -> DynResult {
    let span = info_span!(
        "handle_document",
        sender = msg.from.as_ref().map(User::debug_id).as_deref(),
        chat = %msg.chat.debug_id(),
        file_name = doc.file_name.as_deref(),
        file_size = doc.file.size,
    );

    async {
        let result = check_document(&ctx, &msg, &doc).await;
        if let Err(err) = &result {
            report_error(&ctx, &msg, err).await;
        }
        result.map_err(Into::into)
    }
    .instrument(span)
    .await
}

fn is_csv(doc: &Document) -> bool {
    let by_mime = doc
        .mime_type
        .as_ref()
        .is_some_and(|mime| mime.subtype() == "csv");

    let by_name = doc
        .file_name
        .as_deref()
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(".csv"));

    by_mime || by_name
}

async fn check_document(ctx: &tg::Ctx, msg: &Message, doc: &Document) -> Result {
    if !is_csv(doc) {
        return Err(CommandError::NotCsv.into());
    }

    if doc.file.size > MAX_FILE_SIZE {
        return Err(CommandError::FileTooBig {
            actual: doc.file.size,
            max: MAX_FILE_SIZE,
        }
        .into());
    }

    let admin = msg
        .from
        .as_ref()
        .fatal_ctx(|| "BUG: admin messages always have a sender")?
        .id;

    // Fail early if the token is missing, there is no point in downloading
    // the file otherwise
    let apify = apify::Client::new(ctx.http.clone(), &ctx.settings.get().apify_api_token)?;

    let file = ctx.bot.get_file(doc.file.id.clone()).await?;
    let mut content = vec![];
    ctx.downloader.download_file(&file.path, &mut content).await?;

    let phones = phones::parse_phone_csv(&content)?;

    let text = format!("⏳ Checking {} phone numbers, this may take a while...", phones.len());
    ctx.bot.reply_escaped(msg, &text).await?;

    let report = apify.check_phones(&phones).await?;
    let failed_batches = report.failed_batches;

    let results = report.results;
    ctx.jobs.store(admin, &results).await?;

    let summary = CheckSummary::new(&results);

    let mut text = format!(
        "✅ Check finished\n\nTotal: {}\nRegistered: {}\nNot registered: {}",
        summary.total, summary.registered, summary.not_registered,
    );

    if failed_batches > 0 {
        text += &format!(
            "\n\n⚠️ {failed_batches} batches of numbers failed to be checked, \
            they are missing from the results"
        );
    }

    text += "\n\nUse /add_to_channel to add the registered users to the channel.";

    ctx.bot.reply_escaped(msg, &text).await?;

    let csv = phones::results_to_csv(&results)?;
    let file = InputFile::memory(csv).file_name("results.csv");
    ctx.bot.reply_document(msg, file).await?;

    Ok(())
}
