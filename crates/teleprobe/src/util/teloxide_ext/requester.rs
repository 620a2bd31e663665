//! Rust analyzer is very slow on processing requester extension here, so extracted
//! it to a separate module to limit the scope of analysis.

use teloxide::payloads::setters::*;
use teloxide::requests::Requester;
use teloxide::types::{InputFile, Message, ReplyParameters};
use teloxide::utils::markdown;

/// There is [`teloxide::prelude::RequesterExt`] already. We name this symbol
/// different to avoid collisions.
#[easy_ext::ext(UtilRequesterExt)]
pub(crate) impl<T: Requester> T {
    /// Reply to the message, but don't fail if the original message was deleted.
    fn reply(&self, msg: &Message, text: impl Into<String>) -> Self::SendMessage {
        self.send_message(msg.chat.id, text)
            .reply_parameters(ReplyParameters::new(msg.id).allow_sending_without_reply())
    }

    fn reply_document(&self, msg: &Message, document: InputFile) -> Self::SendDocument {
        self.send_document(msg.chat.id, document)
            .reply_parameters(ReplyParameters::new(msg.id).allow_sending_without_reply())
    }

    /// Same as [`Self::reply`], but escapes the text for `MarkdownV2`.
    fn reply_escaped(&self, msg: &Message, text: &str) -> Self::SendMessage {
        self.reply(msg, markdown::escape(text))
    }

    fn reply_help_md_escaped<Cmd: teloxide::utils::command::BotCommands>(
        &self,
        msg: &Message,
    ) -> Self::SendMessage {
        self.reply_escaped(msg, &Cmd::descriptions().to_string())
    }
}
