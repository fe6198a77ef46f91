//! Self-mention handling for inbound message text.

/// Format the Slack mention token for a user id.
pub fn mention_token(bot_user_id: &str) -> String {
    format!("<@{}>", bot_user_id)
}

/// Strip a leading `<@BOT_USER_ID>` mention (with surrounding whitespace) and
/// trim the remainder.
///
/// Only the first leading occurrence is removed; mentions later in the text are
/// part of the prompt. With no known bot user id the text is only trimmed.
pub fn strip_self_mention(text: &str, bot_user_id: Option<&str>) -> String {
    let trimmed = text.trim();
    let Some(bot_user_id) = bot_user_id.filter(|id| !id.is_empty()) else {
        return trimmed.to_string();
    };
    let mention = mention_token(bot_user_id);
    trimmed
        .strip_prefix(mention.as_str())
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Whether the text opens with the bot's own mention token.
pub fn starts_with_self_mention(text: &str, bot_user_id: Option<&str>) -> bool {
    match bot_user_id.filter(|id| !id.is_empty()) {
        Some(bot_user_id) => text.trim().starts_with(&mention_token(bot_user_id)),
        None => false,
    }
}
