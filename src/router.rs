//! Inbound event admission and dispatch.

use crate::config::MessagePolicy;
use crate::mention::{starts_with_self_mention, strip_self_mention};
use crate::orchestrator::{RunOrchestrator, RunOutcome};
use crate::{ConversationKey, InboundEvent, MentionEvent, MessageEvent, ReplyTarget, RunRequest};

use std::sync::Arc;

/// Message subtype that is still a user message (a thread reply also sent to
/// the channel).
const THREAD_BROADCAST_SUBTYPE: &str = "thread_broadcast";

/// Why an inbound event was not turned into a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnknownBotUser,
    EmptyPrompt,
    Subtype(String),
    SelfEcho,
    BotMessage,
    /// Addressed to the bot; the mention entry point owns it.
    LeadingMention,
    UnsupportedChannelType(Option<String>),
    /// Excluded by the configured message policy.
    Policy,
    MissingSender,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::UnknownBotUser => write!(f, "bot user id is unknown"),
            Rejection::EmptyPrompt => write!(f, "prompt is empty"),
            Rejection::Subtype(subtype) => write!(f, "message subtype {subtype}"),
            Rejection::SelfEcho => write!(f, "message from the bot itself"),
            Rejection::BotMessage => write!(f, "message from a bot integration"),
            Rejection::LeadingMention => write!(f, "message opens with a bot mention"),
            Rejection::UnsupportedChannelType(Some(kind)) => {
                write!(f, "unsupported channel type {kind}")
            }
            Rejection::UnsupportedChannelType(None) => write!(f, "missing channel type"),
            Rejection::Policy => write!(f, "excluded by message policy"),
            Rejection::MissingSender => write!(f, "message has no sender"),
        }
    }
}

/// Admit an explicit mention. The leading self-mention is stripped from the
/// prompt; a top-level mention starts a thread keyed by its own timestamp.
pub fn admit_mention(
    event: &MentionEvent,
    bot_user_id: Option<&str>,
) -> Result<RunRequest, Rejection> {
    let Some(bot_user_id) = bot_user_id.filter(|id| !id.is_empty()) else {
        return Err(Rejection::UnknownBotUser);
    };

    let prompt = strip_self_mention(&event.text, Some(bot_user_id));
    if prompt.is_empty() {
        return Err(Rejection::EmptyPrompt);
    }

    Ok(build_request(
        prompt,
        &event.channel,
        &event.user,
        &event.ts,
        event.thread_ts.as_deref(),
    ))
}

/// Admit a generic message event under `policy`.
pub fn admit_message(
    event: &MessageEvent,
    bot_user_id: Option<&str>,
    policy: MessagePolicy,
) -> Result<RunRequest, Rejection> {
    match event.subtype.as_deref() {
        None | Some(THREAD_BROADCAST_SUBTYPE) => {}
        Some(subtype) => return Err(Rejection::Subtype(subtype.to_string())),
    }

    if bot_user_id.is_some() && event.user.as_deref() == bot_user_id {
        return Err(Rejection::SelfEcho);
    }
    if event.bot_id.is_some() {
        return Err(Rejection::BotMessage);
    }

    let text = event.text.as_deref().unwrap_or_default();
    if starts_with_self_mention(text, bot_user_id) {
        return Err(Rejection::LeadingMention);
    }

    let channel_type = match &event.channel_type {
        Some(channel_type) if channel_type.is_supported() => channel_type,
        Some(other) => return Err(Rejection::UnsupportedChannelType(Some(other.to_string()))),
        None => return Err(Rejection::UnsupportedChannelType(None)),
    };
    match policy {
        MessagePolicy::All => {}
        MessagePolicy::DirectOnly if channel_type.is_direct() => {}
        MessagePolicy::DirectOnly | MessagePolicy::MentionsOnly => return Err(Rejection::Policy),
    }

    let Some(user) = event.user.as_deref().filter(|user| !user.is_empty()) else {
        return Err(Rejection::MissingSender);
    };
    let prompt = text.trim();
    if prompt.is_empty() {
        return Err(Rejection::EmptyPrompt);
    }

    Ok(build_request(
        prompt.to_string(),
        &event.channel,
        user,
        &event.ts,
        event.thread_ts.as_deref(),
    ))
}

fn build_request(
    prompt: String,
    channel: &str,
    sender: &str,
    ts: &str,
    thread_ts: Option<&str>,
) -> RunRequest {
    let thread_ts = thread_ts.filter(|ts| !ts.is_empty()).unwrap_or(ts);
    RunRequest {
        conversation_key: ConversationKey::new(thread_ts),
        prompt,
        reply_target: ReplyTarget {
            channel: channel.to_string(),
            thread_ts: thread_ts.to_string(),
        },
        sender_id: sender.to_string(),
    }
}

/// Routes inbound events through admission into the orchestrator.
#[derive(Debug)]
pub struct EventRouter {
    orchestrator: Arc<RunOrchestrator>,
    bot_user_id: Option<String>,
    policy: MessagePolicy,
}

impl EventRouter {
    pub fn new(
        orchestrator: Arc<RunOrchestrator>,
        bot_user_id: Option<String>,
        policy: MessagePolicy,
    ) -> Self {
        Self {
            orchestrator,
            bot_user_id,
            policy,
        }
    }

    /// Handle one event, awaiting the run when it is admitted.
    /// Returns `None` when the event was rejected.
    pub async fn dispatch(&self, event: InboundEvent) -> Option<RunOutcome> {
        match event {
            InboundEvent::Mention(mention) => self.handle_mention(&mention).await,
            InboundEvent::Message(message) => self.handle_message(&message).await,
        }
    }

    pub async fn handle_mention(&self, event: &MentionEvent) -> Option<RunOutcome> {
        match admit_mention(event, self.bot_user_id.as_deref()) {
            Ok(request) => Some(self.orchestrator.execute(&request).await),
            Err(Rejection::UnknownBotUser) => {
                tracing::error!(channel = %event.channel, "bot user id unavailable, cannot process mention");
                None
            }
            Err(rejection) => {
                tracing::info!(%rejection, channel = %event.channel, ts = %event.ts, "ignoring mention");
                None
            }
        }
    }

    pub async fn handle_message(&self, event: &MessageEvent) -> Option<RunOutcome> {
        match admit_message(event, self.bot_user_id.as_deref(), self.policy) {
            Ok(request) => Some(self.orchestrator.execute(&request).await),
            Err(rejection) => {
                tracing::debug!(%rejection, channel = %event.channel, ts = %event.ts, "ignoring message");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelType;
    use crate::config::RunSettings;
    use crate::conversation::ConversationMap;
    use crate::testing::{FakeAssistant, FakeChat};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const BOT: &str = "UBOT";

    fn mention(text: &str, thread_ts: Option<&str>) -> MentionEvent {
        MentionEvent {
            text: text.into(),
            channel: "C1".into(),
            user: "U1".into(),
            ts: "1700000000.000100".into(),
            thread_ts: thread_ts.map(str::to_string),
        }
    }

    fn channel_message(text: &str) -> MessageEvent {
        MessageEvent {
            text: Some(text.into()),
            channel: "C1".into(),
            channel_type: Some(ChannelType::Channel),
            user: Some("U1".into()),
            ts: "1700000000.000200".into(),
            ..Default::default()
        }
    }

    fn router(chat: &Arc<FakeChat>, assistant: &Arc<FakeAssistant>, policy: MessagePolicy) -> EventRouter {
        let orchestrator = RunOrchestrator::new(
            chat.clone(),
            assistant.clone(),
            Arc::new(ConversationMap::in_memory()),
            "asst_1",
            RunSettings {
                poll_interval: Duration::from_millis(5),
                run_timeout: Duration::from_secs(2),
            },
        );
        EventRouter::new(Arc::new(orchestrator), Some(BOT.into()), policy)
    }

    #[test]
    fn mention_is_normalized_and_keyed_by_its_own_ts() {
        let request = admit_mention(&mention("<@UBOT>  hello ", None), Some(BOT)).unwrap();
        assert_eq!(request.prompt, "hello");
        assert_eq!(request.conversation_key.as_str(), "1700000000.000100");
        assert_eq!(request.reply_target.thread_ts, "1700000000.000100");
        assert_eq!(request.reply_target.channel, "C1");
        assert_eq!(request.sender_id, "U1");
    }

    #[test]
    fn threaded_mention_uses_thread_key() {
        let request =
            admit_mention(&mention("<@UBOT> again", Some("1699999999.000001")), Some(BOT)).unwrap();
        assert_eq!(request.conversation_key.as_str(), "1699999999.000001");
    }

    #[test]
    fn mention_needs_bot_id_and_prompt() {
        assert_eq!(
            admit_mention(&mention("<@UBOT> hi", None), None),
            Err(Rejection::UnknownBotUser)
        );
        assert_eq!(
            admit_mention(&mention("  <@UBOT>  ", None), Some(BOT)),
            Err(Rejection::EmptyPrompt)
        );
    }

    #[test]
    fn edited_messages_are_rejected() {
        let mut event = channel_message("changed text");
        event.subtype = Some("message_changed".into());
        assert_eq!(
            admit_message(&event, Some(BOT), MessagePolicy::All),
            Err(Rejection::Subtype("message_changed".into()))
        );
    }

    #[test]
    fn thread_broadcast_is_admitted() {
        let mut event = channel_message("also to channel");
        event.subtype = Some("thread_broadcast".into());
        event.thread_ts = Some("1690000000.000001".into());
        let request = admit_message(&event, Some(BOT), MessagePolicy::All).unwrap();
        assert_eq!(request.conversation_key.as_str(), "1690000000.000001");
        assert_eq!(request.prompt, "also to channel");
    }

    #[test]
    fn self_and_bot_messages_are_rejected() {
        let mut own = channel_message("echo");
        own.user = Some(BOT.into());
        assert_eq!(admit_message(&own, Some(BOT), MessagePolicy::All), Err(Rejection::SelfEcho));

        let mut integration = channel_message("beep");
        integration.bot_id = Some("B1".into());
        assert_eq!(
            admit_message(&integration, Some(BOT), MessagePolicy::All),
            Err(Rejection::BotMessage)
        );
    }

    #[test]
    fn leading_mention_belongs_to_mention_entry() {
        let event = channel_message(" <@UBOT> hi");
        assert_eq!(
            admit_message(&event, Some(BOT), MessagePolicy::All),
            Err(Rejection::LeadingMention)
        );
        let later = channel_message("hi <@UBOT>");
        assert!(admit_message(&later, Some(BOT), MessagePolicy::All).is_ok());
    }

    #[test]
    fn unsupported_channel_types_and_missing_fields_are_rejected() {
        let mut home = channel_message("hi");
        home.channel_type = Some(ChannelType::parse("app_home"));
        assert!(matches!(
            admit_message(&home, Some(BOT), MessagePolicy::All),
            Err(Rejection::UnsupportedChannelType(Some(_)))
        ));

        let mut anonymous = channel_message("hi");
        anonymous.user = None;
        assert_eq!(
            admit_message(&anonymous, Some(BOT), MessagePolicy::All),
            Err(Rejection::MissingSender)
        );

        let mut blank = channel_message("hi");
        blank.text = Some("   ".into());
        assert_eq!(
            admit_message(&blank, Some(BOT), MessagePolicy::All),
            Err(Rejection::EmptyPrompt)
        );
    }

    #[test]
    fn policy_limits_generic_messages() {
        let channel = channel_message("hi");
        assert_eq!(
            admit_message(&channel, Some(BOT), MessagePolicy::DirectOnly),
            Err(Rejection::Policy)
        );
        assert_eq!(
            admit_message(&channel, Some(BOT), MessagePolicy::MentionsOnly),
            Err(Rejection::Policy)
        );

        let mut direct = channel_message("hi");
        direct.channel_type = Some(ChannelType::DirectMessage);
        assert!(admit_message(&direct, Some(BOT), MessagePolicy::DirectOnly).is_ok());
    }

    #[tokio::test]
    async fn mention_runs_end_to_end() {
        let chat = Arc::new(FakeChat::default());
        let assistant = Arc::new(FakeAssistant::completing_with(&["hi there"]));
        let router = router(&chat, &assistant, MessagePolicy::All);

        let outcome = router
            .dispatch(InboundEvent::Mention(mention("<@UBOT> hello", None)))
            .await;

        assert_eq!(outcome, Some(RunOutcome::Completed("hi there".into())));
        assert_eq!(assistant.created.load(Ordering::SeqCst), 1);
        assert_eq!(assistant.appended()[0].1, "hello");
        assert_eq!(assistant.started.load(Ordering::SeqCst), 1);
        let edits = chat.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].text, "hi there");
    }

    #[tokio::test]
    async fn rejected_message_never_reaches_the_assistant() {
        let chat = Arc::new(FakeChat::default());
        let assistant = Arc::new(FakeAssistant::completing_with(&["unused"]));
        let router = router(&chat, &assistant, MessagePolicy::All);

        let mut event = channel_message("edited");
        event.subtype = Some("message_changed".into());
        assert_eq!(router.dispatch(InboundEvent::Message(event)).await, None);

        assert_eq!(assistant.created.load(Ordering::SeqCst), 0);
        assert!(chat.posts().is_empty());
    }

    #[tokio::test]
    async fn concurrent_mentions_in_one_thread_share_a_session() {
        let chat = Arc::new(FakeChat::default());
        let mut fake = FakeAssistant::completing_with(&["ok"]);
        fake.create_delay = Duration::from_millis(20);
        let assistant = Arc::new(fake);
        let router = Arc::new(router(&chat, &assistant, MessagePolicy::All));

        let first = tokio::spawn({
            let router = router.clone();
            async move {
                router
                    .dispatch(InboundEvent::Mention(mention("<@UBOT> one", Some("1.0"))))
                    .await
            }
        });
        let second = tokio::spawn({
            let router = router.clone();
            async move {
                router
                    .dispatch(InboundEvent::Mention(mention("<@UBOT> two", Some("1.0"))))
                    .await
            }
        });
        assert!(first.await.unwrap().is_some());
        assert!(second.await.unwrap().is_some());

        assert_eq!(assistant.created.load(Ordering::SeqCst), 1);
        let appended = assistant.appended();
        assert_eq!(appended.len(), 2);
        assert_eq!(appended[0].0, appended[1].0);
    }
}
