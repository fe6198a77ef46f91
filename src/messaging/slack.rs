//! Slack messaging adapter using slack-morphism.
//!
//! Inbound `message` and `app_mention` push events arrive over Socket Mode and
//! are converted into [`InboundEvent`]s without any filtering; admission is the
//! router's job. Outbound replies are posted with `chat.postMessage` and
//! rewritten in place with `chat.update`.

use crate::error::ChatError;
use crate::messaging::traits::{InboundStream, Messaging, PostedMessage};
use crate::{ChannelType, InboundEvent, MentionEvent, MessageEvent};

use anyhow::Context as _;
use slack_morphism::prelude::*;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};

/// Slack rejects payloads whose markdown blocks exceed this many bytes.
const MARKDOWN_BLOCK_LIMIT: usize = 12_000;

/// State shared with socket mode callbacks via `SlackClientEventsUserState`.
struct SlackAdapterState {
    inbound_tx: mpsc::Sender<InboundEvent>,
}

/// Slack adapter.
pub struct SlackAdapter {
    app_token: String,
    /// Shared HTTP client for REST calls.
    client: Arc<SlackHyperClient>,
    token: SlackApiToken,
    shutdown_tx: Arc<RwLock<Option<mpsc::Sender<()>>>>,
}

impl SlackAdapter {
    pub fn new(bot_token: impl Into<String>, app_token: impl Into<String>) -> anyhow::Result<Self> {
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("failed to create slack HTTP connector")?,
        ));
        let token = SlackApiToken::new(SlackApiTokenValue(bot_token.into()));
        Ok(Self {
            app_token: app_token.into(),
            client,
            token,
            shutdown_tx: Arc::new(RwLock::new(None)),
        })
    }

    /// Open a session against the cached client using the cached bot token.
    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.token)
    }

    /// Look up the bot's own user id with `auth.test`.
    pub async fn resolve_bot_user_id(&self) -> crate::Result<String> {
        let response = self
            .session()
            .auth_test()
            .await
            .map_err(|error| request_error("auth.test", error))?;
        let bot_user_id = response.user_id.0;
        tracing::info!(bot_user_id = %bot_user_id, "slack bot user ID resolved");
        Ok(bot_user_id)
    }
}

impl std::fmt::Debug for SlackAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackAdapter").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Inbound event handlers (fn pointers, as slack-morphism requires)
// ---------------------------------------------------------------------------

async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> UserCallbackResult<()> {
    let inbound = match event.event {
        SlackEventCallbackBody::Message(message) => message_event(&message).map(InboundEvent::Message),
        SlackEventCallbackBody::AppMention(mention) => Some(InboundEvent::Mention(mention_event(&mention))),
        _ => None,
    };
    let Some(inbound) = inbound else {
        return Ok(());
    };

    let state_guard = states.read().await;
    let Some(adapter_state) = state_guard.get_user_state::<Arc<SlackAdapterState>>() else {
        tracing::error!("slack adapter state missing from listener environment");
        return Ok(());
    };

    tracing::debug!(kind = inbound.kind(), "received slack event");
    if let Err(error) = adapter_state.inbound_tx.send(inbound).await {
        tracing::warn!(%error, "failed to forward inbound slack event");
    }
    Ok(())
}

fn slack_error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> HttpStatusCode {
    tracing::warn!(error = %err, "slack socket mode error");
    HttpStatusCode::OK
}

/// Convert a generic Slack message event. Events without a channel are dropped.
fn message_event(event: &SlackMessageEvent) -> Option<MessageEvent> {
    let channel = event.origin.channel.as_ref()?.0.clone();
    Some(MessageEvent {
        text: event.content.as_ref().and_then(|content| content.text.clone()),
        channel,
        channel_type: event
            .origin
            .channel_type
            .as_ref()
            .map(|channel_type| ChannelType::parse(&channel_type.0)),
        user: event.sender.user.as_ref().map(|user| user.0.clone()),
        bot_id: event.sender.bot_id.as_ref().map(|bot_id| bot_id.0.clone()),
        subtype: event.subtype.as_ref().and_then(subtype_name),
        ts: event.origin.ts.0.clone(),
        thread_ts: event.origin.thread_ts.as_ref().map(|ts| ts.0.clone()),
    })
}

/// Convert an `app_mention` event. Its user and channel are flat fields rather
/// than nested in `sender` / `origin`.
fn mention_event(event: &SlackAppMentionEvent) -> MentionEvent {
    MentionEvent {
        text: event.content.text.clone().unwrap_or_default(),
        channel: event.channel.0.clone(),
        user: event.user.0.clone(),
        ts: event.origin.ts.0.clone(),
        thread_ts: event.origin.thread_ts.as_ref().map(|ts| ts.0.clone()),
    }
}

/// Wire name of a message subtype (`thread_broadcast`, `message_changed`, ...).
fn subtype_name(subtype: &SlackMessageEventType) -> Option<String> {
    match serde_json::to_value(subtype) {
        Ok(serde_json::Value::String(name)) => Some(name),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Messaging trait impl
// ---------------------------------------------------------------------------

impl Messaging for SlackAdapter {
    fn name(&self) -> &str {
        "slack"
    }

    async fn start(&self) -> crate::Result<InboundStream> {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let adapter_state = Arc::new(SlackAdapterState { inbound_tx });

        let callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

        // The socket mode listener owns a persistent WebSocket connection and
        // needs its own client. The shared `self.client` is for REST calls only.
        let listener_client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new()
                .context("failed to create slack socket mode connector")?,
        ));

        let listener_environment = Arc::new(
            SlackClientEventsListenerEnvironment::new(listener_client)
                .with_error_handler(slack_error_handler)
                .with_user_state(adapter_state),
        );

        let listener = SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment,
            callbacks,
        );

        let app_token = SlackApiToken::new(SlackApiTokenValue(self.app_token.clone()));

        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                tracing::error!(%error, "failed to start slack socket mode listener");
                return;
            }

            tracing::info!("slack socket mode connected");

            tokio::select! {
                exit_code = listener.serve() => {
                    tracing::info!(exit_code, "slack socket mode listener stopped");
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("slack socket mode shutting down");
                    listener.shutdown().await;
                }
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(
            inbound_rx,
        )))
    }

    async fn post(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> crate::Result<PostedMessage> {
        let request = SlackApiChatPostMessageRequest::new(
            SlackChannelId(channel.to_string()),
            markdown_content(text),
        )
        .opt_thread_ts(thread_ts.map(|ts| SlackTs(ts.to_string())));

        let response = self
            .session()
            .chat_post_message(&request)
            .await
            .map_err(|error| request_error("chat.postMessage", error))?;

        if response.ts.0.is_empty() {
            return Err(ChatError::MissingTimestamp.into());
        }

        tracing::debug!(channel = %response.channel.0, ts = %response.ts.0, "posted slack message");
        Ok(PostedMessage {
            channel: response.channel.0,
            ts: response.ts.0,
        })
    }

    async fn edit(&self, channel: &str, ts: &str, text: &str) -> crate::Result<()> {
        let request = SlackApiChatUpdateRequest::new(
            SlackChannelId(channel.to_string()),
            markdown_content(text),
            SlackTs(ts.to_string()),
        );
        self.session()
            .chat_update(&request)
            .await
            .map_err(|error| request_error("chat.update", error))?;
        tracing::debug!(channel, ts, "edited slack message");
        Ok(())
    }

    async fn health_check(&self) -> crate::Result<()> {
        self.session()
            .api_test(&SlackApiTestRequest::new())
            .await
            .map_err(|error| request_error("api.test", error))?;
        Ok(())
    }

    async fn shutdown(&self) -> crate::Result<()> {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(()).await;
        }
        tracing::info!("slack adapter shut down");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn request_error(operation: &str, error: impl std::fmt::Display) -> crate::Error {
    ChatError::Request {
        operation: operation.to_string(),
        detail: error.to_string(),
    }
    .into()
}

/// Build a `SlackMessageContent` using a Markdown block with plain text fallback.
///
/// The `text` field doubles as the notification fallback. Content over the
/// markdown block limit is sent as plain text only.
fn markdown_content(text: impl Into<String>) -> SlackMessageContent {
    let text = text.into();
    if text.len() <= MARKDOWN_BLOCK_LIMIT {
        let block = SlackBlock::Markdown(SlackMarkdownBlock::new(text.clone()));
        SlackMessageContent::new()
            .with_text(text)
            .with_blocks(vec![block])
    } else {
        SlackMessageContent::new().with_text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_thread_broadcast_message() {
        let event: SlackMessageEvent = serde_json::from_value(json!({
            "type": "message",
            "subtype": "thread_broadcast",
            "channel": "C123",
            "channel_type": "channel",
            "user": "U42",
            "text": "also posting to the channel",
            "ts": "1700000001.000200",
            "thread_ts": "1700000000.000100"
        }))
        .unwrap();

        let converted = message_event(&event).unwrap();
        assert_eq!(converted.subtype.as_deref(), Some("thread_broadcast"));
        assert_eq!(converted.channel, "C123");
        assert_eq!(converted.channel_type, Some(ChannelType::Channel));
        assert_eq!(converted.user.as_deref(), Some("U42"));
        assert_eq!(converted.text.as_deref(), Some("also posting to the channel"));
        assert_eq!(converted.thread_ts.as_deref(), Some("1700000000.000100"));
    }

    #[test]
    fn converts_bot_direct_message() {
        let event: SlackMessageEvent = serde_json::from_value(json!({
            "type": "message",
            "channel": "D9",
            "channel_type": "im",
            "bot_id": "B77",
            "text": "beep",
            "ts": "1700000002.000300"
        }))
        .unwrap();

        let converted = message_event(&event).unwrap();
        assert_eq!(converted.channel_type, Some(ChannelType::DirectMessage));
        assert_eq!(converted.bot_id.as_deref(), Some("B77"));
        assert_eq!(converted.user, None);
        assert_eq!(converted.subtype, None);
        assert_eq!(converted.thread_ts, None);
    }

    #[test]
    fn converts_app_mention() {
        let event: SlackAppMentionEvent = serde_json::from_value(json!({
            "type": "app_mention",
            "user": "U42",
            "channel": "C123",
            "text": "<@UBOT> hello",
            "ts": "1700000003.000400"
        }))
        .unwrap();

        let converted = mention_event(&event);
        assert_eq!(converted.text, "<@UBOT> hello");
        assert_eq!(converted.user, "U42");
        assert_eq!(converted.channel, "C123");
        assert_eq!(converted.ts, "1700000003.000400");
        assert_eq!(converted.thread_ts, None);
    }

    #[test]
    fn long_replies_drop_the_markdown_block() {
        let short = markdown_content("hi there");
        assert_eq!(short.blocks.as_ref().map(Vec::len), Some(1));

        let long = markdown_content("x".repeat(MARKDOWN_BLOCK_LIMIT + 1));
        assert!(long.blocks.is_none());
        assert_eq!(long.text.as_ref().map(String::len), Some(MARKDOWN_BLOCK_LIMIT + 1));
    }
}
