//! Run orchestration: session lookup, message append, run polling, and reply
//! rendering for one admitted request.

use crate::assistant::{AssistantSessions, ListOrder, MessageRole, Run, RunStatus, SessionMessage};
use crate::config::{DEFAULT_PLACEHOLDER_TEXT, RunSettings};
use crate::conversation::ConversationMap;
use crate::error::{Error, Result};
use crate::messaging::{MessagingDyn, PostedMessage};
use crate::{RunRequest, SessionId};

use std::sync::Arc;
use tokio::time::Instant;

const EMPTY_COMPLETION_TEXT: &str = "I processed your request, but didn't generate a text response.";
const REQUIRES_ACTION_TEXT: &str = "Sorry, my current task requires actions I can't perform yet.";
const TIMED_OUT_TEXT: &str = "Sorry, the request took too long to process.";
const NOT_CONFIGURED_TEXT: &str =
    "Sorry, the OpenAI connection or Assistant is not configured correctly. Please check server logs.";

/// Final result of one request. Each request yields exactly one outcome, which
/// is rendered into exactly one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Assistant text produced by the run.
    Completed(String),
    /// The run asked for tool output, which the relay does not provide.
    RequiresAction,
    /// Terminal `failed`, `cancelled`, `expired` (or any other non-success)
    /// status. `code` is set when the platform reported an error.
    Failed { code: Option<String>, message: String },
    /// The run stayed pending past the run timeout and was cancelled.
    TimedOut,
    /// A collaborator call failed before a terminal status was reached.
    TransportError(String),
    /// No assistant identifier is configured.
    NotConfigured,
}

impl RunOutcome {
    /// Text posted to the conversation thread for this outcome.
    pub fn reply_text(&self) -> String {
        match self {
            RunOutcome::Completed(text) => text.clone(),
            RunOutcome::RequiresAction => REQUIRES_ACTION_TEXT.into(),
            RunOutcome::Failed {
                code: Some(code),
                message,
            } => format!("Run failed: {code} - {message}"),
            RunOutcome::Failed { code: None, message } => message.clone(),
            RunOutcome::TimedOut => TIMED_OUT_TEXT.into(),
            RunOutcome::TransportError(detail) => {
                format!("Sorry, I encountered an error with the OpenAI API: {detail}")
            }
            RunOutcome::NotConfigured => NOT_CONFIGURED_TEXT.into(),
        }
    }

    /// Stable name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::RequiresAction => "requires_action",
            RunOutcome::Failed { .. } => "failed",
            RunOutcome::TimedOut => "timed_out",
            RunOutcome::TransportError(_) => "transport_error",
            RunOutcome::NotConfigured => "not_configured",
        }
    }
}

/// Drives one request from placeholder to final reply.
pub struct RunOrchestrator {
    chat: Arc<dyn MessagingDyn>,
    assistant: Arc<dyn AssistantSessions>,
    conversations: Arc<ConversationMap>,
    assistant_id: String,
    settings: RunSettings,
    placeholder_text: String,
}

impl RunOrchestrator {
    pub fn new(
        chat: Arc<dyn MessagingDyn>,
        assistant: Arc<dyn AssistantSessions>,
        conversations: Arc<ConversationMap>,
        assistant_id: impl Into<String>,
        settings: RunSettings,
    ) -> Self {
        Self {
            chat,
            assistant,
            conversations,
            assistant_id: assistant_id.into(),
            settings,
            placeholder_text: DEFAULT_PLACEHOLDER_TEXT.into(),
        }
    }

    pub fn with_placeholder_text(mut self, placeholder_text: impl Into<String>) -> Self {
        self.placeholder_text = placeholder_text.into();
        self
    }

    /// Execute `request` and write its reply. Never fails; every error is
    /// converted into an outcome and rendered.
    pub async fn execute(&self, request: &RunRequest) -> RunOutcome {
        let key = &request.conversation_key;

        if self.assistant_id.is_empty() {
            tracing::error!(conversation_key = %key, "assistant id is not configured");
            let outcome = RunOutcome::NotConfigured;
            self.render(request, None, &outcome).await;
            return outcome;
        }

        tracing::info!(
            conversation_key = %key,
            channel = %request.reply_target.channel,
            sender = %request.sender_id,
            "processing request"
        );

        let placeholder = match self
            .chat
            .post(
                &request.reply_target.channel,
                &self.placeholder_text,
                Some(&request.reply_target.thread_ts),
            )
            .await
        {
            Ok(posted) => Some(posted),
            Err(error) => {
                tracing::warn!(%error, conversation_key = %key, "failed to post placeholder reply");
                None
            }
        };

        let outcome = match self.drive(request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(%error, conversation_key = %key, "assistant request failed");
                RunOutcome::TransportError(error.to_string())
            }
        };

        tracing::info!(conversation_key = %key, outcome = outcome.label(), "request finished");
        self.render(request, placeholder.as_ref(), &outcome).await;
        outcome
    }

    /// Session resolution through terminal status.
    async fn drive(&self, request: &RunRequest) -> Result<RunOutcome> {
        let key = &request.conversation_key;
        let session = self
            .conversations
            .resolve_or_create(key, || async {
                self.assistant.create_session().await.map_err(Error::from)
            })
            .await?;

        self.assistant
            .append_message(&session, MessageRole::User, &request.prompt)
            .await?;
        tracing::debug!(conversation_key = %key, session_id = %session, "appended user message");

        let mut run = self.assistant.start_run(&session, &self.assistant_id).await?;
        tracing::info!(session_id = %session, run_id = %run.id, status = %run.status, "run started");

        let started = Instant::now();
        while run.status.is_pending() {
            if started.elapsed() > self.settings.run_timeout {
                tracing::warn!(
                    session_id = %session,
                    run_id = %run.id,
                    timeout = ?self.settings.run_timeout,
                    "run timed out"
                );
                if let Err(error) = self.assistant.cancel_run(&session, &run.id).await {
                    tracing::warn!(%error, run_id = %run.id, "failed to cancel timed out run");
                }
                return Ok(RunOutcome::TimedOut);
            }

            tokio::time::sleep(self.settings.poll_interval).await;
            run = self.assistant.retrieve_run(&session, &run.id).await?;
            tracing::debug!(run_id = %run.id, status = %run.status, "polled run");
        }

        match run.status {
            RunStatus::Completed => self.collect_reply(&session, &run).await,
            RunStatus::RequiresAction => {
                tracing::warn!(run_id = %run.id, "run requires action, which is not supported");
                Ok(RunOutcome::RequiresAction)
            }
            _ => Ok(failed_outcome(&run)),
        }
    }

    async fn collect_reply(&self, session: &SessionId, run: &Run) -> Result<RunOutcome> {
        let messages = self
            .assistant
            .list_messages(session, ListOrder::Desc, Some(&run.id))
            .await?;

        match reply_text_for_run(&messages, &run.id) {
            Some(text) => Ok(RunOutcome::Completed(text)),
            None => {
                tracing::warn!(run_id = %run.id, "run completed without assistant text");
                Ok(RunOutcome::Completed(EMPTY_COMPLETION_TEXT.into()))
            }
        }
    }

    /// Edit the placeholder in place, or post a fresh reply when there is none.
    /// A failed edit falls back to a fresh post so the reply is not lost.
    async fn render(&self, request: &RunRequest, placeholder: Option<&PostedMessage>, outcome: &RunOutcome) {
        let text = outcome.reply_text();
        let target = &request.reply_target;

        if let Some(placeholder) = placeholder {
            match self.chat.edit(&placeholder.channel, &placeholder.ts, &text).await {
                Ok(()) => return,
                Err(error) => {
                    tracing::warn!(%error, ts = %placeholder.ts, "failed to edit placeholder, posting reply instead");
                }
            }
        }

        if let Err(error) = self
            .chat
            .post(&target.channel, &text, Some(&target.thread_ts))
            .await
        {
            tracing::error!(
                %error,
                channel = %target.channel,
                conversation_key = %request.conversation_key,
                "failed to post reply"
            );
        }
    }
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("chat", &self.chat.name())
            .field("assistant_id", &self.assistant_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Join the text of `run_id`'s assistant messages in chronological order.
/// `messages` are newest first. `None` when the run produced no text.
fn reply_text_for_run(messages: &[SessionMessage], run_id: &str) -> Option<String> {
    let text = messages
        .iter()
        .rev()
        .filter(|message| {
            message.role == MessageRole::Assistant && message.run_id.as_deref() == Some(run_id)
        })
        .flat_map(|message| message.text_blocks())
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn failed_outcome(run: &Run) -> RunOutcome {
    match &run.last_error {
        Some(error) => {
            tracing::error!(run_id = %run.id, code = %error.code, message = %error.message, "run failed");
            RunOutcome::Failed {
                code: Some(error.code.clone()),
                message: error.message.clone(),
            }
        }
        None => {
            tracing::error!(run_id = %run.id, status = %run.status, "run ended without completing");
            RunOutcome::Failed {
                code: None,
                message: format!("Assistant run {} ended with status: {}", run.id, run.status),
            }
        }
    }
}
