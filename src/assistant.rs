//! Hosted assistant session capability and its OpenAI implementation.

pub mod openai;
pub mod types;

pub use openai::OpenAiAssistantClient;
pub use types::{ContentBlock, ListOrder, MessageRole, Run, RunError, RunStatus, SessionMessage};

use crate::SessionId;
use crate::error::AssistantError;

use async_trait::async_trait;

/// Result alias for assistant platform calls.
pub type AssistantResult<T> = std::result::Result<T, AssistantError>;

/// Operations the relay needs from the assistant platform.
#[async_trait]
pub trait AssistantSessions: Send + Sync + 'static {
    /// Create an empty session.
    async fn create_session(&self) -> AssistantResult<SessionId>;

    /// Append a message to a session.
    async fn append_message(
        &self,
        session: &SessionId,
        role: MessageRole,
        text: &str,
    ) -> AssistantResult<()>;

    /// Start a run of `assistant_id` over the session's messages.
    async fn start_run(&self, session: &SessionId, assistant_id: &str) -> AssistantResult<Run>;

    /// Fetch the current state of a run.
    async fn retrieve_run(&self, session: &SessionId, run_id: &str) -> AssistantResult<Run>;

    /// Request cancellation of a run.
    async fn cancel_run(&self, session: &SessionId, run_id: &str) -> AssistantResult<Run>;

    /// List session messages. `run_id` narrows the listing to one run where the
    /// platform supports it; callers still filter client-side.
    async fn list_messages(
        &self,
        session: &SessionId,
        order: ListOrder,
        run_id: Option<&str>,
    ) -> AssistantResult<Vec<SessionMessage>>;
}
