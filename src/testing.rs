//! In-process fakes for the chat and assistant collaborators.

use crate::assistant::{
    AssistantResult, AssistantSessions, ContentBlock, ListOrder, MessageRole, Run, RunError,
    RunStatus, SessionMessage,
};
use crate::error::{AssistantError, ChatError};
use crate::messaging::{InboundStream, Messaging, PostedMessage};
use crate::SessionId;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCall {
    pub channel: String,
    pub text: String,
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditCall {
    pub channel: String,
    pub ts: String,
    pub text: String,
}

/// Chat fake that records posts and edits.
#[derive(Default)]
pub struct FakeChat {
    pub posts: Mutex<Vec<PostCall>>,
    pub edits: Mutex<Vec<EditCall>>,
    /// Number of upcoming `post` calls that fail.
    pub failing_posts: AtomicUsize,
    /// Number of upcoming `edit` calls that fail.
    pub failing_edits: AtomicUsize,
}

impl FakeChat {
    pub fn posts(&self) -> Vec<PostCall> {
        self.posts.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<EditCall> {
        self.edits.lock().unwrap().clone()
    }
}

impl Messaging for FakeChat {
    fn name(&self) -> &str {
        "fake"
    }

    async fn start(&self) -> crate::Result<InboundStream> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn post(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> crate::Result<PostedMessage> {
        if take_one(&self.failing_posts) {
            return Err(ChatError::Request {
                operation: "chat.postMessage".into(),
                detail: "channel_not_found".into(),
            }
            .into());
        }

        let mut posts = self.posts.lock().unwrap();
        posts.push(PostCall {
            channel: channel.to_string(),
            text: text.to_string(),
            thread_ts: thread_ts.map(str::to_string),
        });
        Ok(PostedMessage {
            channel: channel.to_string(),
            ts: format!("reply.{}", posts.len()),
        })
    }

    async fn edit(&self, channel: &str, ts: &str, text: &str) -> crate::Result<()> {
        if take_one(&self.failing_edits) {
            return Err(ChatError::Request {
                operation: "chat.update".into(),
                detail: "message_not_found".into(),
            }
            .into());
        }
        self.edits.lock().unwrap().push(EditCall {
            channel: channel.to_string(),
            ts: ts.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Decrement `counter` if it is positive; true when a failure was taken.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn unavailable(operation: &str) -> AssistantError {
    AssistantError::Api {
        operation: operation.into(),
        status: 500,
        message: "upstream unavailable".into(),
    }
}

/// Assistant fake driven by a scripted sequence of run statuses.
///
/// `start_run` reports the first status and each `retrieve_run` the next one;
/// the last status repeats once the script runs out.
pub struct FakeAssistant {
    statuses: Mutex<VecDeque<RunStatus>>,
    last_status: Mutex<RunStatus>,
    pub last_error: Option<RunError>,
    pub replies: Vec<SessionMessage>,
    pub fail_append: bool,
    pub fail_start: bool,
    pub fail_retrieve: bool,
    pub fail_cancel: bool,
    /// Delay inside `create_session`, to widen race windows.
    pub create_delay: Duration,
    pub created: AtomicUsize,
    pub appended: Mutex<Vec<(SessionId, String)>>,
    pub started: AtomicUsize,
    pub retrieved: AtomicUsize,
    pub cancelled: AtomicUsize,
}

impl FakeAssistant {
    pub fn scripted(statuses: &[RunStatus]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            last_status: Mutex::new(RunStatus::Queued),
            last_error: None,
            replies: Vec::new(),
            fail_append: false,
            fail_start: false,
            fail_retrieve: false,
            fail_cancel: false,
            create_delay: Duration::ZERO,
            created: AtomicUsize::new(0),
            appended: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            retrieved: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    /// Completed run whose assistant reply is `texts`, one message per entry.
    pub fn completing_with(texts: &[&str]) -> Self {
        let mut fake = Self::scripted(&[RunStatus::Queued, RunStatus::InProgress, RunStatus::Completed]);
        fake.replies = texts
            .iter()
            .enumerate()
            .rev()
            .map(|(index, text)| assistant_message(&format!("msg_{index}"), "run_1", &[*text]))
            .collect();
        fake
    }

    pub fn appended(&self) -> Vec<(SessionId, String)> {
        self.appended.lock().unwrap().clone()
    }

    fn next_status(&self) -> RunStatus {
        let mut last = self.last_status.lock().unwrap();
        if let Some(status) = self.statuses.lock().unwrap().pop_front() {
            *last = status;
        }
        *last
    }

    fn run(&self, status: RunStatus) -> Run {
        Run {
            id: "run_1".into(),
            status,
            last_error: if status == RunStatus::Failed {
                self.last_error.clone()
            } else {
                None
            },
        }
    }
}

/// Newest-first listing entry authored by the assistant.
pub fn assistant_message(id: &str, run_id: &str, blocks: &[&str]) -> SessionMessage {
    SessionMessage {
        id: id.into(),
        role: MessageRole::Assistant,
        run_id: Some(run_id.into()),
        content: blocks.iter().map(|block| ContentBlock::text(*block)).collect(),
    }
}

#[async_trait]
impl AssistantSessions for FakeAssistant {
    async fn create_session(&self) -> AssistantResult<SessionId> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        Ok(SessionId::new(format!("thread_{n}")))
    }

    async fn append_message(
        &self,
        session: &SessionId,
        _role: MessageRole,
        text: &str,
    ) -> AssistantResult<()> {
        if self.fail_append {
            return Err(unavailable("create message"));
        }
        self.appended
            .lock()
            .unwrap()
            .push((session.clone(), text.to_string()));
        Ok(())
    }

    async fn start_run(&self, _session: &SessionId, _assistant_id: &str) -> AssistantResult<Run> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(unavailable("create run"));
        }
        Ok(self.run(self.next_status()))
    }

    async fn retrieve_run(&self, _session: &SessionId, _run_id: &str) -> AssistantResult<Run> {
        self.retrieved.fetch_add(1, Ordering::SeqCst);
        if self.fail_retrieve {
            return Err(unavailable("retrieve run"));
        }
        Ok(self.run(self.next_status()))
    }

    async fn cancel_run(&self, _session: &SessionId, _run_id: &str) -> AssistantResult<Run> {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        if self.fail_cancel {
            return Err(unavailable("cancel run"));
        }
        Ok(self.run(RunStatus::Cancelling))
    }

    async fn list_messages(
        &self,
        _session: &SessionId,
        _order: ListOrder,
        _run_id: Option<&str>,
    ) -> AssistantResult<Vec<SessionMessage>> {
        Ok(self.replies.clone())
    }
}
