//! Chat platform adapters.

pub mod slack;
pub mod traits;

pub use slack::SlackAdapter;
pub use traits::{InboundStream, Messaging, MessagingDyn, PostedMessage};
