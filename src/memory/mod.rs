//! Conversation memory
//!
//! Transcripts of question/answer turns and the per-chat session store
//! that keeps them between requests

pub mod sessions;
pub mod store;

pub use sessions::SessionStore;
pub use store::{Transcript, Turn};
