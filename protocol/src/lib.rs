//! Types used to communicate between a client and a Foreman session.
//!
//! The protocol crate is deliberately transport-agnostic: submissions go in,
//! events come out, and nothing here performs I/O.

mod conversation_id;
pub mod models;
pub mod protocol;

pub use conversation_id::ConversationId;
pub use conversation_id::ConversationIdParseError;
