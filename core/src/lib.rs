//! Core turn-orchestration and command-authorization runtime.
//!
//! A [`ConversationManager`] owns any number of conversations. Each
//! conversation is a single-writer actor: submissions go in through a bounded
//! queue, events come out through an ordered queue, and at most one turn is
//! ever in flight. Commands requested by the model are classified against an
//! execpolicy, escalated to the user when necessary and executed inside a
//! platform sandbox.

mod auth;
pub mod client;
pub mod config;
mod conversation;
mod conversation_manager;
mod error;
pub mod exec;
mod landlock;
pub mod rollout;
pub mod sandboxing;
mod seatbelt;
mod session;
mod spawn;
mod state;
mod tasks;
mod tools;

pub use auth::AuthManager;
pub use conversation::ForemanConversation;
pub use conversation_manager::ConversationManager;
pub use conversation_manager::NewConversation;
pub use error::ForemanErr;
pub use error::Result;
pub use session::Agent;
pub use session::AgentSpawnOk;

pub use foreman_protocol as protocol;
