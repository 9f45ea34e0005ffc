//! Pure, deterministic classification of commands against a security policy.
//!
//! A [`Policy`] is built from declarative TOML rule files at load time (all
//! validation happens there) and then shared read-only across sessions.
//! [`Policy::classify`] never performs I/O and never fails: every command
//! maps to exactly one [`PolicyDecision`].

mod decision;
mod error;
mod parser;
mod policy;
mod rule;

pub use decision::PolicyDecision;
pub use decision::RuleClassification;
pub use error::Error;
pub use error::Result;
pub use parser::PolicyParser;
pub use policy::CommandEffects;
pub use policy::Policy;
pub use rule::ArgMatcher;
pub use rule::PolicyRule;
