use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Rule-set construction errors. All of these are load-time failures: a
/// policy that parses successfully never errors during classification.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse policy file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid rule for `{program}`: {reason}")]
    InvalidRule { program: String, reason: String },

    #[error("duplicate rule for `{program}` with pattern `{pattern}`")]
    DuplicateRule { program: String, pattern: String },

    #[error(
        "contradictory rules for `{program}` with pattern `{pattern}`: declared both safe and forbidden"
    )]
    ContradictoryRules { program: String, pattern: String },
}
