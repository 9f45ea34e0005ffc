use serde::Deserialize;
use serde::Serialize;

/// Classification of one command. Produced once per command; immutable.
///
/// The derived `Ord` encodes escalation severity (`Safe` lowest, `Forbidden`
/// highest) so that combining several sub-command decisions with `max` always
/// lands on the most restrictive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Execute unsandboxed and unattended.
    Safe,
    /// Matches a known-risk pattern; run inside the sandbox without
    /// prompting.
    Match,
    /// Unknown command; requires human approval or mandatory sandboxing.
    Unverified,
    /// Must never execute.
    Forbidden,
}

impl PolicyDecision {
    /// Whether execution must be confined to the platform sandbox.
    pub fn requires_sandbox(self) -> bool {
        matches!(self, Self::Match | Self::Unverified)
    }
}

/// The classification a rule file may assign. Rules only ever declare the
/// two extremes; `Match` and `Unverified` are derived by the checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleClassification {
    Safe,
    Forbidden,
}
