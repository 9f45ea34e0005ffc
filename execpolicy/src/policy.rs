use std::collections::HashMap;
use std::sync::Arc;

use crate::decision::PolicyDecision;
use crate::decision::RuleClassification;
use crate::rule::ArgsMatch;
use crate::rule::PolicyRule;

/// Side effects a command declares beyond its argument list. These can only
/// ever downgrade a decision, never upgrade one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommandEffects {
    /// The command requests outbound network access.
    pub network: bool,
    /// The command declares write roots beyond what its spec covers.
    pub writes_outside_declared_roots: bool,
}

/// An immutable, validated rule set, shared read-only across sessions.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    rules_by_name: HashMap<String, Vec<Arc<PolicyRule>>>,
}

impl Policy {
    pub(crate) fn new(rules_by_name: HashMap<String, Vec<Arc<PolicyRule>>>) -> Self {
        Self { rules_by_name }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rule_count(&self) -> usize {
        self.rules_by_name.values().map(Vec::len).sum()
    }

    /// Classifies one command. Precedence, highest first:
    ///
    /// 1. any matching `Forbidden` rule wins outright;
    /// 2. a `Safe` rule matched in full, with no trailing arguments and no
    ///    broader side effects than the rule allows, yields `Safe`;
    /// 3. a recognized program whose pattern is only partially satisfied
    ///    (arguments exhausted early, trailing arguments, or broader side
    ///    effects) yields `Match`;
    /// 4. a recognized program whose arguments contradict every pattern, or
    ///    a program no rule recognizes at all, yields `Unverified`.
    ///
    /// Unknown flags never upgrade a decision; contradicted arguments
    /// downgrade to `Unverified` rather than guessing a permissive default.
    pub fn classify(&self, command: &[String], effects: CommandEffects) -> PolicyDecision {
        let Some((program, args)) = command.split_first() else {
            return PolicyDecision::Unverified;
        };
        let Some(rules) = self.rules_by_name.get(program) else {
            return PolicyDecision::Unverified;
        };

        let mut best: Option<PolicyDecision> = None;
        for rule in rules {
            let args_match = rule.match_args(args);
            let decision = match (rule.classification, args_match) {
                // Trailing arguments cannot un-forbid a matched prefix.
                (RuleClassification::Forbidden, ArgsMatch::Full { .. }) => {
                    return PolicyDecision::Forbidden;
                }
                (RuleClassification::Forbidden, _) => continue,
                (RuleClassification::Safe, ArgsMatch::Full { trailing: 0 }) => {
                    if self.effects_exceed_rule(rule, effects) {
                        PolicyDecision::Match
                    } else {
                        PolicyDecision::Safe
                    }
                }
                (RuleClassification::Safe, ArgsMatch::Full { .. })
                | (RuleClassification::Safe, ArgsMatch::Prefix) => PolicyDecision::Match,
                (RuleClassification::Safe, ArgsMatch::Contradicted) => continue,
            };
            best = Some(match best {
                // Prefer the most permissive non-forbidden outcome; Safe has
                // the lowest ordinal so `min` selects it.
                Some(current) => current.min(decision),
                None => decision,
            });
        }

        best.unwrap_or(PolicyDecision::Unverified)
    }

    fn effects_exceed_rule(&self, rule: &PolicyRule, effects: CommandEffects) -> bool {
        if effects.writes_outside_declared_roots {
            return true;
        }
        effects.network && !rule.allow_network
    }
}
