use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::decision::RuleClassification;
use crate::error::Error;
use crate::error::Result;
use crate::policy::Policy;
use crate::rule::ArgMatcher;
use crate::rule::PolicyRule;

/// Accumulates rules from one or more TOML policy documents, validating as it
/// goes. Malformed rules, duplicates and contradictions are rejected here so
/// that classification never fails at check time.
#[derive(Default)]
pub struct PolicyParser {
    rules_by_name: HashMap<String, Vec<Arc<PolicyRule>>>,
    seen: HashMap<(String, String), RuleClassification>,
}

#[derive(Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    rule: Vec<RawRule>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    program: String,
    #[serde(default)]
    aliases: Vec<String>,
    classification: RuleClassification,
    #[serde(default)]
    allow_network: bool,
    #[serde(default)]
    args: Vec<RawMatcher>,
}

/// Exactly one of these fields must be set per argument position.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMatcher {
    literal: Option<String>,
    wildcard: Option<bool>,
    one_of: Option<Vec<String>>,
    path_under_root: Option<PathBuf>,
}

impl PolicyParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one policy document. `identifier` names the source (usually a
    /// file path) for error reporting.
    pub fn parse(&mut self, identifier: &str, contents: &str) -> Result<()> {
        let document: PolicyDocument =
            toml::from_str(contents).map_err(|source| Error::Parse {
                path: identifier.to_string(),
                source,
            })?;

        for raw in document.rule {
            let rule = build_rule(raw)?;
            self.register(Arc::new(rule))?;
        }
        Ok(())
    }

    fn register(&mut self, rule: Arc<PolicyRule>) -> Result<()> {
        let pattern = rule.pattern();
        for name in rule.names() {
            let key = (name.to_string(), pattern.clone());
            match self.seen.get(&key) {
                Some(existing) if *existing == rule.classification => {
                    return Err(Error::DuplicateRule {
                        program: name.to_string(),
                        pattern,
                    });
                }
                Some(_) => {
                    return Err(Error::ContradictoryRules {
                        program: name.to_string(),
                        pattern,
                    });
                }
                None => {
                    self.seen.insert(key, rule.classification);
                }
            }
            self.rules_by_name
                .entry(name.to_string())
                .or_default()
                .push(Arc::clone(&rule));
        }
        Ok(())
    }

    pub fn build(self) -> Policy {
        Policy::new(self.rules_by_name)
    }
}

fn build_rule(raw: RawRule) -> Result<PolicyRule> {
    if raw.program.trim().is_empty() {
        return Err(Error::InvalidRule {
            program: raw.program,
            reason: "program cannot be empty".to_string(),
        });
    }
    if raw.aliases.iter().any(|alias| alias.trim().is_empty()) {
        return Err(Error::InvalidRule {
            program: raw.program,
            reason: "aliases cannot be empty".to_string(),
        });
    }

    let mut arg_matchers = Vec::with_capacity(raw.args.len());
    for matcher in raw.args {
        arg_matchers.push(build_matcher(&raw.program, matcher)?);
    }

    Ok(PolicyRule {
        program: raw.program,
        aliases: raw.aliases,
        arg_matchers,
        classification: raw.classification,
        allow_network: raw.allow_network,
    })
}

fn build_matcher(program: &str, raw: RawMatcher) -> Result<ArgMatcher> {
    let RawMatcher {
        literal,
        wildcard,
        one_of,
        path_under_root,
    } = raw;

    let set_fields = usize::from(literal.is_some())
        + usize::from(wildcard.is_some())
        + usize::from(one_of.is_some())
        + usize::from(path_under_root.is_some());
    if set_fields != 1 {
        return Err(Error::InvalidRule {
            program: program.to_string(),
            reason: "each arg matcher must set exactly one of literal, wildcard, one_of, path_under_root"
                .to_string(),
        });
    }

    if let Some(literal) = literal {
        return Ok(ArgMatcher::Literal(literal));
    }
    if let Some(wildcard) = wildcard {
        if !wildcard {
            return Err(Error::InvalidRule {
                program: program.to_string(),
                reason: "wildcard matcher must be `wildcard = true`".to_string(),
            });
        }
        return Ok(ArgMatcher::Wildcard);
    }
    if let Some(alternatives) = one_of {
        if alternatives.is_empty() {
            return Err(Error::InvalidRule {
                program: program.to_string(),
                reason: "one_of matcher cannot be empty".to_string(),
            });
        }
        return Ok(ArgMatcher::OneOf(alternatives));
    }
    if let Some(root) = path_under_root {
        if !root.is_absolute() {
            return Err(Error::InvalidRule {
                program: program.to_string(),
                reason: "path_under_root must be an absolute path".to_string(),
            });
        }
        return Ok(ArgMatcher::PathUnderRoot(root));
    }
    unreachable!("set_fields == 1 guarantees one branch above returned");
}
