use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::decision::RuleClassification;

/// Matches a single argument position. Matchers form a closed set so new
/// kinds are exhaustively checked at compile time; rule matching is
/// structural, never ad hoc string or regex dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgMatcher {
    /// The argument must equal this string exactly.
    Literal(String),
    /// Any single argument.
    Wildcard,
    /// The argument must equal one of these strings.
    OneOf(Vec<String>),
    /// The argument, interpreted as a path, must stay under this root.
    PathUnderRoot(PathBuf),
}

impl ArgMatcher {
    pub fn matches(&self, arg: &str) -> bool {
        match self {
            Self::Literal(expected) => expected == arg,
            Self::Wildcard => true,
            Self::OneOf(alternatives) => alternatives.iter().any(|alt| alt == arg),
            Self::PathUnderRoot(root) => path_stays_under(root, Path::new(arg)),
        }
    }

    /// Stable textual form used to detect duplicate/contradictory rules.
    pub(crate) fn pattern_token(&self) -> String {
        match self {
            Self::Literal(expected) => expected.clone(),
            Self::Wildcard => "*".to_string(),
            Self::OneOf(alternatives) => format!("({})", alternatives.join("|")),
            Self::PathUnderRoot(root) => format!("<under:{}>", root.display()),
        }
    }
}

/// Lexical containment check: `arg` may not traverse upward, and if absolute
/// it must sit under `root`. Relative arguments are treated as resolved
/// against `root`. Purely lexical - no filesystem access.
fn path_stays_under(root: &Path, arg: &Path) -> bool {
    if arg.components().any(|c| matches!(c, Component::ParentDir)) {
        return false;
    }
    if arg.is_absolute() {
        return arg.starts_with(root);
    }
    true
}

/// Outcome of evaluating a rule's matcher sequence against actual arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArgsMatch {
    /// Every matcher succeeded; `trailing` arguments were left unaccounted.
    Full { trailing: usize },
    /// The arguments ran out before the matchers did, with every provided
    /// argument matching its position.
    Prefix,
    /// Some argument contradicted its positional matcher.
    Contradicted,
}

/// One declarative policy entry: a program (plus aliases), a positional
/// argument pattern and the classification the pattern grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub program: String,
    pub aliases: Vec<String>,
    pub arg_matchers: Vec<ArgMatcher>,
    pub classification: RuleClassification,
    /// Whether a `Safe` match still holds when the command requests network
    /// access. Ignored for `Forbidden` rules.
    pub allow_network: bool,
}

impl PolicyRule {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    pub(crate) fn match_args(&self, args: &[String]) -> ArgsMatch {
        for (matcher, arg) in self.arg_matchers.iter().zip(args) {
            if !matcher.matches(arg) {
                return ArgsMatch::Contradicted;
            }
        }
        if args.len() < self.arg_matchers.len() {
            ArgsMatch::Prefix
        } else {
            ArgsMatch::Full {
                trailing: args.len() - self.arg_matchers.len(),
            }
        }
    }

    pub(crate) fn pattern(&self) -> String {
        self.arg_matchers
            .iter()
            .map(ArgMatcher::pattern_token)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
