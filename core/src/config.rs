use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use foreman_execpolicy::Policy;
use foreman_execpolicy::PolicyParser;
use foreman_protocol::protocol::AskForApproval;
use foreman_protocol::protocol::SandboxPolicy;
use tokio::fs;
use tracing::debug;

use crate::error::ForemanErr;
use crate::error::Result;

/// File extension for policy rule files inside the policy directory.
const POLICY_EXTENSION: &str = "toml";

pub(crate) const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_MAX_OUTPUT_BYTES: usize = 128 * 1024;
pub(crate) const DEFAULT_TOOL_CONCURRENCY: usize = 4;

/// Validated runtime configuration for one conversation. Read-only after
/// construction; the exec policy is shared across all sessions.
#[derive(Debug, Clone)]
pub struct Config {
    /// Model slug forwarded to the model client.
    pub model: String,

    /// Working directory that should be treated as the root of the session.
    /// All relative paths supplied by the model as well as the execution
    /// sandbox are resolved against this directory instead of the
    /// process-wide current working directory, so callers must expand it to
    /// an absolute path up front.
    pub cwd: PathBuf,

    /// When to escalate command execution for approval.
    pub approval_policy: AskForApproval,

    /// How to sandbox commands executed in the system.
    pub sandbox_policy: SandboxPolicy,

    /// The loaded rule set used to classify commands.
    pub exec_policy: Arc<Policy>,

    /// Per-command wall clock budget when the tool call does not supply one.
    pub command_timeout: Duration,

    /// Cap on captured stdout/stderr per command; output beyond it is
    /// dropped and the result marked truncated.
    pub max_output_bytes: usize,

    /// Upper bound on tool calls dispatched concurrently within one turn.
    pub tool_concurrency: usize,

    /// Path to the Linux sandbox helper executable, when running on Linux.
    pub linux_sandbox_exe: Option<PathBuf>,
}

impl Config {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            model: "default".to_string(),
            cwd,
            approval_policy: AskForApproval::default(),
            sandbox_policy: SandboxPolicy::new_workspace_write_policy(),
            exec_policy: Arc::new(Policy::empty()),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            tool_concurrency: DEFAULT_TOOL_CONCURRENCY,
            linux_sandbox_exe: None,
        }
    }

    /// Rejects configurations no session should ever be constructed with.
    pub fn validate(&self) -> Result<()> {
        if !self.cwd.is_absolute() {
            return Err(ForemanErr::Configuration(format!(
                "cwd must be absolute, got {}",
                self.cwd.display()
            )));
        }
        if self.command_timeout.is_zero() {
            return Err(ForemanErr::Configuration(
                "command_timeout must be non-zero".to_string(),
            ));
        }
        if self.tool_concurrency == 0 {
            return Err(ForemanErr::Configuration(
                "tool_concurrency must be at least 1".to_string(),
            ));
        }
        if let Some(exe) = &self.linux_sandbox_exe
            && !exe.is_absolute()
        {
            return Err(ForemanErr::Configuration(format!(
                "linux_sandbox_exe must be absolute, got {}",
                exe.display()
            )));
        }
        Ok(())
    }
}

/// Loads every rule file from `policy_dir`, in lexicographic order. A missing
/// directory yields an empty policy; a malformed file is a fatal
/// configuration error.
pub async fn load_exec_policy(policy_dir: &Path) -> Result<Policy> {
    let mut paths = match collect_policy_files(policy_dir).await {
        Ok(paths) => paths,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => {
            return Err(ForemanErr::Configuration(format!(
                "failed to read policy dir {}: {err}",
                policy_dir.display()
            )));
        }
    };
    paths.sort();

    let mut parser = PolicyParser::new();
    for path in &paths {
        let contents = fs::read_to_string(path).await.map_err(|err| {
            ForemanErr::Configuration(format!(
                "failed to read policy file {}: {err}",
                path.display()
            ))
        })?;
        parser
            .parse(&path.to_string_lossy(), &contents)
            .map_err(|err| ForemanErr::Configuration(err.to_string()))?;
    }

    let policy = parser.build();
    debug!(
        "loaded {} execpolicy rules from {} files in {}",
        policy.rule_count(),
        paths.len(),
        policy_dir.display()
    );
    Ok(policy)
}

async fn collect_policy_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == POLICY_EXTENSION) {
            paths.push(path);
        }
    }
    Ok(paths)
}
