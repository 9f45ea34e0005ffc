use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Child;
use tokio::process::Command;
use tracing::trace;

use foreman_protocol::protocol::SandboxPolicy;

/// Set to a non-empty value in the environment of processes spawned as part
/// of a shell tool call when `SandboxPolicy.has_full_network_access()` was
/// false for that call.
pub const FOREMAN_SANDBOX_NETWORK_DISABLED_ENV_VAR: &str = "FOREMAN_SANDBOX_NETWORK_DISABLED";

/// Set when the process is spawned under a sandbox. The value names the
/// mechanism, e.g. "seatbelt" on macOS.
pub const FOREMAN_SANDBOX_ENV_VAR: &str = "FOREMAN_SANDBOX";

#[derive(Debug, Clone, Copy)]
pub enum StdioPolicy {
    RedirectForShellTool,
}

pub(crate) struct SpawnChildRequest<'a> {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub arg0: Option<&'a str>,
    pub cwd: PathBuf,
    pub sandbox_policy: &'a SandboxPolicy,
    pub stdio_policy: StdioPolicy,
    pub env: HashMap<String, String>,
}

/// Spawns the child process for a tool call, ensuring the args and
/// environment variables used to create the `Command` (and `Child`) honor
/// the sandbox configuration.
pub(crate) async fn spawn_child_async(request: SpawnChildRequest<'_>) -> std::io::Result<Child> {
    let SpawnChildRequest {
        program,
        args,
        arg0,
        cwd,
        sandbox_policy,
        stdio_policy,
        env,
    } = request;

    trace!("spawn_child_async: {program:?} {args:?} {arg0:?} {cwd:?} {stdio_policy:?}");

    let mut cmd = Command::new(&program);
    #[cfg(unix)]
    cmd.arg0(arg0.map_or_else(|| program.to_string_lossy().to_string(), String::from));
    cmd.args(args);
    cmd.current_dir(cwd);
    cmd.env_clear();
    cmd.envs(env);

    if !sandbox_policy.has_full_network_access() {
        cmd.env(FOREMAN_SANDBOX_NETWORK_DISABLED_ENV_VAR, "1");
    }

    // Put shell tool children in their own process group so a timeout or an
    // interrupt can kill the whole tree, not just the direct child.
    #[cfg(unix)]
    unsafe {
        let own_process_group = matches!(stdio_policy, StdioPolicy::RedirectForShellTool);
        cmd.pre_exec(move || {
            if own_process_group && libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    match stdio_policy {
        StdioPolicy::RedirectForShellTool => {
            // Do not create a file descriptor for stdin because otherwise some
            // commands may hang forever waiting for input. For example, ripgrep has
            // a heuristic where it may try to read from stdin as explained here:
            // https://github.com/BurntSushi/ripgrep/blob/e2362d4d5185d02fa857bf381e7bd52e66fafc73/crates/core/flags/hiargs.rs#L1101-L1103
            cmd.stdin(Stdio::null());

            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }

    // If this process dies, any children spawned for a shell tool call should
    // die with it.
    cmd.kill_on_drop(true).spawn()
}
