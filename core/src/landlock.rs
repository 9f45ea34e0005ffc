//! Linux sandboxing via the `foreman-linux-sandbox` helper, which applies
//! Landlock filesystem rules plus a seccomp network filter before exec'ing
//! the tool command.
//!
//! Unlike macOS Seatbelt where we directly embed the policy text, the Linux
//! helper re-parses the policy itself: it receives the [`SandboxPolicy`] as
//! JSON together with the cwd the policy should be resolved against.

use std::path::Path;

use foreman_protocol::protocol::SandboxPolicy;

/// Converts the sandbox policy into the CLI invocation for
/// `foreman-linux-sandbox`.
pub(crate) fn create_linux_sandbox_command_args(
    command: Vec<String>,
    sandbox_policy: &SandboxPolicy,
    sandbox_policy_cwd: &Path,
) -> std::io::Result<Vec<String>> {
    let sandbox_policy_cwd = sandbox_policy_cwd
        .to_str()
        .ok_or_else(|| std::io::Error::other("cwd must be valid UTF-8"))?
        .to_string();

    let sandbox_policy_json =
        serde_json::to_string(sandbox_policy).map_err(std::io::Error::other)?;

    let mut linux_cmd: Vec<String> = vec![
        "--sandbox-policy-cwd".to_string(),
        sandbox_policy_cwd,
        "--sandbox-policy".to_string(),
        sandbox_policy_json,
    ];

    // Separator so that command arguments starting with `-` are not parsed as
    // options of the helper itself.
    linux_cmd.push("--".to_string());

    // Append the original tool command.
    linux_cmd.extend(command);

    Ok(linux_cmd)
}
