//! macOS Seatbelt sandboxing via `sandbox-exec`.
//!
//! The profile is assembled per command from a closed-by-default base policy
//! plus dynamically generated file-write and network sections. The argument
//! builder is compiled on every platform so the profile generation stays
//! testable off-macOS; [`crate::sandboxing`] only routes commands here on
//! macOS.

use std::path::Path;
use std::path::PathBuf;

use foreman_protocol::protocol::SandboxPolicy;

const MACOS_SEATBELT_BASE_POLICY: &str = include_str!("seatbelt_base_policy.sbpl");

/// When working with `sandbox-exec`, only consider `sandbox-exec` in `/usr/bin`
/// to defend against an attacker trying to inject a malicious version on the
/// PATH. If /usr/bin/sandbox-exec has been tampered with, then the attacker
/// already has root access.
pub(crate) const MACOS_PATH_TO_SEATBELT_EXECUTABLE: &str = "/usr/bin/sandbox-exec";

pub(crate) fn create_seatbelt_command_args(
    command: Vec<String>,
    sandbox_policy: &SandboxPolicy,
    sandbox_policy_cwd: &Path,
) -> Vec<String> {
    let (file_write_policy, file_write_dir_params) = if sandbox_policy.has_full_disk_write_access()
    {
        // Allegedly, this is more permissive than `(allow file-write*)`.
        (
            r#"(allow file-write* (regex #"^/"))"#.to_string(),
            Vec::<(String, PathBuf)>::new(),
        )
    } else {
        let writable_roots = sandbox_policy.get_writable_roots_with_cwd(sandbox_policy_cwd);

        let mut writable_folder_policies: Vec<String> = Vec::new();
        let mut file_write_params = Vec::new();

        for (index, wr) in writable_roots.iter().enumerate() {
            // Canonicalize to avoid mismatches like /var vs /private/var on macOS.
            let canonical_root = wr
                .root
                .as_path()
                .canonicalize()
                .unwrap_or_else(|_| wr.root.clone());
            let root_param = format!("WRITABLE_ROOT_{index}");
            file_write_params.push((root_param.clone(), canonical_root));

            if wr.read_only_subpaths.is_empty() {
                writable_folder_policies.push(format!("(subpath (param \"{root_param}\"))"));
            } else {
                let mut require_parts: Vec<String> = Vec::new();
                require_parts.push(format!("(subpath (param \"{root_param}\"))"));
                for (subpath_index, ro) in wr.read_only_subpaths.iter().enumerate() {
                    let canonical_ro = ro.as_path().canonicalize().unwrap_or_else(|_| ro.clone());
                    let ro_param = format!("WRITABLE_ROOT_{index}_RO_{subpath_index}");
                    require_parts.push(format!("(require-not (subpath (param \"{ro_param}\")))"));
                    file_write_params.push((ro_param, canonical_ro));
                }
                let policy_component = format!("(require-all {} )", require_parts.join(" "));
                writable_folder_policies.push(policy_component);
            }
        }

        if writable_folder_policies.is_empty() {
            ("".to_string(), Vec::new())
        } else {
            let file_write_policy = format!(
                "(allow file-write*\n{}\n)",
                writable_folder_policies.join(" ")
            );
            (file_write_policy, file_write_params)
        }
    };

    // Reading the full disk is always allowed; confidentiality is out of
    // scope for the sandbox, only writes and network are contained.
    let file_read_policy = "; allow read-only file operations\n(allow file-read*)";

    let network_policy = if sandbox_policy.has_full_network_access() {
        "(allow network-outbound)\n(allow network-inbound)\n(allow system-socket)"
    } else {
        ""
    };

    let full_policy = format!(
        "{MACOS_SEATBELT_BASE_POLICY}\n{file_read_policy}\n{file_write_policy}\n{network_policy}"
    );

    let mut seatbelt_args: Vec<String> = vec!["-p".to_string(), full_policy];
    seatbelt_args.extend(
        file_write_dir_params
            .into_iter()
            .map(|(key, value)| format!("-D{key}={value}", value = value.to_string_lossy())),
    );
    seatbelt_args.push("--".to_string());
    seatbelt_args.extend(command);
    seatbelt_args
}
