//! Fresh-pod bootstrap over the SSH agent queue.
//!
//! Reads the store credentials out of the workstation's own rclone
//! configuration, replays them onto the pod, verifies the connection, and
//! prefetches the scripts tree so the worker agent can start polling.
//! Credential values travel only inside the queued command body and are
//! never logged.

use std::time::Duration;

use posegrid_core::error::CoreError;
use posegrid_core::layout::SCRIPTS_PREFIX;

use crate::ssh_queue::SshQueue;

/// Per-command timeout for bootstrap steps.
const SSH_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// The credential fields a remote section must provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcloneCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: String,
}

/// Extract the named `[section]` from an rclone config file.
pub fn parse_rclone_section(config: &str, section: &str) -> Result<RcloneCredentials, CoreError> {
    let header = format!("[{section}]");
    let mut in_section = false;
    let mut access_key_id = None;
    let mut secret_access_key = None;
    let mut endpoint = None;

    for line in config.lines() {
        let line = line.trim();
        if line == header {
            in_section = true;
            continue;
        }
        if in_section {
            if line.starts_with('[') {
                break;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().to_string();
                match key.trim() {
                    "access_key_id" => access_key_id = Some(value),
                    "secret_access_key" => secret_access_key = Some(value),
                    "endpoint" => endpoint = Some(value),
                    _ => {}
                }
            }
        }
    }

    let missing = |field: &str| {
        CoreError::Validation(format!(
            "rclone config section '{section}' is missing '{field}'"
        ))
    };

    Ok(RcloneCredentials {
        access_key_id: access_key_id.ok_or_else(|| missing("access_key_id"))?,
        secret_access_key: secret_access_key.ok_or_else(|| missing("secret_access_key"))?,
        endpoint: endpoint.ok_or_else(|| missing("endpoint"))?,
    })
}

/// Render the rclone config content to install on the pod.
pub fn render_remote_config(section: &str, creds: &RcloneCredentials) -> String {
    format!(
        "[{section}]\n\
         type = s3\n\
         provider = Cloudflare\n\
         access_key_id = {}\n\
         secret_access_key = {}\n\
         endpoint = {}\n\
         acl = private\n\
         no_check_bucket = true\n",
        creds.access_key_id, creds.secret_access_key, creds.endpoint
    )
}

/// Run the three bootstrap steps against `host`:
/// configure rclone, verify the remote is reachable, prefetch scripts.
///
/// `remote` is the full store remote (`section:bucket`); `workspace_root`
/// is where the pod's worker agent will run.
pub async fn bootstrap_pod(
    queue: &SshQueue,
    host: &str,
    remote: &str,
    creds: &RcloneCredentials,
    workspace_root: &str,
) -> Result<(), CoreError> {
    let section = remote.split(':').next().unwrap_or(remote);
    let config = render_remote_config(section, creds);

    let install = format!(
        "mkdir -p {workspace_root}/.config/rclone ~/.config/rclone && \
         cat > {workspace_root}/.config/rclone/rclone.conf << 'RCLONE_EOF'\n\
         {config}RCLONE_EOF\n\
         ln -sf {workspace_root}/.config/rclone/rclone.conf ~/.config/rclone/rclone.conf"
    );
    run_step(queue, host, "bootstrap_rclone", &install).await?;
    tracing::info!(host, "rclone configured on pod");

    run_step(
        queue,
        host,
        "bootstrap_test_store",
        &format!("rclone lsd {remote}"),
    )
    .await?;
    tracing::info!(host, "Store connection verified from pod");

    let prefetch = format!(
        "mkdir -p {workspace_root}/scripts && \
         rclone copy {remote}/{SCRIPTS_PREFIX}/ {workspace_root}/scripts/"
    );
    run_step(queue, host, "bootstrap_scripts", &prefetch).await?;
    tracing::info!(host, "Scripts prefetched onto pod");

    Ok(())
}

async fn run_step(
    queue: &SshQueue,
    host: &str,
    step_id: &str,
    command: &str,
) -> Result<(), CoreError> {
    let result = queue.send(step_id, host, command, SSH_COMMAND_TIMEOUT).await?;
    if result.exit_status == Some(0) {
        Ok(())
    } else {
        Err(CoreError::Transport(format!(
            "Bootstrap step '{step_id}' failed on {host} (exit {:?}): {}",
            result.exit_status,
            result.stderr.or(result.stdout).unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "\
[other]
type = s3

[r2_pose]
type = s3
provider = Cloudflare
access_key_id = AKIA123
secret_access_key = s3cr3t
endpoint = https://example.r2.cloudflarestorage.com
";

    #[test]
    fn parses_named_section() {
        let creds = parse_rclone_section(CONFIG, "r2_pose").unwrap();
        assert_eq!(creds.access_key_id, "AKIA123");
        assert_eq!(creds.secret_access_key, "s3cr3t");
        assert_eq!(creds.endpoint, "https://example.r2.cloudflarestorage.com");
    }

    #[test]
    fn missing_field_is_validation_error() {
        let err = parse_rclone_section("[r2_pose]\ntype = s3\n", "r2_pose").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn missing_section_is_validation_error() {
        let err = parse_rclone_section(CONFIG, "nope").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn rendered_config_carries_credentials() {
        let creds = parse_rclone_section(CONFIG, "r2_pose").unwrap();
        let rendered = render_remote_config("r2_pose", &creds);
        assert!(rendered.starts_with("[r2_pose]\n"));
        assert!(rendered.contains("access_key_id = AKIA123"));
        assert!(rendered.contains("no_check_bucket = true"));
    }
}
