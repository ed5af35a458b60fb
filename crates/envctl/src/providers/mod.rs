//! Process-backed collaborators for the connection services
//!
//! `tsh` handles logins, `kubectl` answers API and node probes and runs
//! port-forwards, and proxies are plain child processes.

mod kube;
mod proxy;
mod tunnel;

pub use kube::KubectlSession;
pub use proxy::CommandProxyBackend;
pub use tunnel::KubectlTunnels;

use async_process::Command;
use service_runtime::{Error, Result};
use std::collections::HashMap;

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
}

/// Run `program` to completion; a non-zero exit is an error carrying stderr
pub async fn run_command(
    program: &str,
    args: &[String],
    env: &HashMap<String, String>,
) -> Result<CommandOutput> {
    tracing::debug!("Running {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .envs(env)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| Error::provider(format!("Failed to run '{}': {}", program, err)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let detail = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        return Err(Error::provider(format!(
            "'{} {}' exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            detail
        )));
    }

    Ok(CommandOutput { stdout, stderr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_missing_program_is_provider_error() {
        let err = run_command("envctl-no-such-binary", &[], &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(msg) if msg.contains("envctl-no-such-binary")));
    }

    #[cfg(unix)]
    #[smol_potat::test]
    async fn test_nonzero_exit_carries_stderr() {
        let args = vec!["-c".to_string(), "echo denied >&2; exit 3".to_string()];
        let err = run_command("sh", &args, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Provider(msg) if msg.contains("denied")));
    }

    #[cfg(unix)]
    #[smol_potat::test]
    async fn test_env_is_passed() {
        let args = vec!["-c".to_string(), "printf %s \"$ENVCTL_PROBE\"".to_string()];
        let env = HashMap::from([("ENVCTL_PROBE".to_string(), "ok".to_string())]);
        let output = run_command("sh", &args, &env).await.unwrap();
        assert_eq!(output.stdout, "ok");
    }
}
