//! Local execution through `bash`.

use super::ExecOutput;
use crate::core::error::{InfraError, Result};
use std::io::Write;
use std::process::{Command, Stdio};

/// Run a script on stdin of a fresh `bash`. Generated scripts rely on
/// `set -o pipefail`, so plain `sh` will not do.
pub fn exec_local(script: &str) -> Result<ExecOutput> {
    let mut child = Command::new("bash")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| InfraError::Spawn(format!("bash: {}", e)))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| InfraError::Spawn(format!("stdin write: {}", e)))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| InfraError::Spawn(format!("wait: {}", e)))?;

    Ok(ExecOutput {
        // killed by a signal
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_failure_code() {
        let out = exec_local("exit 42").unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 42);
    }

    #[test]
    fn test_local_stderr() {
        let out = exec_local("echo 'An error occurred' >&2").unwrap();
        assert!(out.success());
        assert!(out.stderr.contains("An error occurred"));
    }

    #[test]
    fn test_local_pipefail() {
        let out = exec_local("set -euo pipefail\nfalse | true").unwrap();
        assert!(!out.success());
    }

    #[test]
    fn test_local_signal_killed() {
        let out = exec_local("kill -9 $$").unwrap();
        assert_eq!(out.exit_code, -1);
    }
}
