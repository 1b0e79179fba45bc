//! Transport: how engine CLI scripts get executed.
//!
//! The only real transport is the local shell. [`Runner`] is the seam the
//! executor drives, so deploys can be exercised without a cloud account.

pub mod local;

use crate::core::error::Result;

/// Output from executing a script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes one shell script to completion.
pub trait Runner {
    fn run(&self, script: &str) -> Result<ExecOutput>;
}

/// Runs scripts with the local `bash`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Local;

impl Runner for Local {
    fn run(&self, script: &str) -> Result<ExecOutput> {
        local::exec_local(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_success() {
        let ok = ExecOutput { exit_code: 0, stdout: "ok".into(), stderr: "".into() };
        assert!(ok.success());
        let fail = ExecOutput { exit_code: 255, stdout: "".into(), stderr: "err".into() };
        assert!(!fail.success());
    }

    #[test]
    fn test_local_runner() {
        let out = Local.run("echo stack-ok").unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "stack-ok");
    }
}
