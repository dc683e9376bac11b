//! Shell command execution for `ip` and `iptables`.
//!
//! Every argument that reaches `/bin/sh` goes through [`shellquote`], so
//! interface names and addresses read from the desired-state store cannot
//! inject commands.
//!
//! # Example
//!
//! ```ignore
//! use floatip_common::shell::{self, IP_CMD};
//!
//! let cmd = shell::command_line(IP_CMD, &["-4", "-o", "addr", "show", "dev", "eth0"]);
//! let out = shell::exec_or_throw(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{FipError, FipResult};

/// Path to the `ip` command for addresses and routes.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `iptables` command for NAT rules.
pub const IPTABLES_CMD: &str = "/sbin/iptables";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// ```
/// use floatip_common::shell::shellquote;
///
/// assert_eq!(shellquote("eth0"), "\"eth0\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Builds `program "arg1" "arg2" ...` with every argument quoted.
pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut cmd = String::from(program);
    for arg in args {
        cmd.push(' ');
        cmd.push_str(&shellquote(arg.as_ref()));
    }
    cmd
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The stdout output.
    pub stdout: String,
    /// The stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Executes a shell command through `/bin/sh -c`.
///
/// A non-zero exit is not an error here; only a failure to spawn is.
/// `iptables -C` relies on this: exit code 1 means "rule absent".
pub async fn exec(cmd: &str) -> FipResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| FipError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmd, "Command succeeded");
    } else {
        tracing::debug!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command exited non-zero"
        );
    }

    Ok(result)
}

/// Executes a shell command and returns its stdout, or
/// [`FipError::ShellCommandFailed`] on non-zero exit.
pub async fn exec_or_throw(cmd: &str) -> FipResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(FipError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(shellquote("a\\b"), "\"a\\\\b\"");
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_command_line_quotes_every_arg() {
        let cmd = command_line(IPTABLES_CMD, &["-t", "nat", "-F", "FLOAT_IP_PREROUTING"]);
        assert_eq!(
            cmd,
            "/sbin/iptables \"-t\" \"nat\" \"-F\" \"FLOAT_IP_PREROUTING\""
        );
    }

    #[test]
    fn test_command_line_injection() {
        let cmd = command_line(IP_CMD, &["addr", "show", "dev", "eth0; rm -rf /"]);
        assert!(cmd.ends_with("\"eth0; rm -rf /\""));
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 1,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        assert!(!result.success());
        assert_eq!(result.combined_output(), "out\nerr");

        let only_err = ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "err".to_string(),
        };
        assert_eq!(only_err.combined_output(), "err");
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_or_throw_failure() {
        match exec_or_throw("exit 3").await {
            Err(FipError::ShellCommandFailed { exit_code, .. }) => assert_eq!(exit_code, 3),
            other => panic!("Expected ShellCommandFailed, got {other:?}"),
        }
    }
}
