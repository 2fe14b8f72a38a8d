//! Process execution for engine commands.
//!
//! Commands are shell scripts run as the engine's OS user (`su - <user> -c`).
//! Dropping a pending [`CommandRunner::run_script`] future kills the child,
//! which is how callers cancel a command in flight.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Stderr prefixes the engine prints for idempotent deletes of missing entities.
const HARMLESS_STDERR: &[&str] = &["No such dbgroup:", "No such sync:"];

/// Keys whose values are masked before a command is logged.
const SECRET_KEYS: &[&str] = &["pass=", "PGPASSWORD=", "--dbpass="];

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Converts a failed result into [`EngineError::CommandFailed`].
    pub fn into_result(self, script: &str) -> EngineResult<Self> {
        if self.success {
            return Ok(self);
        }
        Err(EngineError::CommandFailed {
            command: redact(script),
            code: self.code,
            output: self.combined().trim().to_string(),
        })
    }
}

/// Executes shell scripts on behalf of an adapter.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `script` and captures its output. A non-zero exit is not an error
    /// at this level; only failing to run the process is.
    async fn run_script(&self, script: &str) -> EngineResult<CommandOutput>;
}

/// Runs scripts as real processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    user: Option<String>,
}

impl ProcessRunner {
    /// Runs scripts through `su - <user> -c`, or `sh -c` when `user` is `None`.
    pub fn new(user: Option<String>) -> Self {
        Self { user }
    }

    fn command(&self, script: &str) -> (Command, &'static str) {
        match &self.user {
            Some(user) => {
                let mut cmd = Command::new("su");
                cmd.args(["-", user.as_str(), "-c", script]);
                (cmd, "su")
            }
            None => {
                let mut cmd = Command::new("sh");
                cmd.args(["-c", script]);
                (cmd, "sh")
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run_script(&self, script: &str) -> EngineResult<CommandOutput> {
        debug!(command = %redact(script), "Running engine command");
        let (mut cmd, program) = self.command(script);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| EngineError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let output = child.wait_with_output().await?;

        let stderr = filter_stderr(&String::from_utf8_lossy(&output.stderr));
        for line in stderr.lines() {
            debug!(line, "engine stderr");
        }
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }
}

/// Drops stderr lines that only report an already-absent entity.
pub fn filter_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| !HARMLESS_STDERR.iter().any(|p| line.starts_with(p)))
        .map(|line| format!("{line}\n"))
        .collect()
}

/// Masks secret values (`pass=`, `PGPASSWORD=`, `--dbpass=`) in a command line.
pub fn redact(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut rest = script;
    while let Some((start, key)) = next_secret(rest) {
        let value_start = start + key.len();
        out.push_str(&rest[..value_start]);
        out.push_str("*****");
        rest = skip_value(&rest[value_start..]);
    }
    out.push_str(rest);
    out
}

fn next_secret(haystack: &str) -> Option<(usize, &'static str)> {
    SECRET_KEYS
        .iter()
        .filter_map(|key| {
            haystack
                .match_indices(key)
                .find(|(idx, _)| *idx == 0 || haystack[..*idx].ends_with(char::is_whitespace))
                .map(|(idx, _)| (idx, *key))
        })
        .min_by_key(|(idx, _)| *idx)
}

fn skip_value(value: &str) -> &str {
    if let Some(quoted) = value.strip_prefix('\'') {
        return match quoted.find('\'') {
            Some(end) => &quoted[end + 1..],
            None => "",
        };
    }
    let end = value.find(char::is_whitespace).unwrap_or(value.len());
    &value[end..]
}

/// Quotes a shell argument unless it consists only of safe characters.
///
/// For `key=value` arguments only the value is quoted, so the key stays
/// visible to [`redact`].
pub fn shell_quote(arg: &str) -> String {
    if is_shell_safe(arg) {
        return arg.to_string();
    }
    match arg.split_once('=') {
        Some((key, value)) if is_shell_safe(key) => format!("{key}={}", single_quote(value)),
        _ => single_quote(arg),
    }
}

fn is_shell_safe(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=.,:/@%+".contains(c))
}

fn single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Joins arguments into a single shell command line.
pub fn shell_join<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A scripted runner for tests.
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records every script and answers from a queue of responses.
    ///
    /// Responses are matched in order; each may be restricted to scripts
    /// containing a substring. An empty queue answers with empty success.
    #[derive(Debug, Default)]
    pub struct ScriptedRunner {
        responses: Mutex<VecDeque<(Option<String>, CommandOutput)>>,
        scripts: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a response for the next script.
        pub fn respond(self, output: CommandOutput) -> Self {
            self.push(None, output);
            self
        }

        /// Queues a response for the next script containing `needle`.
        pub fn respond_to(self, needle: impl Into<String>, output: CommandOutput) -> Self {
            self.push(Some(needle.into()), output);
            self
        }

        fn push(&self, needle: Option<String>, output: CommandOutput) {
            if let Ok(mut queue) = self.responses.lock() {
                queue.push_back((needle, output));
            }
        }

        /// Every script run so far, in order.
        pub fn scripts(&self) -> Vec<String> {
            self.scripts.lock().map(|s| s.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run_script(&self, script: &str) -> EngineResult<CommandOutput> {
            if let Ok(mut scripts) = self.scripts.lock() {
                scripts.push(script.to_string());
            }
            let Ok(mut queue) = self.responses.lock() else {
                return Ok(CommandOutput::ok(""));
            };
            let position = queue.iter().position(|(needle, _)| match needle {
                Some(needle) => script.contains(needle.as_str()),
                None => true,
            });
            Ok(position
                .and_then(|idx| queue.remove(idx))
                .map(|(_, output)| output)
                .unwrap_or_else(|| CommandOutput::ok("")))
        }
    }
}
