//! Shell command execution with a bounded lifetime.
//!
//! Commands are handed to the selected shell verbatim. There is no sandbox:
//! the agent is trusted to pick commands, and only the shell itself is
//! constrained to a fixed set.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, warn};

use crate::tools::ToolError;

/// Maximum captured size per stream (1MB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Default command lifetime.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// How long to keep draining pipes after the shell exits.
const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// The shells a command may run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Cmd,
    Powershell,
    Gitbash,
}

impl ShellKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShellKind::Cmd => "cmd",
            ShellKind::Powershell => "powershell",
            ShellKind::Gitbash => "gitbash",
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Program and leading arguments for each shell; the command is appended last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellTable {
    pub cmd: Vec<String>,
    pub powershell: Vec<String>,
    pub gitbash: Vec<String>,
}

impl Default for ShellTable {
    fn default() -> Self {
        fn argv(parts: &[&str]) -> Vec<String> {
            parts.iter().map(|p| p.to_string()).collect()
        }

        if cfg!(windows) {
            Self {
                cmd: argv(&["cmd", "/C"]),
                powershell: argv(&["powershell", "-NoProfile", "-Command"]),
                gitbash: argv(&["C:\\Program Files\\Git\\bin\\bash.exe", "-c"]),
            }
        } else {
            Self {
                cmd: argv(&["sh", "-c"]),
                powershell: argv(&["pwsh", "-NoProfile", "-Command"]),
                gitbash: argv(&["bash", "-c"]),
            }
        }
    }
}

impl ShellTable {
    pub fn invocation(&self, shell: ShellKind) -> &[String] {
        match shell {
            ShellKind::Cmd => &self.cmd,
            ShellKind::Powershell => &self.powershell,
            ShellKind::Gitbash => &self.gitbash,
        }
    }
}

/// Command executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Shell used when a caller does not name one.
    pub default_shell: ShellKind,
    pub shells: ShellTable,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_timeout_ms: 600_000,
            default_shell: ShellKind::Cmd,
            shells: ShellTable::default(),
        }
    }
}

/// One command to run.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub shell: ShellKind,
    pub command: String,
    pub working_dir: Option<PathBuf>,
    /// `None` uses the configured default.
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    pub fn new(shell: ShellKind, command: impl Into<String>) -> Self {
        Self {
            shell,
            command: command.into(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a command that ran to completion, whatever its exit status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
    pub error: String,
}

/// Faults that prevented a command from completing.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command must not be empty")]
    EmptyCommand,

    #[error("no program configured for shell {0}")]
    ShellNotConfigured(ShellKind),

    #[error("invalid working directory: {0}")]
    WorkingDir(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("process error: {0}")]
    Io(#[from] io::Error),

    #[error("command timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl From<CommandError> for ToolError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::EmptyCommand | CommandError::WorkingDir(_) => {
                ToolError::InvalidInput(err.to_string())
            }
            CommandError::Timeout(limit) => ToolError::Timeout(limit.as_millis() as u64),
            other => ToolError::Backend(other.to_string()),
        }
    }
}

/// Runs one child process per call.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    settings: CommandSettings,
}

impl CommandExecutor {
    pub fn new(settings: CommandSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    /// Effective lifetime bound for a request.
    pub fn effective_timeout(&self, request: &CommandRequest) -> Duration {
        let max = Duration::from_millis(self.settings.max_timeout_ms);
        request
            .timeout
            .unwrap_or(Duration::from_millis(self.settings.default_timeout_ms))
            .min(max)
    }

    /// Run a command and capture its output.
    ///
    /// A non-zero exit is a normal result. Exceeding the timeout kills the
    /// shell's whole process group and reaps the shell before returning
    /// [`CommandError::Timeout`]. Once the shell itself has exited, jobs it
    /// left in the background are not killed; their output is collected
    /// for a short grace period and the rest is dropped.
    pub async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        if request.command.trim().is_empty() {
            return Err(CommandError::EmptyCommand);
        }

        let (program, leading) = self
            .settings
            .shells
            .invocation(request.shell)
            .split_first()
            .ok_or(CommandError::ShellNotConfigured(request.shell))?;

        if let Some(dir) = &request.working_dir {
            check_working_dir(dir)?;
        }

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg(&request.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

        let limit = self.effective_timeout(request);
        let deadline = Instant::now() + limit;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut out = Captured::default();
        let mut err = Captured::default();

        let waited = {
            let reads = async { tokio::try_join!(out.read_from(stdout), err.read_from(stderr)) };
            tokio::pin!(reads);

            let mut drained = false;
            let waited = loop {
                tokio::select! {
                    read = &mut reads, if !drained => {
                        read?;
                        drained = true;
                    }
                    status = child.wait() => break Waited::Exited(status?),
                    _ = sleep_until(deadline) => break Waited::TimedOut,
                }
            };

            if matches!(waited, Waited::Exited(_)) && !drained {
                let grace = deadline.min(Instant::now() + OUTPUT_GRACE);
                match timeout_at(grace, &mut reads).await {
                    Ok(read) => {
                        read?;
                    }
                    Err(_) => debug!(
                        shell = %request.shell,
                        "background job still holds output open, keeping partial output"
                    ),
                }
            }
            waited
        };

        match waited {
            Waited::Exited(status) => {
                let output = CommandOutput {
                    success: status.success(),
                    exit_code: status.code().unwrap_or(-1),
                    output: out.into_text(),
                    error: err.into_text(),
                };
                debug!(
                    shell = %request.shell,
                    exit_code = output.exit_code,
                    "command finished"
                );
                Ok(output)
            }
            Waited::TimedOut => {
                kill_process_group(&mut child);
                if let Err(e) = child.wait().await {
                    warn!(error = %e, "failed to reap timed out command");
                }
                warn!(
                    shell = %request.shell,
                    timeout_ms = limit.as_millis() as u64,
                    "command timed out"
                );
                Err(CommandError::Timeout(limit))
            }
        }
    }
}

enum Waited {
    Exited(ExitStatus),
    TimedOut,
}

/// Kill the shell and everything it started.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "failed to signal process group");
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "failed to kill command");
    }
}

fn check_working_dir(dir: &Path) -> Result<(), CommandError> {
    if !dir.exists() {
        return Err(CommandError::WorkingDir(format!(
            "{} does not exist",
            dir.display()
        )));
    }
    if !dir.is_dir() {
        return Err(CommandError::WorkingDir(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    Ok(())
}

/// One output stream, kept up to [`MAX_OUTPUT_SIZE`] bytes.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    /// Bytes the stream produced, including those past the cap.
    total: usize,
}

impl Captured {
    async fn read_from<R>(&mut self, stream: Option<R>) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let Some(mut stream) = stream else {
            return Ok(());
        };
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            self.total += n;
            let room = MAX_OUTPUT_SIZE.saturating_sub(self.bytes.len());
            self.bytes.extend_from_slice(&chunk[..n.min(room)]);
        }
    }

    fn into_text(self) -> String {
        truncate_output(String::from_utf8_lossy(&self.bytes).into_owned(), self.total)
    }
}

/// Cut `output` at [`MAX_OUTPUT_SIZE`], preferring a line boundary.
///
/// `total` is the size the stream actually produced.
fn truncate_output(output: String, total: usize) -> String {
    if total <= MAX_OUTPUT_SIZE && output.len() <= MAX_OUTPUT_SIZE {
        return output;
    }

    let mut end = output.len().min(MAX_OUTPUT_SIZE);
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    let cut = output[..end].rfind('\n').unwrap_or(end);
    format!(
        "{}\n\n... (output truncated, {} bytes total)",
        &output[..cut],
        total.max(output.len())
    )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn executor() -> CommandExecutor {
        CommandExecutor::default()
    }

    #[tokio::test]
    async fn echo_captures_stdout() {
        let output = executor()
            .run(&CommandRequest::new(ShellKind::Cmd, "echo hi"))
            .await
            .unwrap();
        assert_eq!(
            output,
            CommandOutput {
                success: true,
                exit_code: 0,
                output: "hi\n".to_string(),
                error: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_an_error() {
        let output = executor()
            .run(&CommandRequest::new(ShellKind::Gitbash, "echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.error, "oops\n");
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();

        let output = executor()
            .run(&CommandRequest::new(ShellKind::Cmd, "ls").working_dir(dir.path()))
            .await
            .unwrap();
        assert!(output.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn missing_working_dir_is_rejected() {
        let err = executor()
            .run(&CommandRequest::new(ShellKind::Cmd, "ls").working_dir("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::WorkingDir(_)));
        assert!(matches!(ToolError::from(err), ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn timeout_kills_background_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let command = format!("(sleep 1; touch {}) & wait", marker.display());

        let err = executor()
            .run(&CommandRequest::new(ShellKind::Cmd, command).timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout(_)));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background job outlived the timeout");
    }

    #[tokio::test]
    async fn finished_shell_with_background_job_is_not_a_timeout() {
        let started = Instant::now();
        let output = executor()
            .run(
                &CommandRequest::new(ShellKind::Cmd, "sleep 3 & echo started")
                    .timeout(Duration::from_secs(2)),
            )
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.output, "started\n");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn large_output_is_capped() {
        let output = executor()
            .run(&CommandRequest::new(ShellKind::Cmd, "yes | head -c 3000000"))
            .await
            .unwrap();

        assert!(output.success);
        assert!(output.output.len() <= MAX_OUTPUT_SIZE + 64);
        assert!(output.output.ends_with("(output truncated, 3000000 bytes total)"));
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let command = format!("sleep 1; touch {}", marker.display());

        let started = Instant::now();
        let err = executor()
            .run(&CommandRequest::new(ShellKind::Cmd, command).timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_millis(900));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "timed out command kept running");
    }

    #[tokio::test]
    async fn unconfigured_shell_is_a_backend_fault() {
        let settings = CommandSettings {
            shells: ShellTable {
                powershell: Vec::new(),
                ..ShellTable::default()
            },
            ..CommandSettings::default()
        };
        let err = CommandExecutor::new(settings)
            .run(&CommandRequest::new(ShellKind::Powershell, "Get-Date"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::ShellNotConfigured(ShellKind::Powershell)));
    }

    #[test]
    fn timeout_is_clamped() {
        let executor = CommandExecutor::new(CommandSettings {
            max_timeout_ms: 1_000,
            ..CommandSettings::default()
        });
        let request = CommandRequest::new(ShellKind::Cmd, "true").timeout(Duration::from_secs(60));
        assert_eq!(executor.effective_timeout(&request), Duration::from_secs(1));
        let default = CommandRequest::new(ShellKind::Cmd, "true");
        assert_eq!(
            CommandExecutor::default().effective_timeout(&default),
            Duration::from_millis(DEFAULT_TIMEOUT_MS)
        );
    }

    #[test]
    fn truncates_long_output() {
        let long = "line\n".repeat(MAX_OUTPUT_SIZE / 4);
        let truncated = truncate_output(long.clone(), long.len());
        assert!(truncated.len() < long.len());
        assert!(truncated.contains("output truncated"));
        assert_eq!(truncate_output("short".to_string(), 5), "short");

        let capped = "x\n".repeat(MAX_OUTPUT_SIZE / 2);
        let truncated = truncate_output(capped, 5_000_000);
        assert!(truncated.ends_with("(output truncated, 5000000 bytes total)"));
    }
}
