//! Execution sessions for the sandboxed-agentic strategy.
//!
//! A session is an isolated, time-bounded working directory in which one
//! agent process runs. The [`Sandbox`] trait creates sessions; the
//! [`SessionManager`] owns their lifecycle:
//!
//! ```text
//!   create ──► write inputs ──► run agent ──► read output ──► teardown
//!     │            │               │  (min(command_timeout,       ▲
//!     │            │               │   time left in session))     │
//!     └────────────┴───────────────┴──────── any exit path ───────┘
//! ```
//!
//! Success is decided by the output file alone: a non-empty output file is a
//! success even when the process exited non-zero, and a missing or empty one
//! is a failure even when it exited zero. Stdout is only used for logging
//! and best-effort usage extraction.
//!
//! Teardown always runs. Its errors are logged and never replace the
//! attempt's own result.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("sandbox is disabled")]
    Disabled,
    #[error("failed to create execution session: {0}")]
    Create(String),
    #[error("path escapes the session directory: {0}")]
    PathEscape(String),
    #[error("session I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start agent command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent run timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("agent exited with {exit} without writing {file}: {detail}")]
    MissingOutput {
        exit: String,
        file: String,
        detail: String,
    },
    #[error("session teardown failed: {0}")]
    Teardown(String),
}

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub prompt: String,
    pub max_turns: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("status {}", code),
            None => "a signal".to_string(),
        }
    }
}

/// Creates isolated execution sessions.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self) -> Result<Box<dyn ExecutionSession>, SessionError>;
}

/// A live session. Paths are relative to the session's working directory.
#[async_trait]
pub trait ExecutionSession: Send {
    fn id(&self) -> &str;

    async fn write_file(&mut self, name: &str, contents: &[u8]) -> Result<(), SessionError>;

    /// Run the agent to completion. Deadlines are enforced by the caller;
    /// dropping the returned future must stop the process.
    async fn run(&mut self, invocation: &AgentInvocation) -> Result<ProcessExit, SessionError>;

    /// Read a file back, `None` when it does not exist.
    async fn read_file(&mut self, name: &str) -> Result<Option<Vec<u8>>, SessionError>;

    async fn teardown(self: Box<Self>) -> Result<(), SessionError>;
}

#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub session_timeout: Duration,
    pub command_timeout: Duration,
    pub output_file: String,
}

impl SessionLimits {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            session_timeout: Duration::from_secs(config.session_timeout_secs),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            output_file: config.output_file.clone(),
        }
    }
}

/// Inputs for one sandboxed attempt.
#[derive(Debug, Clone)]
pub struct SessionJob {
    pub files: Vec<(String, Vec<u8>)>,
    pub invocation: AgentInvocation,
}

/// A successful attempt.
#[derive(Debug, Clone)]
pub struct SessionRun {
    pub session_id: String,
    pub output: String,
    pub exit: ProcessExit,
}

pub struct SessionManager {
    sandbox: Arc<dyn Sandbox>,
    limits: SessionLimits,
}

impl SessionManager {
    pub fn new(sandbox: Arc<dyn Sandbox>, limits: SessionLimits) -> Self {
        Self { sandbox, limits }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Run one job in a fresh session and always tear the session down.
    pub async fn execute(&self, job: SessionJob) -> Result<SessionRun, SessionError> {
        let deadline = Instant::now() + self.limits.session_timeout;

        let mut session = match tokio::time::timeout_at(deadline, self.sandbox.create()).await {
            Ok(created) => created?,
            Err(_) => {
                return Err(SessionError::Timeout {
                    secs: self.limits.session_timeout.as_secs(),
                })
            }
        };
        let session_id = session.id().to_string();
        info!(session = %session_id, sandbox = self.sandbox.name(), "execution session created");

        // The session deadline covers file I/O as well as the agent run.
        let result = match tokio::time::timeout_at(deadline, self.run_in(session.as_mut(), job, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout {
                secs: self.limits.session_timeout.as_secs(),
            }),
        };

        match &result {
            Ok((_, exit)) => info!(session = %session_id, exit = %exit.describe(), "agent produced output"),
            Err(e) => warn!(session = %session_id, error = %e, "sandboxed attempt failed"),
        }

        if let Err(e) = session.teardown().await {
            warn!(session = %session_id, error = %e, "session teardown failed");
        } else {
            debug!(session = %session_id, "session torn down");
        }

        result.map(|(output, exit)| SessionRun {
            session_id,
            output,
            exit,
        })
    }

    async fn run_in(
        &self,
        session: &mut dyn ExecutionSession,
        job: SessionJob,
        deadline: Instant,
    ) -> Result<(String, ProcessExit), SessionError> {
        for (name, contents) in &job.files {
            session.write_file(name, contents).await?;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let command_timeout = self.limits.command_timeout.min(remaining);
        if command_timeout.is_zero() {
            return Err(SessionError::Timeout {
                secs: self.limits.session_timeout.as_secs(),
            });
        }

        let exit = match tokio::time::timeout(command_timeout, session.run(&job.invocation)).await {
            Ok(exit) => exit?,
            Err(_) => {
                return Err(SessionError::Timeout {
                    secs: command_timeout.as_secs(),
                })
            }
        };
        debug!(exit = %exit.describe(), stdout_bytes = exit.stdout.len(), "agent process exited");

        let output = session
            .read_file(&self.limits.output_file)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .filter(|text| !text.trim().is_empty());

        match output {
            Some(output) => {
                if !exit.success() {
                    warn!(exit = %exit.describe(), "agent exited abnormally but wrote its output; accepting");
                }
                Ok((output, exit))
            }
            None => Err(SessionError::MissingOutput {
                exit: exit.describe(),
                file: self.limits.output_file.clone(),
                detail: tail(&exit.stderr, 500),
            }),
        }
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        trimmed.to_string()
    } else {
        trimmed.chars().skip(count - max_chars).collect()
    }
}

/// Instantiate the sandbox named by `sandbox.provider`.
pub fn create_sandbox(config: &SandboxConfig) -> Arc<dyn Sandbox> {
    match config.provider.as_str() {
        "local" => Arc::new(LocalSandbox::from_config(config)),
        _ => Arc::new(DisabledSandbox),
    }
}

// ============ Disabled Sandbox ============

pub struct DisabledSandbox;

#[async_trait]
impl Sandbox for DisabledSandbox {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn create(&self) -> Result<Box<dyn ExecutionSession>, SessionError> {
        Err(SessionError::Disabled)
    }
}

// ============ Local Sandbox ============

/// Runs the agent as a local child process in a private temporary
/// directory, with a cleared environment plus an allow-list of variables.
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    root: Option<PathBuf>,
    command: String,
    args: Vec<String>,
    env_passthrough: Vec<String>,
    output_file: String,
}

impl LocalSandbox {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            root: config.root.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            env_passthrough: config.env_passthrough.clone(),
            output_file: config.output_file.clone(),
        }
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(&self) -> Result<Box<dyn ExecutionSession>, SessionError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("artisync-session-");
        let dir = match &self.root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| SessionError::Create(e.to_string()))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| SessionError::Create(e.to_string()))?;

        Ok(Box::new(LocalSession {
            id: uuid::Uuid::new_v4().to_string(),
            dir,
            sandbox: self.clone(),
        }))
    }
}

struct LocalSession {
    id: String,
    dir: TempDir,
    sandbox: LocalSandbox,
}

impl LocalSession {
    fn resolve(&self, name: &str) -> Result<PathBuf, SessionError> {
        let path = Path::new(name);
        let safe = !name.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(SessionError::PathEscape(name.to_string()));
        }
        Ok(self.dir.path().join(path))
    }

    fn expand(&self, arg: &str, invocation: &AgentInvocation) -> String {
        let max_turns = invocation.max_turns.to_string();
        expand_placeholders(
            arg,
            &[
                ("{prompt}", invocation.prompt.as_str()),
                ("{max_turns}", max_turns.as_str()),
                ("{output}", self.sandbox.output_file.as_str()),
            ],
        )
    }
}

/// Single left-to-right pass over `template`: substituted values are never
/// scanned again, so placeholder text inside a prompt reaches the agent as is.
fn expand_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match values.iter().find(|(name, _)| tail.starts_with(name)) {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl ExecutionSession for LocalSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&mut self, name: &str, contents: &[u8]) -> Result<(), SessionError> {
        let path = self.resolve(name)?;
        let io_err = |source| SessionError::Io {
            path: name.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&path, contents).await.map_err(io_err)
    }

    async fn run(&mut self, invocation: &AgentInvocation) -> Result<ProcessExit, SessionError> {
        let args: Vec<String> = self
            .sandbox
            .args
            .iter()
            .map(|a| self.expand(a, invocation))
            .collect();

        let mut cmd = tokio::process::Command::new(&self.sandbox.command);
        cmd.args(&args)
            .current_dir(self.dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear()
            .env(
                "PATH",
                std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string()),
            )
            .env("HOME", self.dir.path())
            .env("LANG", "C.UTF-8");
        for name in &self.sandbox.env_passthrough {
            if let Ok(value) = std::env::var(name) {
                cmd.env(name, value);
            }
        }

        info!(session = %self.id, command = %self.sandbox.command, max_turns = invocation.max_turns, "starting agent");
        let child = cmd.spawn().map_err(|source| SessionError::Spawn {
            command: self.sandbox.command.clone(),
            source,
        })?;
        let output = child.wait_with_output().await.map_err(|source| SessionError::Io {
            path: self.sandbox.command.clone(),
            source,
        })?;

        Ok(ProcessExit {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn read_file(&mut self, name: &str) -> Result<Option<Vec<u8>>, SessionError> {
        let path = self.resolve(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SessionError::Io {
                path: name.to_string(),
                source,
            }),
        }
    }

    async fn teardown(self: Box<Self>) -> Result<(), SessionError> {
        self.dir
            .close()
            .map_err(|e| SessionError::Teardown(e.to_string()))
    }
}
