//! Long-running server processes.
//!
//! `server:start` spawns a process, optionally waits for a literal string in
//! its output and registers it under a name; `server:stop` looks the name up
//! and terminates it. The [`ServerRegistry`] lives in the session, so a start
//! and its stop may be any number of blocks apart.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use galley_mdx::{parse_args, Coercion, Field, Node};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{ExecError, Result};
use crate::options::seconds;
use crate::process::shell_command;
use crate::session::Session;

pub const START_SCHEMA: &[Field] = &[
    Field::optional("name", Coercion::Str),
    Field::optional("expect", Coercion::Str),
    Field::with_default("timeout", Coercion::Number, "30"),
    Field::optional("cwd", Coercion::Str),
    Field::with_default("hidden", Coercion::Bool, "false"),
];

pub const STOP_SCHEMA: &[Field] = &[
    Field::optional("name", Coercion::Str),
    Field::with_default("grace", Coercion::Number, "5"),
];

/// Grace period used when servers are shut down after a failure.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// A running server owned by the registry.
#[derive(Debug)]
pub struct ServerHandle {
    name: String,
    command: String,
    child: Child,
    pid: Option<u32>,
    drain: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Terminate the server, escalating to a kill after `grace`.
    pub async fn stop(mut self, grace: Duration) -> Result<ExitStatus> {
        self.terminate();

        let status = match timeout(grace, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    server = %self.name,
                    "server did not exit within {:?}, killing it",
                    grace
                );
                self.kill();
                self.child.wait().await
            }
        };

        // The group is gone; never signal a pid that may be reused
        self.pid = None;
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }

        status.map_err(|e| ExecError::Execution {
            command: self.command.clone(),
            status: "failed to wait".to_string(),
            output: e.to_string(),
        })
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        if let Some(pid) = self.pid {
            crate::process::terminate_group(pid);
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        let _ = self.child.start_kill();
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        if let Some(pid) = self.pid {
            crate::process::kill_group(pid);
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        let _ = self.child.start_kill();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.kill();
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

/// Running servers by name.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: BTreeMap<String, ServerHandle>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// Fail if `name` is already running.
    pub fn ensure_vacant(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            return Err(ExecError::precondition(format!(
                "server `{name}` is already running"
            )));
        }
        Ok(())
    }

    pub fn register(&mut self, handle: ServerHandle) -> Result<()> {
        self.ensure_vacant(&handle.name)?;
        self.servers.insert(handle.name.clone(), handle);
        Ok(())
    }

    /// Remove and return the server registered as `name`.
    pub fn take(&mut self, name: &str) -> Result<ServerHandle> {
        self.servers.remove(name).ok_or_else(|| {
            ExecError::precondition(format!("no server named `{name}` is running"))
        })
    }

    /// Stop every registered server. Returns the names that were running.
    pub async fn shutdown_all(&mut self, grace: Duration) -> Vec<String> {
        let names = self.names();
        for (name, handle) in std::mem::take(&mut self.servers) {
            if let Err(e) = handle.stop(grace).await {
                tracing::warn!(server = %name, "failed to stop server: {}", e);
            }
        }
        names
    }
}

/// Options for `server:start`.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOptions {
    pub name: String,
    pub command: String,
    pub expect: Option<String>,
    pub timeout: Duration,
    pub cwd: Option<String>,
    pub hidden: bool,
}

impl StartOptions {
    pub fn parse(args: &str, body: &str) -> Result<Self> {
        let args = parse_args(args, START_SCHEMA)?;
        let command = body.trim().to_string();
        if command.is_empty() {
            return Err(ExecError::validation("server:start block has no command"));
        }

        Ok(Self {
            name: args
                .str("name")
                .map(str::to_string)
                .unwrap_or_else(|| command.clone()),
            expect: args.str("expect").map(str::to_string),
            timeout: seconds(&args, "timeout")?.unwrap_or(Duration::from_secs(30)),
            cwd: args.str("cwd").map(str::to_string),
            hidden: args.flag("hidden"),
            command,
        })
    }

    pub async fn run(&self, session: &mut Session) -> Result<Option<Node>> {
        session.servers().ensure_vacant(&self.name)?;
        let cwd = session.block_cwd(self.cwd.as_deref())?;

        let handle = spawn_server(self, session.shell(), &cwd).await?;
        tracing::info!(server = %self.name, "server started");
        session.servers_mut().register(handle)?;

        if self.hidden {
            return Ok(None);
        }
        Ok(Some(Node::code("console", format!("$ {}\n", self.command))))
    }
}

/// Options for `server:stop`.
#[derive(Debug, Clone, PartialEq)]
pub struct StopOptions {
    pub name: String,
    pub grace: Duration,
}

impl StopOptions {
    pub fn parse(args: &str, body: &str) -> Result<Self> {
        let args = parse_args(args, STOP_SCHEMA)?;
        let name = match args.str("name") {
            Some(name) => name.to_string(),
            None => body.trim().to_string(),
        };
        if name.is_empty() {
            return Err(ExecError::validation(
                "server:stop needs `name=` or the server command as its body",
            ));
        }

        Ok(Self {
            name,
            grace: seconds(&args, "grace")?.unwrap_or(DEFAULT_GRACE),
        })
    }

    pub async fn run(&self, session: &mut Session) -> Result<Option<Node>> {
        let handle = session.servers_mut().take(&self.name)?;
        let status = handle.stop(self.grace).await?;
        tracing::info!(server = %self.name, %status, "server stopped");
        Ok(None)
    }
}

async fn spawn_server(opts: &StartOptions, shell: &str, cwd: &Path) -> Result<ServerHandle> {
    let mut cmd = shell_command(shell, &opts.command, cwd);
    cmd.stdout(Stdio::piped()).stderr(Stdio::null());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| ExecError::Execution {
        command: opts.command.clone(),
        status: "failed to spawn".to_string(),
        output: e.to_string(),
    })?;
    let stdout = child.stdout.take();

    let mut handle = ServerHandle {
        name: opts.name.clone(),
        command: opts.command.clone(),
        pid: child.id(),
        child,
        drain: None,
    };

    let Some(stdout) = stdout else {
        return Ok(handle);
    };
    let mut stdout = BufReader::new(stdout);

    if let Some(expect) = &opts.expect {
        let seen = timeout(opts.timeout, wait_for(&mut stdout, expect, &opts.name))
            .await
            .map_err(|_| ExecError::Timeout {
                what: format!("`{expect}` from server `{}`", opts.name),
                seconds: opts.timeout.as_secs_f64(),
            })?;

        if let Err(output) = seen {
            let status = match handle.child.try_wait() {
                Ok(Some(status)) => status.to_string(),
                _ => "output closed".to_string(),
            };
            return Err(ExecError::Execution {
                command: opts.command.clone(),
                status: format!("exited before printing `{expect}`: {status}"),
                output,
            });
        }
    }

    let name = opts.name.clone();
    handle.drain = Some(tokio::spawn(async move {
        let mut line = Vec::new();
        while let Ok(n) = stdout.read_until(b'\n', &mut line).await {
            if n == 0 {
                break;
            }
            tracing::debug!(server = %name, "{}", String::from_utf8_lossy(&line).trim_end());
            line.clear();
        }
    }));

    Ok(handle)
}

/// Read until `expect` appears. On end of output, returns what was seen.
///
/// Matching is done on raw bytes, so a character split across reads
/// still matches.
async fn wait_for(
    stdout: &mut BufReader<ChildStdout>,
    expect: &str,
    name: &str,
) -> std::result::Result<(), String> {
    let needle = expect.as_bytes();
    if needle.is_empty() {
        return Ok(());
    }
    let mut seen: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => return Err(String::from_utf8_lossy(&seen).into_owned()),
            Ok(n) => n,
        };
        tracing::debug!(server = %name, "{}", String::from_utf8_lossy(&buf[..n]).trim_end());
        // Only the new bytes and the tail before them can complete a match
        let from = seen.len().saturating_sub(needle.len() - 1);
        seen.extend_from_slice(&buf[..n]);
        if seen[from..].windows(needle.len()).any(|w| w == needle) {
            return Ok(());
        }
    }
}
