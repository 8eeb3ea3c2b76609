//! External-command fixtures (component L4).
//!
//! `process NAME -start ...` spawns `sh -c <cmd>` (or an arbitrary argv),
//! captures stdout/stderr asynchronously into growable buffers, and exposes
//! a stdin writer. Output keeps accumulating until the child exits or the
//! fixture is torn down, so `-wait`/`-stop` can inspect everything the
//! child ever printed.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// A named external-process fixture (name must start with `p`).
pub struct Process {
    name: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    exit_code: Mutex<Option<i32>>,
}

impl Process {
    /// Spawn `sh -c cmd` in `cwd`, immediately beginning to capture output.
    pub fn start(name: impl Into<String>, cmd: &str, cwd: &std::path::Path) -> Result<Process> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| Error::process(format!("spawning {:?}: {}", cmd, e)))?;

        let stdin = child.stdin.take();
        let mut child_stdout = child.stdout.take().expect("piped stdout");
        let mut child_stderr = child.stderr.take().expect("piped stderr");

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));

        {
            let buf = stdout.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match child_stdout.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
                    }
                }
            });
        }
        {
            let buf = stderr.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match child_stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
                    }
                }
            });
        }

        Ok(Process {
            name: name.into(),
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(stdin),
            stdout,
            stderr,
            exit_code: Mutex::new(None),
        })
    }

    /// The fixture's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write `data` to the child's stdin.
    pub async fn write_stdin(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        match guard.as_mut() {
            Some(stdin) => {
                stdin.write_all(data).await?;
                Ok(())
            }
            None => Err(Error::process(format!("{}: stdin already closed", self.name))),
        }
    }

    /// Close the child's stdin so it observes EOF.
    pub async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }

    /// Wait (bounded by `wait_timeout`) for the child to exit, recording its exit code.
    pub async fn wait(&self, wait_timeout: Duration) -> Result<i32> {
        let mut guard = self.child.lock().await;
        let child = guard
            .as_mut()
            .ok_or_else(|| Error::process(format!("{}: already reaped", self.name)))?;
        let status = timeout(wait_timeout, child.wait())
            .await
            .map_err(|_| Error::process(format!("{}: timed out waiting for exit", self.name)))??;
        let code = status.code().unwrap_or(-1);
        *self.exit_code.lock().await = Some(code);
        Ok(code)
    }

    /// Send SIGTERM (`-stop`) or SIGKILL (`-kill`) to the child.
    pub async fn signal(&self, kill: bool) -> Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if kill {
                child.kill().await?;
            } else if let Some(id) = child.id() {
                // SIGTERM; a graceful `sh -c` shutdown.
                unsafe {
                    libc::kill(id as i32, libc::SIGTERM);
                }
            }
        }
        Ok(())
    }

    /// Everything the child has printed to stdout so far.
    pub async fn stdout(&self) -> Vec<u8> {
        self.stdout.lock().await.clone()
    }

    /// Everything the child has printed to stderr so far.
    pub async fn stderr(&self) -> Vec<u8> {
        self.stderr.lock().await.clone()
    }

    /// The child's exit code, once `wait` has observed it.
    pub async fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().await
    }
}

/// Run `sh -c cmd` to completion (used by the global `shell` command), returning
/// combined stdout+stderr and the exit code.
pub async fn run_shell(cmd: &str, cwd: &std::path::Path) -> Result<(String, i32)> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| Error::process(format!("running {:?}: {}", cmd, e)))?;
    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    let text = String::from_utf8_lossy(&combined).into_owned();
    Ok((text, output.status.code().unwrap_or(-1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let proc = Process::start("p1", "echo hello", dir.path()).unwrap();
        let code = proc.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, 0);
        // Give the capture task a beat to drain the pipe after exit.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(proc.stdout().await, b"hello\n");
    }

    #[tokio::test]
    async fn run_shell_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let (out, code) = run_shell("echo hi; exit 3", dir.path()).await.unwrap();
        assert_eq!(out.trim(), "hi");
        assert_eq!(code, 3);
    }
}
