// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detached background processes, shared between local and ssh back-ends.
//!
//! A spawned script runs under `nohup` in its own process group with a trap
//! that records the exit code to a file; liveness is exactly "the exit_code
//! file does not exist yet". The supervisor holds no OS resources — mux can
//! restart and still observe or terminate the process through the same
//! output directory.

use crate::contract::SpawnBackgroundOptions;
use crate::error::RuntimeError;
use async_trait::async_trait;
use mux_core::exec::ExecOutput;
use mux_core::id::ProcessId;
use std::sync::Arc;
use std::time::Duration;

/// Grace period between SIGTERM and SIGKILL on terminate.
pub const TERM_GRACE: Duration = Duration::from_secs(2);

/// Minimal host surface the background supervisor needs.
///
/// Implemented by the local shell and by the ssh transport wrapper, so the
/// spawn/terminate scripts are written once.
#[async_trait]
pub trait CommandHost: Send + Sync {
    /// Run a short shell script to completion.
    async fn run(&self, script: &str) -> Result<ExecOutput, RuntimeError>;

    /// Read a file; `None` when it does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, RuntimeError>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError>;

    async fn ensure_dir(&self, path: &str) -> Result<(), RuntimeError>;

    /// Signal-0 liveness check.
    async fn process_alive(&self, pid: i32) -> Result<bool, RuntimeError>;
}

fn quote(s: &str) -> Result<String, RuntimeError> {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .map_err(|_| RuntimeError::Other(format!("unquotable argument: {s:?}")))
}

/// Handle to one detached process.
pub struct BackgroundProcess {
    id: ProcessId,
    pid: i32,
    output_dir: String,
    host: Arc<dyn CommandHost>,
}

impl BackgroundProcess {
    /// Spawn `script` detached under `bg_output_dir/{workspace}/{process}`.
    pub async fn spawn(
        host: Arc<dyn CommandHost>,
        script: &str,
        opts: &SpawnBackgroundOptions,
        bg_output_dir: &str,
    ) -> Result<Self, RuntimeError> {
        let id = ProcessId::new();
        let output_dir = format!("{}/{}/{}", bg_output_dir, opts.workspace_id, id);
        host.ensure_dir(&output_dir).await?;

        let mut runner = String::new();
        runner.push_str(&format!(
            "trap 'echo $? > {}/exit_code' EXIT\n",
            quote(&output_dir)?
        ));
        runner.push_str(&format!("cd {} || exit 1\n", quote(&opts.cwd)?));
        for (key, value) in &opts.env {
            if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(RuntimeError::Other(format!("invalid env key: {key:?}")));
            }
            runner.push_str(&format!("export {}={}\n", key, quote(value)?));
        }
        runner.push_str(script);
        runner.push('\n');
        host.write_file(&format!("{output_dir}/run.sh"), runner.as_bytes()).await?;

        let meta = serde_json::json!({
            "workspaceId": opts.workspace_id,
            "processId": id,
            "cwd": opts.cwd,
        });
        host.write_file(&format!("{output_dir}/meta.json"), meta.to_string().as_bytes()).await?;

        let dir = quote(&output_dir)?;
        let nice_prefix = match opts.niceness {
            Some(n) => format!("nice -n {n} "),
            None => String::new(),
        };
        let spawn_script = format!(
            "set -m\n\
             : > {dir}/stdout.log\n\
             : > {dir}/stderr.log\n\
             {nice_prefix}nohup sh {dir}/run.sh >> {dir}/stdout.log 2>> {dir}/stderr.log < /dev/null &\n\
             echo $!"
        );
        let output = host.run(&spawn_script).await?;
        if !output.success() {
            return Err(RuntimeError::Other(format!(
                "background spawn failed ({}): {}",
                output.exit.exit_code,
                output.stderr.trim()
            )));
        }
        let pid: i32 = output
            .stdout
            .trim()
            .parse()
            .map_err(|_| RuntimeError::Other(format!("unparseable pid: {:?}", output.stdout)))?;

        tracing::debug!(process = %id, pid, dir = %output_dir, "background process spawned");
        Ok(Self { id, pid, output_dir, host })
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn output_dir(&self) -> &str {
        &self.output_dir
    }

    /// `None` iff the exit_code file is absent (process still running).
    pub async fn get_exit_code(&self) -> Result<Option<i32>, RuntimeError> {
        let raw = self.host.read_file(&format!("{}/exit_code", self.output_dir)).await?;
        let Some(raw) = raw else { return Ok(None) };
        let text = String::from_utf8_lossy(&raw);
        Ok(text.trim().parse::<i32>().ok())
    }

    pub async fn read_stdout(&self) -> Result<String, RuntimeError> {
        let raw = self.host.read_file(&format!("{}/stdout.log", self.output_dir)).await?;
        Ok(String::from_utf8_lossy(&raw.unwrap_or_default()).into_owned())
    }

    pub async fn read_stderr(&self) -> Result<String, RuntimeError> {
        let raw = self.host.read_file(&format!("{}/stderr.log", self.output_dir)).await?;
        Ok(String::from_utf8_lossy(&raw.unwrap_or_default()).into_owned())
    }

    pub async fn is_running(&self) -> Result<bool, RuntimeError> {
        Ok(self.get_exit_code().await?.is_none() && self.host.process_alive(self.pid).await?)
    }

    /// SIGTERM the process group, wait the grace period, SIGKILL whatever is
    /// left, and make sure an exit code exists. Idempotent.
    pub async fn terminate(&self) -> Result<(), RuntimeError> {
        let dir = quote(&self.output_dir)?;
        let pid = self.pid;
        let script = format!(
            "kill -TERM -{pid} 2>/dev/null; sleep {grace}; kill -KILL -{pid} 2>/dev/null || true; \
             [ -f {dir}/exit_code ] || echo 143 > {dir}/exit_code 2>/dev/null",
            grace = TERM_GRACE.as_secs(),
        );
        self.host.run(&script).await?;
        Ok(())
    }

    /// Releases nothing: the process outlives the supervisor. Idempotent.
    pub fn dispose(&self) {}
}

#[cfg(test)]
#[path = "background_tests.rs"]
mod tests;
