// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Askpass bridge between the pool and spawned ssh processes.
//!
//! ssh cannot prompt on our stdin, so `SSH_ASKPASS` points at a helper
//! script inside a scoped temp directory. The helper writes
//! `prompt.<reqId>.txt` and polls for `response.<reqId>.txt`; the session
//! watches the directory, routes each prompt through the registered
//! resolver, and answers with an atomic rename. The helper deletes the
//! response after reading it; cleanup sweeps anything left behind.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Classification of an ssh interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    /// "Are you sure you want to continue connecting ..." — host-key
    /// verification, parsed for display.
    HostKey(HostKeyPrompt),
    /// Everything else: passphrases, passwords, OTPs.
    Credential,
}

/// Fields extracted from a standard OpenSSH host-key prompt.
/// Unparseable prompts yield `"unknown"` for each field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyPrompt {
    pub host: String,
    pub key_type: String,
    pub fingerprint: String,
}

/// One prompt delivered to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub id: String,
    pub text: String,
    pub kind: PromptKind,
}

/// Route a prompt: host-key verification questions match
/// "continue connecting" (case-insensitive); all others are credentials.
pub fn classify_prompt(text: &str) -> PromptKind {
    if text.to_lowercase().contains("continue connecting") {
        PromptKind::HostKey(parse_host_key_prompt(text))
    } else {
        PromptKind::Credential
    }
}

fn parse_host_key_prompt(text: &str) -> HostKeyPrompt {
    let unknown = || "unknown".to_string();

    // "The authenticity of host 'name (addr)' can't be established."
    let host = text
        .split_once("host '")
        .and_then(|(_, rest)| rest.split_once('\''))
        .map(|(quoted, _)| {
            quoted.split_whitespace().next().unwrap_or(quoted).trim_end_matches('(').to_string()
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(unknown);

    // "ED25519 key fingerprint is SHA256:...."
    let key_type = text
        .split_once(" key fingerprint is")
        .map(|(before, _)| before.rsplit([' ', '\n']).next().unwrap_or("").to_string())
        .filter(|k| !k.is_empty())
        .unwrap_or_else(unknown);

    let fingerprint = text
        .split_once("fingerprint is ")
        .map(|(_, rest)| {
            rest.split_whitespace().next().unwrap_or("").trim_end_matches('.').to_string()
        })
        .filter(|f| !f.is_empty())
        .unwrap_or_else(unknown);

    HostKeyPrompt { host, key_type, fingerprint }
}

/// Answers a prompt with the text to feed back to ssh.
pub type PromptResolver =
    Arc<dyn Fn(PromptRequest) -> BoxFuture<'static, String> + Send + Sync>;

/// Scoped askpass directory plus the watcher that answers prompts.
pub struct AskpassSession {
    dir: Mutex<Option<TempDir>>,
    path: PathBuf,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl AskpassSession {
    /// Create the session directory, write the helper, and start watching.
    ///
    /// The directory is removed on cleanup or drop even if the helper write
    /// failed — `TempDir` owns it from the moment it exists.
    pub fn new(resolver: PromptResolver) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("mux-askpass-").tempdir()?;
        let path = dir.path().to_path_buf();
        write_helper(&path)?;

        let watcher = tokio::spawn(watch_prompts(path.clone(), resolver));
        Ok(Self {
            dir: Mutex::new(Some(dir)),
            path,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Session directory path.
    pub fn dir(&self) -> &Path {
        &self.path
    }

    /// Environment to export into the ssh child.
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("SSH_ASKPASS".into(), self.helper_path().to_string_lossy().into_owned()),
            ("SSH_ASKPASS_REQUIRE".into(), "force".into()),
            // ssh refuses askpass without a display; the value is never used.
            ("DISPLAY".into(), ":0".into()),
            ("MUX_ASKPASS_DIR".into(), self.path.to_string_lossy().into_owned()),
        ]
    }

    pub fn helper_path(&self) -> PathBuf {
        self.path.join(helper_name())
    }

    /// Stop the watcher and remove the session directory. Idempotent.
    pub fn cleanup(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        if let Some(dir) = self.dir.lock().take() {
            if let Err(e) = dir.close() {
                tracing::warn!(error = %e, "askpass dir removal failed");
            }
        }
    }
}

impl Drop for AskpassSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn helper_name() -> &'static str {
    if cfg!(windows) {
        "askpass.cmd"
    } else {
        "askpass.sh"
    }
}

fn write_helper(dir: &Path) -> std::io::Result<()> {
    let helper = dir.join(helper_name());
    let script = format!(
        r#"#!/bin/sh
dir="${{MUX_ASKPASS_DIR:-{dir}}}"
req="$$.$(awk 'BEGIN {{ srand(); printf "%d", rand() * 1000000 }}')"
tmp="$dir/prompt.$req.tmp"
printf '%s' "$1" > "$tmp"
mv "$tmp" "$dir/prompt.$req.txt"
i=0
while [ "$i" -lt 1200 ]; do
    if [ -f "$dir/response.$req.txt" ]; then
        cat "$dir/response.$req.txt"
        rm -f "$dir/response.$req.txt"
        exit 0
    fi
    sleep 0.1
    i=$((i + 1))
done
exit 1
"#,
        dir = dir.display()
    );
    std::fs::write(&helper, script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

async fn watch_prompts(dir: PathBuf, resolver: PromptResolver) {
    let seen: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut tick = tokio::time::interval(POLL_INTERVAL);
    loop {
        tick.tick().await;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return, // directory gone: session cleaned up
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(req_id) = request_id(&name) else { continue };
            // Resolver runs exactly once per request id.
            if !seen.lock().insert(req_id.to_string()) {
                continue;
            }
            let text = std::fs::read_to_string(entry.path()).unwrap_or_default();
            let request = PromptRequest {
                id: req_id.to_string(),
                kind: classify_prompt(&text),
                text,
            };
            tracing::debug!(req = %request.id, kind = ?request.kind, "askpass prompt");
            let dir = dir.clone();
            let resolver = resolver.clone();
            let prompt_path = entry.path();
            tokio::spawn(async move {
                let answer = resolver(request.clone()).await;
                if let Err(e) = write_response(&dir, &request.id, &answer) {
                    tracing::warn!(req = %request.id, error = %e, "askpass response write failed");
                }
                let _ = std::fs::remove_file(prompt_path);
            });
        }
    }
}

fn request_id(file_name: &str) -> Option<&str> {
    file_name.strip_prefix("prompt.")?.strip_suffix(".txt")
}

/// Write `response.<reqId>.txt` atomically (temp + rename).
fn write_response(dir: &Path, req_id: &str, answer: &str) -> std::io::Result<()> {
    let tmp = dir.join(format!("response.{req_id}.tmp"));
    let dest = dir.join(format!("response.{req_id}.txt"));
    std::fs::write(&tmp, answer)?;
    std::fs::rename(&tmp, &dest)
}

#[cfg(test)]
#[path = "askpass_tests.rs"]
mod tests;
