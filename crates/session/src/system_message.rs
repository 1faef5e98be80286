// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composes the LM system prompt.
//!
//! Block order is fixed: prelude, `<environment>`, `<mcp>`,
//! `<agent-instructions>`, `<custom-instructions>`, a matched `<model-…>`
//! block, `<additional-instructions>`. The `<mcp>` block lists server names
//! only — commands and URLs may carry credentials and never reach the
//! prompt. Instruction sources can embed model-scoped sections as
//! `<model-PATTERN>…</model-PATTERN>`; the pattern is matched as a regex
//! against the active model id, looked up agent → context → global.

use regex::Regex;
use std::ops::Range;

const PRELUDE: &str = "You are mux, a coding agent working inside the user's workspace. \
Use the available tools to inspect and change the project; keep answers grounded in what \
you actually ran and read.";

/// Instruction sources in lookup priority order.
#[derive(Debug, Clone, Default)]
pub struct SystemMessageSources {
    /// Agent prompt (highest priority).
    pub agent: Option<String>,
    /// Project-context instructions.
    pub context: Option<String>,
    /// Global instructions.
    pub global: Option<String>,
}

pub struct SystemMessageBuilder {
    runtime_kind: String,
    workspace_path: String,
    project_path: Option<String>,
    mcp_server_names: Vec<String>,
    sources: SystemMessageSources,
    model_id: String,
    additional_instructions: Option<String>,
}

impl SystemMessageBuilder {
    pub fn new(
        runtime_kind: impl Into<String>,
        workspace_path: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            runtime_kind: runtime_kind.into(),
            workspace_path: workspace_path.into(),
            project_path: None,
            mcp_server_names: Vec::new(),
            sources: SystemMessageSources::default(),
            model_id: model_id.into(),
            additional_instructions: None,
        }
    }

    pub fn project_path(mut self, path: impl Into<String>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    pub fn mcp_servers(mut self, names: Vec<String>) -> Self {
        self.mcp_server_names = names;
        self
    }

    pub fn sources(mut self, sources: SystemMessageSources) -> Self {
        self.sources = sources;
        self
    }

    pub fn additional_instructions(mut self, text: impl Into<String>) -> Self {
        self.additional_instructions = Some(text.into());
        self
    }

    fn environment_text(&self) -> String {
        let mut text = match self.runtime_kind.as_str() {
            "local" => "Commands run directly in the user's project directory; there is no \
                        isolation between you and their checkout."
                .to_string(),
            "worktree" => "Commands run in a dedicated git worktree of the user's project; \
                           the main checkout is untouched."
                .to_string(),
            "ssh" | "coder" => "Commands run on a remote host over SSH. The project lives at \
                                $MUX_PROJECT_PATH on that host; paths outside it are remote \
                                paths, not local ones."
                .to_string(),
            "docker" => "Commands run inside a Docker container dedicated to this workspace."
                .to_string(),
            "devcontainer" => "Commands run inside the project's Dev Container; host paths are \
                               mapped under the mounted workspace folder."
                .to_string(),
            other => format!("Commands run on a {other} runtime."),
        };
        text.push_str(&format!("\nWorkspace path: {}", self.workspace_path));
        if let Some(project) = &self.project_path {
            text.push_str(&format!("\nProject path: {project}"));
        }
        text
    }

    /// First model-scoped section whose pattern matches the active model,
    /// searched agent → context → global.
    fn model_section(&self) -> Option<(String, String)> {
        for source in [&self.sources.agent, &self.sources.context, &self.sources.global]
            .into_iter()
            .flatten()
        {
            for (_, name, body) in model_blocks(source) {
                if matches_model(&name, &self.model_id) {
                    return Some((name, body));
                }
            }
        }
        None
    }

    pub fn build(&self) -> String {
        let mut out = String::from(PRELUDE);

        push_block(&mut out, "environment", &self.environment_text());

        if !self.mcp_server_names.is_empty() {
            let listing = self
                .mcp_server_names
                .iter()
                .map(|name| format!("- {name}"))
                .collect::<Vec<_>>()
                .join("\n");
            push_block(&mut out, "mcp", &listing);
        }

        if let Some(agent) = &self.sources.agent {
            let stripped = strip_model_sections(agent);
            if !stripped.trim().is_empty() {
                push_block(&mut out, "agent-instructions", stripped.trim());
            }
        }

        let custom: Vec<String> = [&self.sources.global, &self.sources.context]
            .into_iter()
            .flatten()
            .map(|text| strip_model_sections(text).trim().to_string())
            .filter(|text| !text.is_empty())
            .collect();
        if !custom.is_empty() {
            push_block(&mut out, "custom-instructions", &custom.join("\n\n"));
        }

        if let Some((name, body)) = self.model_section() {
            let tag = sanitize_tag(&format!("model-{name}"));
            push_block(&mut out, &tag, body.trim());
        }

        if let Some(additional) = &self.additional_instructions {
            if !additional.trim().is_empty() {
                push_block(&mut out, "additional-instructions", additional.trim());
            }
        }

        out
    }
}

fn push_block(out: &mut String, tag: &str, body: &str) {
    let tag = sanitize_tag(tag);
    out.push_str(&format!("\n\n<{tag}>\n{body}\n</{tag}>"));
}

/// Tag names are `[a-z0-9_-]+` with hyphen runs collapsed.
pub fn sanitize_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.to_lowercase().chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}

/// All `<model-NAME>body</model-NAME>` blocks with their spans.
fn model_blocks(text: &str) -> Vec<(Range<usize>, String, String)> {
    let Ok(open) = Regex::new(r"<model-([^>\s]+)>") else {
        return Vec::new();
    };
    let mut blocks = Vec::new();
    for caps in open.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let name = caps[1].to_string();
        let closing = format!("</model-{name}>");
        let Some(rel) = text[whole.end()..].find(&closing) else { continue };
        let body_start = whole.end();
        let body_end = whole.end() + rel;
        blocks.push((
            whole.start()..body_end + closing.len(),
            name,
            text[body_start..body_end].to_string(),
        ));
    }
    blocks
}

/// Instruction text with every model-scoped section removed.
fn strip_model_sections(text: &str) -> String {
    let blocks = model_blocks(text);
    if blocks.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (range, _, _) in blocks {
        if range.start >= cursor {
            out.push_str(&text[cursor..range.start]);
            cursor = range.end;
        }
    }
    out.push_str(&text[cursor..]);
    out
}

/// Section patterns are regexes over the model id; invalid patterns fall
/// back to substring matching.
fn matches_model(pattern: &str, model_id: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(model_id),
        Err(_) => model_id.contains(pattern),
    }
}

#[cfg(test)]
#[path = "system_message_tests.rs"]
mod tests;
