//! Prompt construction shared by the local engine and remote providers.
//!
//! Every backend receives the same text for the same request, so output
//! shape stays consistent when the user switches providers.

use std::borrow::Cow;
use std::path::Path;

/// Character budget for file content embedded in a prompt.
pub const FILE_CONTENT_CAP: usize = 16_000;

/// Character budget for free-form context attached to a question.
pub const CONTEXT_CAP: usize = 12_000;

/// Appended to content cut at its budget.
pub const TRUNCATION_MARKER: &str = "\n\n[... truncated by Lantern for length ...]\n";

/// System message for chat-style APIs.
pub const SYSTEM_PROMPT: &str = "You are Lantern, a concise Linux-focused assistant \
running inside a terminal file manager.";

/// A fully rendered prompt with its generation budget.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub text: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Cut `content` to at most `cap` characters, appending [`TRUNCATION_MARKER`]
/// when anything was removed.
pub fn truncate(content: &str, cap: usize) -> Cow<'_, str> {
    match content.char_indices().nth(cap) {
        Some((byte_idx, _)) => {
            let mut cut = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            cut.push_str(&content[..byte_idx]);
            cut.push_str(TRUNCATION_MARKER);
            Cow::Owned(cut)
        }
        None => Cow::Borrowed(content),
    }
}

/// Prompt asking the model to explain a single file.
pub fn file_prompt(path: &Path, content: &str) -> Prompt {
    let snippet = truncate(content, FILE_CONTENT_CAP);

    let text = format!(
        "{SYSTEM_PROMPT} You are helping an experienced Linux engineer \
understand a file on their system.\n\n\
TASK:\n\
1. Identify what kind of file this appears to be (log, config, script, JSON, YAML, systemd unit, etc.).\n\
2. Summarize what it does or contains in clear bullet points.\n\
3. If it is a config or script, call out obvious issues, risks, or misconfigurations.\n\
4. Suggest 2-3 next steps the user might take to debug or improve things.\n\n\
File path: {path}\n\n\
File content (may be truncated):\n\n\
{snippet}\n\n\
Respond in Markdown with:\n\
- A short heading naming the file type\n\
- 3-7 summary bullet points\n\
- A \"Next steps:\" section with 2-3 bullets.\n",
        path = path.display(),
    );

    Prompt {
        text,
        max_tokens: 1024,
        temperature: 0.15,
    }
}

/// Prompt asking the model to explain a directory from its manifest.
pub fn directory_prompt(path: &Path, manifest: &str) -> Prompt {
    let text = format!(
        "{SYSTEM_PROMPT} You are acting as a Linux systems engineer and security \
analyst. You are given a manifest of a directory on disk; entries may include \
name, owner and group, permissions, size, modification time and heuristic flags.\n\n\
TASK:\n\
1. Identify what this directory most likely is and what it is used for.\n\
2. Summarize its notable contents in clear bullet points.\n\
3. Call out risky or unusual entries (world-writable files, setuid/setgid binaries, \
keys, executables in odd places, double-extension names) and explain why.\n\
4. Suggest 3-5 read-only shell commands to investigate further.\n\n\
Directory path: {path}\n\n\
Manifest:\n\
{manifest}\n\n\
Respond in Markdown with sections:\n\
- \"What this directory looks like\"\n\
- \"Notable or risky entries\"\n\
- \"Next steps:\" with commands in fenced code blocks.\n",
        path = path.display(),
    );

    Prompt {
        text,
        max_tokens: 1024,
        temperature: 0.15,
    }
}

/// Prompt for a general question with optional supporting context.
pub fn ask_prompt(question: &str, context: Option<&str>) -> Prompt {
    let context_block = context
        .filter(|c| !c.trim().is_empty())
        .map(|c| format!("\nContext:\n{}\n", truncate(c, CONTEXT_CAP)))
        .unwrap_or_default();

    let text = format!(
        "{SYSTEM_PROMPT} Answer as a practical, Linux-savvy helper. \
Assume a Bash shell on a typical Linux system when giving commands.\n\n\
Question:\n{question}\n\
{context_block}\n\
Answer clearly. If you suggest commands, explain briefly what they do.\n",
    );

    Prompt {
        text,
        max_tokens: 768,
        temperature: 0.3,
    }
}
