//! Security gate for tool execution: path allow-lists, blocked commands, and
//! the isolated process runtime.
//!
//! Every file-touching tool resolves its path through [`SandboxGuard`] before
//! doing I/O, and every command runs through [`SandboxGuard::check_command`].
//! Denials come back as strings destined for the LLM (a tool result), not as
//! panics or orchestrator errors.

mod process;

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use process::{ExecOutcome, IsolatedOutcome, ProcessSandbox, SandboxRuntime};

/// Sandbox policy: allow-lists, blocked command patterns, limits.
///
/// Mirrors the `security.*` section of the base configuration document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    pub allowed_read_paths: Vec<String>,
    pub allowed_write_paths: Vec<String>,
    pub blocked_commands: Vec<String>,
    /// Wall-clock limit for sandboxed execution, seconds.
    pub max_execution_time: u64,
    pub enabled: bool,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        let section = sys_config::SecuritySection::default();
        Self::from_section(&section)
    }
}

impl SandboxPolicy {
    /// Builds the policy from the parsed `security.*` config section.
    pub fn from_section(section: &sys_config::SecuritySection) -> Self {
        Self {
            allowed_read_paths: section.allowed_read_paths.clone(),
            allowed_write_paths: section.allowed_write_paths.clone(),
            blocked_commands: section.blocked_commands.clone(),
            max_execution_time: section.max_execution_time,
            enabled: section.sandbox_enabled,
        }
    }
}

/// Compiled policy: canonical allow-list roots and compiled block patterns.
pub struct SandboxGuard {
    policy: SandboxPolicy,
    workspace_root: PathBuf,
    read_roots: Vec<PathBuf>,
    write_roots: Vec<PathBuf>,
    /// Compiled pattern paired with its configured source text.
    blocked: Vec<(Regex, String)>,
}

/// Normalizes `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut buf = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => buf = PathBuf::from(p.as_os_str()),
            Component::RootDir => buf.push(comp),
            Component::CurDir => {}
            Component::ParentDir => {
                buf.pop();
            }
            Component::Normal(s) => buf.push(s),
        }
    }
    buf
}

impl SandboxGuard {
    /// Compiles the policy against a workspace root. Relative allow-list
    /// entries resolve under the root; entries that do not exist yet are kept
    /// in normalized form.
    pub fn new(policy: SandboxPolicy, workspace_root: impl AsRef<Path>) -> Self {
        let workspace_root = workspace_root
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| workspace_root.as_ref().to_path_buf());

        let resolve_roots = |entries: &[String]| -> Vec<PathBuf> {
            entries
                .iter()
                .map(|entry| {
                    let p = Path::new(entry);
                    let abs = if p.is_absolute() {
                        p.to_path_buf()
                    } else {
                        workspace_root.join(p)
                    };
                    abs.canonicalize().unwrap_or_else(|_| normalize_path(&abs))
                })
                .collect()
        };

        let read_roots = resolve_roots(&policy.allowed_read_paths);
        let write_roots = resolve_roots(&policy.allowed_write_paths);

        let blocked = policy
            .blocked_commands
            .iter()
            .filter_map(|pattern| {
                // Plain substrings (e.g. "rm -rf") are escaped; anything with
                // regex metacharacters is taken as a pattern.
                let source = if pattern
                    .chars()
                    .any(|c| ".*+?|[]()\\^$".contains(c))
                {
                    pattern.clone()
                } else {
                    regex::escape(pattern)
                };
                match Regex::new(&source) {
                    Ok(re) => Some((re, pattern.clone())),
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "invalid blocked-command pattern skipped");
                        None
                    }
                }
            })
            .collect();

        if !policy.enabled {
            warn!("sandbox disabled: all path and command checks will pass");
        }

        Self {
            policy,
            workspace_root,
            read_roots,
            write_roots,
            blocked,
        }
    }

    /// Guard with the default policy rooted at the current directory.
    pub fn default_at(workspace_root: impl AsRef<Path>) -> Self {
        Self::new(SandboxPolicy::default(), workspace_root)
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Validates a read path: resolves to canonical form, rejects symlinks,
    /// rejects anything outside the read allow-list. Returns the canonical
    /// path, or a denial string for the LLM.
    pub fn check_read(&self, path: &str) -> Result<PathBuf, String> {
        self.check_path(path, &self.read_roots, "read")
    }

    /// Validates a write path against the write allow-list.
    pub fn check_write(&self, path: &str) -> Result<PathBuf, String> {
        self.check_path(path, &self.write_roots, "write")
    }

    fn check_path(
        &self,
        path: &str,
        roots: &[PathBuf],
        mode: &str,
    ) -> Result<PathBuf, String> {
        let raw = path.trim();
        let raw = if raw.is_empty() { "." } else { raw };
        let candidate = {
            let p = Path::new(raw);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.workspace_root.join(p)
            }
        };
        let normalized = normalize_path(&candidate);

        if !self.policy.enabled {
            return Ok(normalized);
        }

        if let Ok(meta) = std::fs::symlink_metadata(&normalized) {
            if meta.file_type().is_symlink() {
                return Err(format!(
                    "[Sandbox] {} denied: '{}' is a symbolic link",
                    mode, path
                ));
            }
        }

        let resolved = normalized
            .canonicalize()
            .unwrap_or_else(|_| normalized.clone());

        if roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(resolved)
        } else {
            Err(format!(
                "[Sandbox] {} denied: '{}' is outside the allowed paths",
                mode, path
            ))
        }
    }

    /// Validates a command line against the blocked patterns. Returns a
    /// denial string naming the matched pattern.
    pub fn check_command(&self, command: &str) -> Result<(), String> {
        if !self.policy.enabled {
            return Ok(());
        }
        for (re, source) in &self.blocked {
            if re.is_match(command) {
                return Err(format!(
                    "[Sandbox] command denied: matches blocked pattern '{}'",
                    source
                ));
            }
        }
        Ok(())
    }
}
