//! Typed base configuration document: `system.*` orchestration options and
//! `security.*` sandbox policy.
//!
//! Loaded from a YAML file; every field has a default so a missing file or a
//! partial document still yields a usable configuration. Per-persona documents
//! are separate YAML files consumed by arbiter's persona library.

use serde::{Deserialize, Serialize};

/// Orchestration options (`system.*`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSection {
    /// Initial persona id.
    pub default_persona: String,
    /// Default debate round bound.
    pub debate_max_rounds: u32,
    /// Validity score below which the debate approves the proposal.
    pub debate_approval_threshold: f64,
    /// Run the debate automatically on CLOUD responses.
    pub debate_auto_trigger_on_cloud: bool,
    /// Toggle automatic checkpointing.
    pub checkpoint_enabled: bool,
    /// When the critic model is unreachable, treat the review as PASS
    /// (availability over safety; flip to fail closed).
    pub critic_unreachable_pass: bool,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            default_persona: "worker".to_string(),
            debate_max_rounds: 3,
            debate_approval_threshold: 7.0,
            debate_auto_trigger_on_cloud: false,
            checkpoint_enabled: true,
            critic_unreachable_pass: true,
        }
    }
}

/// Sandbox policy (`security.*`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// Path allow-list for reads.
    pub allowed_read_paths: Vec<String>,
    /// Path allow-list for writes.
    pub allowed_write_paths: Vec<String>,
    /// Command patterns that are never executed.
    pub blocked_commands: Vec<String>,
    /// Sandbox wall-clock timeout in seconds.
    pub max_execution_time: u64,
    /// Master sandbox toggle.
    pub sandbox_enabled: bool,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            allowed_read_paths: vec![".".to_string()],
            allowed_write_paths: vec!["./output/".to_string()],
            blocked_commands: vec![
                "rm -rf".to_string(),
                "shutdown".to_string(),
                "reboot".to_string(),
                "mkfs".to_string(),
                "dd if=".to_string(),
                "chmod -R 777".to_string(),
                "> /dev/".to_string(),
                r"curl.*\|.*sh".to_string(),
                r"wget.*\|.*sh".to_string(),
            ],
            max_execution_time: 5,
            sandbox_enabled: true,
        }
    }
}

/// The base document: `system` + `security` sections.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub system: SystemSection,
    pub security: SecuritySection,
}

impl SystemConfig {
    /// Loads the document from a YAML file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, crate::LoadError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(crate::LoadError::DocumentRead)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Loads the document, falling back to defaults when the file is absent.
    /// Parse errors on an existing file are still surfaced.
    pub fn load_or_default(path: impl AsRef<std::path::Path>) -> Result<Self, crate::LoadError> {
        if path.as_ref().is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
