//! Persona management: named bundles of system prompt + sampling parameters,
//! swappable at runtime.
//!
//! A persona is immutable once loaded (write-once cache). The manager tracks
//! the active persona and a transition log, and produces the transition
//! meta-message that re-anchors the model's attention on its new role — the
//! hot-swap is nothing more than a different struct passed to the next
//! inference call.
//!
//! Persona documents are YAML. A directory of `{id}.yaml` files overrides the
//! compiled-in defaults (`worker`, `architect`, `critic`, `devil`,
//! `moderator`).

mod defaults;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::llm::SamplingParams;

pub use defaults::{DEFAULT_PERSONA_IDS, EMBEDDED_PERSONAS};

/// Error from loading or switching personas.
#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("persona not found: {0}")]
    NotFound(String),
    #[error("persona parse error ({id}): {source}")]
    Parse {
        id: String,
        source: serde_yaml::Error,
    },
    #[error("persona read error ({id}): {source}")]
    Read { id: String, source: std::io::Error },
}

/// Sampling parameters of a persona document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaParameters {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for PersonaParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 4096,
        }
    }
}

/// One persona document. Immutable once loaded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Persona {
    pub persona_id: String,
    pub display_name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub parameters: PersonaParameters,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default = "default_voice_tone")]
    pub voice_tone: String,
}

fn default_voice_tone() -> String {
    "neutral".to_string()
}

impl Persona {
    /// Sampling parameters for an LLM call under this persona.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: Some(self.parameters.temperature),
            top_p: Some(self.parameters.top_p),
            max_tokens: Some(self.parameters.max_tokens),
        }
    }
}

/// One recorded persona switch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonaTransition {
    pub old_persona: String,
    pub new_persona: String,
    pub reason: String,
    pub timestamp: String,
}

/// Loads personas from a directory with embedded fallbacks; caches per id.
pub struct PersonaLibrary {
    dir: Option<PathBuf>,
    cache: DashMap<String, Arc<Persona>>,
}

impl PersonaLibrary {
    /// Library over the embedded defaults only.
    pub fn embedded() -> Self {
        Self {
            dir: None,
            cache: DashMap::new(),
        }
    }

    /// Library over `{dir}/{id}.yaml` documents, falling back to the
    /// embedded defaults for ids without a file.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            cache: DashMap::new(),
        }
    }

    /// Loads a persona by id. The first load wins the cache slot; documents
    /// are immutable afterwards.
    pub fn load(&self, id: &str) -> Result<Arc<Persona>, PersonaError> {
        if let Some(found) = self.cache.get(id) {
            return Ok(Arc::clone(found.value()));
        }

        let source = self.read_source(id)?;
        let persona: Persona = serde_yaml::from_str(&source).map_err(|source| {
            PersonaError::Parse {
                id: id.to_string(),
                source,
            }
        })?;
        let persona = Arc::new(persona);
        let entry = self
            .cache
            .entry(id.to_string())
            .or_insert_with(|| Arc::clone(&persona));
        Ok(Arc::clone(entry.value()))
    }

    fn read_source(&self, id: &str) -> Result<String, PersonaError> {
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{}.yaml", id));
            if path.is_file() {
                return std::fs::read_to_string(&path).map_err(|source| PersonaError::Read {
                    id: id.to_string(),
                    source,
                });
            }
        }
        EMBEDDED_PERSONAS
            .iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, yaml)| yaml.to_string())
            .ok_or_else(|| PersonaError::NotFound(id.to_string()))
    }

    /// Available persona ids: directory documents plus embedded defaults.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = DEFAULT_PERSONA_IDS.iter().map(|s| s.to_string()).collect();
        if let Some(dir) = &self.dir {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if let Some(id) = name.strip_suffix(".yaml") {
                        if !ids.iter().any(|existing| existing == id) {
                            ids.push(id.to_string());
                        }
                    }
                }
            }
        }
        ids.sort();
        ids
    }
}

/// Active persona plus transition log.
pub struct PersonaManager {
    library: Arc<PersonaLibrary>,
    current: RwLock<Arc<Persona>>,
    transitions: Mutex<Vec<PersonaTransition>>,
}

impl PersonaManager {
    /// Creates the manager with the given initial persona.
    pub fn new(library: Arc<PersonaLibrary>, default_id: &str) -> Result<Self, PersonaError> {
        let current = library.load(default_id)?;
        Ok(Self {
            library,
            current: RwLock::new(current),
            transitions: Mutex::new(Vec::new()),
        })
    }

    /// Id of the active persona.
    pub fn current_id(&self) -> String {
        self.current.read().expect("persona lock").persona_id.clone()
    }

    /// The active persona.
    pub fn current(&self) -> Arc<Persona> {
        Arc::clone(&self.current.read().expect("persona lock"))
    }

    /// Switches the active persona, recording the transition.
    pub fn switch(&self, id: &str, reason: &str) -> Result<Arc<Persona>, PersonaError> {
        let next = self.library.load(id)?;
        let old_id = {
            let mut current = self.current.write().expect("persona lock");
            let old_id = current.persona_id.clone();
            *current = Arc::clone(&next);
            old_id
        };
        self.transitions
            .lock()
            .expect("transition lock")
            .push(PersonaTransition {
                old_persona: old_id.clone(),
                new_persona: id.to_string(),
                reason: reason.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            });
        info!(from = %old_id, to = %id, reason, "persona switch");
        Ok(next)
    }

    /// Renders the active persona's system prompt, substituting `{{key}}`
    /// template variables from `context`.
    pub fn system_prompt(&self, context: Option<&HashMap<String, String>>) -> String {
        let prompt = self.current().system_prompt.clone();
        match context {
            Some(vars) => vars.iter().fold(prompt, |acc, (key, value)| {
                acc.replace(&format!("{{{{{}}}}}", key), value)
            }),
            None => prompt,
        }
    }

    /// Meta-message injected after a switch: states the old role, the new
    /// role, and instructs the model to re-evaluate independently.
    pub fn transition_message(&self) -> String {
        let transitions = self.transitions.lock().expect("transition lock");
        let old_name = transitions
            .last()
            .map(|t| t.old_persona.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let current = self.current();
        format!(
            "[System notice] Your role has changed from '{}' to '{}'. \
             Re-read the conversation from this new perspective. Do not defer \
             to earlier judgments or conclusions; evaluate independently with \
             the expertise and standards of your current role.",
            old_name, current.display_name
        )
    }

    /// Sampling parameters of the active persona.
    pub fn sampling(&self) -> SamplingParams {
        self.current().sampling()
    }

    /// Tools the active persona may use; empty means unrestricted.
    pub fn allowed_tools(&self) -> Vec<String> {
        self.current().allowed_tools.clone()
    }

    /// Copy of the transition log.
    pub fn transitions(&self) -> Vec<PersonaTransition> {
        self.transitions.lock().expect("transition lock").clone()
    }

    /// Available persona ids.
    pub fn available(&self) -> Vec<String> {
        self.library.list()
    }
}
