//! EDRR manifests: a task plus per-phase instructions, loaded from YAML or JSON.
//!
//! ```yaml
//! id: tokenizer
//! title: Streaming tokenizer
//! description: Build a streaming tokenizer for the config language
//! requirements: [utf-8 input, byte offsets in errors]
//! phases:
//!   expand:        { instructions: "Survey lexer designs" }
//!   differentiate: { instructions: "Pick one by latency" }
//!   refine:        { instructions: "Write it with tests", templates: [lexer.rs.tmpl] }
//!   retrospect:    { instructions: "Note what to benchmark next" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::edrr::Phase;
use crate::task::{Task, TaskError};

/// Error type for manifest loading and validation
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(String),

    #[error("manifest is missing the {0} phase")]
    MissingPhase(Phase),

    #[error("manifest {0} phase has empty instructions")]
    EmptyInstructions(Phase),

    #[error("manifest id is empty")]
    EmptyId,

    #[error("manifest task is invalid: {0}")]
    InvalidTask(#[from] TaskError),
}

/// Instructions and supporting material for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PhaseSpec {
    pub instructions: String,
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl PhaseSpec {
    /// Instructions with templates and resources appended, as given to agents.
    pub fn prompt_instructions(&self) -> String {
        let mut out = self.instructions.trim().to_string();
        if !self.templates.is_empty() {
            out.push_str(&format!("\nTemplates: {}", self.templates.join(", ")));
        }
        if !self.resources.is_empty() {
            out.push_str(&format!("\nResources: {}", self.resources.join(", ")));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestPhases {
    #[serde(default)]
    pub expand: Option<PhaseSpec>,
    #[serde(default)]
    pub differentiate: Option<PhaseSpec>,
    #[serde(default)]
    pub refine: Option<PhaseSpec>,
    #[serde(default)]
    pub retrospect: Option<PhaseSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Free-form values; scalars become task context, `granularity` sets the task granularity.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub phases: ManifestPhases,
}

impl Manifest {
    /// Parse YAML (a JSON document is valid YAML too) and validate.
    pub fn parse_str(text: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest =
            serde_yaml::from_str(text).map_err(|e| ManifestError::Parse(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&text)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.id.trim().is_empty() {
            return Err(ManifestError::EmptyId);
        }
        for phase in Phase::ALL {
            let spec = self.phase(phase).ok_or(ManifestError::MissingPhase(phase))?;
            if spec.instructions.trim().is_empty() {
                return Err(ManifestError::EmptyInstructions(phase));
            }
        }
        self.to_task().validate()?;
        Ok(())
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseSpec> {
        match phase {
            Phase::Expand => self.phases.expand.as_ref(),
            Phase::Differentiate => self.phases.differentiate.as_ref(),
            Phase::Refine => self.phases.refine.as_ref(),
            Phase::Retrospect => self.phases.retrospect.as_ref(),
        }
    }

    /// Per-phase prompt instructions keyed by phase.
    pub fn instructions(&self) -> BTreeMap<Phase, String> {
        Phase::ALL
            .into_iter()
            .filter_map(|p| self.phase(p).map(|spec| (p, spec.prompt_instructions())))
            .collect()
    }

    pub fn to_task(&self) -> Task {
        let mut task = Task::new(self.description.clone()).with_id(self.id.clone());
        task.title = self.title.clone();
        task.requirements = self.requirements.clone();
        task.constraints = self.constraints.clone();
        for (key, value) in &self.metadata {
            match (key.as_str(), value) {
                ("granularity", serde_json::Value::Number(n)) => task.granularity = n.as_f64(),
                (_, serde_json::Value::String(s)) => {
                    task.context.insert(key.clone(), s.clone());
                }
                (_, serde_json::Value::Null) => {}
                (_, other) => {
                    task.context.insert(key.clone(), other.to_string());
                }
            }
        }
        task
    }

    /// JSON Schema describing the manifest format.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
id: tokenizer
title: Streaming tokenizer
description: Build a streaming tokenizer
requirements: [utf-8 input]
metadata:
  owner: lang-team
  granularity: 0.6
  priority: 2
phases:
  expand: { instructions: "Survey lexer designs" }
  differentiate: { instructions: "Pick one" }
  refine:
    instructions: "Write it with tests"
    templates: [lexer.rs.tmpl]
    resources: [docs/grammar.md]
  retrospect: { instructions: "Note follow-ups" }
"#;

    #[test]
    fn test_parse_yaml() {
        let manifest = Manifest::parse_str(MANIFEST).unwrap();
        assert_eq!(manifest.id, "tokenizer");
        let refine = manifest.phase(Phase::Refine).unwrap();
        assert_eq!(refine.templates, vec!["lexer.rs.tmpl"]);
        let instructions = manifest.instructions();
        assert_eq!(instructions.len(), 4);
        assert!(instructions[&Phase::Refine].contains("Resources: docs/grammar.md"));
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"id": "j", "description": "d", "phases": {
            "expand": {"instructions": "a"}, "differentiate": {"instructions": "b"},
            "refine": {"instructions": "c"}, "retrospect": {"instructions": "d"}}}"#;
        let manifest = Manifest::parse_str(json).unwrap();
        assert_eq!(manifest.phase(Phase::Retrospect).unwrap().instructions, "d");
    }

    #[test]
    fn test_to_task() {
        let task = Manifest::parse_str(MANIFEST).unwrap().to_task();
        assert_eq!(task.id, "tokenizer");
        assert_eq!(task.title.as_deref(), Some("Streaming tokenizer"));
        assert_eq!(task.granularity, Some(0.6));
        assert_eq!(task.context["owner"], "lang-team");
        assert_eq!(task.context["priority"], "2");
    }

    #[test]
    fn test_missing_phase_rejected() {
        let text = MANIFEST.replace("  retrospect: { instructions: \"Note follow-ups\" }\n", "");
        assert!(matches!(
            Manifest::parse_str(&text),
            Err(ManifestError::MissingPhase(Phase::Retrospect))
        ));
    }

    #[test]
    fn test_empty_instructions_rejected() {
        let text = MANIFEST.replace("Pick one", " ");
        assert!(matches!(
            Manifest::parse_str(&text),
            Err(ManifestError::EmptyInstructions(Phase::Differentiate))
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            Manifest::parse_str("id: [unclosed"),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            Manifest::from_file("/nonexistent/manifest.yaml"),
            Err(ManifestError::Io { .. })
        ));
    }

    #[test]
    fn test_json_schema_lists_phases() {
        let schema = serde_json::to_value(Manifest::json_schema()).unwrap();
        let text = schema.to_string();
        assert!(text.contains("differentiate"));
        assert!(text.contains("instructions"));
    }
}
