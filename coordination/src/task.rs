//! Task: the unit of work a cycle operates on.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Error for malformed tasks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task description is empty")]
    EmptyDescription,

    #[error("task granularity {0} is outside 0.0..=1.0")]
    InvalidGranularity(String),
}

/// A unit of work. Shared immutably by every phase of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Free-form context passed to agents verbatim.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// How finely the task is scoped, 0.0 (trivial) to 1.0 (substantial).
    /// Follow-up tasks below the configured threshold are not expanded into
    /// micro-cycles.
    #[serde(default)]
    pub granularity: Option<f64>,
    /// Task this one was split from, for micro-cycle tasks.
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: None,
            description: description.into(),
            requirements: Vec::new(),
            constraints: Vec::new(),
            context: BTreeMap::new(),
            granularity: None,
            parent_id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.push(requirement.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_granularity(mut self, granularity: f64) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// Derive a follow-up task for a nested cycle.
    pub fn follow_up(&self, description: impl Into<String>) -> Self {
        let mut task = Task::new(description);
        task.parent_id = Some(self.id.clone());
        task.constraints = self.constraints.clone();
        task
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        if self.description.trim().is_empty() {
            return Err(TaskError::EmptyDescription);
        }
        if let Some(g) = self.granularity {
            if !(0.0..=1.0).contains(&g) {
                return Err(TaskError::InvalidGranularity(g.to_string()));
            }
        }
        Ok(())
    }

    /// Lower-cased content words (three letters or more) of the title,
    /// description and requirements.
    pub fn keywords(&self) -> BTreeSet<String> {
        let mut text = self.description.clone();
        if let Some(title) = &self.title {
            text.push(' ');
            text.push_str(title);
        }
        for requirement in &self.requirements {
            text.push(' ');
            text.push_str(requirement);
        }

        text.split(|c: char| !c.is_alphanumeric() && c != '-')
            .map(|w| w.trim_matches('-').to_lowercase())
            .filter(|w| w.chars().count() >= 3)
            .collect()
    }

    /// Human-readable summary used in prompts.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str(&format!("# {}\n\n", title));
        }
        out.push_str(&self.description);
        out.push('\n');
        if !self.requirements.is_empty() {
            out.push_str("\nRequirements:\n");
            for r in &self.requirements {
                out.push_str(&format!("- {}\n", r));
            }
        }
        if !self.constraints.is_empty() {
            out.push_str("\nConstraints:\n");
            for c in &self.constraints {
                out.push_str(&format!("- {}\n", c));
            }
        }
        if !self.context.is_empty() {
            out.push_str("\nContext:\n");
            for (k, v) in &self.context {
                out.push_str(&format!("- {}: {}\n", k, v));
            }
        }
        out
    }
}
