//! Agents, roles and the agent arena.

use serde::{Deserialize, Serialize};

use crate::provider::{GenerateParams, ProviderError, SharedProvider};

/// Index of an agent in its [`AgentPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub usize);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// Role of an agent within a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    /// Coordinates the phase and breaks voting ties.
    Primus,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Member => write!(f, "member"),
            Self::Primus => write!(f, "primus"),
        }
    }
}

/// Static description of an agent: its name and expertise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    #[serde(default)]
    pub expertise: Vec<String>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, expertise: &[&str]) -> Self {
        Self {
            name: name.into(),
            expertise: expertise.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Number of (expertise, keyword) pairs where one contains the other.
    pub fn keyword_matches<'a, I>(&self, keywords: I) -> u32
    where
        I: IntoIterator<Item = &'a str> + Clone,
    {
        let mut matches = 0;
        for expertise in &self.expertise {
            let expertise = expertise.to_lowercase();
            for keyword in keywords.clone() {
                let keyword = keyword.to_lowercase();
                if expertise.contains(&keyword) || keyword.contains(&expertise) {
                    matches += 1;
                }
            }
        }
        matches
    }
}

/// Default team covering every phase.
pub fn default_profiles() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new("explorer", &["brainstorming", "research", "creativity"]),
        AgentProfile::new("analyst", &["analysis", "evaluation", "architecture"]),
        AgentProfile::new("implementer", &["implementation", "testing", "optimization"]),
        AgentProfile::new("reviewer", &["review", "reflection", "documentation"]),
    ]
}

/// A participant backed by an LLM provider.
pub struct Agent {
    pub id: AgentId,
    pub profile: AgentProfile,
    provider: SharedProvider,
}

impl Agent {
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    /// Ask the agent's model, framing the prompt with the agent's persona.
    pub async fn respond(&self, prompt: &str) -> Result<String, ProviderError> {
        let params = GenerateParams::default().with_system_prompt(format!(
            "You are {}, a member of a self-directed engineering team. Expertise: {}.",
            self.profile.name,
            if self.profile.expertise.is_empty() {
                "generalist".to_string()
            } else {
                self.profile.expertise.join(", ")
            }
        ));
        self.provider.generate(prompt, &params).await
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// Arena of agents addressed by [`AgentId`].
#[derive(Debug, Default)]
pub struct AgentPool {
    agents: Vec<Agent>,
}

impl AgentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool where every agent shares `provider`.
    pub fn from_profiles(profiles: Vec<AgentProfile>, provider: SharedProvider) -> Self {
        let mut pool = Self::new();
        for profile in profiles {
            pool.add(profile, provider.clone());
        }
        pool
    }

    pub fn add(&mut self, profile: AgentProfile, provider: SharedProvider) -> AgentId {
        let id = AgentId(self.agents.len());
        self.agents.push(Agent {
            id,
            profile,
            provider,
        });
        id
    }

    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }

    pub fn profiles(&self) -> Vec<AgentProfile> {
        self.agents.iter().map(|a| a.profile.clone()).collect()
    }

    pub fn name_of(&self, id: AgentId) -> String {
        self.get(id)
            .map(|a| a.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }
}
