// Types for work-unit manifest parsing

use crate::utils::slugify;
use serde::{Deserialize, Serialize};

/// Represents a parsed work-unit manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub title: String,
    pub description: Option<String>,
    pub phases: Vec<ManifestPhase>,
}

/// Represents one planned phase from a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPhase {
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub depends_on: Vec<String>,
    /// Declared resource footprint: paths this phase will touch
    pub files: Vec<String>,
    pub conflict_risk: Option<String>,
    pub effort: Option<String>,
}

impl ManifestPhase {
    pub fn new(title: String, description: String) -> Self {
        Self {
            id: None,
            title,
            description,
            depends_on: Vec::new(),
            files: Vec::new(),
            conflict_risk: None,
            effort: None,
        }
    }

    pub fn with_id(mut self, id: String) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_conflict_risk(mut self, risk: String) -> Self {
        self.conflict_risk = Some(risk);
        self
    }

    pub fn with_effort(mut self, effort: String) -> Self {
        self.effort = Some(effort);
        self
    }

    /// The identity used by `depends_on` references: the declared id, or the
    /// slugified title when none was declared.
    pub fn resolved_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| slugify(&self.title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_id_prefers_declared() {
        let phase = ManifestPhase::new("Build API".to_string(), String::new())
            .with_id("api".to_string());
        assert_eq!(phase.resolved_id(), "api");
    }

    #[test]
    fn test_resolved_id_falls_back_to_slug() {
        let phase = ManifestPhase::new("Build API layer".to_string(), String::new());
        assert_eq!(phase.resolved_id(), "build-api-layer");
    }

    #[test]
    fn test_builder_methods() {
        let phase = ManifestPhase::new("T".to_string(), "d".to_string())
            .with_depends_on(vec!["a".to_string()])
            .with_files(vec!["src/lib.rs".to_string()])
            .with_conflict_risk("high".to_string())
            .with_effort("small".to_string());

        assert_eq!(phase.depends_on, vec!["a"]);
        assert_eq!(phase.files, vec!["src/lib.rs"]);
        assert_eq!(phase.conflict_risk.as_deref(), Some("high"));
        assert_eq!(phase.effort.as_deref(), Some("small"));
    }
}
