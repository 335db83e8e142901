// YAML manifest parser

use super::types::{ManifestDocument, ManifestPhase};
use anyhow::{Context, Result};
use serde_yaml::Value;

/// Parse a work-unit manifest from YAML format
///
/// Expected YAML structure:
/// ```yaml
/// title: Batch Title
/// description: Optional batch description
/// phases:
///   - title: Phase title
///     id: phase-id
///     description: Phase description
///     depends_on:
///       - other-phase
///     files:
///       - src/api.rs
///     conflict_risk: medium
///     effort: large
/// ```
pub fn parse_yaml(content: &str) -> Result<ManifestDocument> {
    let value: Value = serde_yaml::from_str(content)
        .context("Failed to parse YAML")?;

    let title = value.get("title")
        .or_else(|| value.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("Untitled batch")
        .to_string();

    let description = value.get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let phases = value.get("phases")
        .or_else(|| value.get("units"))
        .and_then(|v| v.as_sequence())
        .map(|seq| parse_phase_sequence(seq))
        .unwrap_or_else(Vec::new);

    Ok(ManifestDocument {
        title,
        description,
        phases,
    })
}

fn parse_phase_sequence(phases: &[Value]) -> Vec<ManifestPhase> {
    phases.iter()
        .filter_map(|phase| parse_phase(phase))
        .collect()
}

fn parse_phase(value: &Value) -> Option<ManifestPhase> {
    let title = value.get("title")
        .or_else(|| value.get("name"))
        .and_then(|v| v.as_str())?
        .to_string();

    let description = value.get("description")
        .or_else(|| value.get("desc"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let id = value.get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let depends_on = value.get("depends_on")
        .or_else(|| value.get("dependencies"))
        .and_then(|v| v.as_sequence())
        .map(|seq| string_sequence(seq))
        .unwrap_or_default();

    let files = value.get("files")
        .or_else(|| value.get("paths"))
        .and_then(|v| v.as_sequence())
        .map(|seq| string_sequence(seq))
        .unwrap_or_default();

    let conflict_risk = value.get("conflict_risk")
        .or_else(|| value.get("conflictRisk"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let effort = value.get("effort")
        .or_else(|| value.get("size"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut phase = ManifestPhase::new(title, description);

    if let Some(id) = id {
        phase = phase.with_id(id);
    }

    if !depends_on.is_empty() {
        phase = phase.with_depends_on(depends_on);
    }

    if !files.is_empty() {
        phase = phase.with_files(files);
    }

    if let Some(risk) = conflict_risk {
        phase = phase.with_conflict_risk(risk);
    }

    if let Some(effort) = effort {
        phase = phase.with_effort(effort);
    }

    Some(phase)
}

fn string_sequence(seq: &[Value]) -> Vec<String> {
    seq.iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_yaml() {
        let yaml = r#"
title: Test Batch
description: A test batch
phases:
  - title: Phase 1
    description: First phase
"#;

        let result = parse_yaml(yaml);
        assert!(result.is_ok());

        let doc = result.unwrap();
        assert_eq!(doc.title, "Test Batch");
        assert_eq!(doc.description, Some("A test batch".to_string()));
        assert_eq!(doc.phases.len(), 1);
        assert_eq!(doc.phases[0].title, "Phase 1");
    }

    #[test]
    fn test_parse_yaml_with_all_fields() {
        let yaml = r#"
title: Complex Batch
phases:
  - title: Phase 1
    id: phase-1
    description: First phase
    depends_on:
      - phase-0
    files:
      - src/api.rs
      - src/models.rs
    conflict_risk: high
    effort: large
"#;

        let doc = parse_yaml(yaml).unwrap();
        assert_eq!(doc.phases.len(), 1);

        let phase = &doc.phases[0];
        assert_eq!(phase.id.as_deref(), Some("phase-1"));
        assert_eq!(phase.depends_on, vec!["phase-0"]);
        assert_eq!(phase.files, vec!["src/api.rs", "src/models.rs"]);
        assert_eq!(phase.conflict_risk.as_deref(), Some("high"));
        assert_eq!(phase.effort.as_deref(), Some("large"));
    }

    #[test]
    fn test_parse_yaml_alternative_field_names() {
        let yaml = r#"
name: Alternative Fields
units:
  - name: Phase 1
    desc: Using alternative field names
    dependencies:
      - phase-0
    paths:
      - docs/readme.md
    size: small
"#;

        let doc = parse_yaml(yaml).unwrap();
        assert_eq!(doc.title, "Alternative Fields");
        assert_eq!(doc.phases[0].title, "Phase 1");
        assert_eq!(doc.phases[0].description, "Using alternative field names");
        assert_eq!(doc.phases[0].depends_on, vec!["phase-0"]);
        assert_eq!(doc.phases[0].files, vec!["docs/readme.md"]);
        assert_eq!(doc.phases[0].effort.as_deref(), Some("small"));
    }

    #[test]
    fn test_parse_empty_phases() {
        let yaml = r#"
title: Empty Batch
phases: []
"#;

        let doc = parse_yaml(yaml).unwrap();
        assert_eq!(doc.phases.len(), 0);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let yaml = "title: Test\nphases:\n  - invalid: [";
        assert!(parse_yaml(yaml).is_err());
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let yaml = r#"
title: Minimal
phases:
  - title: Phase 1
"#;

        let doc = parse_yaml(yaml).unwrap();
        assert_eq!(doc.phases[0].description, "");
        assert!(doc.phases[0].depends_on.is_empty());
        assert!(doc.phases[0].files.is_empty());
    }
}
