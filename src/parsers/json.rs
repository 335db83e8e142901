// JSON manifest parser

use super::types::{ManifestDocument, ManifestPhase};
use anyhow::{Context, Result};
use serde_json::Value;

/// Parse a work-unit manifest from JSON format
///
/// Expected JSON structure:
/// ```json
/// {
///   "title": "Batch Title",
///   "description": "Optional batch description",
///   "phases": [
///     {
///       "title": "Phase title",
///       "id": "phase-id",
///       "depends_on": ["other-phase"],
///       "files": ["src/api.rs"],
///       "conflict_risk": "medium",
///       "effort": "large"
///     }
///   ]
/// }
/// ```
pub fn parse_json(content: &str) -> Result<ManifestDocument> {
    let value: Value = serde_json::from_str(content)
        .context("Failed to parse JSON")?;

    let title = value.get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("Untitled batch")
        .to_string();

    let description = value.get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let phases = value.get("phases")
        .or_else(|| value.get("units"))
        .and_then(|v| v.as_array())
        .map(|arr| parse_phase_array(arr))
        .unwrap_or_else(Vec::new);

    Ok(ManifestDocument {
        title,
        description,
        phases,
    })
}

fn parse_phase_array(phases: &[Value]) -> Vec<ManifestPhase> {
    phases.iter()
        .filter_map(|phase| parse_phase(phase))
        .collect()
}

fn parse_phase(value: &Value) -> Option<ManifestPhase> {
    let title = value.get("title")?.as_str()?.to_string();
    let description = value.get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let id = value.get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let depends_on = string_array(value, "depends_on")
        .or_else(|| string_array(value, "dependsOn"))
        .or_else(|| string_array(value, "dependencies"))
        .unwrap_or_default();

    let files = string_array(value, "files")
        .or_else(|| string_array(value, "paths"))
        .unwrap_or_default();

    let conflict_risk = value.get("conflict_risk")
        .or_else(|| value.get("conflictRisk"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let effort = value.get("effort")
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

fn string_array(value: &Value, key: &str) -> Option<Vec<String>> {
    value.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_json() {
        let json = r#"{
            "title": "Test Batch",
            "phases": [
                {"title": "Phase 1", "description": "First phase"}
            ]
        }"#;

        let doc = parse_json(json).unwrap();
        assert_eq!(doc.title, "Test Batch");
        assert_eq!(doc.phases.len(), 1);
        assert_eq!(doc.phases[0].title, "Phase 1");
    }

    #[test]
    fn test_parse_json_with_all_fields() {
        let json = r#"{
            "title": "Complex Batch",
            "phases": [
                {
                    "title": "Phase 1",
                    "id": "phase-1",
                    "depends_on": ["phase-0"],
                    "files": ["src/api.rs"],
                    "conflict_risk": "low",
                    "effort": "medium"
                }
            ]
        }"#;

        let doc = parse_json(json).unwrap();
        let phase = &doc.phases[0];
        assert_eq!(phase.id.as_deref(), Some("phase-1"));
        assert_eq!(phase.depends_on, vec!["phase-0"]);
        assert_eq!(phase.files, vec!["src/api.rs"]);
        assert_eq!(phase.conflict_risk.as_deref(), Some("low"));
    }

    #[test]
    fn test_parse_json_camel_case_aliases() {
        let json = r#"{
            "title": "Aliases",
            "phases": [
                {"title": "Phase 1", "dependsOn": ["phase-0"]}
            ]
        }"#;

        let doc = parse_json(json).unwrap();
        assert_eq!(doc.phases[0].depends_on, vec!["phase-0"]);
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(parse_json("{not valid").is_err());
    }

    #[test]
    fn test_phase_without_title_is_skipped() {
        let json = r#"{
            "title": "Batch",
            "phases": [
                {"description": "no title here"},
                {"title": "Phase 1"}
            ]
        }"#;

        let doc = parse_json(json).unwrap();
        assert_eq!(doc.phases.len(), 1);
    }
}
