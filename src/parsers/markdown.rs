// Markdown manifest parser

use super::types::{ManifestDocument, ManifestPhase};
use anyhow::Result;
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use regex::Regex;

/// Parse a work-unit manifest from Markdown format
///
/// Expected Markdown structure:
/// ```markdown
/// # Batch Title
///
/// Optional batch description
///
/// ## Phases
///
/// ### Phase Title [id: phase-1]
///
/// Phase description here.
///
/// - **Depends on:** phase-0
/// - **Files:** src/api.rs, src/models.rs
/// - **Conflict risk:** medium
/// - **Effort:** large
/// ```
pub fn parse_markdown(content: &str) -> Result<ManifestDocument> {
    let parser = Parser::new(content);
    let mut state = ParserState::new();

    for event in parser {
        match event {
            Event::Start(tag) => state.handle_start_tag(tag),
            Event::End(tag_end) => state.handle_end_tag(tag_end),
            Event::Text(text) => state.handle_text(&text),
            Event::Code(code) => state.handle_code(&code),
            _ => {}
        }
    }

    state.finalize()
}

#[derive(Debug)]
struct ParserState {
    title: Option<String>,
    description: String,
    phases: Vec<ManifestPhase>,
    current_heading_level: Option<u32>,
    current_heading_text: String,
    current_phase_title: Option<String>,
    current_phase_id: Option<String>,
    current_phase_description: String,
    current_metadata: PhaseMetadata,
    in_paragraph: bool,
    in_list: bool,
    current_list_item: String,
    found_phases_section: bool,
}

#[derive(Debug, Default)]
struct PhaseMetadata {
    depends_on: Vec<String>,
    files: Vec<String>,
    conflict_risk: Option<String>,
    effort: Option<String>,
}

impl ParserState {
    fn new() -> Self {
        Self {
            title: None,
            description: String::new(),
            phases: Vec::new(),
            current_heading_level: None,
            current_heading_text: String::new(),
            current_phase_title: None,
            current_phase_id: None,
            current_phase_description: String::new(),
            current_metadata: PhaseMetadata::default(),
            in_paragraph: false,
            in_list: false,
            current_list_item: String::new(),
            found_phases_section: false,
        }
    }

    fn handle_start_tag(&mut self, tag: Tag) {
        match tag {
            Tag::Heading { level, .. } => {
                self.save_current_phase();
                self.current_heading_level = Some(level as u32);
                self.current_heading_text.clear();
            }
            Tag::Paragraph => {
                self.in_paragraph = true;
            }
            Tag::List(_) => {
                self.in_list = true;
            }
            Tag::Item => {
                self.current_list_item.clear();
            }
            _ => {}
        }
    }

    fn handle_end_tag(&mut self, tag_end: TagEnd) {
        match tag_end {
            TagEnd::Heading(_) => {
                if let Some(level) = self.current_heading_level {
                    self.process_heading(level);
                }
                self.current_heading_level = None;
            }
            TagEnd::Paragraph => {
                self.in_paragraph = false;
            }
            TagEnd::List(_) => {
                self.in_list = false;
            }
            TagEnd::Item => {
                if self.in_list {
                    self.process_list_item();
                }
            }
            _ => {}
        }
    }

    fn handle_text(&mut self, text: &str) {
        if self.current_heading_level.is_some() {
            self.current_heading_text.push_str(text);
        } else if self.in_list {
            self.current_list_item.push_str(text);
        } else if self.in_paragraph {
            if self.current_phase_title.is_some() {
                if !self.current_phase_description.is_empty() {
                    self.current_phase_description.push(' ');
                }
                self.current_phase_description.push_str(text.trim());
            } else if self.title.is_some() && !self.found_phases_section {
                if !self.description.is_empty() {
                    self.description.push(' ');
                }
                self.description.push_str(text.trim());
            }
        }
    }

    fn handle_code(&mut self, code: &str) {
        if self.in_list {
            self.current_list_item.push_str(code);
        }
    }

    fn process_heading(&mut self, level: u32) {
        let text = self.current_heading_text.trim().to_string();

        if text.is_empty() {
            return;
        }

        match level {
            1 => {
                // H1 is the document title
                if self.title.is_none() {
                    self.title = Some(text);
                }
            }
            2 => {
                // H2 marks the phases section
                if text.eq_ignore_ascii_case("phases") || text.eq_ignore_ascii_case("units") {
                    self.found_phases_section = true;
                }
            }
            3 => {
                // H3 is a phase title when we are inside the phases section
                if self.found_phases_section {
                    self.save_current_phase();
                    let (title, id) = extract_id(&text);
                    self.current_phase_title = Some(title);
                    self.current_phase_id = id;
                }
            }
            _ => {}
        }
    }

    fn process_list_item(&mut self) {
        let item = self.current_list_item.trim();

        if item.is_empty() {
            return;
        }

        if let Some(deps) = extract_list_field(item, "depends on|dependencies") {
            self.current_metadata.depends_on = deps;
        } else if let Some(files) = extract_list_field(item, "files|paths") {
            self.current_metadata.files = files;
        } else if let Some(risk) = extract_scalar_field(item, "conflict risk") {
            self.current_metadata.conflict_risk = Some(risk);
        } else if let Some(effort) = extract_scalar_field(item, "effort|size") {
            self.current_metadata.effort = Some(effort);
        }
    }

    fn save_current_phase(&mut self) {
        if let Some(title) = self.current_phase_title.take() {
            let description = self.current_phase_description.trim().to_string();

            let mut phase = ManifestPhase::new(title, description);

            if let Some(id) = self.current_phase_id.take() {
                phase = phase.with_id(id);
            }

            if !self.current_metadata.depends_on.is_empty() {
                phase = phase.with_depends_on(std::mem::take(&mut self.current_metadata.depends_on));
            }

            if !self.current_metadata.files.is_empty() {
                phase = phase.with_files(std::mem::take(&mut self.current_metadata.files));
            }

            if let Some(risk) = self.current_metadata.conflict_risk.take() {
                phase = phase.with_conflict_risk(risk);
            }

            if let Some(effort) = self.current_metadata.effort.take() {
                phase = phase.with_effort(effort);
            }

            self.phases.push(phase);
            self.current_phase_description.clear();
            self.current_metadata = PhaseMetadata::default();
        }
    }

    fn finalize(mut self) -> Result<ManifestDocument> {
        self.save_current_phase();

        let title = self.title
            .unwrap_or_else(|| "Untitled batch".to_string());

        let description = if self.description.trim().is_empty() {
            None
        } else {
            Some(self.description.trim().to_string())
        };

        Ok(ManifestDocument {
            title,
            description,
            phases: self.phases,
        })
    }
}

/// Extract a declared id from heading text like "Phase Title [id: phase-1]"
fn extract_id(text: &str) -> (String, Option<String>) {
    let re = Regex::new(r"\[id:\s*([A-Za-z0-9_-]+)\]").unwrap();

    if let Some(cap) = re.captures(text) {
        let id = cap.get(1).map(|m| m.as_str().to_string());
        let title = re.replace(text, "").trim().to_string();
        (title, id)
    } else {
        (text.to_string(), None)
    }
}

/// Extract a comma-separated list field like "**Files:** a.rs, b.rs".
/// Bold markers are stripped by the markdown parser, so match with or without **.
fn extract_list_field(text: &str, names: &str) -> Option<Vec<String>> {
    let re = Regex::new(&format!(r"(?i)^(?:-\s*)?\*{{0,2}}(?:{}):\*{{0,2}}\s*(.+)", names)).unwrap();

    re.captures(text).map(|cap| {
        cap.get(1)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    })
}

/// Extract a single-value field like "**Effort:** large".
fn extract_scalar_field(text: &str, names: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?i)^(?:-\s*)?\*{{0,2}}(?:{}):\*{{0,2}}\s*(\S+)", names)).unwrap();

    re.captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_markdown() {
        let md = r#"# Test Batch

A test batch description.

## Phases

### Phase 1

First phase description.
"#;

        let doc = parse_markdown(md).unwrap();
        assert_eq!(doc.title, "Test Batch");
        assert_eq!(doc.description, Some("A test batch description.".to_string()));
        assert_eq!(doc.phases.len(), 1);
        assert_eq!(doc.phases[0].title, "Phase 1");
        assert_eq!(doc.phases[0].description, "First phase description.");
    }

    #[test]
    fn test_parse_markdown_with_id() {
        let md = r#"# Batch

## Phases

### Build API [id: api]

The API phase.
"#;

        let doc = parse_markdown(md).unwrap();
        assert_eq!(doc.phases[0].title, "Build API");
        assert_eq!(doc.phases[0].id.as_deref(), Some("api"));
    }

    #[test]
    fn test_parse_markdown_with_metadata() {
        let md = r#"# Batch

## Phases

### Phase 1

Description.

- **Depends on:** phase-0
- **Files:** src/api.rs, src/models.rs
- **Conflict risk:** medium
- **Effort:** large
"#;

        let doc = parse_markdown(md).unwrap();
        let phase = &doc.phases[0];
        assert_eq!(phase.depends_on, vec!["phase-0"]);
        assert_eq!(phase.files, vec!["src/api.rs", "src/models.rs"]);
        assert_eq!(phase.conflict_risk.as_deref(), Some("medium"));
        assert_eq!(phase.effort.as_deref(), Some("large"));
    }

    #[test]
    fn test_parse_markdown_multiple_phases() {
        let md = r#"# Batch

## Phases

### Phase 1

First.

### Phase 2

Second.

- **Depends on:** phase-1
"#;

        let doc = parse_markdown(md).unwrap();
        assert_eq!(doc.phases.len(), 2);
        assert!(doc.phases[0].depends_on.is_empty());
        assert_eq!(doc.phases[1].depends_on, vec!["phase-1"]);
    }

    #[test]
    fn test_headings_outside_phases_section_ignored() {
        let md = r#"# Batch

## Background

### Not a phase

Reference material.

## Phases

### Real Phase

Actual work.
"#;

        let doc = parse_markdown(md).unwrap();
        assert_eq!(doc.phases.len(), 1);
        assert_eq!(doc.phases[0].title, "Real Phase");
    }

    #[test]
    fn test_extract_id_helper() {
        let (title, id) = extract_id("Build API [id: api]");
        assert_eq!(title, "Build API");
        assert_eq!(id.as_deref(), Some("api"));

        let (title, id) = extract_id("No id here");
        assert_eq!(title, "No id here");
        assert!(id.is_none());
    }
}
