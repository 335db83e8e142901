// Manifest parsing: turn a phase manifest into structured phase records

pub mod json;
pub mod markdown;
pub mod types;
pub mod yaml;

pub use types::{ManifestDocument, ManifestPhase};

use crate::error::SchedulerError;
use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::path::Path;

/// Supported manifest formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Json,
    Markdown,
}

impl ManifestFormat {
    /// Infer the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(ManifestFormat::Yaml),
            "json" => Some(ManifestFormat::Json),
            "md" | "markdown" => Some(ManifestFormat::Markdown),
            _ => None,
        }
    }
}

/// Parse manifest content in the given format
pub fn parse_manifest(content: &str, format: ManifestFormat) -> Result<ManifestDocument> {
    match format {
        ManifestFormat::Yaml => yaml::parse_yaml(content),
        ManifestFormat::Json => json::parse_json(content),
        ManifestFormat::Markdown => markdown::parse_markdown(content),
    }
}

/// Read and parse a manifest file, inferring the format from its extension
pub fn parse_manifest_file(path: &Path) -> Result<ManifestDocument> {
    let format = ManifestFormat::from_path(path)
        .ok_or_else(|| anyhow!("Unrecognized manifest extension: {}", path.display()))?;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;

    parse_manifest(&content, format)
}

/// Validate phase records before any scheduling happens.
///
/// A `depends_on` reference that does not resolve to another phase in the
/// same manifest makes the plan unschedulable, so it is fatal. Duplicate
/// ids would make references ambiguous and are fatal too.
pub fn validate_manifest(doc: &ManifestDocument) -> std::result::Result<(), SchedulerError> {
    let mut ids = HashSet::new();

    for phase in &doc.phases {
        let id = phase.resolved_id();
        if !ids.insert(id.clone()) {
            return Err(SchedulerError::DuplicateUnit(id));
        }
    }

    for phase in &doc.phases {
        for dep in &phase.depends_on {
            if !ids.contains(dep) {
                return Err(SchedulerError::DanglingDependency {
                    unit: phase.resolved_id(),
                    reference: dep.clone(),
                });
            }
        }
    }

    Ok(())
}
