//! Templated text file output
//!
//! Templates use `{{field}}` placeholders naming `ResolvedRecord` fields.
//! Absent optional fields render as empty strings. The file is replaced
//! atomically (temp file + rename) so readers never see a partial write.

use super::Sink;
use crate::error::SinkError;
use crate::types::ResolvedRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Field names accepted inside `{{ }}`
pub const TEMPLATE_FIELDS: &[&str] = &[
    "source_id",
    "artist",
    "title",
    "album",
    "release_year",
    "year",
    "cover_art_ref",
    "cover_art",
    "confidence",
    "provenance",
    "resolved_at",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// Parse a template, rejecting unclosed placeholders and unknown fields
pub fn validate_template(template: &str) -> Result<(), SinkError> {
    parse(template).map(|_| ())
}

fn parse(template: &str) -> Result<Vec<Segment>, SinkError> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| SinkError::Template(format!("unclosed placeholder in '{}'", template)))?;
        let name = after[..end].trim();
        if !TEMPLATE_FIELDS.contains(&name) {
            return Err(SinkError::Template(format!("unknown field '{}'", name)));
        }
        segments.push(Segment::Field(name.to_string()));
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

/// Writes the rendered template to a file on every record
pub struct TextFileSink {
    path: PathBuf,
    segments: Vec<Segment>,
}

impl TextFileSink {
    pub fn new(path: PathBuf, template: &str) -> Result<Self, SinkError> {
        Ok(Self {
            path,
            segments: parse(template)?,
        })
    }

    pub fn render(&self, record: &ResolvedRecord) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Field(name) => record.field(name).unwrap_or_default(),
            })
            .collect()
    }
}

#[async_trait]
impl Sink for TextFileSink {
    async fn accept(&self, record: &ResolvedRecord) -> Result<(), SinkError> {
        let rendered = self.render(record);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, rendered.as_bytes()).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), "Wrote now-playing text file");
        Ok(())
    }
}
