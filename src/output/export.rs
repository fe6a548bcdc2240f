//! Link export in CSV, JSON and plain text

use crate::output::{OutputError, OutputResult};
use crate::state::LinkStatus;
use crate::storage::{LinkRecord, Storage};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

/// Output format for [`export_links`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
    /// One URL per line
    Txt,
}

impl FromStr for ExportFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "txt" | "text" => Ok(ExportFormat::Txt),
            other => Err(OutputError::Format(other.to_string())),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Txt => "txt",
        };
        write!(f, "{}", name)
    }
}

/// One exported link row
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    url: &'a str,
    normalized_url: &'a str,
    status: String,
    extraction_method: String,
    extraction_confidence: f64,
    source_url: Option<&'a str>,
    session_id: Option<&'a str>,
    discovered_at: &'a str,
    validated_at: Option<&'a str>,
    http_status: Option<u16>,
    content_type: Option<&'a str>,
    content_length: Option<i64>,
    final_url: Option<&'a str>,
    duplicate_count: u32,
}

impl<'a> From<&'a LinkRecord> for ExportRow<'a> {
    fn from(link: &'a LinkRecord) -> Self {
        Self {
            url: &link.url,
            normalized_url: &link.normalized_url,
            status: link.status.to_string(),
            extraction_method: link.extraction_method.to_string(),
            extraction_confidence: link.extraction_confidence,
            source_url: link.source_url.as_deref(),
            session_id: link.session_id.as_deref(),
            discovered_at: &link.discovered_at,
            validated_at: link.validated_at.as_deref(),
            http_status: link.http_status,
            content_type: link.content_type.as_deref(),
            content_length: link.content_length,
            final_url: link.final_url.as_deref(),
            duplicate_count: link.duplicate_count,
        }
    }
}

/// Exports stored links to a file
///
/// # Arguments
///
/// * `storage` - The storage backend to read links from
/// * `path` - Destination file, created or truncated
/// * `format` - Output format
/// * `status` - Only export links in this status
/// * `limit` - Maximum number of links to export
///
/// # Returns
///
/// * `Ok(usize)` - Number of links written
/// * `Err(OutputError)` - Failed to read links or write the file
pub fn export_links(
    storage: &dyn Storage,
    path: &Path,
    format: ExportFormat,
    status: Option<LinkStatus>,
    limit: Option<usize>,
) -> OutputResult<usize> {
    let links = storage.get_links(status, limit)?;
    let file = File::create(path)
        .map_err(|e| OutputError::Write(format!("{}: {}", path.display(), e)))?;

    match format {
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(file);
            for link in &links {
                writer.serialize(ExportRow::from(link))?;
            }
            writer.flush()?;
        }
        ExportFormat::Json => {
            let rows: Vec<ExportRow<'_>> = links.iter().map(ExportRow::from).collect();
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &rows)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        ExportFormat::Txt => {
            let mut writer = BufWriter::new(file);
            for link in &links {
                writeln!(writer, "{}", link.url)?;
            }
            writer.flush()?;
        }
    }

    tracing::info!(
        "Exported {} links as {} to {}",
        links.len(),
        format,
        path.display()
    );
    Ok(links.len())
}
