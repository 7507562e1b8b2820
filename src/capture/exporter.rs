// src/capture/exporter.rs
//! Export assembled records
//!
//! Supports:
//! - HAR (full document with caller-supplied wrapper metadata)
//! - JSON (bare entry list, for piping into other tools)

use crate::capture::har::HarDocument;
use crate::utils::errors::{EngineError, Result};
use std::io::Write;
use tracing::debug;

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// HAR 1.2 document
    Har,

    /// Entries only, as a JSON array
    Json,
}

/// Serializer for assembled documents
pub struct Exporter {
    format: ExportFormat,
    pretty: bool,
}

impl Exporter {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            pretty: true,
        }
    }

    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    /// Export a document to a string
    pub fn export(&self, document: &HarDocument) -> Result<String> {
        let mut buf = Vec::new();
        self.export_to(document, &mut buf)?;
        String::from_utf8(buf).map_err(|e| EngineError::ExportFailed(format!("Invalid UTF-8: {}", e)))
    }

    /// Export a document into `writer`
    pub fn export_to<W: Write>(&self, document: &HarDocument, writer: W) -> Result<()> {
        debug!(
            "Exporting {} entries as {:?}",
            document.log.entries.len(),
            self.format
        );

        let written = match (self.format, self.pretty) {
            (ExportFormat::Har, true) => serde_json::to_writer_pretty(writer, document),
            (ExportFormat::Har, false) => serde_json::to_writer(writer, document),
            (ExportFormat::Json, true) => serde_json::to_writer_pretty(writer, &document.log.entries),
            (ExportFormat::Json, false) => serde_json::to_writer(writer, &document.log.entries),
        };

        written.map_err(|e| EngineError::ExportFailed(format!("{:?} serialization error: {}", self.format, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::har::HarCreator;

    fn document() -> HarDocument {
        HarDocument::new(HarCreator::new("Harvest", "0.1.0"), None, Vec::new())
    }

    #[test]
    fn test_har_export() {
        let har = Exporter::new(ExportFormat::Har).export(&document()).unwrap();
        assert!(har.contains("\"creator\""));
        assert!(har.contains("Harvest"));
        assert!(har.contains('\n'));
        assert!(!har.contains("\"browser\""));
    }

    #[test]
    fn test_json_export_is_entry_list() {
        let json = Exporter::new(ExportFormat::Json)
            .compact()
            .export(&document())
            .unwrap();
        assert_eq!(json, "[]");
    }
}
