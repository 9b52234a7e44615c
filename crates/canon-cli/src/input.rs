//! Reading extraction batches from disk.
//!
//! A `.jsonl` file holds one batch per line. Any other file holds either a
//! single batch object or an array of them.

use std::path::Path;

use anyhow::{Context, Result};

use canon_core::types::ExtractionBatch;

/// Parse every batch in `path`.
pub fn read_batches(path: &Path) -> Result<Vec<ExtractionBatch>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_jsonl = path.extension().and_then(|e| e.to_str()) == Some("jsonl");
    if is_jsonl {
        parse_lines(&content).with_context(|| format!("invalid batch in {}", path.display()))
    } else {
        parse_document(&content).with_context(|| format!("invalid batch in {}", path.display()))
    }
}

fn parse_document(content: &str) -> Result<Vec<ExtractionBatch>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if value.is_array() {
        Ok(serde_json::from_value(value)?)
    } else {
        Ok(vec![serde_json::from_value(value)?])
    }
}

fn parse_lines(content: &str) -> Result<Vec<ExtractionBatch>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}", i + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_with(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_single_batch_with_aliases() {
        let file = file_with(
            ".json",
            r#"{
                "document_id": "doc-1",
                "entities": [{"name": "Alice", "type": "person"}],
                "relations": [{"source": "Alice", "relationship_type": "works_at", "target": "Acme"}]
            }"#,
        );
        let batches = read_batches(file.path()).unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].document_id.as_deref(), Some("doc-1"));
        assert_eq!(batches[0].entities[0].entity_type, "person");
        assert_eq!(batches[0].relations[0].predicate, "works_at");
    }

    #[test]
    fn test_array_of_batches() {
        let file = file_with(
            ".json",
            r#"[{"entities": [{"name": "A", "type": "t"}]}, {"document_id": "d"}]"#,
        );
        let batches = read_batches(file.path()).unwrap();

        assert_eq!(batches.len(), 2);
        assert!(batches[1].entities.is_empty());
    }

    #[test]
    fn test_json_lines_skip_blank_lines() {
        let file = file_with(
            ".jsonl",
            "{\"document_id\": \"a\"}\n\n{\"document_id\": \"b\"}\n",
        );
        let batches = read_batches(file.path()).unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].document_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_bad_line_is_reported() {
        let file = file_with(".jsonl", "{\"document_id\": \"a\"}\nnot json\n");
        let err = read_batches(file.path()).unwrap_err();

        assert!(format!("{:#}", err).contains("line 2"));
    }
}
