use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use super::{MetadataParser, MetadataRecord, SourceInfo};
use crate::error::{DedupError, Result};
use crate::identifiers::Isbn;

/// Pre-extracted bibliographic fields stored as a JSON object.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonPayload {
    title: String,
    full_title: Option<String>,
    main_author: String,
    isbns: Vec<String>,
    issns: Vec<String>,
    unique_ids: Vec<String>,
    format: Option<String>,
    year: Option<i32>,
    pages: Option<u32>,
    series_issn: Option<String>,
    series_numbering: Option<String>,
    access_restricted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonMetadataRecord {
    title: String,
    full_title: String,
    main_author: String,
    isbns: BTreeSet<String>,
    issns: BTreeSet<String>,
    unique_ids: BTreeSet<String>,
    format: String,
    year: Option<i32>,
    pages: Option<u32>,
    series_issn: Option<String>,
    series_numbering: Option<String>,
    access_restricted: bool,
}

fn normalize_issn(raw: &str) -> Option<String> {
    let issn: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();
    (!issn.is_empty()).then_some(issn)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl JsonMetadataRecord {
    pub fn from_json(format: &str, payload: &str) -> Result<Self> {
        let raw: JsonPayload = serde_json::from_str(payload)
            .map_err(|e| DedupError::Metadata(format!("invalid JSON payload: {e}")))?;

        Ok(Self {
            full_title: non_empty(raw.full_title).unwrap_or_else(|| raw.title.clone()),
            title: raw.title,
            main_author: raw.main_author,
            isbns: raw.isbns.iter().filter_map(|s| Isbn::canonical(s)).collect(),
            issns: raw.issns.iter().filter_map(|s| normalize_issn(s)).collect(),
            unique_ids: raw
                .unique_ids
                .iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
            format: non_empty(raw.format).unwrap_or_else(|| format.to_string()),
            year: raw.year,
            pages: raw.pages,
            series_issn: raw.series_issn.as_deref().and_then(normalize_issn),
            series_numbering: non_empty(raw.series_numbering),
            access_restricted: raw.access_restricted,
        })
    }
}

impl MetadataRecord for JsonMetadataRecord {
    fn title(&self) -> &str {
        &self.title
    }

    fn full_title(&self) -> &str {
        &self.full_title
    }

    fn main_author(&self) -> &str {
        &self.main_author
    }

    fn isbns(&self) -> &BTreeSet<String> {
        &self.isbns
    }

    fn issns(&self) -> &BTreeSet<String> {
        &self.issns
    }

    fn unique_ids(&self) -> &BTreeSet<String> {
        &self.unique_ids
    }

    fn format(&self) -> &str {
        &self.format
    }

    fn publication_year(&self) -> Option<i32> {
        self.year
    }

    fn page_count(&self) -> Option<u32> {
        self.pages
    }

    fn series_issn(&self) -> Option<&str> {
        self.series_issn.as_deref()
    }

    fn series_numbering(&self) -> Option<&str> {
        self.series_numbering.as_deref()
    }

    fn access_restricted(&self) -> bool {
        self.access_restricted
    }
}

/// Parser for JSON payloads with per-source format mapping tables.
#[derive(Debug, Clone, Default)]
pub struct JsonMetadataParser {
    format_mappings: BTreeMap<String, BTreeMap<String, String>>,
}

impl JsonMetadataParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format_mappings(
        mut self,
        mappings: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Self {
        self.format_mappings = mappings;
        self
    }
}

impl MetadataParser for JsonMetadataParser {
    fn parse(
        &self,
        format: &str,
        payload: &str,
        _source: SourceInfo<'_>,
    ) -> Result<Box<dyn MetadataRecord>> {
        Ok(Box::new(JsonMetadataRecord::from_json(format, payload)?))
    }

    fn map_format(&self, source_id: &str, format: &str) -> String {
        self.format_mappings
            .get(source_id)
            .and_then(|mapping| mapping.get(format))
            .cloned()
            .unwrap_or_else(|| format.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: SourceInfo<'static> = SourceInfo {
        source_id: "helka",
        oai_id: None,
    };

    #[test]
    fn test_parse_full_payload() {
        let payload = r#"{
            "title": "Seitsemän veljestä",
            "main_author": "Kivi, Aleksis",
            "isbns": ["951-0-11369-7", "bogus"],
            "issns": ["1234-567x"],
            "unique_ids": [" (FI-MELINDA)123 ", ""],
            "year": 1870,
            "pages": 320,
            "series_issn": "0355-0087",
            "series_numbering": " 12 "
        }"#;
        let record = JsonMetadataParser::new().parse("Book", payload, SOURCE).unwrap();

        assert_eq!(record.title(), "Seitsemän veljestä");
        assert_eq!(record.full_title(), "Seitsemän veljestä");
        assert_eq!(record.format(), "Book");
        assert_eq!(
            record.isbns().iter().collect::<Vec<_>>(),
            vec!["9789510113691"]
        );
        assert!(record.issns().contains("1234567X"));
        assert_eq!(
            record.unique_ids().iter().collect::<Vec<_>>(),
            vec!["(FI-MELINDA)123"]
        );
        assert_eq!(record.publication_year(), Some(1870));
        assert_eq!(record.page_count(), Some(320));
        assert_eq!(record.series_issn(), Some("03550087"));
        assert_eq!(record.series_numbering(), Some("12"));
        assert!(!record.access_restricted());
    }

    #[test]
    fn test_payload_format_overrides_record_format() {
        let record = JsonMetadataRecord::from_json("Book", r#"{"format": "eBook"}"#).unwrap();
        assert_eq!(record.format(), "eBook");
    }

    #[test]
    fn test_invalid_payload_is_metadata_error() {
        let err = JsonMetadataParser::new().parse("Book", "not json", SOURCE);
        assert!(matches!(err, Err(DedupError::Metadata(_))));
    }

    #[test]
    fn test_map_format() {
        let parser = JsonMetadataParser::new().with_format_mappings(BTreeMap::from([(
            "helka".to_string(),
            BTreeMap::from([("BookSection".to_string(), "Book".to_string())]),
        )]));

        assert_eq!(parser.map_format("helka", "BookSection"), "Book");
        assert_eq!(parser.map_format("helka", "Journal"), "Journal");
        assert_eq!(parser.map_format("other", "BookSection"), "BookSection");
    }
}
