mod json;

pub use json::{JsonMetadataParser, JsonMetadataRecord};

use std::collections::BTreeSet;

use biblink_core::Record;

use crate::error::Result;

/// Where a payload was harvested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo<'a> {
    pub source_id: &'a str,
    pub oai_id: Option<&'a str>,
}

impl<'a> SourceInfo<'a> {
    pub fn of(record: &'a Record) -> Self {
        Self {
            source_id: &record.source_id,
            oai_id: record.oai_id.as_deref(),
        }
    }
}

/// Parsed view of a record payload, as seen by the matcher.
pub trait MetadataRecord: Send {
    fn title(&self) -> &str;
    /// Title with its subtitle parts, shown in match diagnostics.
    fn full_title(&self) -> &str;
    fn main_author(&self) -> &str;

    /// Canonical ISBN-13 values.
    fn isbns(&self) -> &BTreeSet<String>;
    fn issns(&self) -> &BTreeSet<String>;
    fn unique_ids(&self) -> &BTreeSet<String>;

    fn format(&self) -> &str;
    fn publication_year(&self) -> Option<i32>;
    fn page_count(&self) -> Option<u32>;
    fn series_issn(&self) -> Option<&str>;
    fn series_numbering(&self) -> Option<&str>;
    fn access_restricted(&self) -> bool;
}

/// Turns stored payloads into [`MetadataRecord`]s and maps formats per source.
pub trait MetadataParser: Send + Sync {
    fn parse(
        &self,
        format: &str,
        payload: &str,
        source: SourceInfo<'_>,
    ) -> Result<Box<dyn MetadataRecord>>;

    /// Format used for comparisons; unmapped formats map to themselves.
    fn map_format(&self, source_id: &str, format: &str) -> String;

    fn parse_record(&self, record: &Record) -> Result<Box<dyn MetadataRecord>> {
        self.parse(&record.format, &record.payload, SourceInfo::of(record))
    }
}
