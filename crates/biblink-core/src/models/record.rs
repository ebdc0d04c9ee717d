use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DedupId;

/// A candidate key column. Variants are listed in search priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    Isbn,
    Id,
    Title,
}

impl KeyField {
    /// Order in which candidate searches walk the key types.
    pub const SEARCH_ORDER: [KeyField; 3] = [KeyField::Isbn, KeyField::Id, KeyField::Title];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyField::Isbn => "isbn_keys",
            KeyField::Id => "id_keys",
            KeyField::Title => "title_keys",
        }
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isbn_keys" => Ok(KeyField::Isbn),
            "id_keys" => Ok(KeyField::Id),
            "title_keys" => Ok(KeyField::Title),
            other => Err(format!("unknown key field: {other}")),
        }
    }
}

/// A bibliographic metadata record as held by the record store.
///
/// The payload is opaque here; the dedup engine parses it on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub source_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oai_id: Option<String>,

    pub format: String,

    #[serde(default)]
    pub deleted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_id: Option<DedupId>,

    #[serde(default)]
    pub update_needed: bool,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub title_keys: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub isbn_keys: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub id_keys: BTreeSet<String>,

    /// Set iff this record is a component part of another record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_record_id: Option<String>,

    /// Shared by a host record and its own component parts within one source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linking_id: Option<String>,

    #[serde(default)]
    pub payload: String,

    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        format: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source_id: source_id.into(),
            oai_id: None,
            format: format.into(),
            deleted: false,
            dedup_id: None,
            update_needed: false,
            title_keys: BTreeSet::new(),
            isbn_keys: BTreeSet::new(),
            id_keys: BTreeSet::new(),
            host_record_id: None,
            linking_id: None,
            payload: payload.into(),
            created: now,
            updated: now,
        }
    }

    pub fn with_linking_id(mut self, linking_id: impl Into<String>) -> Self {
        self.linking_id = Some(linking_id.into());
        self
    }

    pub fn with_host(mut self, host_record_id: impl Into<String>) -> Self {
        self.host_record_id = Some(host_record_id.into());
        self
    }

    pub fn is_component_part(&self) -> bool {
        self.host_record_id.is_some()
    }

    pub fn keys(&self, field: KeyField) -> &BTreeSet<String> {
        match field {
            KeyField::Isbn => &self.isbn_keys,
            KeyField::Id => &self.id_keys,
            KeyField::Title => &self.title_keys,
        }
    }

    pub fn keys_mut(&mut self, field: KeyField) -> &mut BTreeSet<String> {
        match field {
            KeyField::Isbn => &mut self.isbn_keys,
            KeyField::Id => &mut self.id_keys,
            KeyField::Title => &mut self.title_keys,
        }
    }

    pub fn has_any_keys(&self) -> bool {
        KeyField::SEARCH_ORDER
            .iter()
            .any(|field| !self.keys(*field).is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_field_round_trips_through_column_name() {
        for field in KeyField::SEARCH_ORDER {
            assert_eq!(field.as_str().parse::<KeyField>().unwrap(), field);
        }
        assert!("subject_keys".parse::<KeyField>().is_err());
    }

    #[test]
    fn test_search_order_puts_isbn_first_and_title_last() {
        assert_eq!(KeyField::SEARCH_ORDER[0], KeyField::Isbn);
        assert_eq!(KeyField::SEARCH_ORDER[2], KeyField::Title);
    }

    #[test]
    fn test_record_new_has_no_keys() {
        let mut record = Record::new("src1.1", "src1", "Book", "{}");
        assert!(!record.has_any_keys());
        assert!(!record.is_component_part());

        record.keys_mut(KeyField::Id).insert("(fi-nb)123".to_string());
        assert!(record.has_any_keys());
        assert!(record.keys(KeyField::Title).is_empty());
    }

    #[test]
    fn test_empty_key_sets_are_not_serialized() {
        let record = Record::new("src1.1", "src1", "Book", "{}").with_host("src1.host");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("title_keys").is_none());
        assert_eq!(json["host_record_id"], "src1.host");

        let back: Record = serde_json::from_value(json).unwrap();
        assert!(back.is_component_part());
        assert!(back.isbn_keys.is_empty());
    }
}
