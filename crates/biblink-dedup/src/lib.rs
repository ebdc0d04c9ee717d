//! Deduplication engine: candidate keys, record matching, dedup groups and component parts.

pub mod batch;
pub mod components;
pub mod consistency;
pub mod error;
pub mod groups;
pub mod handler;
pub mod identifiers;
pub mod keys;
pub mod locator;
pub mod matcher;
pub mod metadata;
pub mod normalize;
pub mod throttle;

pub use batch::{BatchOptions, BatchReport, run_dedup};
pub use components::ComponentReconciler;
pub use consistency::ConsistencyChecker;
pub use error::{DedupError, Result};
pub use groups::GroupManager;
pub use handler::DedupHandler;
pub use keys::{clear_candidate_keys, update_candidate_keys};
pub use locator::CandidateLocator;
pub use matcher::{MatchScorer, Verdict};
pub use metadata::{JsonMetadataParser, JsonMetadataRecord, MetadataParser, MetadataRecord};
pub use throttle::ThrottleCache;
