pub mod dedup_group;
pub mod record;

pub use dedup_group::*;
pub use record::*;
