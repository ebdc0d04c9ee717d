mod stats;

pub use stats::StoreStatsQuery;
