//! Pairwise record matching.
//!
//! A match decision is an ordered table of rules. Each rule inspects a
//! [`Comparison`] and either decides (`Match` / `NoMatch`) or passes the
//! pair on to the next rule. A pair that passes every rule matches.

use std::sync::Arc;

use biblink_core::Record;
use tracing::{debug, trace};

use crate::metadata::{MetadataParser, MetadataRecord};
use crate::normalize::{author_match, edit_distance, normalize};

/// Largest tolerated title distance, in percent of the source title length.
pub const TITLE_DISTANCE_PERCENT: f64 = 10.0;
/// Largest tolerated author distance, in percent of the source author length.
pub const AUTHOR_DISTANCE_PERCENT: f64 = 20.0;
pub const MAX_PAGE_DIFFERENCE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    NoMatch,
    Continue,
}

/// Both sides of a candidate comparison with their normalized title and author.
pub struct Comparison<'a> {
    pub source: &'a Record,
    pub source_meta: &'a dyn MetadataRecord,
    pub candidate: &'a Record,
    pub candidate_meta: &'a dyn MetadataRecord,
    pub parser: &'a dyn MetadataParser,
    source_title: String,
    candidate_title: String,
    source_author: String,
    candidate_author: String,
}

impl<'a> Comparison<'a> {
    pub fn new(
        source: &'a Record,
        source_meta: &'a dyn MetadataRecord,
        candidate: &'a Record,
        candidate_meta: &'a dyn MetadataRecord,
        parser: &'a dyn MetadataParser,
    ) -> Self {
        Self {
            source,
            source_meta,
            candidate,
            candidate_meta,
            parser,
            source_title: normalize(source_meta.title()),
            candidate_title: normalize(candidate_meta.title()),
            source_author: normalize(source_meta.main_author()),
            candidate_author: normalize(candidate_meta.main_author()),
        }
    }
}

pub struct Rule {
    pub name: &'static str,
    pub check: fn(&Comparison<'_>) -> Verdict,
}

pub const RULES: &[Rule] = &[
    Rule { name: "access_restricted", check: access_restricted },
    Rule { name: "format", check: format },
    Rule { name: "isbn", check: isbn },
    Rule { name: "unique_id", check: unique_id },
    Rule { name: "issn", check: issn },
    Rule { name: "year", check: year },
    Rule { name: "pages", check: pages },
    Rule { name: "series", check: series },
    Rule { name: "title_present", check: title_present },
    Rule { name: "title_distance", check: title_distance },
    Rule { name: "author", check: author },
];

fn access_restricted(c: &Comparison<'_>) -> Verdict {
    if c.candidate_meta.access_restricted() {
        Verdict::NoMatch
    } else {
        Verdict::Continue
    }
}

fn format(c: &Comparison<'_>) -> Verdict {
    let source_format = c.source_meta.format();
    let candidate_format = c.candidate_meta.format();
    if source_format != candidate_format
        && c.parser.map_format(&c.source.source_id, source_format)
            != c.parser.map_format(&c.candidate.source_id, candidate_format)
    {
        return Verdict::NoMatch;
    }
    Verdict::Continue
}

fn isbn(c: &Comparison<'_>) -> Verdict {
    if c.source_meta.isbns().intersection(c.candidate_meta.isbns()).next().is_some() {
        Verdict::Match
    } else {
        Verdict::Continue
    }
}

fn unique_id(c: &Comparison<'_>) -> Verdict {
    if c.source_meta
        .unique_ids()
        .intersection(c.candidate_meta.unique_ids())
        .next()
        .is_some()
    {
        Verdict::Match
    } else {
        Verdict::Continue
    }
}

fn issn(c: &Comparison<'_>) -> Verdict {
    let source = c.source_meta.issns();
    let candidate = c.candidate_meta.issns();
    if !source.is_empty() && !candidate.is_empty() && source.is_disjoint(candidate) {
        return Verdict::NoMatch;
    }
    Verdict::Continue
}

fn year(c: &Comparison<'_>) -> Verdict {
    match (c.source_meta.publication_year(), c.candidate_meta.publication_year()) {
        (Some(a), Some(b)) if a != b => Verdict::NoMatch,
        _ => Verdict::Continue,
    }
}

fn pages(c: &Comparison<'_>) -> Verdict {
    match (c.source_meta.page_count(), c.candidate_meta.page_count()) {
        (Some(a), Some(b)) if a.abs_diff(b) > MAX_PAGE_DIFFERENCE => Verdict::NoMatch,
        _ => Verdict::Continue,
    }
}

fn series(c: &Comparison<'_>) -> Verdict {
    if c.source_meta.series_issn() != c.candidate_meta.series_issn()
        || c.source_meta.series_numbering() != c.candidate_meta.series_numbering()
    {
        return Verdict::NoMatch;
    }
    Verdict::Continue
}

fn title_present(c: &Comparison<'_>) -> Verdict {
    if c.source_title.is_empty() || c.candidate_title.is_empty() {
        Verdict::NoMatch
    } else {
        Verdict::Continue
    }
}

/// Percentage is relative to the source title's length in characters, so the
/// rule is not symmetric.
fn title_distance(c: &Comparison<'_>) -> Verdict {
    let distance = edit_distance(&c.source_title, &c.candidate_title);
    let percent = distance as f64 / c.source_title.chars().count() as f64 * 100.0;
    if percent >= TITLE_DISTANCE_PERCENT {
        trace!(percent, source = %c.source_title, candidate = %c.candidate_title, "title distance too large");
        return Verdict::NoMatch;
    }
    Verdict::Continue
}

fn author(c: &Comparison<'_>) -> Verdict {
    let source = &c.source_author;
    let candidate = &c.candidate_author;
    if source.is_empty() && candidate.is_empty() {
        return Verdict::Continue;
    }
    if source.is_empty() || candidate.is_empty() {
        return Verdict::NoMatch;
    }
    if author_match(source, candidate) {
        return Verdict::Continue;
    }

    let distance = edit_distance(source, candidate);
    let percent = distance as f64 / source.chars().count() as f64 * 100.0;
    if percent > AUTHOR_DISTANCE_PERCENT {
        trace!(percent, %source, %candidate, "author distance too large");
        return Verdict::NoMatch;
    }
    Verdict::Continue
}

/// Runs the rule table. Returns the decision and the name of the deciding
/// rule, or `None` when every rule passed.
pub fn evaluate(comparison: &Comparison<'_>) -> (bool, Option<&'static str>) {
    for rule in RULES {
        match (rule.check)(comparison) {
            Verdict::Continue => continue,
            Verdict::Match => return (true, Some(rule.name)),
            Verdict::NoMatch => return (false, Some(rule.name)),
        }
    }
    (true, None)
}

/// Decides whether two records describe the same work.
#[derive(Clone)]
pub struct MatchScorer {
    parser: Arc<dyn MetadataParser>,
}

impl MatchScorer {
    pub fn new(parser: Arc<dyn MetadataParser>) -> Self {
        Self { parser }
    }

    pub fn parser(&self) -> &dyn MetadataParser {
        self.parser.as_ref()
    }

    /// Compares the parsed `source` with the raw `candidate`. A candidate whose
    /// payload cannot be parsed never matches.
    pub fn is_match(
        &self,
        source: &Record,
        source_meta: &dyn MetadataRecord,
        candidate: &Record,
    ) -> bool {
        let candidate_meta = match self.parser.parse_record(candidate) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(candidate = %candidate.id, error = %e, "candidate payload could not be parsed");
                return false;
            }
        };

        let comparison = Comparison::new(
            source,
            source_meta,
            candidate,
            candidate_meta.as_ref(),
            self.parser.as_ref(),
        );
        let (matched, rule) = evaluate(&comparison);
        trace!(
            source = %source.id,
            candidate = %candidate.id,
            matched,
            rule = rule.unwrap_or("all"),
            source_title = source_meta.full_title(),
            candidate_title = candidate_meta.full_title(),
            "compared records"
        );
        matched
    }
}
