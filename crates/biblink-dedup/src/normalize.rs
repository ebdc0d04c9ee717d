//! Text normalization shared by key extraction and matching.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Longest prefix, in characters, that fuzzy comparisons look at.
pub const COMPARE_CHARS: usize = 255;

const TITLE_KEY_MAX_CHARS: usize = 30;
const TITLE_KEY_LONG_WORDS: usize = 2;
const LONG_WORD_CHARS: usize = 4;
const MIN_PREFIX_AUTHOR_CHARS: usize = 6;
const ID_SORT_PAD: usize = 20;

static DIGIT_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("valid digit run regex"));

/// Folds case, strips diacritics and punctuation, and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Builds the candidate key for a title.
///
/// Words of the normalized title are concatenated without separators until
/// more than two long words were taken or the key grew past 30 characters.
pub fn title_key(title: &str) -> String {
    let normalized = normalize(title);
    let mut key = String::new();
    let mut long_words = 0;

    for word in normalized.split(' ').filter(|w| !w.is_empty()) {
        key.push_str(word);
        if word.chars().count() > LONG_WORD_CHARS {
            long_words += 1;
        }
        if long_words > TITLE_KEY_LONG_WORDS || key.chars().count() > TITLE_KEY_MAX_CHARS {
            break;
        }
    }

    key
}

/// Tolerant comparison of two normalized author names.
///
/// Matches identical names, a long name that is a prefix of the other, and
/// names with the same surname whose remaining parts agree or are initials.
pub fn author_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if a.chars().count() < MIN_PREFIX_AUTHOR_CHARS || b.chars().count() < MIN_PREFIX_AUTHOR_CHARS
    {
        return false;
    }
    if a.starts_with(b) || b.starts_with(a) {
        return true;
    }

    let a_words: Vec<&str> = a.split_whitespace().collect();
    let b_words: Vec<&str> = b.split_whitespace().collect();
    let (Some((a_surname, a_rest)), Some((b_surname, b_rest))) =
        (a_words.split_first(), b_words.split_first())
    else {
        return false;
    };
    if a_surname != b_surname || a_rest.is_empty() || b_rest.is_empty() {
        return false;
    }

    a_rest
        .iter()
        .zip(b_rest.iter())
        .all(|(x, y)| x == y || is_initial_of(x, y) || is_initial_of(y, x))
}

fn is_initial_of(initial: &str, name: &str) -> bool {
    let mut chars = initial.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => name.starts_with(c),
        _ => false,
    }
}

/// Sort key that orders embedded numbers by value: digit runs are
/// zero-padded to 20 places.
pub fn id_sort_key(id: &str) -> Cow<'_, str> {
    DIGIT_RUN_RE.replace_all(id, |caps: &regex::Captures<'_>| {
        format!("{:0>width$}", &caps[0], width = ID_SORT_PAD)
    })
}

/// First `COMPARE_CHARS` characters of `text`.
pub fn truncate(text: &str) -> &str {
    match text.char_indices().nth(COMPARE_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Levenshtein distance between the truncated forms of both strings.
pub fn edit_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(truncate(a), truncate(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_case_accents_and_punctuation() {
        assert_eq!(normalize("  Seitsemän  veljestä: Romaani! "), "seitseman veljesta romaani");
        assert_eq!(normalize("Crème-Brûlée"), "creme brulee");
        assert_eq!(normalize("...!?"), "");
    }

    #[test]
    fn test_title_key_stops_after_third_long_word() {
        assert_eq!(
            title_key("The history of modern Finland and its neighbours"),
            "thehistoryofmodernfinland"
        );
    }

    #[test]
    fn test_title_key_stops_past_thirty_chars() {
        let key = title_key("Supercalifragilisticexpialidocious is a word");
        assert_eq!(key, "supercalifragilisticexpialidocious");
    }

    #[test]
    fn test_title_key_of_empty_title_is_empty() {
        assert_eq!(title_key(""), "");
        assert_eq!(title_key(" -- "), "");
    }

    #[test]
    fn test_author_match() {
        assert!(author_match("kivi aleksis", "kivi aleksis"));
        assert!(author_match("kivi aleksis", "kivi a"));
        assert!(author_match("kivi aleksis", "kivi aleksis 1834 1872"));
        assert!(!author_match("kivi aleksis", "kallas aino"));
        assert!(!author_match("kivi a", "kivi b"));
        assert!(!author_match("abc", "abcd"));
    }

    #[test]
    fn test_id_sort_key_orders_numbers_by_value() {
        let mut ids = vec!["src.10", "src.9", "src.100"];
        ids.sort_by(|a, b| id_sort_key(a).cmp(&id_sort_key(b)));
        assert_eq!(ids, vec!["src.9", "src.10", "src.100"]);
        assert_eq!(id_sort_key("a1"), format!("a{}1", "0".repeat(19)));
    }

    #[test]
    fn test_truncate_counts_characters() {
        let long = "ä".repeat(300);
        assert_eq!(truncate(&long).chars().count(), COMPARE_CHARS);
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn test_edit_distance_is_symmetric() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("sitting", "kitten"), 3);
    }
}
