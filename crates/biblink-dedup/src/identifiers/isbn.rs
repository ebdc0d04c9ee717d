use crate::error::{DedupError, Result};
use serde::{Deserialize, Serialize};

/// A validated ISBN, always available in its ISBN-13 form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Isbn {
    pub raw: String,
    pub isbn13: String,
}

/// Keeps the leading identifier part of a catalogue value such as
/// `ISBN 951-0-12345-6 (nid.)` and drops separators.
fn strip_isbn(input: &str) -> String {
    let trimmed = input.trim();
    let body = match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("isbn") => trimmed[4..].trim_start_matches([':', ' ']),
        _ => trimmed,
    };

    body.chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '-' | ' ' | 'x' | 'X'))
        .filter(|c| !matches!(c, '-' | ' '))
        .collect::<String>()
        .to_ascii_uppercase()
}

fn isbn13_check_digit(first12: &[u8]) -> u8 {
    let sum: u32 = first12
        .iter()
        .enumerate()
        .map(|(i, &d)| if i % 2 == 0 { d as u32 } else { d as u32 * 3 })
        .sum();
    ((10 - (sum % 10)) % 10) as u8
}

fn isbn10_is_valid(digits: &[u8]) -> bool {
    // digits[9] may be 10 (X)
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, &d)| (10 - i as u32) * d as u32)
        .sum();
    sum % 11 == 0
}

fn digits_to_string(digits: &[u8]) -> String {
    digits.iter().map(|d| char::from(b'0' + d)).collect()
}

impl Isbn {
    pub fn parse(input: &str) -> Result<Self> {
        let stripped = strip_isbn(input);
        let invalid = || DedupError::InvalidIsbn(input.to_string());

        match stripped.len() {
            13 => {
                let digits = stripped
                    .bytes()
                    .map(|b| b.is_ascii_digit().then(|| b - b'0'))
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(invalid)?;
                if isbn13_check_digit(&digits[..12]) != digits[12] {
                    return Err(invalid());
                }
                Ok(Self {
                    raw: input.to_string(),
                    isbn13: stripped,
                })
            }
            10 => {
                let mut digits = Vec::with_capacity(10);
                for (i, b) in stripped.bytes().enumerate() {
                    match b {
                        b'X' if i == 9 => digits.push(10),
                        b'0'..=b'9' => digits.push(b - b'0'),
                        _ => return Err(invalid()),
                    }
                }
                if !isbn10_is_valid(&digits) {
                    return Err(invalid());
                }
                let mut d13 = vec![9, 7, 8];
                d13.extend_from_slice(&digits[..9]);
                d13.push(isbn13_check_digit(&d13));
                Ok(Self {
                    raw: input.to_string(),
                    isbn13: digits_to_string(&d13),
                })
            }
            _ => Err(invalid()),
        }
    }

    /// ISBN-13 form of `input`, or `None` when it is not a valid ISBN.
    pub fn canonical(input: &str) -> Option<String> {
        Self::parse(input).ok().map(|isbn| isbn.isbn13)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_isbn13() {
        let isbn = Isbn::parse("9780306406157").unwrap();
        assert_eq!(isbn.isbn13, "9780306406157");
        assert_eq!(isbn.raw, "9780306406157");
    }

    #[test]
    fn isbn13_with_hyphens_and_prefix() {
        let isbn = Isbn::parse("ISBN 978-0-306-40615-7").unwrap();
        assert_eq!(isbn.isbn13, "9780306406157");
    }

    #[test]
    fn valid_isbn10_converts_to_13() {
        let isbn = Isbn::parse("0306406152").unwrap();
        assert_eq!(isbn.isbn13, "9780306406157");
    }

    #[test]
    fn isbn10_with_x_check() {
        let isbn = Isbn::parse("007462542x").unwrap();
        assert_eq!(isbn.isbn13, "9780074625422");
    }

    #[test]
    fn trailing_qualifier_is_ignored() {
        assert_eq!(
            Isbn::canonical("951-0-11369-7 (sid.)").as_deref(),
            Some("9789510113691")
        );
    }

    #[test]
    fn invalid_check_digit() {
        assert!(Isbn::parse("9780306406158").is_err());
        assert!(Isbn::parse("0306406153").is_err());
        assert!(Isbn::canonical("not an isbn").is_none());
    }

    #[test]
    fn isbn13_979_prefix_is_kept() {
        assert_eq!(
            Isbn::canonical("979-10-323-0569-0").as_deref(),
            Some("9791032305690")
        );
    }
}
