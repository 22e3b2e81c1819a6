//! String similarity strategies behind duplicate matching.
//!
//! Matching happens in two layers that must agree:
//! - a boolean *match predicate* (`strings_match`) used by match queries and
//!   rule conditions to decide whether two values match at all;
//! - a *similarity measure* (`Similarity`, selected by `measure_for`) that
//!   grades how alike two matched values are, in `0.0..=1.0`.
//!
//! All inputs are expected case-folded and trimmed (`FieldValue::fold_text`).

use serde::{Deserialize, Serialize};

/// How a rule condition compares two field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Case-folded equality.
    Exact,
    /// Substring containment in either direction, graded by edit distance.
    Fuzzy,
    /// Equal Soundex codes.
    Phonetic,
    /// Equal domain part of an email address.
    EmailDomain,
}

/// Grades two case-folded strings. Implementations are interchangeable and
/// selected per rule condition via [`measure_for`].
pub trait Similarity: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// 1.0 on equality, 0.0 otherwise.
pub struct ExactSimilarity;

impl Similarity for ExactSimilarity {
    fn score(&self, a: &str, b: &str) -> f64 {
        if a == b {
            1.0
        } else {
            0.0
        }
    }
}

/// 1 minus the normalized Levenshtein distance.
pub struct EditDistanceSimilarity;

impl Similarity for EditDistanceSimilarity {
    fn score(&self, a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(a, b).clamp(0.0, 1.0)
    }
}

/// 0.9 when the Soundex codes agree; phonetic equality is strong evidence
/// but never as strong as an exact match.
pub struct PhoneticSimilarity;

impl Similarity for PhoneticSimilarity {
    fn score(&self, a: &str, b: &str) -> f64 {
        let code_a = soundex(a);
        if !code_a.is_empty() && code_a == soundex(b) {
            0.9
        } else {
            0.0
        }
    }
}

/// 1.0 when both values carry the same email domain.
pub struct EmailDomainSimilarity;

impl Similarity for EmailDomainSimilarity {
    fn score(&self, a: &str, b: &str) -> f64 {
        match (email_domain(a), email_domain(b)) {
            (Some(da), Some(db)) if da == db => 1.0,
            _ => 0.0,
        }
    }
}

/// The measure a match type grades with.
pub fn measure_for(match_type: MatchType) -> &'static dyn Similarity {
    match match_type {
        MatchType::Exact => &ExactSimilarity,
        MatchType::Fuzzy => &EditDistanceSimilarity,
        MatchType::Phonetic => &PhoneticSimilarity,
        MatchType::EmailDomain => &EmailDomainSimilarity,
    }
}

/// The discovery predicate shared by `find_matching_records` and rule
/// condition evaluation. Symmetric in its arguments, so a pair scores the
/// same no matter which record was visited first.
pub fn strings_match(match_type: MatchType, a: &str, b: &str) -> bool {
    match match_type {
        MatchType::Exact => a == b,
        MatchType::Fuzzy => a.contains(b) || b.contains(a),
        MatchType::Phonetic => {
            let code_a = soundex(a);
            !code_a.is_empty() && code_a == soundex(b)
        }
        MatchType::EmailDomain => {
            matches!((email_domain(a), email_domain(b)), (Some(da), Some(db)) if da == db)
        }
    }
}

/// American Soundex: the first letter plus three digits, zero padded.
/// Returns an empty code when the input has no ASCII letter to anchor on.
pub fn soundex(input: &str) -> String {
    fn digit(c: char) -> Option<char> {
        match c {
            'b' | 'f' | 'p' | 'v' => Some('1'),
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
            'd' | 't' => Some('3'),
            'l' => Some('4'),
            'm' | 'n' => Some('5'),
            'r' => Some('6'),
            _ => None,
        }
    }

    let mut letters = input
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase());
    let first = match letters.next() {
        Some(c) => c,
        None => return String::new(),
    };

    let mut code = String::with_capacity(4);
    code.push(first.to_ascii_uppercase());
    let mut last_digit = digit(first);
    for c in letters {
        // h and w do not break a run of identical codes.
        if c == 'h' || c == 'w' {
            continue;
        }
        let d = digit(c);
        if let Some(d) = d {
            if Some(d) != last_digit {
                code.push(d);
                if code.len() == 4 {
                    break;
                }
            }
        }
        last_digit = d;
    }
    while code.len() < 4 {
        code.push('0');
    }
    code
}

/// Domain part of an email address, lowercased. `None` without an `@` or
/// with nothing after it.
pub fn email_domain(value: &str) -> Option<String> {
    let at = value.rfind('@')?;
    let domain = value[at + 1..].trim();
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_ascii_lowercase())
    }
}
