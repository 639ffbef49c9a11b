//! Input checks shared by the adapters and the orchestrator: email format,
//! the suspicious local-part classifier, username shape, and phone parsing.

use phonenumber::country::Id as CountryId;
use phonenumber::{Mode, Type};
use regex::Regex;
use std::sync::LazyLock;

use crate::models::{PhoneLineType, SuspiciousPattern};

/// Local-parts longer than this are flagged.
pub const MAX_LOCAL_PART_LEN: usize = 30;
/// Local-parts shorter than this are flagged.
pub const MIN_LOCAL_PART_LEN: usize = 3;
/// Shannon entropy (bits per char) above which a local-part looks random.
pub const ENTROPY_THRESHOLD: f64 = 3.5;
/// The entropy rule is only meaningful on strings at least this long.
const ENTROPY_MIN_LEN: usize = 8;

const SEPARATORS: [char; 4] = ['.', '_', '-', '+'];

/// Words whose presence makes a high-entropy local-part look human-chosen.
const DICTIONARY_WORDS: &[&str] = &[
    "admin", "alex", "anna", "blue", "chris", "contact", "cool", "dan", "dark", "david",
    "dev", "doe", "dragon", "emma", "info", "jane", "john", "king", "lee", "love", "mail",
    "mark", "mary", "max", "mike", "news", "office", "paul", "rock", "sales", "sam", "shop",
    "smith", "star", "sun", "support", "team", "test", "user", "web", "work",
];

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // RFC 5322 simplified: local@domain.tld
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email regex is valid")
});

static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]{2,40}$").expect("username regex is valid"));

/// Validate email address format.
///
/// Checks for:
/// - Basic structure (contains @ and a dotted domain)
/// - Minimum length requirements
/// - Valid domain labels
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    if !EMAIL_REGEX.is_match(email) {
        tracing::debug!("Invalid email format: {}", email);
        return false;
    }

    true
}

/// Splits an email into `(local_part, domain)`, lower-casing the domain.
pub fn split_email(email: &str) -> Option<(&str, String)> {
    let (local, domain) = email.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some((local, domain.to_lowercase()))
}

/// Whether a string can be probed as a platform username.
pub fn is_valid_username(candidate: &str) -> bool {
    USERNAME_REGEX.is_match(candidate)
}

/// Shannon entropy of `s` in bits per character.
pub fn shannon_entropy(s: &str) -> f64 {
    let chars: Vec<char> = s.chars().collect();
    if chars.is_empty() {
        return 0.0;
    }

    let mut counts = std::collections::BTreeMap::new();
    for c in &chars {
        *counts.entry(*c).or_insert(0usize) += 1;
    }

    let len = chars.len() as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn contains_dictionary_word(s: &str) -> bool {
    let lower = s.to_lowercase();
    DICTIONARY_WORDS.iter().any(|w| lower.contains(w))
}

/// Classifies an email local-part.
///
/// Flags, in this order: two or more consecutive separators, all digits,
/// longer than 30 chars, shorter than 3 chars, and high entropy with no
/// recognizable dictionary word. An empty result means nothing suspicious.
pub fn analyze_local_part(local: &str) -> Vec<SuspiciousPattern> {
    let mut patterns = Vec::new();
    let len = local.chars().count();

    let has_consecutive_separators = local
        .chars()
        .zip(local.chars().skip(1))
        .any(|(a, b)| SEPARATORS.contains(&a) && SEPARATORS.contains(&b));
    if has_consecutive_separators {
        patterns.push(SuspiciousPattern::ConsecutiveSeparators);
    }

    if len > 0 && local.chars().all(|c| c.is_ascii_digit()) {
        patterns.push(SuspiciousPattern::AllDigits);
    }

    if len > MAX_LOCAL_PART_LEN {
        patterns.push(SuspiciousPattern::TooLong);
    }

    if len < MIN_LOCAL_PART_LEN {
        patterns.push(SuspiciousPattern::TooShort);
    }

    if len >= ENTROPY_MIN_LEN
        && shannon_entropy(local) > ENTROPY_THRESHOLD
        && !contains_dictionary_word(local)
    {
        patterns.push(SuspiciousPattern::HighEntropy);
    }

    patterns
}

/// A phone number that parsed and validated against the numbering plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPhone {
    pub e164: String,
    pub country_code: u16,
    pub national_number: String,
    pub region: Option<String>,
    pub line_type: PhoneLineType,
}

/// Why a phone number could not be used, with a hint for fixing it.
#[derive(Debug, Clone, PartialEq)]
pub struct PhoneRejection {
    pub reason: String,
    pub suggestion: Option<String>,
}

pub fn parse_region(code: &str) -> Option<CountryId> {
    code.trim().to_uppercase().parse::<CountryId>().ok()
}

fn line_type_of(number_type: Type) -> PhoneLineType {
    match number_type {
        Type::Mobile | Type::FixedLineOrMobile => PhoneLineType::Mobile,
        Type::FixedLine => PhoneLineType::Landline,
        Type::Voip => PhoneLineType::Voip,
        Type::TollFree => PhoneLineType::TollFree,
        Type::PremiumRate => PhoneLineType::Premium,
        _ => PhoneLineType::Unknown,
    }
}

fn suggest_correction(raw: &str, digits: &str) -> Option<String> {
    if digits.is_empty() {
        return Some("Provide a phone number containing digits".to_string());
    }
    if digits.len() < 7 {
        return Some("Number is too short; include the area code".to_string());
    }
    if digits.len() > 15 {
        return Some("Number is too long; E.164 numbers have at most 15 digits".to_string());
    }
    if !raw.trim_start().starts_with('+') {
        return Some(format!(
            "Include the country code in international format, e.g. +{}",
            digits
        ));
    }
    Some("Check the digit count for the number's country".to_string())
}

/// Parse and validate a phone number.
///
/// Uses the phonenumber library (port of Google's libphonenumber) to:
/// - Parse with `default_region` when the number has no leading `+`
/// - Validate against the region's numbering plan
/// - Return E.164 form and a line-type classification
pub fn parse_phone(raw: &str, default_region: Option<CountryId>) -> Result<ParsedPhone, PhoneRejection> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if raw.trim().is_empty() || digits.len() < 4 {
        return Err(PhoneRejection {
            reason: "Phone too short".to_string(),
            suggestion: suggest_correction(raw, &digits),
        });
    }

    let number = match phonenumber::parse(default_region, raw) {
        Ok(number) => number,
        Err(e) => {
            tracing::debug!("Failed to parse phone '{}': {:?}", raw, e);
            return Err(PhoneRejection {
                reason: format!("Parse error: {:?}", e),
                suggestion: suggest_correction(raw, &digits),
            });
        }
    };

    if !phonenumber::is_valid(&number) {
        tracing::debug!("Invalid phone number: {}", raw);
        return Err(PhoneRejection {
            reason: "Number is not valid for its numbering plan".to_string(),
            suggestion: suggest_correction(raw, &digits),
        });
    }

    let number_type = number.number_type(&phonenumber::metadata::DATABASE);

    Ok(ParsedPhone {
        e164: number.format().mode(Mode::E164).to_string(),
        country_code: number.code().value(),
        national_number: number.national().value().to_string(),
        region: number.country().id().map(|id| format!("{:?}", id)),
        line_type: line_type_of(number_type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("test.user+tag@example.co.uk"));
        assert!(is_valid_email("user_name@example-domain.com"));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_valid_email("userexample.com"));
        assert!(!is_valid_email("user@examplecom"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user @example.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_split_email_lowercases_domain() {
        let (local, domain) = split_email("Jane.Doe@GMail.com").unwrap();
        assert_eq!(local, "Jane.Doe");
        assert_eq!(domain, "gmail.com");
        assert!(split_email("nodomain@").is_none());
    }

    #[test]
    fn test_ordinary_local_part_is_clean() {
        assert!(analyze_local_part("jane.doe").is_empty());
        assert!(analyze_local_part("john_smith84").is_empty());
    }

    #[test]
    fn test_local_part_flags() {
        assert_eq!(
            analyze_local_part("jane..doe"),
            vec![SuspiciousPattern::ConsecutiveSeparators]
        );
        assert_eq!(analyze_local_part("5551234"), vec![SuspiciousPattern::AllDigits]);
        assert!(analyze_local_part("ab").contains(&SuspiciousPattern::TooShort));
        assert!(analyze_local_part(&"a".repeat(31)).contains(&SuspiciousPattern::TooLong));
    }

    #[test]
    fn test_high_entropy_needs_no_dictionary_word() {
        assert!(analyze_local_part("xq7zk2vw9rj4").contains(&SuspiciousPattern::HighEntropy));
        // Same randomness, but a recognizable word inside.
        assert!(!analyze_local_part("xq7zjohnw9rj4").contains(&SuspiciousPattern::HighEntropy));
    }

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("abcd") - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_usernames() {
        assert!(is_valid_username("jane.doe"));
        assert!(is_valid_username("john_doe-99"));
        assert!(!is_valid_username("a"));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username("semi;colon"));
    }

    #[test]
    fn test_parse_us_number() {
        let parsed = parse_phone("(650) 253-0000", parse_region("US")).unwrap();
        assert_eq!(parsed.country_code, 1);
        assert_eq!(parsed.e164, "+16502530000");
        assert_eq!(parsed.region.as_deref(), Some("US"));
    }

    #[test]
    fn test_parse_brazilian_mobile_with_country_code() {
        let parsed = parse_phone("+55 11 98765-4321", None).unwrap();
        assert_eq!(parsed.e164, "+5511987654321");
        assert_eq!(parsed.country_code, 55);
        assert_eq!(parsed.line_type, PhoneLineType::Mobile);
    }

    #[test]
    fn test_garbage_phone_is_rejected_with_suggestion() {
        let rejection = parse_phone("12", parse_region("US")).unwrap_err();
        assert!(rejection.suggestion.is_some());

        let rejection = parse_phone("not a phone", parse_region("US")).unwrap_err();
        assert_eq!(
            rejection.suggestion.as_deref(),
            Some("Provide a phone number containing digits")
        );
    }
}
