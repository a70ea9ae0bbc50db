//! Input validation for account fields.
//!
//! Each validator returns the user-facing message(s) on failure. Collecting
//! them into a field map is the caller's job, usually through the
//! `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

/// Upper bound for usernames and names, in characters
pub const MAX_NAME_LENGTH: usize = 150;

/// Upper bound for email addresses, in characters
pub const MAX_EMAIL_LENGTH: usize = 254;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Longer passwords are refused before any other rule or hashing runs
pub const MAX_PASSWORD_LENGTH: usize = 4096;

/// Attributes (and parts of them) longer than this are never compared, since
/// no valid username, name or email gets there
pub const MAX_SIMILARITY_ATTRIBUTE_LENGTH: usize = MAX_EMAIL_LENGTH;

/// Passwords at or above this similarity ratio to a personal attribute are refused
pub const MAX_SIMILARITY: f64 = 0.7;

pub const PHONE_DIGITS: usize = 9;

lazy_static! {
    /// Letters, digits and @/./+/-/_ (Unicode letters included)
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[\w.@+-]+$").unwrap();

    /// Dot-atom local part, or a quoted string
    static ref EMAIL_USER_REGEX: Regex = Regex::new(
        r#"(?i)^([-!#$%&'*+/=?^_`{}|~0-9a-z]+(\.[-!#$%&'*+/=?^_`{}|~0-9a-z]+)*|"([\x01-\x08\x0b\x0c\x0e-\x1f!#-\[\]-\x7f]|\\[\x01-\x09\x0b\x0c\x0e-\x7f])*")$"#
    ).unwrap();

    /// Dotted hostname ending in a top-level label of at least two characters
    static ref EMAIL_DOMAIN_REGEX: Regex = Regex::new(
        r"(?i)^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9-]{2,63}$"
    ).unwrap();

    /// Bracketed IPv4 literal, e.g. `[192.168.0.1]`
    static ref EMAIL_LITERAL_REGEX: Regex = Regex::new(
        r"^\[(25[0-5]|2[0-4]\d|1?\d?\d)(\.(25[0-5]|2[0-4]\d|1?\d?\d)){3}\]$"
    ).unwrap();

    static ref NON_WORD_REGEX: Regex = Regex::new(r"\W+").unwrap();
}

/// Frequently used passwords, refused regardless of anything else
const COMMON_PASSWORDS: &[&str] = &[
    "000000", "111111", "112233", "121212", "123123", "123321", "1234", "12345", "123456",
    "1234567", "12345678", "123456789", "1234567890", "123654", "131313", "159753", "1q2w3e4r",
    "1qaz2wsx", "222222", "555555", "654321", "666666", "696969", "7777777", "88888888",
    "987654321", "aa123456", "abc123", "abcd1234", "access", "admin", "admin123", "asdfgh",
    "asdfghjkl", "azerty", "baseball", "batman", "charlie", "chocolate", "computer", "donald",
    "dragon", "football", "freedom", "hello", "hello123", "iloveyou", "jennifer", "jordan",
    "killer", "letmein", "login", "master", "michael", "monkey", "mustang", "passw0rd",
    "password", "password1", "password123", "pokemon", "princess", "qazwsx", "qwerty",
    "qwerty123", "qwertyuiop", "shadow", "soccer", "starwars", "sunshine", "superman",
    "trustno1", "welcome", "welcome1", "whatever", "zaq12wsx", "zxcvbnm",
];

/// Validate a username
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.chars().count() > MAX_NAME_LENGTH {
        return Err(too_long(MAX_NAME_LENGTH));
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters."
                .to_string(),
        );
    }

    Ok(())
}

/// Validate a first or last name
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(too_long(MAX_NAME_LENGTH));
    }
    Ok(())
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    const INVALID: &str = "Enter a valid email address.";

    if email.chars().count() > MAX_EMAIL_LENGTH {
        return Err(too_long(MAX_EMAIL_LENGTH));
    }

    let Some((user, domain)) = email.rsplit_once('@') else {
        return Err(INVALID.to_string());
    };

    if !EMAIL_USER_REGEX.is_match(user) {
        return Err(INVALID.to_string());
    }

    let domain_ok = (EMAIL_DOMAIN_REGEX.is_match(domain) && !domain.ends_with('-'))
        || EMAIL_LITERAL_REGEX.is_match(domain)
        || domain.eq_ignore_ascii_case("localhost");
    if !domain_ok {
        return Err(INVALID.to_string());
    }

    Ok(())
}

/// Lowercase the domain part, keep the local part as entered
pub fn normalize_email(email: &str) -> String {
    match email.trim().rsplit_once('@') {
        Some((user, domain)) => format!("{}@{}", user, domain.to_lowercase()),
        None => email.trim().to_string(),
    }
}

/// Parse and validate a phone number: an integer of exactly nine digits
pub fn validate_phone_number(raw: &str) -> Result<i64, String> {
    let number: i64 = raw
        .trim()
        .parse()
        .map_err(|_| "A valid integer is required.".to_string())?;

    let digits = number.to_string();
    if digits.len() != PHONE_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("Phone number must contain 9 digits".to_string());
    }

    Ok(number)
}

/// Personal attributes a password must not resemble
#[derive(Debug, Default, Clone, Copy)]
pub struct PasswordContext<'a> {
    pub username: Option<&'a str>,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub email: Option<&'a str>,
}

/// Run every password rule, returning all messages that apply
pub fn validate_password(password: &str, context: PasswordContext<'_>) -> Result<(), Vec<String>> {
    if password.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(vec![too_long(MAX_PASSWORD_LENGTH)]);
    }

    let mut errors = Vec::new();

    let attributes = [
        ("username", context.username),
        ("first name", context.first_name),
        ("last name", context.last_name),
        ("email address", context.email),
    ];
    for (verbose_name, value) in attributes {
        let Some(value) = value
            .filter(|v| !v.is_empty() && v.chars().count() <= MAX_SIMILARITY_ATTRIBUTE_LENGTH)
        else {
            continue;
        };
        if is_too_similar(password, value) {
            errors.push(format!("The password is too similar to the {verbose_name}."));
            break;
        }
    }

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(format!(
            "This password is too short. It must contain at least {MIN_PASSWORD_LENGTH} characters."
        ));
    }

    let lowered = password.trim().to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        errors.push("This password is too common.".to_string());
    }

    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        errors.push("This password is entirely numeric.".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_too_similar(password: &str, value: &str) -> bool {
    let password = password.to_lowercase();
    let value = value.to_lowercase();
    let password_len = password.chars().count();

    NON_WORD_REGEX
        .split(&value)
        .chain(std::iter::once(value.as_str()))
        .filter(|part| !part.is_empty() && part.chars().count() <= MAX_SIMILARITY_ATTRIBUTE_LENGTH)
        .filter(|part| !exceeds_length_ratio(password_len, part.chars().count()))
        .any(|part| {
            upper_bound_ratio(&password, part) >= MAX_SIMILARITY
                && similarity_ratio(&password, part) >= MAX_SIMILARITY
        })
}

/// The password is so much longer than `part` that the ratio cannot reach
/// the similarity threshold
fn exceeds_length_ratio(password_len: usize, part_len: usize) -> bool {
    let bound = MAX_SIMILARITY / 2.0 * password_len as f64;
    password_len >= 10 * part_len && (part_len as f64) < bound
}

/// Ratio from shared characters regardless of order; never below
/// [`similarity_ratio`]. Linear, so it screens out most parts cheaply.
fn upper_bound_ratio(a: &str, b: &str) -> f64 {
    let mut counts: HashMap<char, isize> = HashMap::new();
    for c in b.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }

    let mut shared = 0usize;
    let mut total = 0usize;
    for c in a.chars() {
        total += 1;
        if let Some(n) = counts.get_mut(&c) {
            if *n > 0 {
                *n -= 1;
                shared += 1;
            }
        }
    }
    total += b.chars().count();

    if total == 0 {
        1.0
    } else {
        2.0 * shared as f64 / total as f64
    }
}

/// `2 * M / T`, where M counts characters in matching blocks found by
/// repeatedly taking the longest common substring on either side of the last
/// match, and T is the combined length.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matches = matching_characters(&a, &b);
    2.0 * matches as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let (i, j, size) = longest_match(a, b);
    if size == 0 {
        return 0;
    }
    size + matching_characters(&a[..i], &b[..j])
        + matching_characters(&a[i + size..], &b[j + size..])
}

/// Longest common substring; ties go to the earliest start in `a`, then in `b`
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb { prev[j] + 1 } else { 0 };
            let len = curr[j + 1];
            if len > best.2 {
                best = (i + 1 - len, j + 1 - len, len);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    best
}

fn too_long(max: usize) -> String {
    format!("Ensure this field has no more than {max} characters.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("johndoe").is_ok());
        assert!(validate_username("john.doe+tag@site-1_x").is_ok());
        assert!(validate_username("jöhn").is_ok());

        assert!(validate_username("john doe").is_err());
        assert!(validate_username("john/doe").is_err());
        assert!(validate_username("").is_err());
        assert!(validate_username(&"a".repeat(150)).is_ok());
        assert_eq!(
            validate_username(&"a".repeat(151)).unwrap_err(),
            "Ensure this field has no more than 150 characters."
        );
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Mary Ann").is_ok());
        assert!(validate_name(&"x".repeat(151)).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("johndoe@mail.com").is_ok());
        assert!(validate_email("first.last+tag@sub.example.co").is_ok());
        assert!(validate_email("admin@localhost").is_ok());
        assert!(validate_email("x@[127.0.0.1]").is_ok());

        assert!(validate_email("johndoe").is_err());
        assert!(validate_email("johndoe@").is_err());
        assert!(validate_email("@mail.com").is_err());
        assert!(validate_email("john doe@mail.com").is_err());
        assert!(validate_email("john..doe@mail.com").is_err());
        assert!(validate_email("john@mail").is_err());
        assert!(validate_email("john@mail.c").is_err());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("John.Doe@MAIL.Com"), "John.Doe@mail.com");
        assert_eq!(normalize_email("  a@B.io "), "a@b.io");
    }

    #[test]
    fn test_validate_phone_number() {
        assert_eq!(validate_phone_number("123456789"), Ok(123456789));
        assert_eq!(validate_phone_number(" 987654321 "), Ok(987654321));

        let nine = "Phone number must contain 9 digits".to_string();
        assert_eq!(validate_phone_number("12345678"), Err(nine.clone()));
        assert_eq!(validate_phone_number("1234567890"), Err(nine.clone()));
        // Leading zeros are lost once parsed as an integer
        assert_eq!(validate_phone_number("012345678"), Err(nine.clone()));
        assert_eq!(validate_phone_number("-12345678"), Err(nine));

        assert_eq!(
            validate_phone_number("12345678a"),
            Err("A valid integer is required.".to_string())
        );
    }

    #[test]
    fn test_password_rules() {
        let ctx = PasswordContext::default();
        assert!(validate_password("correct-horse-battery", ctx).is_ok());

        let errors = validate_password("1234567", ctx).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("too short")));
        assert!(errors.iter().any(|e| e.contains("too common")));
        assert!(errors.iter().any(|e| e.contains("entirely numeric")));

        let errors = validate_password("Password", ctx).unwrap_err();
        assert_eq!(errors, vec!["This password is too common.".to_string()]);

        let errors = validate_password("83920175", ctx).unwrap_err();
        assert_eq!(errors, vec!["This password is entirely numeric.".to_string()]);
    }

    #[test]
    fn test_password_similarity() {
        let ctx = PasswordContext {
            username: Some("johndoe"),
            first_name: Some("John"),
            last_name: Some("Doe"),
            email: Some("jonathan.smithers@mail.com"),
        };

        let errors = validate_password("johndoe1", ctx).unwrap_err();
        assert_eq!(errors, vec!["The password is too similar to the username.".to_string()]);

        let errors = validate_password("smithers99", ctx).unwrap_err();
        assert_eq!(
            errors,
            vec!["The password is too similar to the email address.".to_string()]
        );

        assert!(validate_password("tangerine-volcano", ctx).is_ok());
    }

    #[test]
    fn test_password_length_cap() {
        let ctx = PasswordContext {
            username: Some("johndoe"),
            email: Some("johndoe@mail.com"),
            ..Default::default()
        };

        let at_cap = "x9!".repeat(MAX_PASSWORD_LENGTH / 3);
        assert!(validate_password(&at_cap, ctx).is_ok());

        let errors = validate_password(&"a".repeat(MAX_PASSWORD_LENGTH + 1), ctx).unwrap_err();
        assert_eq!(errors, vec![format!("Ensure this field has no more than {MAX_PASSWORD_LENGTH} characters.")]);
    }

    #[test]
    fn test_long_password_against_long_attributes_is_fast() {
        let email = format!("{}@{}.com", "k".repeat(120), "q".repeat(120));
        let ctx = PasswordContext {
            username: Some("johndoe"),
            first_name: Some("John"),
            last_name: Some("Doe"),
            email: Some(&email),
        };

        // Worst case under the cap: one repeated letter shared with the email
        let password = "k".repeat(MAX_PASSWORD_LENGTH);
        let started = std::time::Instant::now();
        let _ = validate_password(&password, ctx);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));

        // Far beyond the cap is rejected up front
        let huge = "k".repeat(5_000_000);
        let started = std::time::Instant::now();
        assert!(validate_password(&huge, ctx).is_err());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    /// `n` distinct CJK characters, and the same with adjacent pairs swapped.
    /// Matching blocks are all one character long, the worst case for the
    /// block search.
    fn scrambled_pair(n: usize) -> (String, String) {
        let chars: Vec<char> = (0..n as u32)
            .map(|i| char::from_u32(0x4E00 + i).unwrap())
            .collect();
        let mut swapped = chars.clone();
        for pair in swapped.chunks_mut(2) {
            pair.reverse();
        }
        (chars.into_iter().collect(), swapped.into_iter().collect())
    }

    #[test]
    fn test_oversized_attribute_is_not_compared() {
        let (password, first_name) = scrambled_pair(MAX_PASSWORD_LENGTH);
        let ctx = PasswordContext {
            first_name: Some(&first_name),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        assert!(validate_password(&password, ctx).is_ok());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_long_attribute_within_limits_is_still_compared() {
        // Every fifth character differs: ratio 0.8
        let password: String = (0..200u32)
            .map(|i| char::from_u32(0x4E00 + i).unwrap())
            .collect();
        let email_user: String = (0..200u32)
            .map(|i| char::from_u32(if i % 5 == 4 { 0x9000 + i } else { 0x4E00 + i }).unwrap())
            .collect();
        let email = format!("{email_user}@mail.com");
        let ctx = PasswordContext {
            email: Some(&email),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let errors = validate_password(&password, ctx).unwrap_err();
        assert_eq!(
            errors,
            vec!["The password is too similar to the email address.".to_string()]
        );
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_length_ratio_skips_short_parts() {
        assert!(exceeds_length_ratio(100, 5));
        assert!(!exceeds_length_ratio(100, 40));
        assert!(!exceeds_length_ratio(8, 7));
        assert!(upper_bound_ratio("abcd", "dcba") >= similarity_ratio("abcd", "dcba"));
        assert_eq!(upper_bound_ratio("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_similarity_ratio() {
        assert_eq!(similarity_ratio("", ""), 1.0);
        assert_eq!(similarity_ratio("abcd", "abcd"), 1.0);
        assert_eq!(similarity_ratio("abcd", "wxyz"), 0.0);
        // "ab" and "cd" match across "abxcd"
        assert!((similarity_ratio("abcd", "abxcd") - 8.0 / 9.0).abs() < 1e-9);
    }
}
