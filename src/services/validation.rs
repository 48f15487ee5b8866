//! Field validation
//!
//! Every cleaner takes the raw submitted value and returns either the
//! sanitized value or a single message for that field. Callers collect the
//! messages into a [`FieldErrors`] map so that all failures of a submission
//! are reported together.
//!
//! Text that ends up rendered (titles, author names) passes a deny-list of
//! script fragments, then a character allow-list, and is stored
//! HTML-escaped.

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Key for errors that concern the whole submission
pub const NON_FIELD_ERRORS: &str = "__all__";

pub const MIN_PUBLICATION_YEAR: i32 = 1000;

pub const TITLE_MAX: usize = 200;
pub const AUTHOR_NAME_MAX: usize = 100;
pub const POST_CONTENT_MAX: usize = 10_000;
pub const COMMENT_MAX: usize = 2_000;
pub const MAX_TAGS: usize = 10;
pub const TAG_MAX: usize = 50;
pub const USERNAME_MAX: usize = 150;
pub const NAME_MAX: usize = 150;
pub const BIO_MAX: usize = 500;
pub const PASSWORD_MIN: usize = 8;
pub const SEARCH_MAX: usize = 100;
pub const ISBN_LEN: usize = 13;

const DENIED_FRAGMENTS: [&str; 5] = ["<script", "javascript:", "onload=", "onerror=", "eval("];

static TITLE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[\p{L}\p{N}\s\-_.,:;!?'"()&]+$"#).expect("valid title regex"));

static AUTHOR_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\s\-.']+$").expect("valid author regex"));

static TAG_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{N}\s\-_]+$").expect("valid tag regex"));

static USERNAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.@+-]+$").expect("valid username regex"));

/// Field-keyed validation messages, in field order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors holding a single message
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// Keep the cleaned value, or record the message under `field`
    pub fn check<T>(&mut self, field: &str, result: Result<T, String>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(message) => {
                self.add(field, message);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// `Ok(())` when nothing was recorded
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Escape the five HTML-significant characters
pub fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Whether the value carries a script fragment, ignoring case
pub fn contains_denied_content(value: &str) -> bool {
    let lowered = value.to_lowercase();
    DENIED_FRAGMENTS.iter().any(|fragment| lowered.contains(fragment))
}

fn required(raw: &str) -> Result<&str, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Err("This field is required.".to_string())
    } else {
        Ok(trimmed)
    }
}

fn clean_display_text(
    raw: &str,
    label: &str,
    max: usize,
    allowed: &Regex,
) -> Result<String, String> {
    let value = required(raw)?;
    let len = value.chars().count();
    if len < 2 {
        return Err(format!("{} must be at least 2 characters long.", label));
    }
    if len > max {
        return Err(format!("{} must be at most {} characters long.", label, max));
    }
    if contains_denied_content(value) {
        return Err(format!("{} contains potentially dangerous content.", label));
    }
    if !allowed.is_match(value) {
        return Err(format!("{} contains invalid characters.", label));
    }
    Ok(html_escape(value))
}

pub fn clean_title(raw: &str) -> Result<String, String> {
    clean_display_text(raw, "Title", TITLE_MAX, &TITLE_CHARS)
}

pub fn clean_author_name(raw: &str) -> Result<String, String> {
    clean_display_text(raw, "Author name", AUTHOR_NAME_MAX, &AUTHOR_CHARS)
}

/// Library names follow the title rules
pub fn clean_library_name(raw: &str) -> Result<String, String> {
    clean_display_text(raw, "Library name", TITLE_MAX, &TITLE_CHARS)
}

/// Librarian names follow the author name rules
pub fn clean_librarian_name(raw: &str) -> Result<String, String> {
    clean_display_text(raw, "Librarian name", AUTHOR_NAME_MAX, &AUTHOR_CHARS)
}

/// Highest accepted publication year for the given current year
pub fn max_publication_year(current_year: i32, max_years_ahead: i32) -> i32 {
    current_year.saturating_add(max_years_ahead)
}

/// Coerce and bound a publication year against today's date
pub fn clean_publication_year(
    raw: &serde_json::Value,
    max_years_ahead: i32,
) -> Result<i32, String> {
    clean_publication_year_at(raw, Utc::now().year(), max_years_ahead)
}

pub fn clean_publication_year_at(
    raw: &serde_json::Value,
    current_year: i32,
    max_years_ahead: i32,
) -> Result<i32, String> {
    let year = coerce_year(raw).ok_or_else(|| "Enter a whole number.".to_string())?;
    let max = max_publication_year(current_year, max_years_ahead);
    if !(MIN_PUBLICATION_YEAR..=max).contains(&year) {
        return Err(format!(
            "Publication year must be between {} and {}.",
            MIN_PUBLICATION_YEAR, max
        ));
    }
    Ok(year)
}

fn coerce_year(raw: &serde_json::Value) -> Option<i32> {
    match raw {
        serde_json::Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            s.parse().ok()
        }
        _ => None,
    }
}

/// Blank means "no ISBN"; anything else must be exactly 13 characters
pub fn clean_isbn(raw: Option<&str>) -> Result<Option<String>, String> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() != ISBN_LEN {
        return Err("ISBN must be exactly 13 characters long.".to_string());
    }
    Ok(Some(value.to_string()))
}

pub fn clean_post_content(raw: &str) -> Result<String, String> {
    let value = required(raw)?;
    if value.chars().count() > POST_CONTENT_MAX {
        return Err(format!(
            "Content must be at most {} characters long.",
            POST_CONTENT_MAX
        ));
    }
    Ok(value.to_string())
}

/// Trim tag names and drop repeats of the same name, ignoring case
pub fn clean_tags(raw: &[String]) -> Result<Vec<String>, String> {
    let mut tags: Vec<String> = Vec::with_capacity(raw.len());
    for name in raw {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > TAG_MAX {
            return Err(format!("Each tag must be 1 to {} characters long.", TAG_MAX));
        }
        if !TAG_CHARS.is_match(name) {
            return Err(format!("Tag \"{}\" contains invalid characters.", html_escape(name)));
        }
        if crate::models::slugify(name).is_empty() {
            return Err(format!("Tag \"{}\" must contain a letter or digit.", html_escape(name)));
        }
        if !tags.iter().any(|t| t.to_lowercase() == name.to_lowercase()) {
            tags.push(name.to_string());
        }
    }
    if tags.len() > MAX_TAGS {
        return Err(format!("A post can have at most {} tags.", MAX_TAGS));
    }
    Ok(tags)
}

pub fn clean_comment(raw: &str) -> Result<String, String> {
    let value = required(raw)?;
    if value.chars().count() > COMMENT_MAX {
        return Err(format!("Comment must be at most {} characters long.", COMMENT_MAX));
    }
    if contains_denied_content(value) {
        return Err("Comment contains potentially dangerous content.".to_string());
    }
    Ok(value.to_string())
}

pub fn clean_username(raw: &str) -> Result<String, String> {
    let value = required(raw)?;
    let len = value.chars().count();
    if !(3..=USERNAME_MAX).contains(&len) {
        return Err(format!(
            "Username must be between 3 and {} characters long.",
            USERNAME_MAX
        ));
    }
    if !USERNAME_CHARS.is_match(value) {
        return Err("Username may contain only letters, digits and @/./+/-/_ characters.".to_string());
    }
    Ok(value.to_string())
}

pub fn clean_email(raw: &str) -> Result<String, String> {
    let value = required(raw)?;
    let invalid = || "Enter a valid email address.".to_string();

    let (local, domain) = value.rsplit_once('@').ok_or_else(invalid)?;
    if local.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(invalid());
    }
    Ok(value.to_string())
}

pub fn clean_password(password: &str, confirmation: Option<&str>) -> Result<String, String> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(format!(
            "Password must be at least {} characters long.",
            PASSWORD_MIN
        ));
    }
    if let Some(confirmation) = confirmation {
        if confirmation != password {
            return Err("The two password fields didn't match.".to_string());
        }
    }
    Ok(password.to_string())
}

/// Optional personal name; blank clears it
pub fn clean_name(raw: &str) -> Result<String, String> {
    let value = raw.trim();
    if value.chars().count() > NAME_MAX {
        return Err(format!("Name must be at most {} characters long.", NAME_MAX));
    }
    Ok(value.to_string())
}

pub fn clean_bio(raw: &str) -> Result<String, String> {
    let value = raw.trim();
    if value.chars().count() > BIO_MAX {
        return Err(format!("Bio must be at most {} characters long.", BIO_MAX));
    }
    Ok(value.to_string())
}

/// Bound a search term; blank means "no search". The result is trimmed
/// but otherwise as typed.
pub fn clean_search_raw(raw: Option<&str>) -> Result<Option<String>, String> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > SEARCH_MAX {
        return Err(format!(
            "Search query must be at most {} characters long.",
            SEARCH_MAX
        ));
    }
    Ok(Some(value.to_string()))
}

/// Like [`clean_search_raw`], escaped so it compares against stored,
/// escaped text.
pub fn clean_search(raw: Option<&str>) -> Result<Option<String>, String> {
    Ok(clean_search_raw(raw)?.map(|value| html_escape(&value)))
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn denied_fragment() -> impl Strategy<Value = String> {
        prop::sample::select(DENIED_FRAGMENTS.to_vec()).prop_map(String::from)
    }

    /// Flip the case of each ASCII letter according to the mask
    fn recase(value: &str, mask: &[bool]) -> String {
        value
            .chars()
            .zip(mask.iter().cycle())
            .map(|(c, upper)| if *upper { c.to_ascii_uppercase() } else { c })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn denied_fragment_rejected_in_any_case(
            prefix in "[a-zA-Z ]{0,20}",
            suffix in "[a-zA-Z ]{0,20}",
            fragment in denied_fragment(),
            mask in prop::collection::vec(any::<bool>(), 1..8),
        ) {
            let title = format!("{}{}{}", prefix, recase(&fragment, &mask), suffix);
            prop_assert!(clean_title(&title).is_err());
            prop_assert!(clean_author_name(&title).is_err());
            prop_assert!(clean_comment(&title).is_err());
        }

        #[test]
        fn years_up_to_current_accepted(year in 1000i32..=2026) {
            prop_assert_eq!(clean_publication_year_at(&json!(year), 2026, 5).unwrap(), year);
        }

        #[test]
        fn years_past_ceiling_rejected(ahead in 0i32..5, extra in 1i32..10_000) {
            let year = 2026 + ahead + extra;
            prop_assert!(clean_publication_year_at(&json!(year), 2026, ahead).is_err());
        }

        #[test]
        fn accepted_titles_contain_no_raw_markup(title in "[a-zA-Z0-9 &'\"().,!?-]{2,60}") {
            if let Ok(clean) = clean_title(&title) {
                prop_assert!(!clean.contains('<'));
                prop_assert!(!clean.contains('"'));
                prop_assert!(!clean.contains('\''));
            }
        }
    }
}
