use rand::Rng;
use regex::Regex;
use validator::ValidationError;

pub fn validate_mobile(mobile: &str) -> bool {
    let re = Regex::new(r"^(?:\+?88)?01[3-9]\d{8}$").unwrap();
    re.is_match(mobile)
}

/// `validator` hook for phone fields.
pub fn bd_phone(value: &str) -> Result<(), ValidationError> {
    if validate_mobile(value) {
        Ok(())
    } else {
        let mut err = ValidationError::new("phone");
        err.message = Some("Enter a valid Bangladeshi mobile number".into());
        Err(err)
    }
}

/// Lowercase, ASCII-only, hyphen separated.
pub fn slugify(title: &str) -> String {
    let re = Regex::new(r"[^a-z0-9]+").unwrap();
    let lowered = title.to_lowercase();
    re.replace_all(&lowered, "-").trim_matches('-').to_string()
}

/// Slug for a new listing; the random suffix keeps equal titles apart.
pub fn property_slug(title: &str) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();

    let base = slugify(title);
    if base.is_empty() {
        format!("property-{}", suffix)
    } else {
        format!("{}-{}", base, suffix)
    }
}

pub fn parse_date(value: &str) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_local_and_prefixed_numbers() {
        assert!(validate_mobile("01712345678"));
        assert!(validate_mobile("+8801912345678"));
        assert!(!validate_mobile("01212345678"));
        assert!(!validate_mobile("0171234567"));
    }

    #[test]
    fn slug_strips_punctuation() {
        assert_eq!(slugify("  3-Bed Flat, Dhanmondi!! "), "3-bed-flat-dhanmondi");
    }

    #[test]
    fn property_slug_appends_suffix() {
        let slug = property_slug("Lake View");
        assert!(slug.starts_with("lake-view-"));
        assert_eq!(slug.len(), "lake-view-".len() + 6);

        let fallback = property_slug("!!!");
        assert!(fallback.starts_with("property-"));
    }

    #[test]
    fn parses_iso_dates_only() {
        assert!(parse_date("2026-11-01").is_some());
        assert!(parse_date("01/11/2026").is_none());
    }
}
