use reqwest::{Client, Url};
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address lookup failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("address service returned {0}")]
    Status(u16),
    #[error("address service response had no data array")]
    Malformed,
    #[error("invalid address API base URL {0}")]
    BadBase(String),
    #[error("invalid location name {0:?}")]
    InvalidName(String),
}

/// Appends `segments` to the API base, each percent-encoded as a single
/// path segment.
pub fn lookup_url(base: &str, segments: &[&str]) -> Result<Url, AddressError> {
    if let Some(bad) = segments
        .iter()
        .find(|s| matches!(s.trim(), "" | "." | ".."))
    {
        return Err(AddressError::InvalidName(bad.to_string()));
    }

    let mut url = Url::parse(base).map_err(|_| AddressError::BadBase(base.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| AddressError::BadBase(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Administrative level of a lookup, with the keys its items are named by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressLevel {
    Division,
    District,
    Upazila,
    PostOffice,
}

impl AddressLevel {
    fn name_keys(self) -> &'static [&'static str] {
        match self {
            AddressLevel::Division => &["division", "name"],
            AddressLevel::District => &["district", "name"],
            AddressLevel::Upazila => &["upazilla", "upazila", "name"],
            AddressLevel::PostOffice => &["postOffice", "post_office", "name"],
        }
    }
}

/// Pulls names out of the `data` array (strings or objects), then
/// de-duplicates and sorts them alphabetically ignoring case.
pub fn extract_names(body: &Value, level: AddressLevel) -> Result<Vec<String>, AddressError> {
    let items = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or(AddressError::Malformed)?;

    let mut names: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(map) => level
                .name_keys()
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(|s| s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();

    names.sort_by_key(|n| n.to_lowercase());
    names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
    Ok(names)
}

pub struct AddressService;

impl AddressService {
    async fn fetch(segments: &[&str], level: AddressLevel) -> Result<Vec<String>, AddressError> {
        let url = lookup_url(&Config::address_api_base(), segments)?;
        let res = Client::new().get(url).send().await?;

        if !res.status().is_success() {
            return Err(AddressError::Status(res.status().as_u16()));
        }

        let body: Value = res.json().await?;
        extract_names(&body, level)
    }

    pub async fn divisions() -> Result<Vec<String>, AddressError> {
        Self::fetch(&["divisions"], AddressLevel::Division).await
    }

    pub async fn districts(division: &str) -> Result<Vec<String>, AddressError> {
        Self::fetch(&["division", &division.to_lowercase()], AddressLevel::District).await
    }

    pub async fn upazilas(district: &str) -> Result<Vec<String>, AddressError> {
        Self::fetch(&["district", &district.to_lowercase()], AddressLevel::Upazila).await
    }

    pub async fn post_offices(upazila: &str) -> Result<Vec<String>, AddressError> {
        Self::fetch(&["upazilla", &upazila.to_lowercase()], AddressLevel::PostOffice).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_are_sorted_case_insensitively() {
        let body = json!({
            "status": { "code": 200 },
            "data": [
                { "division": "Sylhet" },
                { "division": "barishal" },
                { "division": "Dhaka" },
                { "division": "dhaka" }
            ]
        });
        let names = extract_names(&body, AddressLevel::Division).unwrap();
        assert_eq!(names, vec!["barishal", "Dhaka", "Sylhet"]);
    }

    #[test]
    fn plain_string_items_are_accepted() {
        let body = json!({ "data": ["Savar", "Dhamrai", ""] });
        let names = extract_names(&body, AddressLevel::Upazila).unwrap();
        assert_eq!(names, vec!["Dhamrai", "Savar"]);
    }

    #[test]
    fn location_names_stay_inside_their_segment() {
        let url = lookup_url("https://bdapis.com/api/v1.2", &["division", "dhaka/../x?y=1"]).unwrap();
        assert_eq!(url.as_str(), "https://bdapis.com/api/v1.2/division/dhaka%2F..%2Fx%3Fy=1");
        assert_eq!(url.query(), None);

        let url = lookup_url("https://example.test/api/", &["divisions"]).unwrap();
        assert_eq!(url.as_str(), "https://example.test/api/divisions");
    }

    #[test]
    fn dot_segments_are_refused() {
        assert!(matches!(
            lookup_url("https://bdapis.com/api/v1.2", &["district", ".."]),
            Err(AddressError::InvalidName(_))
        ));
    }

    #[test]
    fn missing_data_is_malformed() {
        assert!(matches!(
            extract_names(&json!({ "error": "nope" }), AddressLevel::District),
            Err(AddressError::Malformed)
        ));
    }
}
