pub mod response;
pub mod validation;

pub use response::*;
pub use validation::*;

use mongodb::bson::oid::ObjectId;
use serde::de::DeserializeOwned;

/// Parses a path id; malformed ids are reported as the missing resource.
pub fn object_id(value: &str, not_found: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value).map_err(|_| ApiError::not_found(not_found))
}

/// Drains a cursor into a `Vec`.
pub async fn collect<T>(mut cursor: mongodb::Cursor<T>) -> Result<Vec<T>, ApiError>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let mut items = Vec::new();
    while cursor.advance().await? {
        items.push(cursor.deserialize_current()?);
    }
    Ok(items)
}

/// Page/limit normalisation shared by the list endpoints.
pub fn paginate(page: Option<i64>, limit: Option<i64>) -> (i64, i64, u64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(20).clamp(1, 100);
    let skip = (page - 1).saturating_mul(limit) as u64;
    (page, limit, skip)
}

pub fn pagination_json(page: i64, limit: i64, total: u64) -> serde_json::Value {
    serde_json::json!({
        "page": page,
        "limit": limit,
        "total": total,
        "pages": (total as f64 / limit as f64).ceil() as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_clamps_inputs() {
        assert_eq!(paginate(None, None), (1, 20, 0));
        assert_eq!(paginate(Some(0), Some(500)), (1, 100, 0));
        assert_eq!(paginate(Some(3), Some(10)), (3, 10, 20));
    }

    #[test]
    fn huge_pages_saturate_instead_of_overflowing() {
        let (page, limit, skip) = paginate(Some(i64::MAX), Some(100));
        assert_eq!((page, limit), (i64::MAX, 100));
        assert_eq!(skip, i64::MAX as u64);
    }

    #[test]
    fn malformed_ids_read_as_not_found() {
        let err = object_id("not-an-id", "Property not found").unwrap_err();
        assert_eq!(err.status, rocket::http::Status::NotFound);
        assert_eq!(err.message, "Property not found");
        assert!(object_id(&ObjectId::new().to_hex(), "x").is_ok());
    }

    #[test]
    fn pages_round_up() {
        assert_eq!(pagination_json(1, 20, 41)["pages"], 3);
    }
}
