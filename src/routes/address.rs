use rocket::serde::json::Json;
use rocket_okapi::openapi;
use log::error;

use crate::services::address::AddressError;
use crate::services::AddressService;
use crate::utils::{ApiError, ApiResponse};

fn upstream(level: &str, e: AddressError) -> ApiError {
    if let AddressError::InvalidName(_) = e {
        return ApiError::bad_request(format!("Invalid {} name", level.to_lowercase()));
    }
    error!("{} lookup failed: {}", level, e);
    ApiError::bad_gateway("Address service unavailable")
}

fn names(message: &str, key: &str, list: Vec<String>) -> Json<ApiResponse<serde_json::Value>> {
    let mut data = serde_json::Map::new();
    data.insert(key.to_string(), serde_json::Value::from(list));
    Json(ApiResponse::success(message, serde_json::Value::Object(data)))
}

#[openapi(tag = "Address")]
#[get("/address/divisions")]
pub async fn divisions() -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let list = AddressService::divisions()
        .await
        .map_err(|e| upstream("Division", e))?;
    Ok(names("Divisions fetched", "divisions", list))
}

#[openapi(tag = "Address")]
#[get("/address/divisions/<division>/districts")]
pub async fn districts(division: String) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let list = AddressService::districts(&division)
        .await
        .map_err(|e| upstream("District", e))?;
    Ok(names("Districts fetched", "districts", list))
}

#[openapi(tag = "Address")]
#[get("/address/districts/<district>/upazilas")]
pub async fn upazilas(district: String) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let list = AddressService::upazilas(&district)
        .await
        .map_err(|e| upstream("Upazila", e))?;
    Ok(names("Upazilas fetched", "upazilas", list))
}

#[openapi(tag = "Address")]
#[get("/address/upazilas/<upazila>/post-offices")]
pub async fn post_offices(upazila: String) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let list = AddressService::post_offices(&upazila)
        .await
        .map_err(|e| upstream("Post office", e))?;
    Ok(names("Post offices fetched", "post_offices", list))
}
