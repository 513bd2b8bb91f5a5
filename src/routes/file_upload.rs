use rocket::serde::json::Json;
use rocket::fs::TempFile;
use rocket::serde::Deserialize;
use rocket_okapi::openapi;
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use std::path::Path;
use tokio::fs;
use uuid::Uuid;
use log::{info, warn};
use data_encoding::BASE64;
use crate::guards::AuthGuard;
use crate::utils::{ApiResponse, ApiError};

const UPLOAD_DIR: &str = "uploads/images";
const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(crate = "rocket::serde")]
pub struct Base64UploadRequest {
    pub filename: String,
    pub mime_type: String,
    pub data: String,
}

fn extension_from_filename(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_lowercase())
}

fn extension_from_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type.to_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn is_valid_image_extension(ext: &str) -> bool {
    matches!(ext, "jpg" | "jpeg" | "png" | "webp")
}

/// Accepts raw base64 or a `data:<mime>;base64,` URL.
fn decode_image(data: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match data.split_once("base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    let bytes = BASE64
        .decode(cleaned.as_bytes())
        .map_err(|_| ApiError::bad_request("Invalid base64 data"))?;

    if bytes.is_empty() {
        return Err(ApiError::bad_request("Image is empty"));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::bad_request("Image exceeds 5MB limit"));
    }
    Ok(bytes)
}

fn stored_name(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4().simple(), extension)
}

async fn ensure_upload_dir() -> Result<(), ApiError> {
    fs::create_dir_all(UPLOAD_DIR)
        .await
        .map_err(|e| ApiError::internal("Failed to create upload directory", e))
}

#[openapi(tag = "File Upload")]
#[post("/upload/image", data = "<file>")]
pub async fn upload_image(
    mut file: TempFile<'_>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    // `name()` drops the extension, so read it from the raw name; it is only
    // checked against the allow-list below.
    let extension = file
        .raw_name()
        .and_then(|n| extension_from_filename(n.dangerous_unsafe_unsanitized_raw().as_str()))
        .or_else(|| {
            file.content_type()
                .and_then(|ct| extension_from_mime(&ct.to_string()))
                .map(str::to_string)
        })
        .ok_or_else(|| ApiError::bad_request("Cannot determine file type"))?;

    if !is_valid_image_extension(&extension) {
        warn!("Rejected upload with extension '{}' from {}", extension, auth.user_id);
        return Err(ApiError::bad_request(
            "Only image files (JPEG, PNG, WebP) are allowed",
        ));
    }
    if file.len() as usize > MAX_IMAGE_BYTES {
        return Err(ApiError::bad_request("Image exceeds 5MB limit"));
    }

    ensure_upload_dir().await?;
    let filename = stored_name(&extension);
    let filepath = format!("{}/{}", UPLOAD_DIR, filename);

    file.persist_to(&filepath)
        .await
        .map_err(|e| ApiError::internal("Failed to save upload", e))?;

    let file_url = format!("/{}", filepath);
    info!("Image {} uploaded by {}", file_url, auth.user_id);

    Ok(Json(ApiResponse::success(
        "Image uploaded successfully",
        serde_json::json!({ "url": file_url, "filename": filename }),
    )))
}

#[openapi(tag = "File Upload")]
#[post("/upload/image-base64", data = "<request>")]
pub async fn upload_image_base64(
    request: Json<Base64UploadRequest>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let extension = extension_from_mime(&request.mime_type)
        .ok_or_else(|| ApiError::bad_request("Only JPEG, PNG and WebP images are allowed"))?;

    let bytes = decode_image(&request.data)?;

    ensure_upload_dir().await?;
    let filename = stored_name(extension);
    let filepath = format!("{}/{}", UPLOAD_DIR, filename);

    fs::write(&filepath, &bytes)
        .await
        .map_err(|e| ApiError::internal("Failed to save upload", e))?;

    let file_url = format!("/{}", filepath);
    info!(
        "Image {} ({} bytes, sent as '{}') uploaded by {}",
        file_url,
        bytes.len(),
        request.filename,
        auth.user_id
    );

    Ok(Json(ApiResponse::success(
        "Image uploaded successfully",
        serde_json::json!({ "url": file_url, "filename": filename, "size": bytes.len() }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_come_from_name_or_mime() {
        assert_eq!(extension_from_filename("flat.PNG").as_deref(), Some("png"));
        assert_eq!(extension_from_filename("noext"), None);
        assert_eq!(extension_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(extension_from_mime("application/pdf"), None);
        assert!(is_valid_image_extension("webp"));
        assert!(!is_valid_image_extension("gif"));
    }

    #[test]
    fn data_urls_are_accepted() {
        let raw = BASE64.encode(b"\x89PNG fake");
        let url = format!("data:image/png;base64,{}", raw);
        assert_eq!(decode_image(&url).unwrap(), b"\x89PNG fake");
        assert_eq!(decode_image(&raw).unwrap(), b"\x89PNG fake");
    }

    #[test]
    fn bad_or_oversized_payloads_are_refused() {
        assert_eq!(decode_image("!!notbase64!!").unwrap_err().message, "Invalid base64 data");

        let big = BASE64.encode(&vec![0u8; MAX_IMAGE_BYTES + 1]);
        assert_eq!(decode_image(&big).unwrap_err().message, "Image exceeds 5MB limit");
    }
}
