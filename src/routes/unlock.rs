use mongodb::bson::doc;
use mongodb::options::FindOptions;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;

use crate::db::{DbConn, PROPERTIES, UNLOCKS};
use crate::guards::CurrentUser;
use crate::models::{Property, PropertyResponse, PropertyUnlock};
use crate::services::unlock::{ensure_unlockable, unlock_property, MongoUnlockStore};
use crate::utils::{collect, object_id, ApiError, ApiResponse};

/// Spend credits to reveal an owner's contact details
#[openapi(tag = "Unlocks")]
#[post("/properties/<id>/unlock")]
pub async fn unlock(
    db: &State<DbConn>,
    current: CurrentUser,
    id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let property_id = object_id(&id, "Property not found")?;

    let property = db
        .collection::<Property>(PROPERTIES)
        .find_one(doc! { "_id": property_id }, None)
        .await?;
    ensure_unlockable(property.as_ref())?;

    let store = MongoUnlockStore { db: db.inner() };
    let response = unlock_property(&store, &current.user, current.id, property_id).await?;
    Ok(Json(response))
}

/// Properties the caller has unlocked, most recent first
#[openapi(tag = "Unlocks")]
#[get("/unlocks")]
pub async fn my_unlocks(
    db: &State<DbConn>,
    current: CurrentUser,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let options = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
    let cursor = db
        .collection::<PropertyUnlock>(UNLOCKS)
        .find(doc! { "user_id": current.id }, options)
        .await?;
    let unlocks = collect(cursor).await?;

    let ids: Vec<_> = unlocks.iter().map(|u| u.property_id).collect();
    let cursor = db
        .collection::<Property>(PROPERTIES)
        .find(doc! { "_id": { "$in": ids } }, None)
        .await?;
    let mut properties = collect(cursor).await?;

    // Keep unlock order; deleted listings simply drop out.
    let ordered: Vec<PropertyResponse> = unlocks
        .iter()
        .filter_map(|u| {
            let pos = properties.iter().position(|p| p.id == Some(u.property_id))?;
            Some(PropertyResponse::new(properties.swap_remove(pos), true))
        })
        .collect();

    Ok(Json(ApiResponse::success(
        "Unlocked properties fetched",
        serde_json::json!({
            "properties": ordered,
            "total": ordered.len()
        }),
    )))
}
