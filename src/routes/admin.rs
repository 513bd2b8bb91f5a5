use std::collections::BTreeMap;

use crate::db::{DbConn, PACKAGES, PAYMENTS, PROPERTIES, USERS};
use crate::guards::AdminGuard;
use crate::models::{
    AdminUpdateUserDto, PaymentListQuery, PaymentResponse, PaymentStatus, Property,
    PropertyResponse, PropertyStatus, Role, UpdatePropertyStatusDto, User, UserListQuery,
    UserResponse, UserStatus,
};
use crate::services::payments;
use crate::utils::{collect, object_id, paginate, pagination_json, ApiError, ApiResponse};
use log::info;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::FindOptions;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use validator::Validate;

fn newest_first(skip: u64, limit: i64) -> FindOptions {
    FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(skip)
        .limit(limit)
        .build()
}

/// Builds the `$set` for an admin edit of a user. Admins may not block or
/// demote themselves.
pub fn user_changes(
    actor_id: &ObjectId,
    target_id: &ObjectId,
    dto: &AdminUpdateUserDto,
) -> Result<Document, ApiError> {
    let mut set = Document::new();

    if let Some(ref role) = dto.role {
        let role = Role::parse(role).ok_or_else(|| ApiError::bad_request("Invalid role"))?;
        if actor_id == target_id && role != Role::Admin {
            return Err(ApiError::bad_request("You cannot change your own role"));
        }
        set.insert("role", role.as_str());
    }
    if let Some(ref status) = dto.status {
        let status = UserStatus::parse(status).ok_or_else(|| ApiError::bad_request("Invalid status"))?;
        if actor_id == target_id && status == UserStatus::Blocked {
            return Err(ApiError::bad_request("You cannot block yourself"));
        }
        set.insert("status", status.as_str());
    }
    if let Some(credits) = dto.credits {
        if credits < 0 {
            return Err(ApiError::bad_request("Credits cannot be negative"));
        }
        set.insert("credits", credits);
    }

    if set.is_empty() {
        return Err(ApiError::bad_request("Nothing to update"));
    }
    set.insert("updated_at", DateTime::now());
    Ok(set)
}

#[openapi(tag = "Admin")]
#[get("/admin/users?<query..>")]
pub async fn list_users(
    db: &State<DbConn>,
    _admin: AdminGuard,
    query: UserListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let mut filter = doc! {};
    if let Some(ref role) = query.role {
        let role = Role::parse(role).ok_or_else(|| ApiError::bad_request("Invalid role"))?;
        filter.insert("role", role.as_str());
    }
    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = regex::escape(q);
        filter.insert(
            "$or",
            vec![
                doc! { "name": { "$regex": &pattern, "$options": "i" } },
                doc! { "email": { "$regex": &pattern, "$options": "i" } },
            ],
        );
    }

    let (page, limit, skip) = paginate(query.page, query.limit);
    let collection = db.collection::<User>(USERS);
    let total = collection.count_documents(filter.clone(), None).await?;

    let users: Vec<UserResponse> = collect(collection.find(filter, newest_first(skip, limit)).await?)
        .await?
        .into_iter()
        .map(UserResponse::from)
        .collect();

    Ok(Json(ApiResponse::success(
        "Users fetched",
        serde_json::json!({
            "users": users,
            "pagination": pagination_json(page, limit, total)
        }),
    )))
}

#[openapi(tag = "Admin")]
#[patch("/admin/users/<id>", data = "<dto>")]
pub async fn update_user(
    db: &State<DbConn>,
    admin: AdminGuard,
    id: String,
    dto: Json<AdminUpdateUserDto>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    dto.validate().map_err(|e| ApiError::validation(&e))?;
    let user_id = object_id(&id, "User not found")?;
    let set = user_changes(&admin.0.id, &user_id, &dto)?;

    let res = db
        .collection::<User>(USERS)
        .update_one(doc! { "_id": user_id }, doc! { "$set": set }, None)
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    let user = db
        .collection::<User>(USERS)
        .find_one(doc! { "_id": user_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!("Admin {} updated user {}", admin.0.id, user_id);
    Ok(Json(ApiResponse::success("User updated", UserResponse::from(user))))
}

#[openapi(tag = "Admin")]
#[get("/admin/properties?<status>&<page>&<limit>")]
pub async fn list_properties(
    db: &State<DbConn>,
    _admin: AdminGuard,
    status: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let mut filter = doc! {};
    if let Some(ref s) = status {
        let s = PropertyStatus::parse(s).ok_or_else(|| ApiError::bad_request("Invalid status"))?;
        filter.insert("status", s.as_str());
    }

    let (page, limit, skip) = paginate(page, limit);
    let collection = db.collection::<Property>(PROPERTIES);
    let total = collection.count_documents(filter.clone(), None).await?;

    let properties: Vec<PropertyResponse> = collect(collection.find(filter, newest_first(skip, limit)).await?)
        .await?
        .into_iter()
        .map(|p| PropertyResponse::new(p, true))
        .collect();

    Ok(Json(ApiResponse::success(
        "Properties fetched",
        serde_json::json!({
            "properties": properties,
            "pagination": pagination_json(page, limit, total)
        }),
    )))
}

/// Moderate a listing. Rejected and rented listings are final.
#[openapi(tag = "Admin")]
#[patch("/admin/properties/<id>/status", data = "<dto>")]
pub async fn update_property_status(
    db: &State<DbConn>,
    admin: AdminGuard,
    id: String,
    dto: Json<UpdatePropertyStatusDto>,
) -> Result<Json<ApiResponse<PropertyResponse>>, ApiError> {
    let next = PropertyStatus::parse(&dto.status)
        .ok_or_else(|| ApiError::bad_request("Invalid status"))?;

    let property_id = object_id(&id, "Property not found")?;
    let collection = db.collection::<Property>(PROPERTIES);
    let property = collection
        .find_one(doc! { "_id": property_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Property not found"))?;

    property
        .status
        .ensure_can_change_to(next)
        .map_err(ApiError::bad_request)?;

    let mut set = doc! { "status": next.as_str(), "updated_at": DateTime::now() };
    if next == PropertyStatus::Rejected {
        if let Some(reason) = dto.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            set.insert("rejection_reason", reason);
        }
    }

    // Conditional on the status we checked, so racing moderators cannot both apply.
    let res = collection
        .update_one(
            doc! { "_id": property_id, "status": property.status.as_str() },
            doc! { "$set": set },
            None,
        )
        .await?;
    if res.modified_count == 0 {
        return Err(ApiError::conflict("Property status changed, reload and try again"));
    }

    let updated = collection
        .find_one(doc! { "_id": property_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Property not found"))?;

    info!(
        "Admin {} moved property {} from {} to {}",
        admin.0.id,
        property_id,
        property.status.as_str(),
        next.as_str()
    );
    Ok(Json(ApiResponse::success(
        "Property status updated",
        PropertyResponse::new(updated, true),
    )))
}

#[openapi(tag = "Admin")]
#[get("/admin/payments?<query..>")]
pub async fn list_payments(
    db: &State<DbConn>,
    _admin: AdminGuard,
    query: PaymentListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let mut filter = doc! {};
    if let Some(ref s) = query.status {
        let s = PaymentStatus::parse(s).ok_or_else(|| ApiError::bad_request("Invalid status"))?;
        filter.insert("status", s.as_str());
    }

    let (page, limit, skip) = paginate(query.page, query.limit);
    let collection = db.collection::<crate::models::Payment>(PAYMENTS);
    let total = collection.count_documents(filter.clone(), None).await?;

    let payments: Vec<PaymentResponse> = collect(collection.find(filter, newest_first(skip, limit)).await?)
        .await?
        .into_iter()
        .map(PaymentResponse::from)
        .collect();

    Ok(Json(ApiResponse::success(
        "Payments fetched",
        serde_json::json!({
            "payments": payments,
            "pagination": pagination_json(page, limit, total)
        }),
    )))
}

fn as_count(d: &Document, key: &str) -> i64 {
    d.get_i64(key)
        .or_else(|_| d.get_i32(key).map(i64::from))
        .unwrap_or(0)
}

async fn counts_by(db: &DbConn, collection: &str, field: &str) -> Result<BTreeMap<String, i64>, ApiError> {
    let pipeline = vec![doc! { "$group": { "_id": format!("${}", field), "count": { "$sum": 1 } } }];
    let groups = collect(db.collection::<Document>(collection).aggregate(pipeline, None).await?).await?;

    Ok(groups
        .iter()
        .filter_map(|g| Some((g.get_str("_id").ok()?.to_string(), as_count(g, "count"))))
        .collect())
}

async fn paid_total(db: &DbConn, collection: &str, flag: &str) -> Result<i64, ApiError> {
    let mut settled = Document::new();
    settled.insert(flag, true);
    let pipeline = vec![
        doc! { "$match": settled },
        doc! { "$group": { "_id": mongodb::bson::Bson::Null, "total": { "$sum": "$amount" } } },
    ];
    let groups = collect(db.collection::<Document>(collection).aggregate(pipeline, None).await?).await?;
    Ok(groups.first().map(|g| as_count(g, "total")).unwrap_or(0))
}

#[openapi(tag = "Admin")]
#[get("/admin/stats")]
pub async fn stats(
    db: &State<DbConn>,
    _admin: AdminGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let properties = counts_by(db, PROPERTIES, "status").await?;
    let users = counts_by(db, USERS, "role").await?;
    let rent_total = paid_total(db, PAYMENTS, "paid").await?;
    let package_total = paid_total(db, PACKAGES, "active").await?;

    Ok(Json(ApiResponse::success(
        "Stats fetched",
        serde_json::json!({
            "properties_by_status": properties,
            "users_by_role": users,
            "rent_paid_total": rent_total,
            "package_paid_total": package_total,
            "total_paid": rent_total + package_total,
        }),
    )))
}

/// Runs a reconciliation sweep now instead of waiting for the timer.
#[openapi(tag = "Admin")]
#[post("/admin/reconcile")]
pub async fn reconcile(
    db: &State<DbConn>,
    admin: AdminGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let report = payments::reconcile(db)
        .await
        .map_err(|e| ApiError::internal("Reconciliation failed", e))?;

    info!("Admin {} ran reconciliation", admin.0.id);
    Ok(Json(ApiResponse::success(
        "Reconciliation complete",
        serde_json::json!(report),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto(role: Option<&str>, status: Option<&str>, credits: Option<i64>) -> AdminUpdateUserDto {
        AdminUpdateUserDto {
            role: role.map(str::to_string),
            status: status.map(str::to_string),
            credits,
        }
    }

    #[test]
    fn admin_cannot_lock_themselves_out() {
        let me = ObjectId::new();
        assert_eq!(
            user_changes(&me, &me, &dto(None, Some("BLOCKED"), None)).unwrap_err().message,
            "You cannot block yourself"
        );
        assert!(user_changes(&me, &me, &dto(Some("TENANT"), None, None)).is_err());
        assert!(user_changes(&me, &me, &dto(None, None, Some(40))).is_ok());
    }

    #[test]
    fn changes_for_other_users() {
        let set = user_changes(&ObjectId::new(), &ObjectId::new(), &dto(Some("owner"), Some("blocked"), Some(0))).unwrap();
        assert_eq!(set.get_str("role").unwrap(), "OWNER");
        assert_eq!(set.get_str("status").unwrap(), "BLOCKED");
        assert_eq!(set.get_i64("credits").unwrap(), 0);
        assert!(set.contains_key("updated_at"));
    }

    #[test]
    fn empty_or_invalid_edits_are_refused() {
        let (a, b) = (ObjectId::new(), ObjectId::new());
        assert_eq!(user_changes(&a, &b, &dto(None, None, None)).unwrap_err().message, "Nothing to update");
        assert!(user_changes(&a, &b, &dto(Some("ROOT"), None, None)).is_err());
        assert!(user_changes(&a, &b, &dto(None, None, Some(-1))).is_err());
    }

    #[test]
    fn counts_accept_either_integer_width() {
        assert_eq!(as_count(&doc! { "count": 3_i32 }, "count"), 3);
        assert_eq!(as_count(&doc! { "count": 7_i64 }, "count"), 7);
        assert_eq!(as_count(&doc! {}, "count"), 0);
    }
}
