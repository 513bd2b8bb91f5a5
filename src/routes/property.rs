use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::FindOptions;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;
use log::info;

use crate::db::{is_duplicate_key, DbConn, BOOKINGS, PROPERTIES, UNLOCKS};
use crate::guards::{CurrentUser, OwnerGuard};
use crate::models::{
    BookingStatus, CreatePropertyDto, Property, PropertyResponse, PropertySearchQuery,
    PropertyStatus, PropertyType, UpdatePropertyDto,
};
use crate::utils::{
    collect, object_id, paginate, pagination_json, property_slug, ApiError, ApiResponse,
};

const SLUG_ATTEMPTS: usize = 3;

fn ci_exact(value: &str) -> Document {
    doc! { "$regex": format!("^{}$", regex::escape(value.trim())), "$options": "i" }
}

/// Filter for the public listing: available properties narrowed by the query.
pub fn search_filter(query: &PropertySearchQuery) -> Result<Document, ApiError> {
    let mut filter = doc! { "status": PropertyStatus::Available.as_str() };

    if let Some(ref division) = query.division {
        filter.insert("division", ci_exact(division));
    }
    if let Some(ref district) = query.district {
        filter.insert("district", ci_exact(district));
    }
    if let Some(ref upazila) = query.upazila {
        filter.insert("upazila", ci_exact(upazila));
    }
    if let Some(ref kind) = query.property_type {
        let kind = PropertyType::parse(kind)
            .ok_or_else(|| ApiError::bad_request("Invalid property type"))?;
        filter.insert("property_type", mongodb::bson::to_bson(&kind).map_err(|e| ApiError::internal("Filter", e))?);
    }

    let mut price = Document::new();
    if let Some(min) = query.min_price {
        price.insert("$gte", min);
    }
    if let Some(max) = query.max_price {
        price.insert("$lte", max);
    }
    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        if min > max {
            return Err(ApiError::bad_request("min_price cannot exceed max_price"));
        }
    }
    if !price.is_empty() {
        filter.insert("price", price);
    }

    if let Some(bedrooms) = query.bedrooms {
        filter.insert("bedrooms", doc! { "$gte": bedrooms });
    }

    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = regex::escape(q);
        filter.insert(
            "$or",
            vec![
                doc! { "title": { "$regex": &pattern, "$options": "i" } },
                doc! { "description": { "$regex": &pattern, "$options": "i" } },
                doc! { "address": { "$regex": &pattern, "$options": "i" } },
            ],
        );
    }

    Ok(filter)
}

async fn load_property(db: &DbConn, id: ObjectId) -> Result<Property, ApiError> {
    db.collection::<Property>(PROPERTIES)
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Property not found"))
}

/// Loads a property the caller may manage: their own, or any for admins.
async fn load_owned(db: &DbConn, guard: &OwnerGuard, id: &str) -> Result<Property, ApiError> {
    let property = load_property(db, object_id(id, "Property not found")?).await?;
    if property.owner_id != guard.0.id && !guard.0.user.is_admin() {
        return Err(ApiError::forbidden("Unauthorized"));
    }
    Ok(property)
}

/// Public listing of available properties
#[openapi(tag = "Properties")]
#[get("/properties?<query..>")]
pub async fn list_properties(
    db: &State<DbConn>,
    query: PropertySearchQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let filter = search_filter(&query)?;
    let (page, limit, skip) = paginate(query.page, query.limit);

    let total = db
        .collection::<Property>(PROPERTIES)
        .count_documents(filter.clone(), None)
        .await?;

    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(skip)
        .limit(limit)
        .build();

    let cursor = db
        .collection::<Property>(PROPERTIES)
        .find(filter, options)
        .await?;

    let properties: Vec<PropertyResponse> = collect(cursor)
        .await?
        .into_iter()
        .map(|p| PropertyResponse::new(p, false))
        .collect();

    Ok(Json(ApiResponse::success(
        "Properties fetched",
        serde_json::json!({
            "properties": properties,
            "pagination": pagination_json(page, limit, total)
        }),
    )))
}

/// Owners and admins see unlisted properties and contact details. The role
/// comes from the stored user, not the token.
fn sees_everything(viewer: Option<&CurrentUser>, property: &Property) -> bool {
    viewer
        .map(|v| v.user.is_admin() || v.id == property.owner_id)
        .unwrap_or(false)
}

/// Single property by slug. Contact details are included for the owner,
/// admins and users who unlocked it.
#[openapi(tag = "Properties")]
#[get("/properties/<slug>")]
pub async fn get_property(
    db: &State<DbConn>,
    viewer: Option<CurrentUser>,
    slug: String,
) -> Result<Json<ApiResponse<PropertyResponse>>, ApiError> {
    let property = db
        .collection::<Property>(PROPERTIES)
        .find_one(doc! { "slug": &slug }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Property not found"))?;

    let privileged = sees_everything(viewer.as_ref(), &property);

    if property.status != PropertyStatus::Available && !privileged {
        return Err(ApiError::not_found("Property not found"));
    }

    let unlocked = match (&viewer, property.id) {
        _ if privileged => true,
        (Some(v), Some(property_id)) => db
            .collection::<Document>(UNLOCKS)
            .find_one(doc! { "user_id": v.id, "property_id": property_id }, None)
            .await?
            .is_some(),
        _ => false,
    };

    Ok(Json(ApiResponse::success(
        "Property fetched",
        PropertyResponse::new(property, unlocked),
    )))
}

/// Create a listing; it waits as PENDING until moderated
#[openapi(tag = "Owner")]
#[post("/owner/properties", data = "<dto>")]
pub async fn create_property(
    db: &State<DbConn>,
    guard: OwnerGuard,
    dto: Json<CreatePropertyDto>,
) -> Result<Json<ApiResponse<PropertyResponse>>, ApiError> {
    dto.validate().map_err(|e| ApiError::validation(&e))?;
    let dto = dto.into_inner();

    let now = DateTime::now();
    let mut property = Property {
        id: None,
        slug: property_slug(&dto.title),
        owner_id: guard.0.id,
        title: dto.title.trim().to_string(),
        description: dto.description.trim().to_string(),
        property_type: dto.property_type,
        price: dto.price,
        bedrooms: dto.bedrooms,
        bathrooms: dto.bathrooms,
        area_sqft: dto.area_sqft,
        division: dto.division.trim().to_string(),
        district: dto.district.trim().to_string(),
        upazila: dto.upazila.trim().to_string(),
        address: dto.address.trim().to_string(),
        images: dto.images,
        contact_phone: dto.contact_phone,
        contact_email: dto.contact_email,
        status: PropertyStatus::Pending,
        rejection_reason: None,
        created_at: now,
        updated_at: now,
    };

    let collection = db.collection::<Property>(PROPERTIES);
    let mut attempt = 0;
    let inserted = loop {
        attempt += 1;
        match collection.insert_one(&property, None).await {
            Ok(res) => break res,
            // Slug suffix collided; draw another.
            Err(e) if is_duplicate_key(&e) && attempt < SLUG_ATTEMPTS => {
                property.slug = property_slug(&property.title);
            }
            Err(e) => return Err(ApiError::internal("Failed to create property", e)),
        }
    };

    property.id = inserted.inserted_id.as_object_id();
    info!("Property {} created by {}", property.slug, guard.0.id);

    Ok(Json(ApiResponse::success(
        "Property submitted for review",
        PropertyResponse::new(property, true),
    )))
}

#[openapi(tag = "Owner")]
#[get("/owner/properties?<status>&<page>&<limit>")]
pub async fn my_properties(
    db: &State<DbConn>,
    guard: OwnerGuard,
    status: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let mut filter = doc! { "owner_id": guard.0.id };
    if let Some(ref s) = status {
        let s = PropertyStatus::parse(s).ok_or_else(|| ApiError::bad_request("Invalid status"))?;
        filter.insert("status", s.as_str());
    }

    let (page, limit, skip) = paginate(page, limit);
    let total = db
        .collection::<Property>(PROPERTIES)
        .count_documents(filter.clone(), None)
        .await?;

    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(skip)
        .limit(limit)
        .build();
    let cursor = db.collection::<Property>(PROPERTIES).find(filter, options).await?;

    let properties: Vec<PropertyResponse> = collect(cursor)
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

#[openapi(tag = "Owner")]
#[put("/owner/properties/<id>", data = "<dto>")]
pub async fn update_property(
    db: &State<DbConn>,
    guard: OwnerGuard,
    id: String,
    dto: Json<UpdatePropertyDto>,
) -> Result<Json<ApiResponse<PropertyResponse>>, ApiError> {
    dto.validate().map_err(|e| ApiError::validation(&e))?;
    let property = load_owned(db, &guard, &id).await?;

    if property.status == PropertyStatus::Rented {
        return Err(ApiError::bad_request("Rented property cannot be edited"));
    }

    let mut set = doc! { "updated_at": DateTime::now() };
    if let Some(ref title) = dto.title {
        set.insert("title", title.trim());
    }
    if let Some(ref description) = dto.description {
        set.insert("description", description.trim());
    }
    if let Some(kind) = dto.property_type {
        set.insert("property_type", mongodb::bson::to_bson(&kind).map_err(|e| ApiError::internal("Update", e))?);
    }
    if let Some(price) = dto.price {
        set.insert("price", price);
    }
    if let Some(bedrooms) = dto.bedrooms {
        set.insert("bedrooms", bedrooms);
    }
    if let Some(bathrooms) = dto.bathrooms {
        set.insert("bathrooms", bathrooms);
    }
    if let Some(area) = dto.area_sqft {
        set.insert("area_sqft", area);
    }
    for (key, value) in [
        ("division", &dto.division),
        ("district", &dto.district),
        ("upazila", &dto.upazila),
        ("address", &dto.address),
        ("contact_phone", &dto.contact_phone),
        ("contact_email", &dto.contact_email),
    ] {
        if let Some(v) = value {
            set.insert(key, v.trim());
        }
    }
    if let Some(ref images) = dto.images {
        set.insert("images", images.clone());
    }

    // Editing a rejected listing sends it back to moderation.
    let mut update = doc! {};
    if property.status == PropertyStatus::Rejected {
        set.insert("status", PropertyStatus::Pending.as_str());
        update.insert("$unset", doc! { "rejection_reason": "" });
    }
    update.insert("$set", set);

    let property_id = property.id.ok_or_else(|| ApiError::not_found("Property not found"))?;
    db.collection::<Property>(PROPERTIES)
        .update_one(doc! { "_id": property_id }, update, None)
        .await?;

    let updated = load_property(db, property_id).await?;
    Ok(Json(ApiResponse::success(
        "Property updated",
        PropertyResponse::new(updated, true),
    )))
}

#[openapi(tag = "Owner")]
#[delete("/owner/properties/<id>")]
pub async fn delete_property(
    db: &State<DbConn>,
    guard: OwnerGuard,
    id: String,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let property = load_owned(db, &guard, &id).await?;
    let property_id = property.id.ok_or_else(|| ApiError::not_found("Property not found"))?;

    let approved = db
        .collection::<Document>(BOOKINGS)
        .count_documents(
            doc! { "property_id": property_id, "status": BookingStatus::Approved.as_str() },
            None,
        )
        .await?;
    if approved > 0 {
        return Err(ApiError::bad_request("Property has an approved booking"));
    }

    db.collection::<Property>(PROPERTIES)
        .delete_one(doc! { "_id": property_id }, None)
        .await?;
    db.collection::<Document>(BOOKINGS)
        .delete_many(doc! { "property_id": property_id }, None)
        .await?;

    info!("Property {} deleted by {}", property.slug, guard.0.id);
    Ok(Json(ApiResponse::message("Property deleted")))
}

#[openapi(tag = "Owner")]
#[patch("/owner/properties/<id>/rented")]
pub async fn mark_rented(
    db: &State<DbConn>,
    guard: OwnerGuard,
    id: String,
) -> Result<Json<ApiResponse<PropertyResponse>>, ApiError> {
    let property = load_owned(db, &guard, &id).await?;
    let property_id = property.id.ok_or_else(|| ApiError::not_found("Property not found"))?;

    let res = db
        .collection::<Property>(PROPERTIES)
        .update_one(
            doc! { "_id": property_id, "status": PropertyStatus::Available.as_str() },
            doc! { "$set": {
                "status": PropertyStatus::Rented.as_str(),
                "updated_at": DateTime::now()
            } },
            None,
        )
        .await?;

    if res.modified_count == 0 {
        return Err(ApiError::bad_request("Only available properties can be marked rented"));
    }

    let updated = load_property(db, property_id).await?;
    Ok(Json(ApiResponse::success(
        "Property marked as rented",
        PropertyResponse::new(updated, true),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> PropertySearchQuery {
        PropertySearchQuery {
            division: None,
            district: None,
            upazila: None,
            property_type: None,
            min_price: None,
            max_price: None,
            bedrooms: None,
            q: None,
            page: None,
            limit: None,
        }
    }

    fn viewer(role: crate::models::Role) -> CurrentUser {
        let id = ObjectId::new();
        let now = DateTime::now();
        CurrentUser {
            id,
            user: crate::models::User {
                id: Some(id),
                name: "Viewer".into(),
                email: "viewer@example.com".into(),
                phone: None,
                password_hash: String::new(),
                role,
                credits: 0,
                status: crate::models::UserStatus::Active,
                address: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    fn listing(owner_id: ObjectId) -> Property {
        let now = DateTime::now();
        Property {
            id: Some(ObjectId::new()),
            slug: "office-gulshan-q9".into(),
            owner_id,
            title: "Office in Gulshan".into(),
            description: "Open floor office".into(),
            property_type: PropertyType::Office,
            price: 40000,
            bedrooms: 0,
            bathrooms: 2,
            area_sqft: Some(1500),
            division: "Dhaka".into(),
            district: "Dhaka".into(),
            upazila: "Gulshan".into(),
            address: "Avenue 2".into(),
            images: vec![],
            contact_phone: "01911111111".into(),
            contact_email: None,
            status: PropertyStatus::Pending,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn stored_role_decides_full_visibility() {
        use crate::models::Role;

        let owner = viewer(Role::Owner);
        let flat = listing(owner.id);

        assert!(sees_everything(Some(&owner), &flat));
        assert!(sees_everything(Some(&viewer(Role::Admin)), &flat));
        // A demoted admin is a plain user in the database.
        assert!(!sees_everything(Some(&viewer(Role::Tenant)), &flat));
        assert!(!sees_everything(Some(&viewer(Role::Owner)), &flat));
        assert!(!sees_everything(None, &flat));
    }

    #[test]
    fn empty_query_lists_available_only() {
        let filter = search_filter(&query()).unwrap();
        assert_eq!(filter, doc! { "status": "AVAILABLE" });
    }

    #[test]
    fn price_bounds_and_location_are_combined() {
        let mut q = query();
        q.district = Some("Dhaka".into());
        q.min_price = Some(3000);
        q.max_price = Some(8000);
        q.property_type = Some("bachelor".into());

        let filter = search_filter(&q).unwrap();
        assert_eq!(filter.get_document("price").unwrap(), &doc! { "$gte": 3000_i64, "$lte": 8000_i64 });
        assert_eq!(filter.get_str("property_type").unwrap(), "BACHELOR");
        assert_eq!(
            filter.get_document("district").unwrap().get_str("$regex").unwrap(),
            "^Dhaka$"
        );
    }

    #[test]
    fn search_text_is_escaped() {
        let mut q = query();
        q.q = Some("2+ rooms".into());
        let filter = search_filter(&q).unwrap();
        let or = filter.get_array("$or").unwrap();
        let first = or[0].as_document().unwrap().get_document("title").unwrap();
        assert_eq!(first.get_str("$regex").unwrap(), r"2\+ rooms");
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let mut q = query();
        q.property_type = Some("castle".into());
        assert_eq!(search_filter(&q).unwrap_err().message, "Invalid property type");

        let mut q = query();
        q.min_price = Some(9000);
        q.max_price = Some(1000);
        assert!(search_filter(&q).is_err());
    }
}
