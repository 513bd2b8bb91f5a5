use mongodb::bson::{doc, DateTime, Document};
use mongodb::options::FindOptions;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;
use log::info;

use crate::db::{DbConn, BOOKINGS, PROPERTIES, USERS};
use crate::guards::{OwnerGuard, TenantGuard};
use crate::models::{
    check_decision, BookingListQuery, BookingRequest, BookingResponse, BookingStatus,
    CreateBookingDto, Property, PropertyStatus, UpdateBookingStatusDto, User,
};
use crate::services::EmailService;
use crate::utils::{
    collect, object_id, paginate, pagination_json, parse_date, ApiError, ApiResponse,
};

async fn list_bookings(
    db: &DbConn,
    mut filter: Document,
    query: &BookingListQuery,
) -> Result<serde_json::Value, ApiError> {
    if let Some(ref s) = query.status {
        let s = BookingStatus::parse(s).ok_or_else(|| ApiError::bad_request("Invalid status"))?;
        filter.insert("status", s.as_str());
    }

    let (page, limit, skip) = paginate(query.page, query.limit);
    let collection = db.collection::<BookingRequest>(BOOKINGS);
    let total = collection.count_documents(filter.clone(), None).await?;

    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(skip)
        .limit(limit)
        .build();
    let cursor = collection.find(filter, options).await?;

    let bookings: Vec<BookingResponse> = collect(cursor)
        .await?
        .into_iter()
        .map(BookingResponse::from)
        .collect();

    Ok(serde_json::json!({
        "bookings": bookings,
        "pagination": pagination_json(page, limit, total)
    }))
}

/// Tenant asks the owner to rent an available property
#[openapi(tag = "Bookings")]
#[post("/bookings", data = "<dto>")]
pub async fn create_booking(
    db: &State<DbConn>,
    guard: TenantGuard,
    dto: Json<CreateBookingDto>,
) -> Result<Json<ApiResponse<BookingResponse>>, ApiError> {
    dto.validate().map_err(|e| ApiError::validation(&e))?;
    let tenant = &guard.0;

    if let Some(ref date) = dto.move_in_date {
        if parse_date(date).is_none() {
            return Err(ApiError::bad_request("Move-in date must be YYYY-MM-DD"));
        }
    }

    let property_id = object_id(&dto.property_id, "Property not found")?;
    let property = db
        .collection::<Property>(PROPERTIES)
        .find_one(doc! { "_id": property_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Property not found"))?;

    if property.status != PropertyStatus::Available {
        return Err(ApiError::bad_request("Property is not available"));
    }
    if property.owner_id == tenant.id {
        return Err(ApiError::bad_request("You cannot book your own property"));
    }

    let open = db
        .collection::<BookingRequest>(BOOKINGS)
        .count_documents(
            doc! {
                "tenant_id": tenant.id,
                "property_id": property_id,
                "status": { "$in": [BookingStatus::Pending.as_str(), BookingStatus::Approved.as_str()] }
            },
            None,
        )
        .await?;
    if open > 0 {
        return Err(ApiError::conflict("You already requested this property"));
    }

    let now = DateTime::now();
    let mut booking = BookingRequest {
        id: None,
        property_id,
        tenant_id: tenant.id,
        owner_id: property.owner_id,
        message: dto.message.as_ref().map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
        move_in_date: dto.move_in_date.clone(),
        status: BookingStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    let res = db
        .collection::<BookingRequest>(BOOKINGS)
        .insert_one(&booking, None)
        .await
        .map_err(|e| ApiError::internal("Failed to create booking", e))?;
    booking.id = res.inserted_id.as_object_id();

    info!("Tenant {} requested property {}", tenant.id, property_id);

    let bg = db.inner().clone();
    let tenant_name = tenant.user.name.clone();
    let (owner_id, title) = (property.owner_id, property.title);
    tokio::spawn(async move {
        if let Ok(Some(owner)) = bg.collection::<User>(USERS).find_one(doc! { "_id": owner_id }, None).await {
            EmailService::send_booking_requested(&owner.email, &owner.name, &tenant_name, &title).await;
        }
    });

    Ok(Json(ApiResponse::success(
        "Booking request sent",
        BookingResponse::from(booking),
    )))
}

#[openapi(tag = "Bookings")]
#[get("/bookings/mine?<query..>")]
pub async fn my_bookings(
    db: &State<DbConn>,
    guard: TenantGuard,
    query: BookingListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let data = list_bookings(db, doc! { "tenant_id": guard.0.id }, &query).await?;
    Ok(Json(ApiResponse::success("Bookings fetched", data)))
}

#[openapi(tag = "Owner")]
#[get("/owner/bookings?<query..>")]
pub async fn owner_bookings(
    db: &State<DbConn>,
    guard: OwnerGuard,
    query: BookingListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let data = list_bookings(db, doc! { "owner_id": guard.0.id }, &query).await?;
    Ok(Json(ApiResponse::success("Bookings fetched", data)))
}

/// Owner approves or rejects a pending request
#[openapi(tag = "Owner")]
#[patch("/owner/bookings/<id>", data = "<dto>")]
pub async fn decide_booking(
    db: &State<DbConn>,
    guard: OwnerGuard,
    id: String,
    dto: Json<UpdateBookingStatusDto>,
) -> Result<Json<ApiResponse<BookingResponse>>, ApiError> {
    let requested = BookingStatus::parse(&dto.status)
        .ok_or_else(|| ApiError::bad_request("Status must be APPROVED or REJECTED"))?;

    let booking_id = object_id(&id, "Booking not found")?;
    let collection = db.collection::<BookingRequest>(BOOKINGS);
    let booking = collection
        .find_one(doc! { "_id": booking_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Booking not found"))?;

    let actor = &guard.0;
    check_decision(&booking, &actor.id, actor.user.is_admin(), requested)?;

    // Guarded on PENDING so a concurrent decision cannot also apply.
    let res = collection
        .update_one(
            doc! { "_id": booking_id, "status": BookingStatus::Pending.as_str() },
            doc! { "$set": { "status": requested.as_str(), "updated_at": DateTime::now() } },
            None,
        )
        .await?;

    if res.modified_count == 0 {
        let current = collection
            .find_one(doc! { "_id": booking_id }, None)
            .await?
            .map(|b| b.status)
            .unwrap_or(booking.status);
        return Err(ApiError::bad_request(format!(
            "Booking already {}",
            current.as_str().to_lowercase()
        )));
    }

    info!("Booking {} {} by {}", booking_id, requested.as_str(), actor.id);

    let title = db
        .collection::<Property>(PROPERTIES)
        .find_one(doc! { "_id": booking.property_id }, None)
        .await?
        .map(|p| p.title)
        .unwrap_or_else(|| "your requested property".to_string());
    let approved = requested == BookingStatus::Approved;
    let bg = db.inner().clone();
    let tenant_id = booking.tenant_id;
    tokio::spawn(async move {
        if let Ok(Some(tenant)) = bg.collection::<User>(USERS).find_one(doc! { "_id": tenant_id }, None).await {
            EmailService::send_booking_decided(&tenant.email, &tenant.name, &title, approved).await;
        }
    });

    let mut decided = booking;
    decided.status = requested;
    Ok(Json(ApiResponse::success("Booking updated", BookingResponse::from(decided))))
}
