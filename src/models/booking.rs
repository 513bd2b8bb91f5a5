use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<BookingStatus> {
        match value.to_uppercase().as_str() {
            "PENDING" => Some(BookingStatus::Pending),
            "APPROVED" => Some(BookingStatus::Approved),
            "REJECTED" => Some(BookingStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingRequest {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub property_id: ObjectId,
    pub tenant_id: ObjectId,
    pub owner_id: ObjectId,
    pub message: Option<String>,
    pub move_in_date: Option<String>,
    pub status: BookingStatus,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// Checks an owner decision on a booking. Only `APPROVED`/`REJECTED` may be
/// requested, only from `PENDING`, and only by the listing's owner or an admin.
pub fn check_decision(
    booking: &BookingRequest,
    actor_id: &ObjectId,
    actor_is_admin: bool,
    requested: BookingStatus,
) -> Result<(), crate::utils::ApiError> {
    use crate::utils::ApiError;

    if requested == BookingStatus::Pending {
        return Err(ApiError::bad_request("Status must be APPROVED or REJECTED"));
    }
    if !actor_is_admin && booking.owner_id != *actor_id {
        return Err(ApiError::forbidden("Unauthorized"));
    }
    if booking.status != BookingStatus::Pending {
        return Err(ApiError::bad_request(format!(
            "Booking already {}",
            booking.status.as_str().to_lowercase()
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateBookingDto {
    pub property_id: String,
    #[validate(length(max = 500, message = "Message is too long"))]
    pub message: Option<String>,
    pub move_in_date: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateBookingStatusDto {
    pub status: String,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct BookingListQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct BookingResponse {
    pub id: String,
    pub property_id: String,
    pub tenant_id: String,
    pub owner_id: String,
    pub message: Option<String>,
    pub move_in_date: Option<String>,
    pub status: BookingStatus,
    pub created_at: String,
}

impl From<BookingRequest> for BookingResponse {
    fn from(b: BookingRequest) -> Self {
        BookingResponse {
            id: b.id.map(|id| id.to_hex()).unwrap_or_default(),
            property_id: b.property_id.to_hex(),
            tenant_id: b.tenant_id.to_hex(),
            owner_id: b.owner_id.to_hex(),
            message: b.message,
            move_in_date: b.move_in_date,
            status: b.status,
            created_at: b.created_at.try_to_rfc3339_string().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;

    fn booking(owner: ObjectId, status: BookingStatus) -> BookingRequest {
        BookingRequest {
            id: Some(ObjectId::new()),
            property_id: ObjectId::new(),
            tenant_id: ObjectId::new(),
            owner_id: owner,
            message: None,
            move_in_date: None,
            status,
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        }
    }

    #[test]
    fn owner_may_approve_pending() {
        let owner = ObjectId::new();
        let b = booking(owner, BookingStatus::Pending);
        assert!(check_decision(&b, &owner, false, BookingStatus::Approved).is_ok());
        assert!(check_decision(&b, &owner, false, BookingStatus::Rejected).is_ok());
    }

    #[test]
    fn stranger_is_refused_but_admin_is_not() {
        let b = booking(ObjectId::new(), BookingStatus::Pending);
        let stranger = ObjectId::new();

        let err = check_decision(&b, &stranger, false, BookingStatus::Approved).unwrap_err();
        assert_eq!(err.status, Status::Forbidden);
        assert!(check_decision(&b, &stranger, true, BookingStatus::Approved).is_ok());
    }

    #[test]
    fn decided_booking_cannot_move_again() {
        let owner = ObjectId::new();
        let b = booking(owner, BookingStatus::Rejected);
        let err = check_decision(&b, &owner, false, BookingStatus::Approved).unwrap_err();
        assert_eq!(err.message, "Booking already rejected");
    }

    #[test]
    fn pending_is_not_a_decision() {
        let owner = ObjectId::new();
        let b = booking(owner, BookingStatus::Pending);
        assert!(check_decision(&b, &owner, false, BookingStatus::Pending).is_err());
    }
}
