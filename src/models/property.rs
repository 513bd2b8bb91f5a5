use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PropertyStatus {
    Pending,
    Available,
    Rented,
    Rejected,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Pending => "PENDING",
            PropertyStatus::Available => "AVAILABLE",
            PropertyStatus::Rented => "RENTED",
            PropertyStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<PropertyStatus> {
        match value.to_uppercase().as_str() {
            "PENDING" => Some(PropertyStatus::Pending),
            "AVAILABLE" => Some(PropertyStatus::Available),
            "RENTED" => Some(PropertyStatus::Rented),
            "REJECTED" => Some(PropertyStatus::Rejected),
            _ => None,
        }
    }

    /// Moderation moves: `PENDING -> AVAILABLE | REJECTED` and
    /// `AVAILABLE -> RENTED | REJECTED`. Rejected and rented listings are
    /// terminal, whatever status was asked for.
    pub fn ensure_can_change_to(self, next: PropertyStatus) -> Result<(), String> {
        use PropertyStatus::*;

        match (self, next) {
            (Rejected, _) => Err("Property is already rejected".to_string()),
            (Rented, _) => Err("Property is already rented".to_string()),
            (current, next) if current == next => Err(format!(
                "Property is already {}",
                current.as_str().to_lowercase()
            )),
            (Pending, Available | Rejected) | (Available, Rented | Rejected) => Ok(()),
            (current, next) => Err(format!(
                "Cannot change status from {} to {}",
                current.as_str().to_lowercase(),
                next.as_str().to_lowercase()
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PropertyType {
    Family,
    Bachelor,
    Sublet,
    Office,
    Shop,
}

impl PropertyType {
    pub fn parse(value: &str) -> Option<PropertyType> {
        match value.to_uppercase().as_str() {
            "FAMILY" => Some(PropertyType::Family),
            "BACHELOR" => Some(PropertyType::Bachelor),
            "SUBLET" => Some(PropertyType::Sublet),
            "OFFICE" => Some(PropertyType::Office),
            "SHOP" => Some(PropertyType::Shop),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Property {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub slug: String,
    pub owner_id: ObjectId,
    pub title: String,
    pub description: String,
    pub property_type: PropertyType,
    pub price: i64,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub area_sqft: Option<i32>,
    pub division: String,
    pub district: String,
    pub upazila: String,
    pub address: String,
    pub images: Vec<String>,
    pub contact_phone: String,
    pub contact_email: Option<String>,
    pub status: PropertyStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Property {
    pub fn full_address(&self) -> String {
        format!(
            "{}, {}, {}, {}",
            self.address, self.upazila, self.district, self.division
        )
    }
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreatePropertyDto {
    #[validate(length(min = 5, max = 120, message = "Title must be 5-120 characters"))]
    pub title: String,
    #[validate(length(min = 20, message = "Description must be at least 20 characters"))]
    pub description: String,
    pub property_type: PropertyType,
    #[validate(range(min = 1, message = "Price must be positive"))]
    pub price: i64,
    #[validate(range(min = 0, max = 50, message = "Bedrooms must be 0-50"))]
    pub bedrooms: i32,
    #[validate(range(min = 0, max = 50, message = "Bathrooms must be 0-50"))]
    pub bathrooms: i32,
    #[validate(range(min = 1, message = "Area must be positive"))]
    pub area_sqft: Option<i32>,
    #[validate(length(min = 1, message = "Division is required"))]
    pub division: String,
    #[validate(length(min = 1, message = "District is required"))]
    pub district: String,
    #[validate(length(min = 1, message = "Upazila is required"))]
    pub upazila: String,
    #[validate(length(min = 3, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 1, max = 12, message = "Add 1-12 images"))]
    pub images: Vec<String>,
    #[validate(custom = "crate::utils::bd_phone")]
    pub contact_phone: String,
    #[validate(email(message = "Enter a valid email"))]
    pub contact_email: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UpdatePropertyDto {
    #[validate(length(min = 5, max = 120, message = "Title must be 5-120 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 20, message = "Description must be at least 20 characters"))]
    pub description: Option<String>,
    pub property_type: Option<PropertyType>,
    #[validate(range(min = 1, message = "Price must be positive"))]
    pub price: Option<i64>,
    #[validate(range(min = 0, max = 50, message = "Bedrooms must be 0-50"))]
    pub bedrooms: Option<i32>,
    #[validate(range(min = 0, max = 50, message = "Bathrooms must be 0-50"))]
    pub bathrooms: Option<i32>,
    #[validate(range(min = 1, message = "Area must be positive"))]
    pub area_sqft: Option<i32>,
    pub division: Option<String>,
    pub district: Option<String>,
    pub upazila: Option<String>,
    pub address: Option<String>,
    #[validate(length(min = 1, max = 12, message = "Add 1-12 images"))]
    pub images: Option<Vec<String>>,
    #[validate(custom = "crate::utils::bd_phone")]
    pub contact_phone: Option<String>,
    #[validate(email(message = "Enter a valid email"))]
    pub contact_email: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdatePropertyStatusDto {
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct PropertySearchQuery {
    pub division: Option<String>,
    pub district: Option<String>,
    pub upazila: Option<String>,
    pub property_type: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub bedrooms: Option<i32>,
    pub q: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PropertyResponse {
    pub id: String,
    pub slug: String,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub property_type: PropertyType,
    pub price: i64,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub area_sqft: Option<i32>,
    pub division: String,
    pub district: String,
    pub upazila: String,
    pub address: String,
    pub images: Vec<String>,
    pub status: PropertyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub unlocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
}

impl PropertyResponse {
    /// Builds the public view; contact details only when `show_contact`.
    pub fn new(property: Property, show_contact: bool) -> Self {
        PropertyResponse {
            id: property.id.map(|id| id.to_hex()).unwrap_or_default(),
            slug: property.slug,
            owner_id: property.owner_id.to_hex(),
            title: property.title,
            description: property.description,
            property_type: property.property_type,
            price: property.price,
            bedrooms: property.bedrooms,
            bathrooms: property.bathrooms,
            area_sqft: property.area_sqft,
            division: property.division,
            district: property.district,
            upazila: property.upazila,
            address: property.address,
            images: property.images,
            status: property.status,
            rejection_reason: property.rejection_reason,
            unlocked: show_contact,
            contact_phone: show_contact.then_some(property.contact_phone),
            contact_email: if show_contact { property.contact_email } else { None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Property {
        Property {
            id: Some(ObjectId::new()),
            slug: "lake-view-abc123".into(),
            owner_id: ObjectId::new(),
            title: "Lake View".into(),
            description: "Two bedroom flat facing the lake".into(),
            property_type: PropertyType::Family,
            price: 5000,
            bedrooms: 2,
            bathrooms: 1,
            area_sqft: Some(900),
            division: "Dhaka".into(),
            district: "Dhaka".into(),
            upazila: "Dhanmondi".into(),
            address: "Road 7".into(),
            images: vec!["/uploads/images/a.png".into()],
            contact_phone: "01712345678".into(),
            contact_email: Some("owner@example.com".into()),
            status: PropertyStatus::Available,
            rejection_reason: None,
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        }
    }

    #[test]
    fn terminal_statuses_refuse_every_change() {
        for next in [
            PropertyStatus::Pending,
            PropertyStatus::Available,
            PropertyStatus::Rented,
            PropertyStatus::Rejected,
        ] {
            assert_eq!(
                PropertyStatus::Rejected.ensure_can_change_to(next),
                Err("Property is already rejected".to_string())
            );
            assert_eq!(
                PropertyStatus::Rented.ensure_can_change_to(next),
                Err("Property is already rented".to_string())
            );
        }
    }

    #[test]
    fn open_statuses_move_but_not_to_themselves() {
        assert!(PropertyStatus::Pending.ensure_can_change_to(PropertyStatus::Available).is_ok());
        assert!(PropertyStatus::Available.ensure_can_change_to(PropertyStatus::Rented).is_ok());
        assert_eq!(
            PropertyStatus::Available.ensure_can_change_to(PropertyStatus::Available),
            Err("Property is already available".to_string())
        );
    }

    #[test]
    fn moderation_only_moves_forward() {
        assert!(PropertyStatus::Pending.ensure_can_change_to(PropertyStatus::Rejected).is_ok());
        assert!(PropertyStatus::Available.ensure_can_change_to(PropertyStatus::Rejected).is_ok());
        assert_eq!(
            PropertyStatus::Pending.ensure_can_change_to(PropertyStatus::Rented),
            Err("Cannot change status from pending to rented".to_string())
        );
        assert_eq!(
            PropertyStatus::Available.ensure_can_change_to(PropertyStatus::Pending),
            Err("Cannot change status from available to pending".to_string())
        );
    }

    #[test]
    fn contact_details_hidden_until_unlocked() {
        let hidden = serde_json::to_value(PropertyResponse::new(sample(), false)).unwrap();
        assert!(hidden.get("contact_phone").is_none());
        assert_eq!(hidden["unlocked"], false);

        let shown = PropertyResponse::new(sample(), true);
        assert_eq!(shown.contact_phone.as_deref(), Some("01712345678"));
        assert_eq!(shown.contact_email.as_deref(), Some("owner@example.com"));
    }
}
