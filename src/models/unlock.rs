use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// Credits spent to reveal a listing's contact details.
pub const UNLOCK_COST: i64 = 2;

/// Existence of a row means the user has paid to see the owner's contact.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PropertyUnlock {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub property_id: ObjectId,
    pub credits_spent: i64,
    pub created_at: DateTime,
}
