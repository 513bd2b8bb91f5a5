use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

pub const CURRENCY: &str = "BDT";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<PaymentStatus> {
        match value.to_uppercase().as_str() {
            "PENDING" => Some(PaymentStatus::Pending),
            "PAID" => Some(PaymentStatus::Paid),
            "FAILED" => Some(PaymentStatus::Failed),
            "CANCELLED" => Some(PaymentStatus::Cancelled),
            "EXPIRED" => Some(PaymentStatus::Expired),
            _ => None,
        }
    }
}

/// One-off rent payment.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Payment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub transaction_id: String,
    pub booking_id: Option<ObjectId>,
    pub property_id: Option<ObjectId>,
    pub amount: i64,
    pub currency: String,
    pub paid: bool,
    pub status: PaymentStatus,
    pub description: String,
    pub start_date: Option<String>,
    pub validation_id: Option<String>,
    pub paid_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// Credit package purchase, settled through the same gateway flow.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Package {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub transaction_id: String,
    pub package_name: String,
    pub amount: i64,
    pub credits: i64,
    pub active: bool,
    pub status: PaymentStatus,
    pub validation_id: Option<String>,
    pub activated_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackagePlan {
    pub name: &'static str,
    pub price: i64,
    pub credits: i64,
}

pub const PACKAGE_PLANS: [PackagePlan; 3] = [
    PackagePlan { name: "basic", price: 500, credits: 10 },
    PackagePlan { name: "standard", price: 1000, credits: 25 },
    PackagePlan { name: "premium", price: 2000, credits: 60 },
];

/// Looks up a plan, requiring the quoted amount to match its price.
pub fn find_plan(name: &str, amount: i64) -> Option<PackagePlan> {
    PACKAGE_PLANS
        .iter()
        .copied()
        .find(|p| p.name.eq_ignore_ascii_case(name.trim()) && p.price == amount)
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct RentPaymentDto {
    pub property_id: String,
    #[validate(length(min = 10, max = 10, message = "Start date must be YYYY-MM-DD"))]
    pub start_date: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct PackagePaymentDto {
    #[validate(length(min = 1, message = "Package name is required"))]
    pub package_name: String,
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: i64,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct PaymentListQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PaymentResponse {
    pub id: String,
    pub transaction_id: String,
    pub booking_id: Option<String>,
    pub property_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub paid: bool,
    pub status: PaymentStatus,
    pub description: String,
    pub start_date: Option<String>,
    pub created_at: String,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        PaymentResponse {
            id: p.id.map(|id| id.to_hex()).unwrap_or_default(),
            transaction_id: p.transaction_id,
            booking_id: p.booking_id.map(|id| id.to_hex()),
            property_id: p.property_id.map(|id| id.to_hex()),
            amount: p.amount,
            currency: p.currency,
            paid: p.paid,
            status: p.status,
            description: p.description,
            start_date: p.start_date,
            created_at: p.created_at.try_to_rfc3339_string().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PackageResponse {
    pub id: String,
    pub transaction_id: String,
    pub package_name: String,
    pub amount: i64,
    pub credits: i64,
    pub active: bool,
    pub status: PaymentStatus,
    pub created_at: String,
}

impl From<Package> for PackageResponse {
    fn from(p: Package) -> Self {
        PackageResponse {
            id: p.id.map(|id| id.to_hex()).unwrap_or_default(),
            transaction_id: p.transaction_id,
            package_name: p.package_name,
            amount: p.amount,
            credits: p.credits,
            active: p.active,
            status: p.status,
            created_at: p.created_at.try_to_rfc3339_string().unwrap_or_default(),
        }
    }
}
