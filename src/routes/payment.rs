use mongodb::bson::{doc, DateTime, Document};
use mongodb::options::FindOptions;
use rocket::form::Form;
use rocket::http::ContentType;
use rocket::serde::json::Json;
use rocket::State;
use rocket_dyn_templates::{context, Template};
use rocket_okapi::openapi;
use validator::Validate;
use log::{error, info, warn};

use crate::config::Config;
use crate::db::{DbConn, BOOKINGS, PACKAGES, PAYMENTS, PROPERTIES, USERS};
use crate::guards::{CurrentUser, TenantGuard};
use crate::models::{
    find_plan, BookingRequest, BookingStatus, Package, PackagePaymentDto, PackageResponse, Payment,
    PaymentListQuery, PaymentResponse, PaymentStatus, Property, RentPaymentDto, User,
    PACKAGE_PLANS,
};
use crate::services::payments::{
    self, close_unpaid, new_transaction_id, rent_payment, SettleOutcome, PACKAGE_PREFIX,
    RENT_PREFIX,
};
use crate::services::receipt::{self as receipt_render, ReceiptFields};
use crate::services::sslcommerz::{CheckoutRequest, Customer};
use crate::services::SslCommerzService;
use crate::utils::{
    collect, object_id, paginate, pagination_json, parse_date, ApiError, ApiResponse,
};

fn customer(user: &User, city: Option<&str>) -> Customer {
    Customer {
        name: user.name.clone(),
        email: user.email.clone(),
        phone: user.phone.clone(),
        address: user.address.clone(),
        city: city.map(str::to_string),
        postcode: None,
    }
}

/// Opens the checkout; on failure the record is closed as FAILED.
async fn open_checkout(db: &DbConn, req: &CheckoutRequest) -> Result<String, ApiError> {
    match SslCommerzService::init(req).await {
        Ok(url) => Ok(url),
        Err(e) => {
            error!("Gateway init failed for {}: {}", req.transaction_id, e);
            close_unpaid(db, &req.transaction_id, PaymentStatus::Failed).await?;
            Err(ApiError::bad_gateway("Payment gateway error"))
        }
    }
}

fn redirect_body(url: String, transaction_id: String) -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(
        "Redirecting to payment gateway",
        serde_json::json!({ "url": url, "transaction_id": transaction_id }),
    ))
}

/// Start paying rent for an approved booking
#[openapi(tag = "Payments")]
#[post("/payments/rent", data = "<dto>")]
pub async fn pay_rent(
    db: &State<DbConn>,
    guard: TenantGuard,
    dto: Json<RentPaymentDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate().map_err(|e| ApiError::validation(&e))?;
    if parse_date(&dto.start_date).is_none() {
        return Err(ApiError::bad_request("Start date must be YYYY-MM-DD"));
    }
    let tenant = &guard.0;

    let property_id = object_id(&dto.property_id, "Property not found")?;
    let property = db
        .collection::<Property>(PROPERTIES)
        .find_one(doc! { "_id": property_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Property not found"))?;

    let booking = db
        .collection::<BookingRequest>(BOOKINGS)
        .find_one(
            doc! {
                "tenant_id": tenant.id,
                "property_id": property_id,
                "status": BookingStatus::Approved.as_str()
            },
            None,
        )
        .await?;

    let transaction_id = new_transaction_id(RENT_PREFIX);
    let payment = rent_payment(
        tenant.id,
        &property,
        booking.as_ref(),
        &dto.start_date,
        transaction_id.clone(),
    )?;

    db.collection::<Payment>(PAYMENTS)
        .insert_one(&payment, None)
        .await
        .map_err(|e| ApiError::internal("Failed to create payment", e))?;

    let checkout = CheckoutRequest {
        transaction_id: transaction_id.clone(),
        amount: payment.amount,
        product_name: payment.description.clone(),
        product_category: "rent".to_string(),
        customer: customer(&tenant.user, Some(&property.district)),
    };
    let url = open_checkout(db, &checkout).await?;

    info!("Rent payment {} started by {}", transaction_id, tenant.id);
    Ok(redirect_body(url, transaction_id))
}

/// Credit packages on sale
#[openapi(tag = "Payments")]
#[get("/packages")]
pub async fn list_packages() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(
        "Packages fetched",
        serde_json::json!(PACKAGE_PLANS),
    ))
}

/// Start buying a credit package
#[openapi(tag = "Payments")]
#[post("/payments/package", data = "<dto>")]
pub async fn buy_package(
    db: &State<DbConn>,
    current: CurrentUser,
    dto: Json<PackagePaymentDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate().map_err(|e| ApiError::validation(&e))?;
    let plan = find_plan(&dto.package_name, dto.amount)
        .ok_or_else(|| ApiError::bad_request("Invalid package"))?;

    let transaction_id = new_transaction_id(PACKAGE_PREFIX);
    let now = DateTime::now();
    let package = Package {
        id: None,
        user_id: current.id,
        transaction_id: transaction_id.clone(),
        package_name: plan.name.to_string(),
        amount: plan.price,
        credits: plan.credits,
        active: false,
        status: PaymentStatus::Pending,
        validation_id: None,
        activated_at: None,
        created_at: now,
        updated_at: now,
    };

    db.collection::<Package>(PACKAGES)
        .insert_one(&package, None)
        .await
        .map_err(|e| ApiError::internal("Failed to create package", e))?;

    let checkout = CheckoutRequest {
        transaction_id: transaction_id.clone(),
        amount: plan.price,
        product_name: format!("{} credit package", plan.name),
        product_category: "credits".to_string(),
        customer: customer(&current.user, None),
    };
    let url = open_checkout(db, &checkout).await?;

    info!("Package {} ({}) started by {}", transaction_id, plan.name, current.id);
    Ok(redirect_body(url, transaction_id))
}

/// Fields the gateway posts back to the callback URLs.
#[derive(Debug, FromForm)]
pub struct GatewayCallback {
    pub tran_id: Option<String>,
    pub val_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Paid,
    Failed,
    Cancelled,
    Mismatch,
    Unknown,
    Forged,
}

impl PageOutcome {
    fn title(self) -> &'static str {
        match self {
            PageOutcome::Paid => "Payment successful",
            PageOutcome::Cancelled => "Payment cancelled",
            _ => "Payment failed",
        }
    }

    fn message(self) -> &'static str {
        match self {
            PageOutcome::Paid => "Your payment has been received. You can close this page.",
            PageOutcome::Failed => "The payment could not be completed. No money was taken.",
            PageOutcome::Cancelled => "You cancelled the payment.",
            PageOutcome::Mismatch => "The paid amount did not match. Please contact support.",
            PageOutcome::Unknown => "We could not find this transaction.",
            PageOutcome::Forged => "This payment link is not valid.",
        }
    }

    fn from_settlement(outcome: SettleOutcome) -> Self {
        match outcome {
            SettleOutcome::Settled | SettleOutcome::AlreadySettled => PageOutcome::Paid,
            SettleOutcome::AmountMismatch => PageOutcome::Mismatch,
            SettleOutcome::NotFound => PageOutcome::Unknown,
        }
    }
}

fn result_page(outcome: PageOutcome, tran_id: &str) -> Template {
    Template::render(
        "payment_result",
        context! {
            success: outcome == PageOutcome::Paid,
            title: outcome.title(),
            message: outcome.message(),
            transaction_id: tran_id,
            dashboard_url: format!("{}/dashboard/payments", Config::frontend_url()),
        },
    )
}

/// Callback query must be signed by us and agree with the posted form.
fn authentic(tran_id: &str, sig: &str, form: &GatewayCallback) -> bool {
    let form_matches = form.tran_id.as_deref().map(|t| t == tran_id).unwrap_or(true);
    form_matches && SslCommerzService::verify_signature(tran_id, sig)
}

/// Validates `val_id` with the gateway and applies it.
async fn confirm(db: &DbConn, tran_id: &str, form: &GatewayCallback) -> Result<SettleOutcome, ApiError> {
    let val_id = form
        .val_id
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing validation id"))?;

    let validation = SslCommerzService::validate(val_id).await.map_err(|e| {
        error!("Validation call failed for {}: {}", tran_id, e);
        ApiError::bad_gateway("Payment gateway error")
    })?;

    if validation.tran_id != tran_id {
        warn!("Validation for {} reported transaction {}", tran_id, validation.tran_id);
        return Err(ApiError::bad_request("Transaction mismatch"));
    }
    if !validation.is_valid() {
        close_unpaid(db, tran_id, PaymentStatus::Failed).await?;
        return Err(ApiError::bad_request("Payment was not validated"));
    }

    let outcome = payments::settle(db, &validation).await?;
    if outcome == SettleOutcome::AmountMismatch {
        close_unpaid(db, tran_id, PaymentStatus::Failed).await?;
    }
    Ok(outcome)
}

#[post("/payments/callback/success?<tran_id>&<sig>", data = "<form>")]
pub async fn callback_success(
    db: &State<DbConn>,
    tran_id: String,
    sig: String,
    form: Form<GatewayCallback>,
) -> Template {
    if !authentic(&tran_id, &sig, &form) {
        warn!("Rejected unsigned success callback for {}", tran_id);
        return result_page(PageOutcome::Forged, &tran_id);
    }

    match confirm(db, &tran_id, &form).await {
        Ok(outcome) => result_page(PageOutcome::from_settlement(outcome), &tran_id),
        Err(e) => {
            warn!("Success callback for {} not applied: {}", tran_id, e.message);
            result_page(PageOutcome::Failed, &tran_id)
        }
    }
}

async fn close_from_callback(
    db: &DbConn,
    tran_id: &str,
    sig: &str,
    form: &GatewayCallback,
    status: PaymentStatus,
) -> PageOutcome {
    if !authentic(tran_id, sig, form) {
        warn!("Rejected unsigned callback for {}", tran_id);
        return PageOutcome::Forged;
    }
    if let Err(e) = close_unpaid(db, tran_id, status).await {
        error!("Could not close {} as {}: {}", tran_id, status.as_str(), e);
    }
    if status == PaymentStatus::Cancelled {
        PageOutcome::Cancelled
    } else {
        PageOutcome::Failed
    }
}

#[post("/payments/callback/fail?<tran_id>&<sig>", data = "<form>")]
pub async fn callback_fail(
    db: &State<DbConn>,
    tran_id: String,
    sig: String,
    form: Form<GatewayCallback>,
) -> Template {
    let outcome = close_from_callback(db, &tran_id, &sig, &form, PaymentStatus::Failed).await;
    result_page(outcome, &tran_id)
}

#[post("/payments/callback/cancel?<tran_id>&<sig>", data = "<form>")]
pub async fn callback_cancel(
    db: &State<DbConn>,
    tran_id: String,
    sig: String,
    form: Form<GatewayCallback>,
) -> Template {
    let outcome = close_from_callback(db, &tran_id, &sig, &form, PaymentStatus::Cancelled).await;
    result_page(outcome, &tran_id)
}

/// Server-to-server notification; same settlement as the success callback.
#[post("/payments/ipn?<tran_id>&<sig>", data = "<form>")]
pub async fn ipn(
    db: &State<DbConn>,
    tran_id: String,
    sig: String,
    form: Form<GatewayCallback>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if !authentic(&tran_id, &sig, &form) {
        return Err(ApiError::forbidden("Invalid signature"));
    }

    let reported = form.status.as_deref().unwrap_or("").to_uppercase();
    match reported.as_str() {
        "FAILED" | "CANCELLED" | "UNATTEMPTED" | "EXPIRED" => {
            let status = if reported == "CANCELLED" {
                PaymentStatus::Cancelled
            } else {
                PaymentStatus::Failed
            };
            close_unpaid(db, &tran_id, status).await?;
            Ok(Json(ApiResponse::success(
                "IPN recorded",
                serde_json::json!({ "status": status }),
            )))
        }
        _ => {
            let outcome = confirm(db, &tran_id, &form).await?;
            Ok(Json(ApiResponse::success(
                "IPN processed",
                serde_json::json!({ "outcome": outcome }),
            )))
        }
    }
}

fn list_filter(user: &CurrentUser, query: &PaymentListQuery) -> Result<Document, ApiError> {
    let mut filter = doc! { "user_id": user.id };
    if let Some(ref s) = query.status {
        let s = PaymentStatus::parse(s).ok_or_else(|| ApiError::bad_request("Invalid status"))?;
        filter.insert("status", s.as_str());
    }
    Ok(filter)
}

#[openapi(tag = "Payments")]
#[get("/payments/mine?<query..>")]
pub async fn my_payments(
    db: &State<DbConn>,
    current: CurrentUser,
    query: PaymentListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let filter = list_filter(&current, &query)?;
    let (page, limit, skip) = paginate(query.page, query.limit);

    let collection = db.collection::<Payment>(PAYMENTS);
    let total = collection.count_documents(filter.clone(), None).await?;
    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(skip)
        .limit(limit)
        .build();

    let payments: Vec<PaymentResponse> = collect(collection.find(filter, options).await?)
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

#[openapi(tag = "Payments")]
#[get("/packages/mine?<query..>")]
pub async fn my_packages(
    db: &State<DbConn>,
    current: CurrentUser,
    query: PaymentListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let filter = list_filter(&current, &query)?;
    let (page, limit, skip) = paginate(query.page, query.limit);

    let collection = db.collection::<Package>(PACKAGES);
    let total = collection.count_documents(filter.clone(), None).await?;
    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(skip)
        .limit(limit)
        .build();

    let packages: Vec<PackageResponse> = collect(collection.find(filter, options).await?)
        .await?
        .into_iter()
        .map(PackageResponse::from)
        .collect();

    Ok(Json(ApiResponse::success(
        "Packages fetched",
        serde_json::json!({
            "packages": packages,
            "pagination": pagination_json(page, limit, total)
        }),
    )))
}

/// PNG receipt for a paid rent payment
#[get("/payments/<id>/receipt")]
pub async fn receipt(
    db: &State<DbConn>,
    current: CurrentUser,
    id: String,
) -> Result<(ContentType, Vec<u8>), ApiError> {
    let payment_id = object_id(&id, "Payment not found")?;
    let payment = db
        .collection::<Payment>(PAYMENTS)
        .find_one(doc! { "_id": payment_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Payment not found"))?;

    if payment.user_id != current.id && !current.user.is_admin() {
        return Err(ApiError::forbidden("Unauthorized"));
    }
    if !payment.paid {
        return Err(ApiError::bad_request("Payment is not completed"));
    }

    let property = match payment.property_id {
        Some(pid) => db
            .collection::<Property>(PROPERTIES)
            .find_one(doc! { "_id": pid }, None)
            .await?,
        None => None,
    };
    let owner = match property.as_ref() {
        Some(p) => db
            .collection::<User>(USERS)
            .find_one(doc! { "_id": p.owner_id }, None)
            .await?,
        None => None,
    };
    let tenant = if payment.user_id == current.id {
        Some(current.user.clone())
    } else {
        db.collection::<User>(USERS)
            .find_one(doc! { "_id": payment.user_id }, None)
            .await?
    };

    let paid_at = payment.paid_at.unwrap_or(payment.updated_at);
    let paid_on = chrono::DateTime::from_timestamp_millis(paid_at.timestamp_millis())
        .map(|d| d.format("%d %b %Y").to_string())
        .unwrap_or_default();

    let fields = ReceiptFields {
        payment_id: payment_id.to_hex(),
        transaction_id: payment.transaction_id.clone(),
        tenant_name: tenant.as_ref().map(|t| t.name.clone()).unwrap_or_default(),
        tenant_address: tenant.and_then(|t| t.address).unwrap_or_else(|| "N/A".to_string()),
        owner_name: owner.map(|o| o.name).unwrap_or_else(|| "N/A".to_string()),
        property_address: property.map(|p| p.full_address()).unwrap_or_else(|| "N/A".to_string()),
        amount: payment.amount.to_string(),
        date: paid_on,
    };

    let png = tokio::task::spawn_blocking(move || {
        receipt_render::render_from_files(
            &Config::receipt_template(),
            &Config::receipt_owner_signature(),
            &Config::receipt_tenant_signature(),
            &Config::receipt_font(),
            &fields,
        )
    })
    .await
    .map_err(|e| ApiError::internal("Receipt task failed", e))?
    .map_err(|e| ApiError::internal("Receipt rendering failed", e))?;

    Ok((ContentType::PNG, png))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(tran_id: Option<&str>) -> GatewayCallback {
        GatewayCallback {
            tran_id: tran_id.map(str::to_string),
            val_id: Some("VAL123".into()),
            status: Some("VALID".into()),
        }
    }

    #[test]
    fn callbacks_need_our_signature() {
        let tran_id = "RENT-abc";
        let sig = SslCommerzService::sign(tran_id).unwrap();

        assert!(authentic(tran_id, &sig, &form(Some(tran_id))));
        assert!(authentic(tran_id, &sig, &form(None)));
        assert!(!authentic(tran_id, "deadbeef", &form(Some(tran_id))));
        assert!(!authentic(tran_id, &sig, &form(Some("RENT-other"))));
    }

    #[test]
    fn receipt_without_assets_is_an_error() {
        let err = receipt_render::render_from_files(
            "missing/template.png",
            "missing/owner.png",
            "missing/tenant.png",
            "missing/font.ttf",
            &ReceiptFields::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing/template.png"));
    }

    #[test]
    fn settlement_maps_to_page() {
        assert_eq!(PageOutcome::from_settlement(SettleOutcome::AlreadySettled), PageOutcome::Paid);
        assert_eq!(PageOutcome::from_settlement(SettleOutcome::AmountMismatch), PageOutcome::Mismatch);
        assert_eq!(PageOutcome::Cancelled.title(), "Payment cancelled");
        assert_eq!(PageOutcome::Forged.title(), "Payment failed");
    }

    #[test]
    fn customer_carries_profile_details() {
        let user = User {
            id: None,
            name: "Rahim".into(),
            email: "rahim@example.com".into(),
            phone: Some("01712345678".into()),
            password_hash: String::new(),
            role: crate::models::Role::Tenant,
            credits: 0,
            status: crate::models::UserStatus::Active,
            address: None,
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        };
        let c = customer(&user, Some("Dhaka"));
        assert_eq!(c.city.as_deref(), Some("Dhaka"));
        assert_eq!(c.phone.as_deref(), Some("01712345678"));
        assert!(c.address.is_none());
    }
}
