use log::{error, info, warn};
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use serde::Serialize;

use crate::config::Config;
use crate::db::{DbConn, PACKAGES, PAYMENTS, USERS};
use crate::models::{
    BookingRequest, BookingStatus, Package, Payment, PaymentStatus, Property, User, CURRENCY,
};
use crate::services::sslcommerz::{GatewayError, GatewayValidation, SslCommerzService};
use crate::services::EmailService;
use crate::utils::ApiError;

pub const RENT_PREFIX: &str = "RENT-";
pub const PACKAGE_PREFIX: &str = "PKG-";

pub fn new_transaction_id(prefix: &str) -> String {
    format!("{}{}", prefix, uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleOutcome {
    Settled,
    AlreadySettled,
    AmountMismatch,
    NotFound,
}

#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub checked: u64,
    pub settled: u64,
    pub expired: u64,
    pub skipped: u64,
}

/// Builds the pending rent record for `property`. `booking` must be an
/// approved request by this tenant for this exact property.
pub fn rent_payment(
    tenant_id: ObjectId,
    property: &Property,
    booking: Option<&BookingRequest>,
    start_date: &str,
    transaction_id: String,
) -> Result<Payment, ApiError> {
    let booking = booking
        .filter(|b| {
            b.status == BookingStatus::Approved
                && b.tenant_id == tenant_id
                && Some(b.property_id) == property.id
        })
        .ok_or_else(|| ApiError::bad_request("Booking not approved yet"))?;

    let now = DateTime::now();
    Ok(Payment {
        id: None,
        user_id: tenant_id,
        transaction_id,
        booking_id: booking.id,
        property_id: property.id,
        amount: property.price,
        currency: CURRENCY.to_string(),
        paid: false,
        status: PaymentStatus::Pending,
        description: format!("Rent for {}", property.title),
        start_date: Some(start_date.to_string()),
        validation_id: None,
        paid_at: None,
        created_at: now,
        updated_at: now,
    })
}

fn collection_for(tran_id: &str) -> &'static str {
    if tran_id.starts_with(PACKAGE_PREFIX) { PACKAGES } else { PAYMENTS }
}

fn unpaid_payment_filter(tran_id: &str) -> Document {
    doc! { "transaction_id": tran_id, "paid": false }
}

fn inactive_package_filter(tran_id: &str) -> Document {
    doc! { "transaction_id": tran_id, "active": false }
}

fn pending_filter(tran_id: &str) -> Document {
    doc! { "transaction_id": tran_id, "status": PaymentStatus::Pending.as_str() }
}

/// Conditional writes behind settlement. Each returns whether it changed
/// anything, so a record is only ever settled or closed once.
#[rocket::async_trait]
pub trait SettlementStore {
    /// Marks an unpaid rent payment paid.
    async fn mark_paid(&self, tran_id: &str, val_id: Option<String>) -> Result<bool, mongodb::error::Error>;

    /// Activates an inactive package and grants its credits, atomically.
    async fn activate(&self, package: &Package, val_id: Option<String>) -> Result<bool, mongodb::error::Error>;

    /// Moves a `PENDING` record to `status`.
    async fn close_pending(&self, tran_id: &str, status: PaymentStatus) -> Result<bool, mongodb::error::Error>;
}

pub struct MongoSettlementStore<'a> {
    pub db: &'a DbConn,
}

#[rocket::async_trait]
impl SettlementStore for MongoSettlementStore<'_> {
    async fn mark_paid(&self, tran_id: &str, val_id: Option<String>) -> Result<bool, mongodb::error::Error> {
        let now = DateTime::now();
        let res = self
            .db
            .collection::<Payment>(PAYMENTS)
            .update_one(
                unpaid_payment_filter(tran_id),
                doc! { "$set": {
                    "paid": true,
                    "status": PaymentStatus::Paid.as_str(),
                    "validation_id": val_id,
                    "paid_at": now,
                    "updated_at": now,
                } },
                None,
            )
            .await?;
        Ok(res.modified_count == 1)
    }

    async fn activate(&self, package: &Package, val_id: Option<String>) -> Result<bool, mongodb::error::Error> {
        let mut session = self.db.client().start_session(None).await?;
        session.start_transaction(None).await?;

        let now = DateTime::now();
        let activated = self
            .db
            .collection::<Package>(PACKAGES)
            .update_one_with_session(
                inactive_package_filter(&package.transaction_id),
                doc! { "$set": {
                    "active": true,
                    "status": PaymentStatus::Paid.as_str(),
                    "validation_id": val_id,
                    "activated_at": now,
                    "updated_at": now,
                } },
                None,
                &mut session,
            )
            .await;

        match activated {
            Ok(res) if res.modified_count == 1 => {}
            Ok(_) => {
                session.abort_transaction().await.ok();
                return Ok(false);
            }
            Err(e) => {
                session.abort_transaction().await.ok();
                return Err(e);
            }
        }

        let granted = self
            .db
            .collection::<User>(USERS)
            .update_one_with_session(
                doc! { "_id": package.user_id },
                doc! { "$inc": { "credits": package.credits }, "$set": { "updated_at": now } },
                None,
                &mut session,
            )
            .await;

        if let Err(e) = granted {
            session.abort_transaction().await.ok();
            return Err(e);
        }
        session.commit_transaction().await?;
        Ok(true)
    }

    async fn close_pending(&self, tran_id: &str, status: PaymentStatus) -> Result<bool, mongodb::error::Error> {
        let res = self
            .db
            .collection::<Document>(collection_for(tran_id))
            .update_one(
                pending_filter(tran_id),
                doc! { "$set": { "status": status.as_str(), "updated_at": DateTime::now() } },
                None,
            )
            .await?;
        Ok(res.modified_count == 1)
    }
}

fn notify_paid(db: &DbConn, user_id: ObjectId, description: String, amount: i64) {
    let db = db.clone();
    tokio::spawn(async move {
        if let Ok(Some(user)) = db.collection::<User>(USERS).find_one(doc! { "_id": user_id }, None).await {
            EmailService::send_payment_received(&user.email, &user.name, &description, amount).await;
        }
    });
}

/// Marks a validated rent payment paid. Only the first settlement wins.
pub async fn settle_payment<S: SettlementStore + Sync>(
    store: &S,
    payment: &Payment,
    validation: &GatewayValidation,
) -> Result<SettleOutcome, mongodb::error::Error> {
    if payment.paid {
        return Ok(SettleOutcome::AlreadySettled);
    }
    if !validation.amount_matches(payment.amount) {
        warn!(
            "Amount mismatch for {}: expected {}, gateway reported {}",
            payment.transaction_id, payment.amount, validation.amount
        );
        return Ok(SettleOutcome::AmountMismatch);
    }

    if !store.mark_paid(&payment.transaction_id, validation.val_id.clone()).await? {
        return Ok(SettleOutcome::AlreadySettled);
    }
    info!("Payment {} settled", payment.transaction_id);
    Ok(SettleOutcome::Settled)
}

/// Activates a validated package; its credits are granted exactly once.
pub async fn settle_package<S: SettlementStore + Sync>(
    store: &S,
    package: &Package,
    validation: &GatewayValidation,
) -> Result<SettleOutcome, mongodb::error::Error> {
    if package.active {
        return Ok(SettleOutcome::AlreadySettled);
    }
    if !validation.amount_matches(package.amount) {
        warn!(
            "Amount mismatch for {}: expected {}, gateway reported {}",
            package.transaction_id, package.amount, validation.amount
        );
        return Ok(SettleOutcome::AmountMismatch);
    }

    if !store.activate(package, validation.val_id.clone()).await? {
        return Ok(SettleOutcome::AlreadySettled);
    }
    info!(
        "Package {} activated, {} credits granted to {}",
        package.transaction_id, package.credits, package.user_id
    );
    Ok(SettleOutcome::Settled)
}

/// Applies a gateway-confirmed payment to whichever record owns `tran_id`.
pub async fn settle(
    db: &DbConn,
    validation: &GatewayValidation,
) -> Result<SettleOutcome, mongodb::error::Error> {
    let tran_id = validation.tran_id.as_str();
    let store = MongoSettlementStore { db };

    if tran_id.starts_with(PACKAGE_PREFIX) {
        let Some(package) = db
            .collection::<Package>(PACKAGES)
            .find_one(doc! { "transaction_id": tran_id }, None)
            .await?
        else {
            return Ok(SettleOutcome::NotFound);
        };
        let outcome = settle_package(&store, &package, validation).await?;
        if outcome == SettleOutcome::Settled {
            notify_paid(
                db,
                package.user_id,
                format!("the {} credit package", package.package_name),
                package.amount,
            );
        }
        Ok(outcome)
    } else {
        let Some(payment) = db
            .collection::<Payment>(PAYMENTS)
            .find_one(doc! { "transaction_id": tran_id }, None)
            .await?
        else {
            return Ok(SettleOutcome::NotFound);
        };
        let outcome = settle_payment(&store, &payment, validation).await?;
        if outcome == SettleOutcome::Settled {
            notify_paid(db, payment.user_id, payment.description.clone(), payment.amount);
        }
        Ok(outcome)
    }
}

/// Moves a still-pending record to a terminal unpaid status.
pub async fn close_unpaid(
    db: &DbConn,
    tran_id: &str,
    status: PaymentStatus,
) -> Result<bool, mongodb::error::Error> {
    MongoSettlementStore { db }.close_pending(tran_id, status).await
}

async fn stale_transaction_ids(
    db: &DbConn,
    collection: &str,
    cutoff: DateTime,
) -> Result<Vec<String>, mongodb::error::Error> {
    let mut cursor = db
        .collection::<Document>(collection)
        .find(
            doc! { "status": PaymentStatus::Pending.as_str(), "created_at": { "$lt": cutoff } },
            None,
        )
        .await?;

    let mut ids = Vec::new();
    while cursor.advance().await? {
        let document = cursor.deserialize_current()?;
        if let Ok(tran_id) = document.get_str("transaction_id") {
            ids.push(tran_id.to_string());
        }
    }
    Ok(ids)
}

/// Settles or expires records left `PENDING` past the expiry window, for
/// example when the process died between creating the record and the
/// gateway callback.
pub async fn reconcile(db: &DbConn) -> Result<ReconcileReport, mongodb::error::Error> {
    let cutoff = DateTime::from_millis(
        chrono::Utc::now().timestamp_millis() - Config::payment_expiry_minutes() * 60 * 1000,
    );

    let mut stale = stale_transaction_ids(db, PAYMENTS, cutoff).await?;
    stale.extend(stale_transaction_ids(db, PACKAGES, cutoff).await?);

    let mut report = ReconcileReport::default();
    for tran_id in stale {
        report.checked += 1;

        match SslCommerzService::query_transaction(&tran_id).await {
            Ok(Some(validation)) => match settle(db, &validation).await? {
                SettleOutcome::Settled => report.settled += 1,
                SettleOutcome::AmountMismatch => {
                    close_unpaid(db, &tran_id, PaymentStatus::Failed).await?;
                }
                _ => {}
            },
            Ok(None) => {
                if close_unpaid(db, &tran_id, PaymentStatus::Expired).await? {
                    report.expired += 1;
                }
            }
            Err(GatewayError::NotConfigured) => {
                if close_unpaid(db, &tran_id, PaymentStatus::Expired).await? {
                    report.expired += 1;
                }
            }
            Err(e) => {
                warn!("Could not query gateway for {}: {}", tran_id, e);
                report.skipped += 1;
            }
        }
    }

    if report.checked > 0 {
        info!(
            "Reconciliation: checked {}, settled {}, expired {}, skipped {}",
            report.checked, report.settled, report.expired, report.skipped
        );
    }
    Ok(report)
}

/// Background sweep started at liftoff.
pub fn spawn_reconciler(db: DbConn) {
    let interval = Config::reconcile_interval_secs().max(30);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval));
        loop {
            ticker.tick().await;
            if let Err(e) = reconcile(&db).await {
                error!("Reconciliation sweep failed: {}", e);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_carry_their_kind() {
        let rent = new_transaction_id(RENT_PREFIX);
        let pkg = new_transaction_id(PACKAGE_PREFIX);

        assert!(rent.starts_with("RENT-"));
        assert!(pkg.starts_with("PKG-"));
        assert_ne!(rent, new_transaction_id(RENT_PREFIX));
        assert_eq!(rent.len(), RENT_PREFIX.len() + 32);
    }

    use crate::models::{PropertyStatus, PropertyType};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn property(price: i64) -> Property {
        let now = DateTime::now();
        Property {
            id: Some(ObjectId::new()),
            slug: "flat-in-mirpur-ab12".into(),
            owner_id: ObjectId::new(),
            title: "Flat in Mirpur".into(),
            description: "Two bedroom flat near the metro".into(),
            property_type: PropertyType::Family,
            price,
            bedrooms: 2,
            bathrooms: 1,
            area_sqft: None,
            division: "Dhaka".into(),
            district: "Dhaka".into(),
            upazila: "Mirpur".into(),
            address: "Road 3".into(),
            images: vec![],
            contact_phone: "01711111111".into(),
            contact_email: None,
            status: PropertyStatus::Available,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn booking(tenant_id: ObjectId, property: &Property, status: BookingStatus) -> BookingRequest {
        let now = DateTime::now();
        BookingRequest {
            id: Some(ObjectId::new()),
            property_id: property.id.unwrap(),
            tenant_id,
            owner_id: property.owner_id,
            message: None,
            move_in_date: None,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn rent_needs_an_approved_booking_of_this_tenant() {
        let tenant = ObjectId::new();
        let flat = property(5000);
        let other_flat = property(5000);

        let pending = booking(tenant, &flat, BookingStatus::Pending);
        let rejected = booking(tenant, &flat, BookingStatus::Rejected);
        let someone_else = booking(ObjectId::new(), &flat, BookingStatus::Approved);
        let elsewhere = booking(tenant, &other_flat, BookingStatus::Approved);

        for candidate in [None, Some(&pending), Some(&rejected), Some(&someone_else), Some(&elsewhere)] {
            let err = rent_payment(tenant, &flat, candidate, "2026-11-01", "RENT-x".into()).unwrap_err();
            assert_eq!(err.message, "Booking not approved yet");
        }
    }

    #[test]
    fn approved_booking_opens_an_unpaid_rent_record() {
        let tenant = ObjectId::new();
        let flat = property(5000);
        let approved = booking(tenant, &flat, BookingStatus::Approved);

        let payment =
            rent_payment(tenant, &flat, Some(&approved), "2026-11-01", "RENT-abc".into()).unwrap();

        assert_eq!(payment.amount, 5000);
        assert!(!payment.paid);
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.user_id, tenant);
        assert_eq!(payment.booking_id, approved.id);
        assert_eq!(payment.property_id, flat.id);
        assert_eq!(payment.currency, "BDT");
        assert_eq!(payment.start_date.as_deref(), Some("2026-11-01"));
    }

    /// Same conditional-write semantics as the Mongo filters.
    #[derive(Default)]
    struct MemoryStore {
        statuses: Mutex<HashMap<String, PaymentStatus>>,
        credits: Mutex<HashMap<ObjectId, i64>>,
    }

    impl MemoryStore {
        fn status(&self, tran_id: &str) -> PaymentStatus {
            self.statuses.lock().unwrap()[tran_id]
        }
    }

    #[rocket::async_trait]
    impl SettlementStore for MemoryStore {
        async fn mark_paid(&self, tran_id: &str, _val_id: Option<String>) -> Result<bool, mongodb::error::Error> {
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.get_mut(tran_id) {
                Some(status) if *status != PaymentStatus::Paid => {
                    *status = PaymentStatus::Paid;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn activate(&self, package: &Package, _val_id: Option<String>) -> Result<bool, mongodb::error::Error> {
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.get_mut(&package.transaction_id) {
                Some(status) if *status != PaymentStatus::Paid => {
                    *status = PaymentStatus::Paid;
                    *self.credits.lock().unwrap().entry(package.user_id).or_insert(0) += package.credits;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn close_pending(&self, tran_id: &str, next: PaymentStatus) -> Result<bool, mongodb::error::Error> {
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.get_mut(tran_id) {
                Some(status) if *status == PaymentStatus::Pending => {
                    *status = next;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    fn package(user_id: ObjectId) -> Package {
        let now = DateTime::now();
        Package {
            id: None,
            user_id,
            transaction_id: "PKG-1".into(),
            package_name: "standard".into(),
            amount: 1000,
            credits: 25,
            active: false,
            status: PaymentStatus::Pending,
            validation_id: None,
            activated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn validation(tran_id: &str, amount: f64) -> GatewayValidation {
        GatewayValidation {
            status: "VALID".into(),
            tran_id: tran_id.into(),
            val_id: Some("VAL-1".into()),
            amount,
        }
    }

    #[rocket::async_test]
    async fn package_credits_are_granted_once() {
        let user = ObjectId::new();
        let store = MemoryStore::default();
        store.statuses.lock().unwrap().insert("PKG-1".into(), PaymentStatus::Pending);
        // Both callbacks read the package before either settled it.
        let snapshot = package(user);

        let first = settle_package(&store, &snapshot, &validation("PKG-1", 1000.0)).await.unwrap();
        let second = settle_package(&store, &snapshot, &validation("PKG-1", 1000.0)).await.unwrap();

        assert_eq!(first, SettleOutcome::Settled);
        assert_eq!(second, SettleOutcome::AlreadySettled);
        assert_eq!(store.credits.lock().unwrap()[&user], 25);
    }

    #[rocket::async_test]
    async fn mismatched_amount_settles_nothing() {
        let user = ObjectId::new();
        let store = MemoryStore::default();
        store.statuses.lock().unwrap().insert("PKG-1".into(), PaymentStatus::Pending);

        let outcome = settle_package(&store, &package(user), &validation("PKG-1", 999.0)).await.unwrap();

        assert_eq!(outcome, SettleOutcome::AmountMismatch);
        assert_eq!(store.status("PKG-1"), PaymentStatus::Pending);
        assert!(store.credits.lock().unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn paid_rent_cannot_be_cancelled_afterwards() {
        let tenant = ObjectId::new();
        let flat = property(5000);
        let approved = booking(tenant, &flat, BookingStatus::Approved);
        let payment = rent_payment(tenant, &flat, Some(&approved), "2026-11-01", "RENT-1".into()).unwrap();

        let store = MemoryStore::default();
        store.statuses.lock().unwrap().insert("RENT-1".into(), PaymentStatus::Pending);

        let outcome = settle_payment(&store, &payment, &validation("RENT-1", 5000.0)).await.unwrap();
        assert_eq!(outcome, SettleOutcome::Settled);

        assert!(!store.close_pending("RENT-1", PaymentStatus::Cancelled).await.unwrap());
        assert_eq!(store.status("RENT-1"), PaymentStatus::Paid);
        assert_eq!(
            settle_payment(&store, &payment, &validation("RENT-1", 5000.0)).await.unwrap(),
            SettleOutcome::AlreadySettled
        );
    }

    #[test]
    fn settlement_writes_are_conditional() {
        assert_eq!(unpaid_payment_filter("RENT-1"), doc! { "transaction_id": "RENT-1", "paid": false });
        assert_eq!(inactive_package_filter("PKG-1"), doc! { "transaction_id": "PKG-1", "active": false });
        assert_eq!(
            pending_filter("PKG-1"),
            doc! { "transaction_id": "PKG-1", "status": "PENDING" }
        );
        assert_eq!(collection_for("PKG-1"), PACKAGES);
        assert_eq!(collection_for("RENT-1"), PAYMENTS);
    }
}
