use log::{info, warn};
use mongodb::bson::{doc, oid::ObjectId, DateTime};
use mongodb::error::TRANSIENT_TRANSACTION_ERROR;
use thiserror::Error;

use crate::db::{is_duplicate_key, DbConn, UNLOCKS, USERS};
use crate::models::{Property, PropertyStatus, PropertyUnlock, Role, User, UNLOCK_COST};
use crate::utils::{ApiError, ApiResponse};

const MAX_TXN_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("user {0} not found")]
    UserMissing(ObjectId),
}

/// Result of an unlock attempt, with the balance after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked { credits: i64 },
    AlreadyUnlocked { credits: i64 },
    InsufficientCredits { credits: i64 },
}

/// Atomic "spend credits and record the unlock" primitive.
#[rocket::async_trait]
pub trait UnlockStore {
    async fn unlock(
        &self,
        user_id: ObjectId,
        property_id: ObjectId,
        cost: i64,
    ) -> Result<UnlockOutcome, StoreError>;
}

/// Only listed properties can be unlocked; others read as missing, the
/// same way the detail page hides them.
pub fn ensure_unlockable(property: Option<&Property>) -> Result<(), ApiError> {
    match property {
        Some(p) if p.status == PropertyStatus::Available => Ok(()),
        _ => Err(ApiError::not_found("Property not found")),
    }
}

/// Runs the unlock on behalf of `user` and maps the outcome to the API
/// envelope. Only tenants may unlock.
pub async fn unlock_property<S: UnlockStore + Sync>(
    store: &S,
    user: &User,
    user_id: ObjectId,
    property_id: ObjectId,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    if user.role != Role::Tenant {
        return Err(ApiError::forbidden("Unauthorized"));
    }

    let outcome = store
        .unlock(user_id, property_id, UNLOCK_COST)
        .await
        .map_err(|e| ApiError::internal("Unlock failed", e))?;

    match outcome {
        UnlockOutcome::Unlocked { credits } => {
            info!("User {} unlocked property {}", user_id, property_id);
            Ok(ApiResponse::success(
                "Property unlocked",
                serde_json::json!({ "credits": credits }),
            ))
        }
        UnlockOutcome::AlreadyUnlocked { credits } => Ok(ApiResponse::success(
            "Already unlocked",
            serde_json::json!({ "credits": credits }),
        )),
        UnlockOutcome::InsufficientCredits { .. } => Err(ApiError::bad_request("Not enough credits")),
    }
}

enum Attempt {
    Unlocked,
    AlreadyUnlocked,
    InsufficientCredits,
}

pub struct MongoUnlockStore<'a> {
    pub db: &'a DbConn,
}

impl MongoUnlockStore<'_> {
    async fn current_credits(&self, user_id: ObjectId) -> Result<i64, StoreError> {
        self.db
            .collection::<User>(USERS)
            .find_one(doc! { "_id": user_id }, None)
            .await?
            .map(|u| u.credits)
            .ok_or(StoreError::UserMissing(user_id))
    }

    /// One transaction: insert the unlock row (unique per user/property)
    /// and decrement credits only if the balance covers the cost.
    async fn attempt(
        &self,
        user_id: ObjectId,
        property_id: ObjectId,
        cost: i64,
    ) -> Result<Attempt, mongodb::error::Error> {
        let mut session = self.db.client().start_session(None).await?;
        session.start_transaction(None).await?;

        let row = PropertyUnlock {
            id: None,
            user_id,
            property_id,
            credits_spent: cost,
            created_at: DateTime::now(),
        };

        let inserted = self
            .db
            .collection::<PropertyUnlock>(UNLOCKS)
            .insert_one_with_session(&row, None, &mut session)
            .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_duplicate_key(&e) => {
                session.abort_transaction().await.ok();
                return Ok(Attempt::AlreadyUnlocked);
            }
            Err(e) => {
                session.abort_transaction().await.ok();
                return Err(e);
            }
        }

        let debited = self
            .db
            .collection::<User>(USERS)
            .update_one_with_session(
                doc! { "_id": user_id, "credits": { "$gte": cost } },
                doc! { "$inc": { "credits": -cost }, "$set": { "updated_at": DateTime::now() } },
                None,
                &mut session,
            )
            .await;

        match debited {
            Ok(res) if res.matched_count == 1 => {
                session.commit_transaction().await?;
                Ok(Attempt::Unlocked)
            }
            Ok(_) => {
                session.abort_transaction().await.ok();
                Ok(Attempt::InsufficientCredits)
            }
            Err(e) => {
                session.abort_transaction().await.ok();
                Err(e)
            }
        }
    }
}

#[rocket::async_trait]
impl UnlockStore for MongoUnlockStore<'_> {
    async fn unlock(
        &self,
        user_id: ObjectId,
        property_id: ObjectId,
        cost: i64,
    ) -> Result<UnlockOutcome, StoreError> {
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.attempt(user_id, property_id, cost).await {
                Ok(outcome) => break outcome,
                Err(e) if e.contains_label(TRANSIENT_TRANSACTION_ERROR) && attempt < MAX_TXN_ATTEMPTS => {
                    warn!("Unlock transaction conflict (attempt {}), retrying", attempt);
                }
                Err(e) => return Err(e.into()),
            }
        };

        // Balances are read after the transaction settles.
        let credits = self.current_credits(user_id).await?;
        Ok(match outcome {
            Attempt::Unlocked => UnlockOutcome::Unlocked { credits },
            Attempt::AlreadyUnlocked => UnlockOutcome::AlreadyUnlocked { credits },
            Attempt::InsufficientCredits => UnlockOutcome::InsufficientCredits { credits },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserStatus;
    use rocket::http::Status;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Same all-or-nothing semantics as the Mongo transaction.
    #[derive(Default)]
    struct MemoryStore {
        credits: Mutex<HashMap<ObjectId, i64>>,
        unlocks: Mutex<HashSet<(ObjectId, ObjectId)>>,
    }

    #[rocket::async_trait]
    impl UnlockStore for MemoryStore {
        async fn unlock(
            &self,
            user_id: ObjectId,
            property_id: ObjectId,
            cost: i64,
        ) -> Result<UnlockOutcome, StoreError> {
            let mut credits = self.credits.lock().unwrap();
            let mut unlocks = self.unlocks.lock().unwrap();
            let balance = credits.get_mut(&user_id).ok_or(StoreError::UserMissing(user_id))?;

            if unlocks.contains(&(user_id, property_id)) {
                return Ok(UnlockOutcome::AlreadyUnlocked { credits: *balance });
            }
            if *balance < cost {
                return Ok(UnlockOutcome::InsufficientCredits { credits: *balance });
            }
            *balance -= cost;
            unlocks.insert((user_id, property_id));
            Ok(UnlockOutcome::Unlocked { credits: *balance })
        }
    }

    fn user(role: Role, credits: i64) -> (ObjectId, User) {
        let id = ObjectId::new();
        let user = User {
            id: Some(id),
            name: "Tenant".into(),
            email: "tenant@example.com".into(),
            phone: None,
            password_hash: String::new(),
            role,
            credits,
            status: UserStatus::Active,
            address: None,
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        };
        (id, user)
    }

    fn store_with(user_id: ObjectId, credits: i64) -> MemoryStore {
        let store = MemoryStore::default();
        store.credits.lock().unwrap().insert(user_id, credits);
        store
    }

    #[rocket::async_test]
    async fn unlock_spends_two_credits_once() {
        let (id, tenant) = user(Role::Tenant, 10);
        let store = store_with(id, 10);
        let property = ObjectId::new();

        let first = unlock_property(&store, &tenant, id, property).await.unwrap();
        assert_eq!(first.success, "Property unlocked");
        assert_eq!(first.data.unwrap()["credits"], 8);

        let second = unlock_property(&store, &tenant, id, property).await.unwrap();
        assert_eq!(second.success, "Already unlocked");
        assert_eq!(second.data.unwrap()["credits"], 8);

        assert_eq!(store.credits.lock().unwrap()[&id], 8);
        assert_eq!(store.unlocks.lock().unwrap().len(), 1);
    }

    #[rocket::async_test]
    async fn low_balance_leaves_no_trace() {
        for balance in [0, 1] {
            let (id, tenant) = user(Role::Tenant, balance);
            let store = store_with(id, balance);

            let err = unlock_property(&store, &tenant, id, ObjectId::new()).await.unwrap_err();
            assert_eq!(err.message, "Not enough credits");
            assert_eq!(store.credits.lock().unwrap()[&id], balance);
            assert!(store.unlocks.lock().unwrap().is_empty());
        }
    }

    fn listing(status: PropertyStatus) -> Property {
        Property {
            id: Some(ObjectId::new()),
            slug: "sublet-dhanmondi-x1".into(),
            owner_id: ObjectId::new(),
            title: "Sublet in Dhanmondi".into(),
            description: "One room sublet".into(),
            property_type: crate::models::PropertyType::Sublet,
            price: 6000,
            bedrooms: 1,
            bathrooms: 1,
            area_sqft: None,
            division: "Dhaka".into(),
            district: "Dhaka".into(),
            upazila: "Dhanmondi".into(),
            address: "Road 27".into(),
            images: vec![],
            contact_phone: "01811111111".into(),
            contact_email: None,
            status,
            rejection_reason: None,
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        }
    }

    #[test]
    fn hidden_listings_cannot_be_unlocked() {
        assert!(ensure_unlockable(Some(&listing(PropertyStatus::Available))).is_ok());
        for status in [PropertyStatus::Pending, PropertyStatus::Rejected, PropertyStatus::Rented] {
            let err = ensure_unlockable(Some(&listing(status))).unwrap_err();
            assert_eq!(err.status, Status::NotFound);
            assert_eq!(err.message, "Property not found");
        }
        assert!(ensure_unlockable(None).is_err());
    }

    #[rocket::async_test]
    async fn only_tenants_may_unlock() {
        let (id, owner) = user(Role::Owner, 10);
        let store = store_with(id, 10);

        let err = unlock_property(&store, &owner, id, ObjectId::new()).await.unwrap_err();
        assert_eq!(err.status, Status::Forbidden);
        assert_eq!(store.credits.lock().unwrap()[&id], 10);
    }
}
