use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use rocket::fairing::AdHoc;
use log::{error, info};
use std::ops::Deref;

pub const USERS: &str = "users";
pub const PROPERTIES: &str = "properties";
pub const BOOKINGS: &str = "booking_requests";
pub const UNLOCKS: &str = "property_unlocks";
pub const PAYMENTS: &str = "payments";
pub const PACKAGES: &str = "packages";
pub const RATE_LIMITS: &str = "rate_limits";

/// Database handle kept in managed state. Derefs to the `Database`; the
/// client is retained for starting transaction sessions.
#[derive(Clone)]
pub struct DbConn {
    client: Client,
    database: Database,
}

impl DbConn {
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Deref for DbConn {
    type Target = Database;

    fn deref(&self) -> &Database {
        &self.database
    }
}

pub fn init() -> AdHoc {
    AdHoc::on_ignite("MongoDB", |rocket| async {
        match connect().await {
            Ok(conn) => {
                info!("✓ MongoDB connected successfully");
                if let Err(e) = ensure_indexes(&conn).await {
                    error!("✗ Failed to create indexes: {}", e);
                }
                rocket.manage(conn)
            }
            Err(e) => {
                error!("✗ Failed to connect to MongoDB: {}", e);
                rocket
            }
        }
    })
}

async fn connect() -> Result<DbConn, mongodb::error::Error> {
    let uri = crate::config::Config::mongodb_uri();
    let client = Client::with_uri_str(&uri).await?;

    // Test connection
    client
        .database("admin")
        .run_command(doc! {"ping": 1}, None)
        .await?;

    let database = client.database(&crate::config::Config::mongodb_database());
    Ok(DbConn { client, database })
}

fn index(keys: Document, unique: bool) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(unique).build())
        .build()
}

async fn ensure_indexes(db: &DbConn) -> Result<(), mongodb::error::Error> {
    db.collection::<Document>(USERS)
        .create_index(index(doc! { "email": 1 }, true), None)
        .await?;
    db.collection::<Document>(PROPERTIES)
        .create_index(index(doc! { "slug": 1 }, true), None)
        .await?;
    db.collection::<Document>(UNLOCKS)
        .create_index(index(doc! { "user_id": 1, "property_id": 1 }, true), None)
        .await?;
    db.collection::<Document>(PAYMENTS)
        .create_index(index(doc! { "transaction_id": 1 }, true), None)
        .await?;
    db.collection::<Document>(PACKAGES)
        .create_index(index(doc! { "transaction_id": 1 }, true), None)
        .await?;
    db.collection::<Document>(BOOKINGS)
        .create_index(index(doc! { "tenant_id": 1, "property_id": 1 }, false), None)
        .await?;
    Ok(())
}

/// True when a write failed on a unique index.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
        ErrorKind::Command(ce) => ce.code == 11000,
        _ => false,
    }
}
