use rocket::request::{self, Request, FromRequest, Outcome};
use rocket::http::Status;
use rocket::State;
use crate::db::{DbConn, USERS};
use crate::guards::AuthGuard;
use crate::models::{Role, User, UserStatus};
use mongodb::bson::{doc, oid::ObjectId};
use log::{error, warn};
use rocket_okapi::request::OpenApiFromRequest;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::RequestHeaderInput;

/// Authenticated caller with their current database record. Roles are read
/// from the record, not the token, so admin changes apply immediately.
pub struct CurrentUser {
    pub id: ObjectId,
    pub user: User,
}

impl CurrentUser {
    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.user.role)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let auth = match req.guard::<AuthGuard>().await {
            Outcome::Success(auth) => auth,
            Outcome::Error(e) => return Outcome::Error(e),
            Outcome::Forward(f) => return Outcome::Forward(f),
        };

        let db = match req.guard::<&State<DbConn>>().await {
            Outcome::Success(db) => db,
            _ => return Outcome::Error((Status::InternalServerError, ())),
        };

        let user = db.collection::<User>(USERS)
            .find_one(doc! { "_id": auth.user_id }, None)
            .await;

        match user {
            Ok(Some(user)) if user.status == UserStatus::Active => {
                Outcome::Success(CurrentUser { id: auth.user_id, user })
            }
            Ok(Some(_)) => {
                warn!("Blocked user {} rejected", auth.user_id);
                Outcome::Error((Status::Forbidden, ()))
            }
            Ok(None) => Outcome::Error((Status::Unauthorized, ())),
            Err(e) => {
                error!("User lookup failed in guard: {}", e);
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

async fn with_role<'r>(
    req: &'r Request<'_>,
    roles: &[Role],
) -> request::Outcome<CurrentUser, ()> {
    match req.guard::<CurrentUser>().await {
        Outcome::Success(current) if current.has_role(roles) => Outcome::Success(current),
        Outcome::Success(_) => Outcome::Error((Status::Forbidden, ())),
        Outcome::Error(e) => Outcome::Error(e),
        Outcome::Forward(f) => Outcome::Forward(f),
    }
}

macro_rules! role_guard {
    ($name:ident, $($role:expr),+) => {
        pub struct $name(pub CurrentUser);

        #[rocket::async_trait]
        impl<'r> FromRequest<'r> for $name {
            type Error = ();

            async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
                with_role(req, &[$($role),+]).await.map($name)
            }
        }

        impl<'a> OpenApiFromRequest<'a> for $name {
            fn from_request_input(
                _gen: &mut OpenApiGenerator,
                _name: String,
                _required: bool,
            ) -> rocket_okapi::Result<RequestHeaderInput> {
                Ok(RequestHeaderInput::None)
            }
        }
    };
}

role_guard!(AdminGuard, Role::Admin);
role_guard!(OwnerGuard, Role::Owner, Role::Admin);
role_guard!(TenantGuard, Role::Tenant);

impl<'a> OpenApiFromRequest<'a> for CurrentUser {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
