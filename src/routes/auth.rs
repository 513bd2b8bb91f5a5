use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime, oid::ObjectId};
use validator::Validate;
use crate::db::{is_duplicate_key, DbConn, RATE_LIMITS, USERS};
use crate::guards::CurrentUser;
use crate::models::{
    LoginDto, RegisterDto, Role, UpdateProfileDto, User, UserResponse, UserStatus,
};
use crate::services::JwtService;
use crate::utils::{ApiResponse, ApiError};

const LOGIN_LIMIT: i32 = 5;
const LOGIN_WINDOW_MS: i64 = 10 * 60 * 1000;
const REFRESH_LIMIT: i32 = 10;
const REFRESH_WINDOW_MS: i64 = 60 * 1000;

/// --------------------
/// Rate limiter helper
/// --------------------
async fn rate_limit(
    db: &DbConn,
    key: &str,
    limit: i32,
    window_ms: i64,
) -> Result<(), ApiError> {
    let now = chrono::Utc::now().timestamp_millis();
    let window_expires = DateTime::from_millis(now + window_ms);

    let collection = db.collection::<mongodb::bson::Document>(RATE_LIMITS);

    let doc = collection
        .find_one(doc! { "key": key }, None)
        .await
        .map_err(|e| ApiError::internal("Rate limiter lookup failed", e))?;

    match doc {
        // First request
        None => {
            collection
                .insert_one(
                    doc! {
                        "key": key,
                        "count": 1,
                        "expires_at": window_expires
                    },
                    None,
                )
                .await
                .map_err(|e| ApiError::internal("Rate limiter insert failed", e))?;
            Ok(())
        }

        Some(d) => {
            let count = d.get_i32("count").unwrap_or(0);
            let expires_at = d.get_datetime("expires_at").ok();

            // Window expired → reset
            if expires_at.map(|e| *e < DateTime::now()).unwrap_or(true) {
                collection
                    .update_one(
                        doc! { "key": key },
                        doc! {
                            "$set": {
                                "count": 1,
                                "expires_at": window_expires
                            }
                        },
                        None,
                    )
                    .await
                    .map_err(|e| ApiError::internal("Rate limiter reset failed", e))?;
                return Ok(());
            }

            if count >= limit {
                return Err(ApiError::too_many_requests(
                    "Too many requests. Please try later.",
                ));
            }

            collection
                .update_one(
                    doc! { "key": key },
                    doc! { "$inc": { "count": 1 } },
                    None,
                )
                .await
                .map_err(|e| ApiError::internal("Rate limiter increment failed", e))?;

            Ok(())
        }
    }
}

fn issue_tokens(user: &User, user_id: &ObjectId) -> Result<(String, String), ApiError> {
    let access = JwtService::generate_access_token(user_id, &user.email, user.role)
        .map_err(|e| ApiError::internal("Token signing failed", e))?;
    let refresh = JwtService::generate_refresh_token(user_id, &user.email, user.role)
        .map_err(|e| ApiError::internal("Token signing failed", e))?;
    Ok((access, refresh))
}

/// Only tenants and owners can sign themselves up.
fn self_service_role(value: &str) -> Result<Role, ApiError> {
    match Role::parse(value) {
        Some(role @ (Role::Tenant | Role::Owner)) => Ok(role),
        _ => Err(ApiError::bad_request("Role must be TENANT or OWNER")),
    }
}

/// --------------------
/// Register
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<dto>")]
pub async fn register(
    db: &State<DbConn>,
    dto: Json<RegisterDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate().map_err(|e| ApiError::validation(&e))?;
    let role = self_service_role(&dto.role)?;

    let password_hash = bcrypt::hash(&dto.password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::internal("Password hashing failed", e))?;

    let now = DateTime::now();
    let mut user = User {
        id: None,
        name: dto.name.trim().to_string(),
        email: dto.email.trim().to_lowercase(),
        phone: Some(dto.phone.clone()),
        password_hash,
        role,
        credits: 0,
        status: UserStatus::Active,
        address: None,
        created_at: now,
        updated_at: now,
    };

    let res = db.collection::<User>(USERS)
        .insert_one(&user, None)
        .await
        .map_err(|e| {
            if is_duplicate_key(&e) {
                ApiError::conflict("Email already in use")
            } else {
                ApiError::internal("Failed to create user", e)
            }
        })?;

    let user_id = res
        .inserted_id
        .as_object_id()
        .ok_or_else(|| ApiError::internal("Register", "inserted id was not an ObjectId"))?;
    user.id = Some(user_id);

    let (access_token, refresh_token) = issue_tokens(&user, &user_id)?;

    Ok(Json(ApiResponse::success(
        "Registration successful",
        serde_json::json!({
            "user": UserResponse::from(user),
            "accessToken": access_token,
            "refreshToken": refresh_token
        }),
    )))
}

/// --------------------
/// Login
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<dto>")]
pub async fn login(
    db: &State<DbConn>,
    dto: Json<LoginDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate().map_err(|e| ApiError::validation(&e))?;
    let email = dto.email.trim().to_lowercase();

    rate_limit(db, &format!("login:{}", email), LOGIN_LIMIT, LOGIN_WINDOW_MS).await?;

    let user = db
        .collection::<User>(USERS)
        .find_one(doc! { "email": &email }, None)
        .await?
        .ok_or_else(|| ApiError::unauthenticated("Invalid email or password"))?;

    let matches = bcrypt::verify(&dto.password, &user.password_hash)
        .map_err(|e| ApiError::internal("Password check failed", e))?;
    if !matches {
        return Err(ApiError::unauthenticated("Invalid email or password"));
    }
    if user.status == UserStatus::Blocked {
        return Err(ApiError::forbidden("Account is blocked"));
    }

    let user_id = user
        .id
        .ok_or_else(|| ApiError::internal("Login", "stored user has no id"))?;
    let (access_token, refresh_token) = issue_tokens(&user, &user_id)?;

    Ok(Json(ApiResponse::success(
        "Login successful",
        serde_json::json!({
            "user": UserResponse::from(user),
            "accessToken": access_token,
            "refreshToken": refresh_token
        }),
    )))
}

/// --------------------
/// Silent Refresh Token
/// --------------------
#[derive(serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct RefreshTokenDto {
    pub refresh_token: String,
}

#[openapi(tag = "Auth")]
#[post("/auth/refresh", data = "<dto>")]
pub async fn refresh_token(
    db: &State<DbConn>,
    dto: Json<RefreshTokenDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let claims = JwtService::verify_token(&dto.refresh_token, true)
        .map_err(|_| ApiError::unauthenticated("Invalid refresh token"))?;

    rate_limit(
        db,
        &format!("refresh:{}", claims.sub),
        REFRESH_LIMIT,
        REFRESH_WINDOW_MS,
    ).await?;

    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|_| ApiError::unauthenticated("Invalid user id in token"))?;

    // Pick up role changes and blocks since the refresh token was issued.
    let user = db
        .collection::<User>(USERS)
        .find_one(doc! { "_id": user_id }, None)
        .await?
        .ok_or_else(ApiError::unauthorized)?;
    if user.status == UserStatus::Blocked {
        return Err(ApiError::forbidden("Account is blocked"));
    }

    let access = JwtService::generate_access_token(&user_id, &user.email, user.role)
        .map_err(|e| ApiError::internal("Token signing failed", e))?;

    Ok(Json(ApiResponse::success(
        "Token refreshed",
        serde_json::json!({ "accessToken": access }),
    )))
}

#[openapi(tag = "Auth")]
#[get("/auth/me")]
pub async fn me(current: CurrentUser) -> Json<ApiResponse<UserResponse>> {
    Json(ApiResponse::success("Profile fetched", UserResponse::from(current.user)))
}

#[openapi(tag = "Auth")]
#[put("/auth/me", data = "<dto>")]
pub async fn update_me(
    db: &State<DbConn>,
    current: CurrentUser,
    dto: Json<UpdateProfileDto>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    dto.validate().map_err(|e| ApiError::validation(&e))?;

    let mut update_doc = doc! {
        "updated_at": DateTime::now()
    };
    if let Some(ref name) = dto.name {
        update_doc.insert("name", name.trim());
    }
    if let Some(ref phone) = dto.phone {
        update_doc.insert("phone", phone);
    }
    if let Some(ref address) = dto.address {
        update_doc.insert("address", address.trim());
    }

    db.collection::<User>(USERS)
        .update_one(doc! { "_id": current.id }, doc! { "$set": update_doc }, None)
        .await?;

    let user = db
        .collection::<User>(USERS)
        .find_one(doc! { "_id": current.id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(ApiResponse::success("Profile updated", UserResponse::from(user))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admins_cannot_be_self_registered() {
        assert_eq!(self_service_role("tenant").unwrap(), Role::Tenant);
        assert_eq!(self_service_role("OWNER").unwrap(), Role::Owner);
        assert!(self_service_role("ADMIN").is_err());
        assert!(self_service_role("USER").is_err());
    }
}
