use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Owner,
    Tenant,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Owner => "OWNER",
            Role::Tenant => "TENANT",
            Role::User => "USER",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value.to_uppercase().as_str() {
            "ADMIN" => Some(Role::Admin),
            "OWNER" => Some(Role::Owner),
            "TENANT" => Some(Role::Tenant),
            "USER" => Some(Role::User),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Active,
    Blocked,
}

impl UserStatus {
    pub fn parse(value: &str) -> Option<UserStatus> {
        match value.to_uppercase().as_str() {
            "ACTIVE" => Some(UserStatus::Active),
            "BLOCKED" => Some(UserStatus::Blocked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Blocked => "BLOCKED",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub credits: i64,
    pub status: UserStatus,
    pub address: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct RegisterDto {
    #[validate(length(min = 2, max = 80, message = "Name must be 2-80 characters"))]
    pub name: String,
    #[validate(email(message = "Enter a valid email"))]
    pub email: String,
    #[validate(custom = "crate::utils::bd_phone")]
    pub phone: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub role: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct LoginDto {
    #[validate(email(message = "Enter a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UpdateProfileDto {
    #[validate(length(min = 2, max = 80, message = "Name must be 2-80 characters"))]
    pub name: Option<String>,
    #[validate(custom = "crate::utils::bd_phone")]
    pub phone: Option<String>,
    #[validate(length(max = 200, message = "Address is too long"))]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct AdminUpdateUserDto {
    pub role: Option<String>,
    pub status: Option<String>,
    #[validate(range(min = 0, message = "Credits cannot be negative"))]
    pub credits: Option<i64>,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct UserListQuery {
    pub role: Option<String>,
    pub q: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub credits: i64,
    pub status: UserStatus,
    pub address: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name,
            email: user.email,
            phone: user.phone,
            role: user.role,
            credits: user.credits,
            status: user.status,
            address: user.address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_uppercase() {
        assert_eq!(serde_json::to_value(Role::Tenant).unwrap(), "TENANT");
        assert_eq!(Role::parse("owner"), Some(Role::Owner));
        assert_eq!(Role::parse("landlord"), None);
    }

    #[test]
    fn register_rejects_bad_phone() {
        let dto = RegisterDto {
            name: "Rahim".into(),
            email: "rahim@example.com".into(),
            phone: "12345".into(),
            password: "longenough".into(),
            role: "TENANT".into(),
        };
        let errors = dto.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("phone"));
    }
}
