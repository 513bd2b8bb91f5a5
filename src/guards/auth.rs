use rocket::request::{self, FromRequest, Request, Outcome};
use rocket::http::Status;
use mongodb::bson::oid::ObjectId;
use crate::models::Role;
use crate::services::JwtService;

use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use rocket_okapi::r#gen::OpenApiGenerator;

/// Caller identity taken from a valid access token. Claims only; use
/// `CurrentUser` when the stored record (status, credits) matters.
pub struct AuthGuard {
    pub user_id: ObjectId,
    pub email: String,
    pub role: Role,
}

fn bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let Some(token) = req.headers().get_one("Authorization").and_then(bearer) else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let claims = match JwtService::verify_token(token, false) {
            Ok(claims) => claims,
            Err(_) => return Outcome::Error((Status::Unauthorized, ())),
        };

        match ObjectId::parse_str(&claims.sub) {
            Ok(user_id) => Outcome::Success(AuthGuard {
                user_id,
                email: claims.email,
                role: claims.role,
            }),
            Err(_) => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for AuthGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bearer_headers_carry_tokens() {
        assert_eq!(bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer("Bearer   "), None);
        assert_eq!(bearer("Basic dXNlcg=="), None);
        assert_eq!(bearer("abc.def"), None);
    }
}
