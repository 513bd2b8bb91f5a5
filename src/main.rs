#[macro_use]
extern crate rocket;

mod config;
mod db;
mod guards;
mod models;
mod routes;
mod services;
mod utils;

use dotenvy::dotenv;
use log::info;
use rocket::fairing::{AdHoc, Fairing, Info, Kind};
use rocket::fs::FileServer;
use rocket::http::Header;
use rocket::serde::json::Json;
use rocket::{Build, Catcher, Request, Response, Rocket, Route};
use rocket_dyn_templates::Template;
use rocket_okapi::openapi_get_routes;
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};

use crate::utils::{ErrorBody, GENERIC_ERROR};

/* ----------------------------- CORS ----------------------------- */

pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        if let Some(origin) = request.headers().get_one("Origin") {
            response.set_header(Header::new("Access-Control-Allow-Origin", origin));
        }

        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, PATCH, DELETE, OPTIONS",
        ));

        response.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        ));

        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

/* ----------------------------- OPTIONS ----------------------------- */

#[options("/<_..>")]
fn options_handler() {}

/* ----------------------------- ERRORS ----------------------------- */

fn error_body(message: &str) -> Json<ErrorBody> {
    Json(ErrorBody {
        error: message.to_string(),
        fields: None,
    })
}

#[catch(400)]
fn bad_request() -> Json<ErrorBody> {
    error_body("Bad request")
}

#[catch(401)]
fn unauthorized() -> Json<ErrorBody> {
    error_body("Unauthorized")
}

#[catch(403)]
fn forbidden() -> Json<ErrorBody> {
    error_body("Forbidden")
}

#[catch(404)]
fn not_found() -> Json<ErrorBody> {
    error_body("Resource not found (check /api/v1 prefix)")
}

#[catch(422)]
fn unprocessable() -> Json<ErrorBody> {
    error_body("Invalid request body")
}

#[catch(500)]
fn internal_error() -> Json<ErrorBody> {
    error_body(GENERIC_ERROR)
}

fn catchers() -> Vec<Catcher> {
    catchers![bad_request, unauthorized, forbidden, not_found, unprocessable, internal_error]
}

/* ----------------------------- ROUTES ----------------------------- */

fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Auth
        routes::auth::register,
        routes::auth::login,
        routes::auth::refresh_token,
        routes::auth::me,
        routes::auth::update_me,
        // Properties
        routes::property::list_properties,
        routes::property::get_property,
        // Owner
        routes::property::create_property,
        routes::property::my_properties,
        routes::property::update_property,
        routes::property::delete_property,
        routes::property::mark_rented,
        routes::booking::owner_bookings,
        routes::booking::decide_booking,
        // Bookings
        routes::booking::create_booking,
        routes::booking::my_bookings,
        // Unlocks
        routes::unlock::unlock,
        routes::unlock::my_unlocks,
        // Payments
        routes::payment::pay_rent,
        routes::payment::list_packages,
        routes::payment::buy_package,
        routes::payment::my_payments,
        routes::payment::my_packages,
        // Admin
        routes::admin::list_users,
        routes::admin::update_user,
        routes::admin::list_properties,
        routes::admin::update_property_status,
        routes::admin::list_payments,
        routes::admin::stats,
        routes::admin::reconcile,
        // Address
        routes::address::divisions,
        routes::address::districts,
        routes::address::upazilas,
        routes::address::post_offices,
        // Uploads
        routes::file_upload::upload_image,
        routes::file_upload::upload_image_base64,
    ]
}

/// Browser- and gateway-facing routes kept out of the OpenAPI document.
fn gateway_routes() -> Vec<Route> {
    routes![
        routes::payment::callback_success,
        routes::payment::callback_fail,
        routes::payment::callback_cancel,
        routes::payment::ipn,
        routes::payment::receipt,
    ]
}

/* ----------------------------- SWAGGER ----------------------------- */

fn swagger_config() -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: "/api/v1/openapi.json".to_string(),
        ..Default::default()
    }
}

/* ----------------------------- LAUNCH ----------------------------- */

fn reconciler() -> AdHoc {
    AdHoc::on_liftoff("Payment reconciler", |rocket| {
        Box::pin(async move {
            if !config::Config::is_sslcommerz_enabled() {
                log::warn!("SSLCommerz credentials missing; checkouts will fail with 502");
            }
            match rocket.state::<db::DbConn>() {
                Some(conn) => {
                    services::payments::spawn_reconciler(conn.clone());
                    info!("Payment reconciler started");
                }
                None => log::warn!("No database connection; payment reconciler not started"),
            }
        })
    })
}

#[launch]
fn rocket() -> Rocket<Build> {
    dotenv().ok();
    env_logger::init();

    info!("🚀 Basha API running");
    info!("📚 Swagger UI → /api/docs");

    rocket::build()
        .attach(db::init())
        .attach(CORS)
        .attach(Template::fairing())
        .attach(reconciler())
        .mount("/", routes![options_handler])
        .mount("/api/v1", api_routes())
        .mount("/api/v1", gateway_routes())
        .mount("/uploads", FileServer::from("uploads"))
        .mount("/api/docs", make_swagger_ui(&swagger_config()))
        .register("/", catchers())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;

    /// Routes that need no database, so the app ignites without Mongo.
    async fn client() -> Client {
        let rocket = rocket::build()
            .attach(CORS)
            .mount("/", routes![options_handler])
            .mount(
                "/api/v1",
                routes![
                    routes::file_upload::upload_image_base64,
                    routes::payment::list_packages,
                ],
            )
            .register("/", catchers());
        Client::tracked(rocket).await.expect("valid rocket")
    }

    #[rocket::async_test]
    async fn unknown_routes_get_json_404() {
        let client = client().await;
        let res = client.get("/api/v1/nothing-here").dispatch().await;

        assert_eq!(res.status(), Status::NotFound);
        let body: serde_json::Value = res.into_json().await.expect("json body");
        assert!(body["error"].as_str().unwrap().starts_with("Resource not found"));
    }

    #[rocket::async_test]
    async fn missing_token_is_unauthorized() {
        let client = client().await;
        let res = client
            .post("/api/v1/upload/image-base64")
            .header(ContentType::JSON)
            .body(r#"{"filename":"a.png","mime_type":"image/png","data":"AAAA"}"#)
            .dispatch()
            .await;

        assert_eq!(res.status(), Status::Unauthorized);
        let body: serde_json::Value = res.into_json().await.expect("json body");
        assert_eq!(body, serde_json::json!({ "error": "Unauthorized" }));
    }

    #[rocket::async_test]
    async fn bad_base64_is_rejected_before_writing() {
        let client = client().await;
        let token = services::JwtService::generate_access_token(
            &mongodb::bson::oid::ObjectId::new(),
            "tenant@example.com",
            models::Role::Tenant,
        )
        .expect("token");

        let res = client
            .post("/api/v1/upload/image-base64")
            .header(ContentType::JSON)
            .header(Header::new("Authorization", format!("Bearer {}", token)))
            .body(r#"{"filename":"a.png","mime_type":"image/png","data":"@@@"}"#)
            .dispatch()
            .await;

        assert_eq!(res.status(), Status::BadRequest);
        let body: serde_json::Value = res.into_json().await.expect("json body");
        assert_eq!(body["error"], "Invalid base64 data");
    }

    #[rocket::async_test]
    async fn package_catalog_is_public() {
        let client = client().await;
        let res = client.get("/api/v1/packages").dispatch().await;

        assert_eq!(res.status(), Status::Ok);
        let body: serde_json::Value = res.into_json().await.expect("json body");
        assert_eq!(body["success"], "Packages fetched");
        assert_eq!(body["data"][1]["name"], "standard");
        assert_eq!(body["data"][2]["credits"], 60);
    }

    #[rocket::async_test]
    async fn preflight_allows_patch() {
        let client = client().await;
        let res = client
            .options("/api/v1/owner/bookings/abc")
            .header(Header::new("Origin", "http://localhost:3000"))
            .dispatch()
            .await;

        assert_eq!(res.status(), Status::Ok);
        let methods = res.headers().get_one("Access-Control-Allow-Methods").unwrap();
        assert!(methods.contains("PATCH"));
        assert_eq!(
            res.headers().get_one("Access-Control-Allow-Origin"),
            Some("http://localhost:3000")
        );
    }

    #[rocket::async_test]
    async fn malformed_json_hits_json_catcher() {
        let client = client().await;
        let token = services::JwtService::generate_access_token(
            &mongodb::bson::oid::ObjectId::new(),
            "tenant@example.com",
            models::Role::Tenant,
        )
        .expect("token");

        let res = client
            .post("/api/v1/upload/image-base64")
            .header(ContentType::JSON)
            .header(Header::new("Authorization", format!("Bearer {}", token)))
            .body(r#"{"filename": 5}"#)
            .dispatch()
            .await;

        assert_eq!(res.status(), Status::UnprocessableEntity);
        let body: serde_json::Value = res.into_json().await.expect("json body");
        assert_eq!(body["error"], "Invalid request body");
    }
}
