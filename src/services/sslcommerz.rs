use hmac::{Hmac, Mac};
use log::{info, warn};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::config::Config;
use crate::models::CURRENCY;

const SANDBOX_BASE: &str = "https://sandbox.sslcommerz.com";
const LIVE_BASE: &str = "https://securepay.sslcommerz.com";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway is not configured")]
    NotConfigured,
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("gateway response had no checkout URL")]
    MissingUrl,
    #[error("invalid callback signing key")]
    InvalidKey,
}

/// Customer block of the checkout session. Empty fields fall back to the
/// defaults the gateway insists on.
#[derive(Debug, Clone, Default)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub transaction_id: String,
    pub amount: i64,
    pub product_name: String,
    pub product_category: String,
    pub customer: Customer,
}

/// Gateway verdict for one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayValidation {
    pub status: String,
    pub tran_id: String,
    pub val_id: Option<String>,
    pub amount: f64,
}

impl GatewayValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self.status.as_str(), "VALID" | "VALIDATED")
    }

    pub fn amount_matches(&self, expected: i64) -> bool {
        (self.amount - expected as f64).abs() < 0.01
    }

    fn from_json(value: &Value) -> Option<Self> {
        let amount = match value.get("amount")? {
            Value::String(s) => s.parse::<f64>().ok()?,
            Value::Number(n) => n.as_f64()?,
            _ => return None,
        };

        Some(GatewayValidation {
            status: value.get("status")?.as_str()?.to_string(),
            tran_id: value.get("tran_id")?.as_str()?.to_string(),
            val_id: value.get("val_id").and_then(Value::as_str).map(str::to_string),
            amount,
        })
    }
}

pub struct SslCommerzService;

impl SslCommerzService {
    fn client() -> Client {
        Client::new()
    }

    fn base_url() -> &'static str {
        if Config::sslcommerz_sandbox() {
            SANDBOX_BASE
        } else {
            LIVE_BASE
        }
    }

    fn credentials() -> Result<(String, String), GatewayError> {
        match (Config::sslcommerz_store_id(), Config::sslcommerz_store_password()) {
            (Some(id), Some(password)) => Ok((id, password)),
            _ => Err(GatewayError::NotConfigured),
        }
    }

    fn mac() -> Result<Hmac<Sha256>, GatewayError> {
        Hmac::<Sha256>::new_from_slice(Config::callback_secret().as_bytes())
            .map_err(|_| GatewayError::InvalidKey)
    }

    /// Signature appended to callback URLs so forged callbacks are refused.
    pub fn sign(tran_id: &str) -> Result<String, GatewayError> {
        let mut mac = Self::mac()?;
        mac.update(tran_id.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn verify_signature(tran_id: &str, signature: &str) -> bool {
        let Ok(bytes) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = Self::mac() else {
            return false;
        };
        mac.update(tran_id.as_bytes());
        mac.verify_slice(&bytes).is_ok()
    }

    pub fn callback_url(kind: &str, tran_id: &str) -> Result<String, GatewayError> {
        Ok(format!(
            "{}/api/v1/payments/{}?tran_id={}&sig={}",
            Config::public_base_url(),
            kind,
            tran_id,
            Self::sign(tran_id)?
        ))
    }

    /// Flat form body for the session-init call.
    pub fn build_init_payload(
        req: &CheckoutRequest,
        store_id: &str,
        store_password: &str,
    ) -> Result<Vec<(&'static str, String)>, GatewayError> {
        fn or_default(value: &Option<String>, default: &str) -> String {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        }

        let c = &req.customer;
        let name = if c.name.trim().is_empty() { "Customer".to_string() } else { c.name.clone() };

        Ok(vec![
            ("store_id", store_id.to_string()),
            ("store_passwd", store_password.to_string()),
            ("total_amount", req.amount.to_string()),
            ("currency", CURRENCY.to_string()),
            ("tran_id", req.transaction_id.clone()),
            ("success_url", Self::callback_url("callback/success", &req.transaction_id)?),
            ("fail_url", Self::callback_url("callback/fail", &req.transaction_id)?),
            ("cancel_url", Self::callback_url("callback/cancel", &req.transaction_id)?),
            ("ipn_url", Self::callback_url("ipn", &req.transaction_id)?),
            ("cus_name", name),
            ("cus_email", c.email.clone()),
            ("cus_add1", or_default(&c.address, "N/A")),
            ("cus_city", or_default(&c.city, "Dhaka")),
            ("cus_postcode", or_default(&c.postcode, "1000")),
            ("cus_country", "Bangladesh".to_string()),
            ("cus_phone", or_default(&c.phone, "N/A")),
            ("shipping_method", "NO".to_string()),
            ("num_of_item", "1".to_string()),
            ("product_name", req.product_name.clone()),
            ("product_category", req.product_category.clone()),
            ("product_profile", "general".to_string()),
        ])
    }

    pub fn parse_init_response(body: &Value) -> Result<String, GatewayError> {
        let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
        if !status.eq_ignore_ascii_case("SUCCESS") {
            let reason = body
                .get("failedreason")
                .and_then(Value::as_str)
                .filter(|r| !r.is_empty())
                .unwrap_or("unknown reason");
            return Err(GatewayError::Rejected(reason.to_string()));
        }

        body.get("GatewayPageURL")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .ok_or(GatewayError::MissingUrl)
    }

    /// Opens a hosted checkout session and returns its URL.
    pub async fn init(req: &CheckoutRequest) -> Result<String, GatewayError> {
        let (store_id, store_password) = Self::credentials()?;
        let payload = Self::build_init_payload(req, &store_id, &store_password)?;

        let body: Value = Self::client()
            .post(format!("{}/gwprocess/v4/api.php", Self::base_url()))
            .form(&payload)
            .send()
            .await?
            .json()
            .await?;

        let url = Self::parse_init_response(&body)?;
        info!("Checkout session opened for {}", req.transaction_id);
        Ok(url)
    }

    /// Confirms a callback's `val_id` with the gateway.
    pub async fn validate(val_id: &str) -> Result<GatewayValidation, GatewayError> {
        let (store_id, store_password) = Self::credentials()?;

        let body: Value = Self::client()
            .get(format!(
                "{}/validator/api/validationserverAPI.php",
                Self::base_url()
            ))
            .query(&[
                ("val_id", val_id),
                ("store_id", store_id.as_str()),
                ("store_passwd", store_password.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?
            .json()
            .await?;

        GatewayValidation::from_json(&body).ok_or_else(|| {
            warn!("Unexpected validation response for val_id {}", val_id);
            GatewayError::Rejected("unreadable validation response".to_string())
        })
    }

    pub fn parse_transaction_query(body: &Value) -> Option<GatewayValidation> {
        body.get("element")?
            .as_array()?
            .iter()
            .filter_map(GatewayValidation::from_json)
            .find(GatewayValidation::is_valid)
    }

    /// Looks a transaction up by our id; `None` when it never settled.
    pub async fn query_transaction(tran_id: &str) -> Result<Option<GatewayValidation>, GatewayError> {
        let (store_id, store_password) = Self::credentials()?;

        let body: Value = Self::client()
            .get(format!(
                "{}/validator/api/merchantTransIDvalidationAPI.php",
                Self::base_url()
            ))
            .query(&[
                ("tran_id", tran_id),
                ("store_id", store_id.as_str()),
                ("store_passwd", store_password.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?
            .json()
            .await?;

        Ok(Self::parse_transaction_query(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            transaction_id: "RENT-1".into(),
            amount: 5000,
            product_name: "Rent".into(),
            product_category: "rent".into(),
            customer: Customer {
                name: "Karim".into(),
                email: "karim@example.com".into(),
                ..Default::default()
            },
        }
    }

    fn field<'a>(payload: &'a [(&'static str, String)], key: &str) -> &'a str {
        payload.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str()).unwrap()
    }

    #[test]
    fn payload_fills_gateway_defaults() {
        let payload = SslCommerzService::build_init_payload(&request(), "store", "secret").unwrap();

        assert_eq!(field(&payload, "total_amount"), "5000");
        assert_eq!(field(&payload, "currency"), "BDT");
        assert_eq!(field(&payload, "cus_country"), "Bangladesh");
        assert_eq!(field(&payload, "cus_city"), "Dhaka");
        assert_eq!(field(&payload, "cus_add1"), "N/A");
        assert!(field(&payload, "success_url").contains("/payments/callback/success?tran_id=RENT-1&sig="));
        assert!(field(&payload, "ipn_url").contains("/payments/ipn?tran_id=RENT-1"));
    }

    #[test]
    fn init_response_requires_success_and_url() {
        let ok = json!({ "status": "SUCCESS", "GatewayPageURL": "https://pay/abc" });
        assert_eq!(SslCommerzService::parse_init_response(&ok).unwrap(), "https://pay/abc");

        let missing = json!({ "status": "SUCCESS", "GatewayPageURL": "" });
        assert!(matches!(
            SslCommerzService::parse_init_response(&missing),
            Err(GatewayError::MissingUrl)
        ));

        let failed = json!({ "status": "FAILED", "failedreason": "Store Credential Error" });
        match SslCommerzService::parse_init_response(&failed) {
            Err(GatewayError::Rejected(reason)) => assert_eq!(reason, "Store Credential Error"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn callback_signature_binds_transaction() {
        let sig = SslCommerzService::sign("PKG-9").unwrap();
        assert!(SslCommerzService::verify_signature("PKG-9", &sig));
        assert!(!SslCommerzService::verify_signature("PKG-10", &sig));
        assert!(!SslCommerzService::verify_signature("PKG-9", "not-hex"));
    }

    #[test]
    fn transaction_query_picks_valid_element() {
        let body = json!({
            "APIConnect": "DONE",
            "element": [
                { "status": "FAILED", "tran_id": "RENT-1", "amount": "5000.00" },
                { "status": "VALID", "tran_id": "RENT-1", "val_id": "v1", "amount": "5000.00" }
            ]
        });
        let found = SslCommerzService::parse_transaction_query(&body).unwrap();
        assert_eq!(found.val_id.as_deref(), Some("v1"));
        assert!(found.amount_matches(5000));
        assert!(!found.amount_matches(4999));

        assert!(SslCommerzService::parse_transaction_query(&json!({ "element": [] })).is_none());
    }
}
