use rocket::figment::{Figment, providers::{Env, Format, Toml}};
use rocket::Config as RocketConfig;
use std::env;

pub struct Config;

impl Config {
    fn figment() -> Figment {
        // Get the current profile
        let profile = env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());

        Figment::from(RocketConfig::default())
            .merge(Toml::file("Rocket.toml").nested())
            .select(&profile)
            // Flat keys: ROCKET_JWT_SECRET -> jwt_secret
            .merge(Env::prefixed("ROCKET_"))
    }

    fn string_or(key: &str, default: &str) -> String {
        Self::figment()
            .extract_inner(key)
            .unwrap_or_else(|_| default.to_string())
    }

    pub fn jwt_secret() -> String {
        Self::string_or("jwt_secret", "default-secret")
    }

    pub fn jwt_refresh_secret() -> String {
        Self::string_or("jwt_refresh_secret", "default-refresh-secret")
    }

    pub fn jwt_expiry() -> i64 {
        Self::figment()
            .extract_inner("jwt_expiry")
            .unwrap_or(900)
    }

    pub fn jwt_refresh_expiry() -> i64 {
        Self::figment()
            .extract_inner("jwt_refresh_expiry")
            .unwrap_or(604800)
    }

    pub fn mongodb_uri() -> String {
        Self::string_or("mongodb_uri", "mongodb://localhost:27017/?replicaSet=rs0")
    }

    pub fn mongodb_database() -> String {
        Self::string_or("mongodb_database", "basha")
    }

    pub fn mail_host() -> String {
        Self::string_or("mail_host", "smtp.gmail.com")
    }

    pub fn mail_port() -> u16 {
        Self::figment()
            .extract_inner("mail_port")
            .unwrap_or(587)
    }

    pub fn mail_user() -> String {
        Self::figment()
            .extract_inner("mail_user")
            .unwrap_or_default()
    }

    pub fn mail_password() -> String {
        Self::figment()
            .extract_inner("mail_password")
            .unwrap_or_default()
    }

    pub fn mail_from() -> String {
        Self::string_or("mail_from", "Basha <noreply@basha.com.bd>")
    }

    /// Public origin of this API, used to build gateway callback URLs.
    pub fn public_base_url() -> String {
        Self::string_or("public_base_url", "http://localhost:8000")
            .trim_end_matches('/')
            .to_string()
    }

    /// Where the payment result page links back to.
    pub fn frontend_url() -> String {
        Self::string_or("frontend_url", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string()
    }

    pub fn sslcommerz_store_id() -> Option<String> {
        Self::figment()
            .extract_inner("sslcommerz_store_id")
            .ok()
    }

    pub fn sslcommerz_store_password() -> Option<String> {
        Self::figment()
            .extract_inner("sslcommerz_store_password")
            .ok()
    }

    pub fn sslcommerz_sandbox() -> bool {
        Self::figment()
            .extract_inner("sslcommerz_sandbox")
            .unwrap_or(true)
    }

    pub fn is_sslcommerz_enabled() -> bool {
        Self::sslcommerz_store_id().is_some()
            && Self::sslcommerz_store_password().is_some()
    }

    pub fn callback_secret() -> String {
        Self::string_or("callback_secret", "default-callback-secret")
    }

    pub fn address_api_base() -> String {
        Self::string_or("address_api_base", "https://bdapis.com/api/v1.2")
            .trim_end_matches('/')
            .to_string()
    }

    pub fn receipt_template() -> String {
        Self::string_or("receipt_template", "assets/receipt/template.png")
    }

    pub fn receipt_owner_signature() -> String {
        Self::string_or("receipt_owner_signature", "assets/receipt/owner-signature.png")
    }

    pub fn receipt_tenant_signature() -> String {
        Self::string_or("receipt_tenant_signature", "assets/receipt/tenant-signature.png")
    }

    pub fn receipt_font() -> String {
        Self::string_or("receipt_font", "assets/fonts/receipt.ttf")
    }

    pub fn reconcile_interval_secs() -> u64 {
        Self::figment()
            .extract_inner("reconcile_interval_secs")
            .unwrap_or(600)
    }

    pub fn payment_expiry_minutes() -> i64 {
        Self::figment()
            .extract_inner("payment_expiry_minutes")
            .unwrap_or(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_rocket_toml_keys() {
        assert!(Config::jwt_expiry() > 0);
        assert!(!Config::mongodb_database().is_empty());
        assert!(!Config::public_base_url().ends_with('/'));
        assert!(Config::payment_expiry_minutes() > 0);
    }
}
