pub mod address;
pub mod admin;
pub mod auth;
pub mod booking;
pub mod file_upload;
pub mod payment;
pub mod property;
pub mod unlock;
