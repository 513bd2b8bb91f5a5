pub mod address;
pub mod email;
pub mod jwt;
pub mod payments;
pub mod receipt;
pub mod sslcommerz;
pub mod unlock;

pub use address::AddressService;
pub use email::EmailService;
pub use jwt::JwtService;
pub use sslcommerz::SslCommerzService;
