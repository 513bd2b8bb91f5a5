pub mod user;
pub mod property;
pub mod booking;
pub mod unlock;
pub mod payment;

pub use user::*;
pub use property::*;
pub use booking::*;
pub use unlock::*;
pub use payment::*;
