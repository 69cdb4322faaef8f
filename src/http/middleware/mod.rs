//! 请求身份提取

pub mod account;
pub mod service_key;

pub use account::AccountIdentity;
pub use service_key::verify_service_key;
