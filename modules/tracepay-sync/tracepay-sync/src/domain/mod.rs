pub mod backends;
pub mod cache;
pub mod error;
pub mod session;
pub mod settings_client;
pub mod toggle;
