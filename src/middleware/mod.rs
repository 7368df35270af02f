//! Request guards: service key for the notify API, origin allow-list for
//! browsers.

pub mod auth;
pub mod origin;

pub use auth::ServiceKey;
pub use origin::OriginPolicy;
