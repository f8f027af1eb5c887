pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod presence;
pub mod receipts;
pub mod registry;
pub mod store;
pub mod subscriptions;

#[cfg(test)]
mod testing;

pub use auth::{AuthFailure, AuthGate, JwtAuth};
pub use dispatcher::{Dispatcher, GatewayConfig};
pub use error::{DeliveryError, InvalidRequest};
pub use store::ChatStore;
