//! Token value types produced by source credentials and the exchange client.

pub mod bearer;
pub mod secret;
