//! Database models split into domain-specific modules.

pub mod account;
pub mod session;

pub use account::*;
pub use session::*;
