// Authentication module
// Manages the session lifecycle for both deployment flavours

mod exchange;
mod manager;
mod types;

pub mod jwt;

pub use manager::SessionManager;
pub use types::{Capability, Session};
