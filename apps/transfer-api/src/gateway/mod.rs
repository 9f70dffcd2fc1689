//! Plugin streaming endpoint.

pub mod handshake;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use registry::SessionRegistry;
pub use session::Session;
