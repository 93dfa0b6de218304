pub mod registry;
pub mod session;
pub mod transport;
