pub mod endpoint;
pub mod protocol;
pub mod server;
pub mod transport;
