pub mod forwarder;
pub mod handler;

pub use forwarder::{ForwardOutcome, Forwarder};
pub use handler::ProxyHandler;
