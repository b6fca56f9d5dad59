pub mod health;
pub mod metrics;
pub mod register;
pub mod router;

pub use router::create_app_router;
