pub mod client;

pub use client::{InstanceRegistry, RedisRegistry, RegistryError};
