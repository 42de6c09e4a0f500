pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod migrate;
pub mod mongo_ext;
pub mod payment_gateway;
pub mod store;
pub mod util;

#[cfg(test)]
mod memory;
