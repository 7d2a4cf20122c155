pub mod app;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod metrics;
pub mod provision;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod target;
pub mod verify;
