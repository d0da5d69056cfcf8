// Library crate for integration tests.
// main.rs has its own mod declarations; this re-exports all modules.

pub mod config;
pub mod error;
pub mod events;
pub mod load;
pub mod notify;
pub mod regression;
pub mod routes;
pub mod scenario;
pub mod server;
pub mod service;
pub mod settings;
pub mod state;
pub mod store;
