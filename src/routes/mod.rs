pub mod events;
pub mod health;
pub mod regression;
pub mod runs;
pub mod scenarios;
pub mod ws;
