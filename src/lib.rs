pub mod api;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod guard;
pub mod services;
pub mod types;

pub use error::ServiceError;
