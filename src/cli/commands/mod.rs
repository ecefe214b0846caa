pub mod config;
pub mod db;
pub mod query;
pub mod token;
