pub mod assignment;
pub mod backends;
pub mod budget;
pub mod catalog;
pub mod config;
pub mod output;
pub mod server;
pub mod snapshot;
