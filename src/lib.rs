pub mod auth;
pub mod config;
pub mod server;
pub mod store;
pub mod utils;
pub mod vfs;
