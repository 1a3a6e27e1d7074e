pub mod catalog;
pub mod config;
pub mod download;
pub mod http;
pub mod runtime;
pub mod store;
pub mod sync;
