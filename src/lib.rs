pub mod capture;
pub mod commands;
pub mod config;
pub mod errors;
pub mod metadata_store;
pub mod relocator;
pub mod security;
pub mod session;
pub mod uploader;
pub mod watcher;
