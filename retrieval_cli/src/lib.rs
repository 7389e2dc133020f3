pub mod config;
pub mod error;
pub mod piece_index;
pub mod query_service;
pub mod settings;
