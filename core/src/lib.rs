pub mod csv_import;
pub mod db;
pub mod error;
pub mod models;
pub mod ownership;
pub mod service;
pub mod shopping;
pub mod token;
