pub mod adb;
pub mod collector;
pub mod config;
pub mod devices;
pub mod error;
pub mod index;
pub mod logging;
pub mod models;
pub mod report;
pub mod state;
pub mod store;
pub mod worker;
