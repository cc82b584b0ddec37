pub mod config;
pub mod errors;
pub mod settings;
pub mod solc;
