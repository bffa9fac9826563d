pub mod document;
pub mod error;
pub mod models;
pub mod settings;
pub mod time;
