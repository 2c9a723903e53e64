pub mod config;
pub mod directory;
pub mod favorites;
pub mod platform;
pub mod protocol;
