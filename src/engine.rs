pub mod clock;
pub mod config;
pub mod cookies;
pub mod errors;
pub mod zone;
