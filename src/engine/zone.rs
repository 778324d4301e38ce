mod config;
mod manager;
mod zone;

pub use config::{ZoneConfig, ZoneConfigBuilder, ZoneConfigError};
pub use manager::ZoneManager;
pub use zone::ZoneId;

pub(crate) use zone::Zone;
