pub mod codec;
pub mod command;
pub mod config;
pub mod constants;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod host;
pub mod reading;
pub mod report;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-export the driver entry points for easy access
pub use config::RadarConfig;
pub use device::{DeviceMode, Event, Publisher, Radar, Ticket};
pub use error::{EncodingError, LdError, Result};
pub use reading::Reading;
