pub mod config;
pub mod consumption;
pub mod db;
pub mod device;
pub mod metrics;
pub mod reconciler;
pub mod relay;
pub mod request;

pub mod error;
pub mod logger;
pub mod time;
