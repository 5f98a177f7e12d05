pub mod accumulate;
pub mod config;
pub mod delivery;
pub mod format;
pub mod poll;
pub mod relay;
pub mod tasks;
pub mod throttle;
pub mod transport;
pub mod upstream;
