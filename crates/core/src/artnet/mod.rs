#[allow(clippy::module_inception)]
pub mod artnet;
pub mod network_config;
