pub mod service;
pub mod simulator;

pub use service::{SensorService, SweepReport};
pub use simulator::SensorSimulator;
