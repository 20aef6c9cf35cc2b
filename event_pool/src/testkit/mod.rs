//! Tools for exercising pools inside one process: a [`MemoryBus`] that stands in for the real
//! message bus, with optional message loss, delay and partitions, and a [`RecordingEngine`] that
//! remembers what it processed.

mod failure_config;
mod logging;
mod memory_bus;
mod recording_engine;

#[rustfmt::skip]
pub use {
  failure_config::FailureConfig,
  failure_config::FailureConfigMap,
  logging::init_logging,
  logging::LogLevel,
  memory_bus::BusEndpoint,
  memory_bus::MemoryBus,
  recording_engine::Processed,
  recording_engine::RecordingEngine,
};
