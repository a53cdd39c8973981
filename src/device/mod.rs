/// Particle cloud function calls
pub mod client;
/// Server-sent event stream of desk events
pub mod events;
/// Background thread serving device requests
pub mod worker;

pub use client::{DeskDevice, DeviceError, ParticleDevice};
pub use events::{EventStream, StreamUpdate};
pub use worker::{DeviceRequest, DeviceWorker};
