// ECG Telemetry — Library Root
//
// Hardware-independent pipeline (acquisition → gating → buffering → dispatch)
// plus the ESP-IDF drivers that plug into it on the device and a synthetic
// front end for running the same pipeline on a host.

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod filter;
pub mod link;
pub mod pipeline;
pub mod scheduler;
pub mod tasks;
pub mod wire;

#[cfg(target_os = "espidf")]
pub mod drivers;

#[cfg(not(target_os = "espidf"))]
pub mod sim;
