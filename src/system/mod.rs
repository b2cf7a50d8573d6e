// Device-side collaborators: shell runner, system counters, network helpers.

pub mod monitor;
pub mod network;
pub mod runner;

pub use monitor::{DeviceMonitor, ProcessInfo, SystemMonitor, SystemSnapshot};
pub use runner::{CommandOutput, ProcessRunner, ShellRunner};
