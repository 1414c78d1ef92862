pub mod fatal;
pub mod progress;
pub mod telemetry;
