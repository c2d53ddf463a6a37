//! `armlink-runtime` – the receiving side's engine.
//!
//! # Modules
//!
//! - [`pipeline`] – [`ActionPipeline`][pipeline::ActionPipeline]: dedup,
//!   action logging, command dispatch to the robot driver and pixel→base
//!   localisation of detected objects, one instance per connection.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with optional OTLP span export.

pub mod pipeline;
pub mod telemetry;

pub use pipeline::{ActionPipeline, DepthMode, LocatedObject, PipelineConfig, SessionReport};
pub use telemetry::{TracerProviderGuard, init_tracing};
