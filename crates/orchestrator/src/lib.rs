//! Pipeline supervision and request correlation.
//!
//! [`Pipeline::spawn`] starts the tracker consumer, signal aggregator, options
//! service, order monitor and candle refresher under one shutdown scope.
//! Manual triggers enter through [`PipelineHandle::submit_signal`] and are
//! answered through the [`RequestDispatcher`].

pub mod correlation;
pub mod handle;
pub mod pipeline;
pub mod status;

pub use correlation::{Admission, RequestDispatcher, TerminalError, TerminalKind};
pub use handle::PipelineHandle;
pub use pipeline::{BrokerCapabilities, Pipeline, Supervisor};
pub use status::{PipelineStatus, WorkerState, WorkerTable};
