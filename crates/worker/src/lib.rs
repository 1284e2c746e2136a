//! Background side of the pipeline: the event and message worker pools, the
//! delivery tracker and the messaging session monitor.

pub mod runtime;
pub mod session_monitor;
