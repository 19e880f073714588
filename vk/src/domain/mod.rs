//! Domain types shared by the transport and the scheduler

mod call;
mod params;
mod priority;

pub use call::{Call, CallResult, Completion, Lane};
pub use params::{ParamValue, Params};
pub use priority::Priority;
