//! Task module
//!
//! The task record as exchanged with the queue transport, and its
//! source-control descriptor.

mod model;
mod scm;

pub use model::*;
pub use scm::*;
