//! Host-facing plumbing shared by every binding
//!
//! [`registry`] maps integer handles to live engine instances and
//! [`dispatch`] runs engine calls on the rayon pool so host event loops never
//! block on evaluation.

pub mod dispatch;
pub mod registry;

pub use dispatch::{spawn, Pending};
pub use registry::{Handle, Instance, Registry};
