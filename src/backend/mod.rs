//! Device runtime backends

pub mod hip_backend;

pub use hip_backend::{HipError, HipResult};
