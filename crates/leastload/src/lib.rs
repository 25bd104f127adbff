#![doc = include_str!("../README.md")]

mod balancer;
mod config;
mod error;
mod index;
mod request;
mod transform;
mod worker;

pub use crate::balancer::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::index::*;
pub use crate::request::*;
pub use crate::transform::*;
pub use crate::worker::WorkerPool;
