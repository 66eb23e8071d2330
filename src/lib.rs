//! archer-operator: publishes Kubernetes Services as Archer endpoint services
//!
//! Services annotated with `<prefix>/archer-create: "true"` get a matching
//! endpoint service in Archer, kept in sync on every change and deleted when
//! the Service goes away.

pub mod broker;
pub mod controller;
pub mod error;
pub mod leader;
pub mod server;

pub use crate::error::{Error, Result};
