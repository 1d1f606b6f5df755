//! Application layer - job control plane and the worker session loop

pub mod controller;
pub mod session;
