//! Infrastructure layer - file-backed persistence, paging, validation,
//! configuration and logging

pub mod batch_writer;
pub mod checkpoint;
pub mod config;
pub mod logging;
pub mod pager;
pub mod validator;
