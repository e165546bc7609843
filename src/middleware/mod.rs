//! HTTP middleware: request logging and error responses

pub mod error;
pub mod logging;
