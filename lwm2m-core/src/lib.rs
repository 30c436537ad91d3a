//! Core types and utilities for the LwM2M test server
//!
//! This crate provides the error taxonomy and the content-format registry
//! shared by the transport and server crates.

pub mod content_format;
pub mod error;

pub use content_format::ContentFormat;
pub use error::{Lwm2mError, Lwm2mResult};
