//! # MFRM Common Library
//!
//! Shared code for the MFRM calibration services:
//! - Database schema, migrations and row models
//! - Configuration loading and root folder resolution
//! - Common error type

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
