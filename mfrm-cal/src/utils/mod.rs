//! Utility modules for mfrm-cal

pub mod db_retry;

pub use db_retry::retry_on_lock;
