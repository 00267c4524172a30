//! Utility modules

pub mod shutdown;
