//! Core modules shared by every warden subsystem.
//!
//! Errors, time, configuration loading, logging, embedded assets and the
//! constitution validator with its rule catalog live here.

pub mod assets;
pub mod config;
pub mod constitution;
pub mod error;
pub mod logging;
pub mod output;
pub mod rules;
pub mod shutdown;
pub mod time;
