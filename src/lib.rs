//! Common functionality for Coupler.
//!
//! Coupler iterates between a supply-side optimisation model and two external demand simulators
//! until the exchanged prices and demands stop changing.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod cli;
pub mod commodity;
pub mod core_model;
pub mod coupling;
pub mod id;
pub mod input;
pub mod log;
pub mod model;
pub mod output;
pub mod region;
pub mod settings;
pub mod simulator;
pub mod units;

#[cfg(test)]
mod fixture;

/// Get the path to the Coupler configuration directory
pub fn get_coupler_config_dir() -> PathBuf {
    let Some(mut config_dir) = dirs::config_dir() else {
        // No sensible config dir on this platform, so use the working directory instead
        return PathBuf::new();
    };
    config_dir.push("coupler");
    config_dir
}
