//! Code for writing metadata to file
use crate::coupling::TerminationReason;
use crate::coupling::history::HistoryRecorder;
use crate::units::Dimensionless;
use anyhow::{Context, Result};
use chrono::prelude::*;
use platform_info::{PlatformInfo, PlatformInfoAPI, UNameAPI};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// The output file name for metadata
const METADATA_FILE_NAME: &str = "metadata.toml";

/// Information about the program build via `built` crate
mod built_info {
    // The file has been placed there by the build script.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Get information about program version from git
fn get_git_hash() -> String {
    let Some(hash) = built_info::GIT_COMMIT_HASH_SHORT else {
        return "unknown".into();
    };

    if built_info::GIT_DIRTY == Some(true) {
        format!("{hash}-dirty")
    } else {
        hash.into()
    }
}

#[derive(Serialize)]
struct Metadata<'a> {
    run: RunMetadata<'a>,
    program: ProgramMetadata<'a>,
    platform: PlatformMetadata,
}

/// Information about the model run
#[derive(Serialize)]
struct RunMetadata<'a> {
    /// Path to the model which was run
    model_path: &'a Path,
    /// The date and time on which the metadata was written
    datetime: String,
    /// Why the coupling loop stopped
    termination_reason: String,
    /// The number of iterations recorded, including any damped final solve
    iterations: u32,
    /// Mean price deviation of the last iteration
    final_price_deviation: Option<f64>,
    /// Mean demand deviation of the last iteration, if there was a previous one
    final_demand_deviation: Option<f64>,
}

impl<'a> RunMetadata<'a> {
    fn new(model_path: &'a Path, outcome: &RunOutcome) -> Self {
        let dt = Local::now();
        Self {
            model_path,
            datetime: dt.to_rfc2822(),
            termination_reason: outcome.reason.to_string(),
            iterations: outcome.iterations,
            final_price_deviation: outcome.price_deviation,
            final_demand_deviation: outcome.demand_deviation,
        }
    }
}

#[derive(Serialize)]
struct ProgramMetadata<'a> {
    /// The program name
    name: &'a str,
    /// The program version as specified in Cargo.toml
    version: &'a str,
    /// The target architecture for the build (e.g. x86_64-unknown-linux-gnu)
    target: &'a str,
    /// Whether it is a debug build
    is_debug: bool,
    /// The version of rustc used to compile Coupler
    rustc_version: &'a str,
    /// When Coupler was built
    build_time_utc: &'a str,
    /// The git commit hash for the version of Coupler (if known)
    git_commit_hash: String,
}

impl Default for ProgramMetadata<'_> {
    fn default() -> Self {
        Self {
            name: built_info::PKG_NAME,
            version: built_info::PKG_VERSION,
            target: built_info::TARGET,
            is_debug: built_info::DEBUG,
            rustc_version: built_info::RUSTC_VERSION,
            build_time_utc: built_info::BUILT_TIME_UTC,
            git_commit_hash: get_git_hash(),
        }
    }
}

/// Information about the platform on which Coupler is running.
///
/// The fields correspond to different data available from the [`PlatformInfo`] struct.
#[derive(Serialize)]
struct PlatformMetadata {
    sysname: String,
    nodename: String,
    release: String,
    version: String,
    machine: String,
    osname: String,
}

impl PlatformMetadata {
    fn new() -> Result<Self> {
        let info = PlatformInfo::new()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .context("Unable to determine platform info")?;
        Ok(Self {
            sysname: info.sysname().to_string_lossy().into(),
            nodename: info.nodename().to_string_lossy().into(),
            release: info.release().to_string_lossy().into(),
            version: info.version().to_string_lossy().into(),
            machine: info.machine().to_string_lossy().into(),
            osname: info.osname().to_string_lossy().into(),
        })
    }
}

/// The result of a coupled run, as recorded in the metadata
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOutcome {
    /// Why the loop stopped
    pub reason: TerminationReason,
    /// The number of iterations recorded
    pub iterations: u32,
    /// Mean price deviation of the last iteration
    pub price_deviation: Option<f64>,
    /// Mean demand deviation of the last iteration
    pub demand_deviation: Option<f64>,
}

impl RunOutcome {
    /// Summarise a finished run from its history
    pub fn new(reason: TerminationReason, history: &HistoryRecorder) -> Self {
        let last = history.last();
        Self {
            reason,
            iterations: last.map_or(0, |record| record.iteration + 1),
            price_deviation: last
                .map(|record| record.price_deviation.value())
                .filter(|value| value.is_finite()),
            demand_deviation: last
                .and_then(|record| record.demand_deviation)
                .map(Dimensionless::value)
                .filter(|value| value.is_finite()),
        }
    }
}

/// Write metadata to the specified output path in TOML format
pub fn write_metadata(output_path: &Path, model_path: &Path, outcome: &RunOutcome) -> Result<()> {
    let metadata = Metadata {
        run: RunMetadata::new(model_path, outcome),
        program: ProgramMetadata::default(),
        platform: PlatformMetadata::new()?,
    };
    let file_path = output_path.join(METADATA_FILE_NAME);
    fs::write(&file_path, toml::to_string(&metadata)?)?;

    Ok(())
}
