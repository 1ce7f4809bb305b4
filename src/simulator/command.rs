//! A demand simulator run as an external program.
//!
//! The program is passed the path to a CSV file of prices and the path it should write its
//! demand estimates to:
//!
//! ```text
//! <program> [args...] --scenario <S> --climate <C> [--sector resid|comm] --prices <file> --output <file>
//! ```
use super::{DemandSimulator, SimulationConfig};
use crate::coupling::demand::{RawDemandRecord, RawDemandTable};
use crate::coupling::prices::PriceTable;
use crate::input::{input_err_msg, read_csv_optional};
use anyhow::{Context, Result, bail};
use log::debug;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const PRICES_FILE_NAME: &str = "prices.csv";
const OUTPUT_FILE_NAME: &str = "demand.csv";

/// Runs an external program to estimate demand
pub struct CommandSimulator {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSimulator {
    /// Create a simulator which runs `program` with the given leading arguments
    pub fn new(name: &str, program: PathBuf, args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            program,
            args,
        }
    }

    fn build_command(&self, config: &SimulationConfig, prices: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--scenario")
            .arg(&config.scenario)
            .arg("--climate")
            .arg(&config.climate);
        if let Some(sector) = config.sector {
            command.arg("--sector").arg(sector.to_string());
        }
        command.arg("--prices").arg(prices).arg("--output").arg(output);

        command
    }
}

/// Write the price table to a CSV file
fn write_prices(file_path: &Path, prices: &PriceTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(file_path)?;
    for record in prices.records() {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}

impl DemandSimulator for CommandSimulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, prices: &PriceTable, config: &SimulationConfig) -> Result<RawDemandTable> {
        let staging = TempDir::new().context("Failed to create staging directory")?;
        let prices_path = staging.path().join(PRICES_FILE_NAME);
        let output_path = staging.path().join(OUTPUT_FILE_NAME);
        write_prices(&prices_path, prices).context("Failed to write prices")?;

        let mut command = self.build_command(config, &prices_path, &output_path);
        debug!("Running {}: {command:?}", self.name);
        let output = command
            .output()
            .with_context(|| format!("Failed to start {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            );
        }

        if !output_path.exists() {
            bail!("{} did not write any output", self.program.display());
        }

        let records: Vec<RawDemandRecord> = read_csv_optional(&output_path)
            .with_context(|| input_err_msg(&output_path))?
            .collect();
        Ok(records.into_iter().collect())
    }
}
