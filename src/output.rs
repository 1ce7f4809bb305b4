//! The module responsible for writing output data to disk.
use crate::commodity::CommodityID;
use crate::core_model::{ModelSolution, TechnologyID};
use crate::coupling::DiagnosticSink;
use crate::coupling::demand::{DemandTable, LevelID, TimeID};
use crate::coupling::history::{HistoryRecorder, WideTable};
use crate::region::RegionID;
use crate::units::Flow;
use anyhow::{Context, Result, ensure};
use itertools::Itertools;
use serde::Serialize;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

pub mod metadata;

/// The root folder in which model-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "coupler_results";

/// The output file name for prices of every iteration
const PRICE_HISTORY_FILE_NAME: &str = "price_history.csv";

/// The output file name for demand of every iteration
const DEMAND_HISTORY_FILE_NAME: &str = "demand_history.csv";

/// The output file name for the deviations of every iteration
const ITERATIONS_FILE_NAME: &str = "iterations.csv";

/// The output file name for prices of the final iteration
const FINAL_PRICES_FILE_NAME: &str = "final_prices.csv";

/// The output file name for demand of the final iteration
const FINAL_DEMAND_FILE_NAME: &str = "final_demand.csv";

/// The output file name for technology activity in the final solution
const FINAL_ACTIVITY_FILE_NAME: &str = "final_activity.csv";

/// Get the default output directory for the model specified at `model_dir`
pub fn get_output_dir(model_dir: &Path) -> Result<PathBuf> {
    // Get the model name from the dir path. This ends up being convoluted because we need to check
    // for all possible errors. Ugh.
    let model_dir = model_dir
        .canonicalize() // canonicalise in case the user has specified "."
        .context("Could not resolve path to model")?;

    let model_name = model_dir
        .file_name()
        .context("Model cannot be in root folder")?
        .to_str()
        .context("Invalid chars in model dir name")?;

    // Construct path
    Ok([OUTPUT_DIRECTORY_ROOT, model_name].iter().collect())
}

/// Create a new output directory for the model, optionally overwriting existing data.
///
/// Returns true if existing data is being overwritten.
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    // If the folder already exists, then delete it
    let overwrite = if let Ok(mut it) = fs::read_dir(output_dir) {
        if it.next().is_none() {
            // Folder exists and is empty: nothing to do
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. \
            Please delete the folder or pass the --overwrite command-line option."
        );

        fs::remove_dir_all(output_dir).context("Could not delete folder")?;
        true
    } else {
        false
    };

    // Try to create the directory, with parents
    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

/// Represents a row in the iterations CSV file
#[derive(Serialize, Debug, PartialEq)]
struct IterationRow {
    iteration: u32,
    price_deviation: f64,
    demand_deviation: Option<f64>,
    oscillating: bool,
    damped: bool,
}

/// Represents a row in the final demand CSV file
#[derive(Serialize, Debug, PartialEq)]
struct DemandRow<'a> {
    region_id: &'a RegionID,
    commodity_id: &'a CommodityID,
    level: &'a LevelID,
    period: u32,
    time: &'a TimeID,
    value: Flow,
    unit: &'a str,
}

/// Represents a row in the final activity CSV file
#[derive(Serialize, Debug, PartialEq)]
struct ActivityRow<'a> {
    technology_id: &'a TechnologyID,
    region_id: &'a RegionID,
    period: u32,
    time: &'a TimeID,
    value: Flow,
}

/// Format the values of one row of a wide table, leaving missing values empty
fn wide_values<'a, V: Display + 'a>(
    values: impl IntoIterator<Item = Option<&'a V>>,
) -> impl Iterator<Item = String> {
    values
        .into_iter()
        .map(|value| value.map(ToString::to_string).unwrap_or_default())
}

/// The headers of the iteration columns of a wide table
fn iteration_headers(num_iterations: usize) -> impl Iterator<Item = String> {
    (0..num_iterations).map(|idx| format!("iter_{idx}"))
}

/// Writes diagnostic and result files to the output folder
pub struct DataWriter {
    output_path: PathBuf,
}

impl DataWriter {
    /// Create a writer for the given (existing) output folder
    pub fn new(output_path: &Path) -> Self {
        Self {
            output_path: output_path.to_path_buf(),
        }
    }

    /// Write the price, demand and deviation history, replacing existing files
    pub fn write_history(&self, history: &HistoryRecorder) -> Result<()> {
        self.write_price_history(history)?;
        self.write_demand_history(history)?;
        self.write_iterations(history)
    }

    fn create_writer(&self, file_name: &str) -> Result<csv::Writer<fs::File>> {
        let file_path = self.output_path.join(file_name);
        csv::Writer::from_path(&file_path)
            .with_context(|| format!("Could not create {}", file_path.display()))
    }

    fn write_price_history(&self, history: &HistoryRecorder) -> Result<()> {
        let mut writer = self.create_writer(PRICE_HISTORY_FILE_NAME)?;
        writer.write_record(
            ["region", "commodity", "period"]
                .into_iter()
                .map(String::from)
                .chain(iteration_headers(history.len())),
        )?;

        let table: WideTable<_, _> = history.price_table();
        for (key, values) in &table {
            writer.write_record(
                [
                    key.region_id.to_string(),
                    key.commodity_id.to_string(),
                    key.period.to_string(),
                ]
                .into_iter()
                .chain(wide_values(values.iter().map(Option::as_ref))),
            )?;
        }
        writer.flush()?;

        Ok(())
    }

    fn write_demand_history(&self, history: &HistoryRecorder) -> Result<()> {
        let mut writer = self.create_writer(DEMAND_HISTORY_FILE_NAME)?;
        writer.write_record(
            ["region", "commodity", "level", "period", "time", "unit"]
                .into_iter()
                .map(String::from)
                .chain(iteration_headers(history.len())),
        )?;

        for (key, values) in &history.demand_table() {
            // Unit of the latest value
            let unit = values
                .iter()
                .rev()
                .flatten()
                .map(|(_, unit)| unit.as_str())
                .next()
                .unwrap_or_default();
            writer.write_record(
                [
                    key.region_id.to_string(),
                    key.commodity_id.to_string(),
                    key.level.to_string(),
                    key.period.to_string(),
                    key.time.to_string(),
                    unit.to_string(),
                ]
                .into_iter()
                .chain(wide_values(
                    values
                        .iter()
                        .map(|value| value.as_ref().map(|(flow, _)| flow)),
                )),
            )?;
        }
        writer.flush()?;

        Ok(())
    }

    fn write_iterations(&self, history: &HistoryRecorder) -> Result<()> {
        let mut writer = self.create_writer(ITERATIONS_FILE_NAME)?;
        for record in history.records() {
            writer.serialize(IterationRow {
                iteration: record.iteration,
                price_deviation: record.price_deviation.value(),
                demand_deviation: record.demand_deviation.map(|deviation| deviation.value()),
                oscillating: record.oscillating,
                damped: record.damped,
            })?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Write the prices and demand of the last iteration and the activity of the final solution
    pub fn write_final(
        &self,
        history: &HistoryRecorder,
        solution: Option<&ModelSolution>,
    ) -> Result<()> {
        if let Some(record) = history.last() {
            let mut writer = self.create_writer(FINAL_PRICES_FILE_NAME)?;
            for row in record.prices.records() {
                writer.serialize(row)?;
            }
            writer.flush()?;

            self.write_final_demand(&record.demand)?;
        }

        if let Some(solution) = solution {
            let mut writer = self.create_writer(FINAL_ACTIVITY_FILE_NAME)?;
            for row in solution.activity.iter().sorted_by(|a, b| {
                (&a.technology_id, &a.region_id, a.period, &a.time).cmp(&(
                    &b.technology_id,
                    &b.region_id,
                    b.period,
                    &b.time,
                ))
            }) {
                writer.serialize(ActivityRow {
                    technology_id: &row.technology_id,
                    region_id: &row.region_id,
                    period: row.period,
                    time: &row.time,
                    value: row.value,
                })?;
            }
            writer.flush()?;
        }

        Ok(())
    }

    fn write_final_demand(&self, demand: &DemandTable) -> Result<()> {
        let mut writer = self.create_writer(FINAL_DEMAND_FILE_NAME)?;
        for (key, entry) in demand {
            writer.serialize(DemandRow {
                region_id: &key.region_id,
                commodity_id: &key.commodity_id,
                level: &key.level,
                period: key.period,
                time: &key.time,
                value: entry.value,
                unit: &entry.unit,
            })?;
        }
        writer.flush()?;

        Ok(())
    }
}

impl DiagnosticSink for DataWriter {
    fn write(&mut self, history: &HistoryRecorder) -> Result<()> {
        self.write_history(history)
    }
}
