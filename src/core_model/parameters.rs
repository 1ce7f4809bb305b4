//! Defines the `CoreModelParameters` struct, which represents the contents of `model.toml`.
use crate::input::{input_err_msg, is_sorted_and_unique, read_toml};
use crate::units::MoneyPerFlow;
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::Path;

const MODEL_PARAMETERS_FILE_NAME: &str = "model.toml";

/// Represents the contents of `model.toml`
#[derive(Debug, Deserialize, PartialEq)]
pub struct CoreModelParameters {
    /// Periods of the model horizon
    pub periods: Vec<u32>,
    /// The first period which is optimised. Earlier periods are historical.
    pub first_model_period: u32,
    /// The cost applied to unmet demand.
    ///
    /// If absent, demand must be met in full.
    pub value_of_lost_load: Option<MoneyPerFlow>,
}

/// Check that the `periods` parameter is valid
fn check_periods(periods: &[u32]) -> Result<()> {
    ensure!(!periods.is_empty(), "`periods` is empty");

    ensure!(
        is_sorted_and_unique(periods),
        "`periods` must be composed of unique values in order"
    );

    Ok(())
}

/// Check that the `first_model_period` parameter is one of the periods
fn check_first_model_period(periods: &[u32], first_model_period: u32) -> Result<()> {
    ensure!(
        periods.contains(&first_model_period),
        "first_model_period {first_model_period} is not one of the periods"
    );

    Ok(())
}

/// Check that the `value_of_lost_load` parameter is valid
fn check_value_of_lost_load(value: MoneyPerFlow) -> Result<()> {
    ensure!(
        value.is_finite() && value > MoneyPerFlow(0.0),
        "value_of_lost_load must be a finite number greater than zero"
    );

    Ok(())
}

impl CoreModelParameters {
    /// Read `model.toml` from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    ///
    /// # Returns
    ///
    /// The file contents or an error if the file is invalid
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<CoreModelParameters> {
        let file_path = model_dir.as_ref().join(MODEL_PARAMETERS_FILE_NAME);
        let params: CoreModelParameters = read_toml(&file_path)?;

        params
            .validate()
            .with_context(|| input_err_msg(file_path))?;

        Ok(params)
    }

    /// Validate parameters after reading in file
    fn validate(&self) -> Result<()> {
        check_periods(&self.periods)?;
        check_first_model_period(&self.periods, self.first_model_period)?;
        if let Some(value) = self.value_of_lost_load {
            check_value_of_lost_load(value)?;
        }

        Ok(())
    }

    /// The periods which are optimised
    pub fn model_periods(&self) -> impl Iterator<Item = u32> + '_ {
        self.periods
            .iter()
            .copied()
            .filter(|period| *period >= self.first_model_period)
    }
}
