//! Defines the `CouplingParameters` struct, which represents the contents of `coupling.toml`.
use crate::commodity::CommodityID;
use crate::coupling::merge::MergeRules;
use crate::input::{input_err_msg, read_toml};
use crate::simulator::SimulatorDefinition;
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::Path;

const COUPLING_PARAMETERS_FILE_NAME: &str = "coupling.toml";

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_global_region_suffix, String, "_GLB".into());
define_param_default!(default_price_tolerance, f64, 5e-3);
define_param_default!(default_demand_tolerance, f64, 5e-3);
define_param_default!(default_oscillation_tolerance, f64, 1e-5);
define_param_default!(default_max_iterations, u32, 10);
define_param_default!(default_demand_level, String, "useful".into());
define_param_default!(default_demand_time, String, "year".into());

fn default_price_commodities() -> Vec<CommodityID> {
    ["biomass", "coal", "lightoil", "gas", "electr", "d_heat"]
        .into_iter()
        .map(CommodityID::from)
        .collect()
}

/// Represents the contents of `coupling.toml`
#[derive(Debug, Deserialize, PartialEq)]
pub struct CouplingParameters {
    /// Socio-economic scenario passed to the simulators
    pub scenario: String,
    /// Climate scenario passed to the simulators
    pub climate: String,
    /// The long-run period whose demand is extrapolated. Defaults to the last period.
    pub placeholder_period: Option<u32>,
    /// Commodities whose prices are passed to the simulators
    #[serde(default = "default_price_commodities")]
    pub price_commodities: Vec<CommodityID>,
    /// Regions with IDs ending in this suffix are global and are not given a price signal
    #[serde(default = "default_global_region_suffix")]
    pub global_region_suffix: String,
    /// The loop converges when the mean price deviation falls below this value
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: f64,
    /// The loop converges when the mean demand deviation falls below this value
    #[serde(default = "default_demand_tolerance")]
    pub demand_tolerance: f64,
    /// Successive price deviations closer than this are flagged as oscillating
    #[serde(default = "default_oscillation_tolerance")]
    pub oscillation_tolerance: f64,
    /// The demand is damped and the loop stopped once the iteration index exceeds this value
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Level of the demand given to the core model
    #[serde(default = "default_demand_level")]
    pub demand_level: String,
    /// Sub-period of the demand given to the core model
    #[serde(default = "default_demand_time")]
    pub demand_time: String,
    /// Rules for merging the simulators' outputs
    #[serde(default)]
    pub merge: MergeRules,
    /// The end-use demand simulator
    pub end_use: SimulatorDefinition,
    /// The building-stock demand simulator
    pub building_stock: SimulatorDefinition,
}

/// Check that a tolerance parameter is valid
fn check_tolerance(name: &str, value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value >= 0.0,
        "{name} must be a finite number greater than or equal to zero"
    );

    Ok(())
}

/// Check that the `max_iterations` parameter is valid
fn check_max_iterations(value: u32) -> Result<()> {
    ensure!(value > 0, "max_iterations cannot be zero");

    Ok(())
}

/// Check that the `price_commodities` parameter is valid
fn check_price_commodities(commodities: &[CommodityID]) -> Result<()> {
    ensure!(!commodities.is_empty(), "price_commodities is empty");

    Ok(())
}

impl CouplingParameters {
    /// Read `coupling.toml` from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<CouplingParameters> {
        let file_path = model_dir.as_ref().join(COUPLING_PARAMETERS_FILE_NAME);
        let params: CouplingParameters = read_toml(&file_path)?;

        params
            .validate()
            .with_context(|| input_err_msg(file_path))?;

        Ok(params)
    }

    /// Validate parameters after reading in file
    fn validate(&self) -> Result<()> {
        check_price_commodities(&self.price_commodities)?;
        check_tolerance("price_tolerance", self.price_tolerance)?;
        check_tolerance("demand_tolerance", self.demand_tolerance)?;
        check_tolerance("oscillation_tolerance", self.oscillation_tolerance)?;
        check_max_iterations(self.max_iterations)?;

        Ok(())
    }
}
