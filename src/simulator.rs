//! Adapters for the external demand simulators.
use crate::coupling::demand::RawDemandTable;
use crate::coupling::prices::PriceTable;
use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub mod command;
pub mod elastic;

use command::CommandSimulator;
use elastic::ElasticSimulator;

/// The building-stock sub-model to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum Sector {
    /// Residential buildings
    #[strum(serialize = "resid")]
    Residential,
    /// Commercial buildings
    #[strum(serialize = "comm")]
    Commercial,
}

/// Settings passed to a simulator on every run
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Name of the socio-economic scenario
    pub scenario: String,
    /// Name of the climate scenario
    pub climate: String,
    /// The sub-model to run, for simulators which have more than one
    pub sector: Option<Sector>,
}

impl SimulationConfig {
    /// The same configuration for the given sector
    pub fn for_sector(&self, sector: Sector) -> Self {
        Self {
            sector: Some(sector),
            ..self.clone()
        }
    }
}

/// An external model which estimates demand in response to prices.
///
/// Runs are synchronous and may take a long time.
pub trait DemandSimulator {
    /// Name used in log and error messages
    fn name(&self) -> &str;

    /// Run the simulator with the given prices
    fn run(&mut self, prices: &PriceTable, config: &SimulationConfig) -> Result<RawDemandTable>;
}

/// How to construct a simulator, as given in `coupling.toml`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SimulatorDefinition {
    /// Scale baseline demand by a constant price elasticity
    Elastic {
        /// CSV file of baseline demand, relative to the model directory
        baseline: PathBuf,
        /// Price elasticity of demand
        #[serde(default = "default_elasticity")]
        elasticity: f64,
    },
    /// Run an external program
    Command {
        /// The program to run. Resolved against the model directory if such a file exists there.
        program: String,
        /// Arguments passed before the standard ones
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_elasticity() -> f64 {
    -0.3
}

impl SimulatorDefinition {
    /// Create the simulator
    ///
    /// # Arguments
    ///
    /// * `name` - Name used in log and error messages
    /// * `model_dir` - Directory against which relative paths are resolved
    pub fn build(&self, name: &str, model_dir: &Path) -> Result<Box<dyn DemandSimulator>> {
        Ok(match self {
            Self::Elastic {
                baseline,
                elasticity,
            } => Box::new(ElasticSimulator::from_path(
                name,
                &model_dir.join(baseline),
                *elasticity,
            )?),
            Self::Command { program, args } => {
                let local = model_dir.join(program);
                let program = if local.is_file() {
                    local
                } else {
                    PathBuf::from(program)
                };
                Box::new(CommandSimulator::new(name, program, args.clone()))
            }
        })
    }
}

/// Runs the building-stock simulator's residential and commercial sub-models.
///
/// The commercial result is cached so later iterations can reuse it without running the
/// simulator again.
pub struct BuildingStockAdapter {
    simulator: Box<dyn DemandSimulator>,
    commercial: Option<RawDemandTable>,
}

impl BuildingStockAdapter {
    /// Wrap a simulator
    pub fn new(simulator: Box<dyn DemandSimulator>) -> Self {
        Self {
            simulator,
            commercial: None,
        }
    }

    /// Name of the wrapped simulator
    pub fn name(&self) -> &str {
        self.simulator.name()
    }

    /// Run the residential sub-model
    pub fn run_residential(
        &mut self,
        prices: &PriceTable,
        config: &SimulationConfig,
    ) -> Result<RawDemandTable> {
        self.simulator
            .run(prices, &config.for_sector(Sector::Residential))
    }

    /// Run the commercial sub-model, or return the cached result if `skip` is set
    pub fn run_commercial(
        &mut self,
        prices: &PriceTable,
        config: &SimulationConfig,
        skip: bool,
    ) -> Result<RawDemandTable> {
        if skip {
            debug!("Reusing cached commercial building-stock results");
            return self
                .commercial
                .clone()
                .context("Commercial run skipped but no earlier result is available");
        }

        let table = self
            .simulator
            .run(prices, &config.for_sector(Sector::Commercial))?;
        self.commercial = Some(table.clone());
        Ok(table)
    }
}
