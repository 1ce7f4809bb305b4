//! The coupled model: the core model, the simulators and the coupling parameters.
use crate::core_model::CoreModel;
use crate::core_model::input::read_core_model;
use crate::core_model::linear::LinearModel;
use crate::coupling::merge::{DemandMerger, Horizon};
use crate::coupling::update::{CoreModelUpdater, read_service_technologies};
use crate::coupling::{IterationController, LoopSettings};
use crate::simulator::{BuildingStockAdapter, DemandSimulator, SimulationConfig};
use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};

pub mod parameters;
pub use parameters::CouplingParameters;

/// A model ready to be run
pub struct Model {
    /// Directory the model was read from
    pub model_dir: PathBuf,
    /// The core model
    pub core: LinearModel,
    /// Parameters of the coupling loop
    pub parameters: CouplingParameters,
    /// The periods demand is produced for
    pub horizon: Horizon,
    /// Applies demand to the core model
    pub updater: CoreModelUpdater,
    /// The end-use demand simulator
    pub end_use: Box<dyn DemandSimulator>,
    /// The building-stock demand simulator
    pub building_stock: Box<dyn DemandSimulator>,
}

impl Model {
    /// Read a model from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<Model> {
        let model_dir = model_dir.as_ref();
        let core = read_core_model(model_dir)?;
        let parameters = CouplingParameters::from_path(model_dir)?;

        let periods = core.periods().to_vec();
        let placeholder_period = parameters
            .placeholder_period
            .or_else(|| periods.last().copied())
            .context("The core model has no periods")?;
        let horizon = Horizon::new(periods, core.first_model_period(), placeholder_period)
            .context("Invalid placeholder_period in coupling.toml")?;
        debug!("Placeholder period: {placeholder_period}");

        let templates = read_service_technologies(model_dir)?;
        let updater = CoreModelUpdater::new(templates, &parameters.global_region_suffix);
        let end_use = parameters
            .end_use
            .build("end use", model_dir)
            .context("Invalid end_use simulator")?;
        let building_stock = parameters
            .building_stock
            .build("building stock", model_dir)
            .context("Invalid building_stock simulator")?;

        Ok(Model {
            model_dir: model_dir.to_path_buf(),
            core,
            parameters,
            horizon,
            updater,
            end_use,
            building_stock,
        })
    }

    /// Settings for the coupling loop
    pub fn loop_settings(&self) -> LoopSettings {
        let params = &self.parameters;
        LoopSettings {
            simulation: SimulationConfig {
                scenario: params.scenario.clone(),
                climate: params.climate.clone(),
                sector: None,
            },
            price_commodities: params.price_commodities.clone(),
            global_region_suffix: params.global_region_suffix.clone(),
            price_tolerance: params.price_tolerance,
            demand_tolerance: params.demand_tolerance,
            oscillation_tolerance: params.oscillation_tolerance,
            max_iterations: params.max_iterations,
        }
    }

    /// Create the controller which runs the coupling loop
    pub fn into_controller(self) -> IterationController<LinearModel> {
        let settings = self.loop_settings();
        let merger = DemandMerger::new(
            self.parameters.merge,
            self.horizon,
            self.parameters.demand_level.into(),
            self.parameters.demand_time.into(),
        );

        IterationController::new(
            self.core,
            self.end_use,
            BuildingStockAdapter::new(self.building_stock),
            merger,
            self.updater,
            settings,
        )
    }
}
