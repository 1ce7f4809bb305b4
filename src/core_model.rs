//! The interface to the supply-side optimisation model which the coupling loop drives.
use crate::commodity::CommodityID;
use crate::coupling::demand::{DemandTable, LevelID, TimeID};
use crate::coupling::solver::SolverConfig;
use crate::id::define_id_type;
use crate::region::RegionID;
use crate::units::{Flow, Money, MoneyPerFlow};
use anyhow::Result;
use indexmap::IndexMap;
use serde::Deserialize;

pub mod input;
pub mod linear;
pub mod parameters;

define_id_type! {TechnologyID}

/// Name of the value-of-lost-load parameter, which the coupling loop requires the model to carry
pub const VALUE_OF_LOST_LOAD: &str = "value_of_lost_load";

/// A technology in one region converting (at most) one input commodity into an output commodity
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Technology {
    /// Unique identifier (e.g. "resid_heat_gas")
    pub id: TechnologyID,
    /// The region the technology operates in
    pub region_id: RegionID,
    /// The commodity consumed, if any
    pub input_commodity: Option<CommodityID>,
    /// The commodity produced
    pub output_commodity: CommodityID,
    /// Units of output per unit of input
    pub efficiency: f64,
    /// Cost per unit of output
    pub variable_cost: MoneyPerFlow,
    /// Maximum output per period and time. Unlimited if absent.
    pub capacity: Option<Flow>,
}
/// A map of [`Technology`]s, keyed by technology ID and region.
///
/// The same technology ID may be used in several regions.
pub type TechnologyMap = IndexMap<(TechnologyID, RegionID), Technology>;

/// The shadow price of a commodity balance
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceRow {
    /// Region of the balance
    pub region_id: RegionID,
    /// Commodity of the balance
    pub commodity_id: CommodityID,
    /// Level of the balance
    pub level: LevelID,
    /// Model period
    pub period: u32,
    /// Sub-period
    pub time: TimeID,
    /// The price
    pub value: MoneyPerFlow,
}

/// The output of a technology in one period and time
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRow {
    /// The technology
    pub technology_id: TechnologyID,
    /// The region the technology operates in
    pub region_id: RegionID,
    /// Model period
    pub period: u32,
    /// Sub-period
    pub time: TimeID,
    /// Amount of output produced
    pub value: Flow,
}

/// A solution of the core model
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelSolution {
    /// Commodity prices for every balance in the model
    pub prices: Vec<PriceRow>,
    /// Technology activity
    pub activity: Vec<ActivityRow>,
    /// Value of the objective function
    pub objective: Money,
}

/// A supply-side model which can be modified and re-solved.
///
/// Structural changes and demand updates are only permitted while a transaction is checked out
/// (see [`CoreModel::check_out`] and [`CoreModel::commit`]).
pub trait CoreModel {
    /// The periods of the model horizon, in ascending order
    fn periods(&self) -> &[u32];

    /// The first period which is optimised
    fn first_model_period(&self) -> u32;

    /// The IDs of all regions in the model
    fn regions(&self) -> Vec<RegionID>;

    /// Whether the model has the given commodity
    fn has_commodity(&self, id: &CommodityID) -> bool;

    /// Whether the model has the given technology in the given region
    fn has_technology(&self, id: &TechnologyID, region_id: &RegionID) -> bool;

    /// Whether the model carries the named parameter
    fn has_parameter(&self, name: &str) -> bool;

    /// Add a new service commodity
    fn add_commodity(&mut self, id: CommodityID) -> Result<()>;

    /// Add a new technology
    fn add_technology(&mut self, technology: Technology) -> Result<()>;

    /// Start a transaction
    fn check_out(&mut self) -> Result<()>;

    /// End the current transaction, recording the given message
    fn commit(&mut self, message: &str) -> Result<()>;

    /// Discard the current solution, if any
    fn clear_solution(&mut self);

    /// Replace the demand for every commodity present in `demand`
    fn set_demand(&mut self, demand: &DemandTable) -> Result<()>;

    /// Solve the model with the given solver configuration
    fn solve(&mut self, config: &SolverConfig) -> Result<()>;

    /// The current solution, if the model has been solved since it was last modified
    fn solution(&self) -> Option<&ModelSolution>;

    /// The solution of the reference (parent) scenario, used to seed the first iteration
    fn reference_solution(&mut self) -> Result<ModelSolution>;
}
