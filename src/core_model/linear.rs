//! A linear supply-side model solved with HiGHS.
//!
//! Each technology has one activity variable per optimised period and time. Every commodity
//! balance requires output minus input to cover demand; unmet demand is penalised at the value of
//! lost load, if the model has one. Commodity prices are the duals of the balance constraints.
use super::parameters::CoreModelParameters;
use super::{
    ActivityRow, CoreModel, ModelSolution, PriceRow, Technology, TechnologyID, TechnologyMap,
    VALUE_OF_LOST_LOAD,
};
use crate::commodity::{Commodity, CommodityID, CommodityMap};
use crate::coupling::demand::{DemandTable, LevelID, TimeID};
use crate::coupling::solver::{OptionValue, SolverConfig};
use crate::region::{RegionID, RegionMap};
use crate::units::{Flow, Money, MoneyPerFlow};
use anyhow::{Context, Result, anyhow, bail, ensure};
use highs::{HighsModelStatus, RowProblem as Problem, Sense};
use indexmap::IndexMap;
use log::{debug, info};
use std::collections::HashMap;

/// The level of commodities which are not the subject of any demand
pub const SUPPLY_LEVEL: &str = "final";

/// The sub-period used when demand does not name any
pub const DEFAULT_TIME: &str = "year";

/// A decision variable in the optimisation
type Variable = highs::Col;

/// Identifies a commodity balance constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BalanceKey {
    region_id: RegionID,
    commodity_id: CommodityID,
    level: LevelID,
    period: u32,
    time: TimeID,
}

/// The variables and constraints of the optimisation problem, in the order they were added
#[derive(Default)]
struct ProblemLayout {
    /// Cost coefficient of each column
    column_costs: Vec<f64>,
    /// Activity columns, in column order
    activity: Vec<(TechnologyID, RegionID, u32, TimeID)>,
    /// Terms for each balance row, in row order
    balances: IndexMap<BalanceKey, Vec<(Variable, f64)>>,
}

/// A linear supply-side model
#[derive(Debug)]
pub struct LinearModel {
    parameters: CoreModelParameters,
    regions: RegionMap,
    commodities: CommodityMap,
    technologies: TechnologyMap,
    demand: DemandTable,
    reference: Option<ModelSolution>,
    solution: Option<ModelSolution>,
    checked_out: bool,
    audit_log: Vec<String>,
}

impl LinearModel {
    /// Create a new model, checking that all references between its parts are valid
    pub fn new(
        parameters: CoreModelParameters,
        regions: RegionMap,
        commodities: CommodityMap,
        technologies: TechnologyMap,
        demand: DemandTable,
        reference_prices: Option<Vec<PriceRow>>,
    ) -> Result<Self> {
        let mut model = Self {
            parameters,
            regions,
            commodities,
            technologies: TechnologyMap::new(),
            demand: DemandTable::default(),
            reference: reference_prices.map(|prices| ModelSolution {
                prices,
                ..Default::default()
            }),
            solution: None,
            checked_out: false,
            audit_log: Vec::new(),
        };

        for technology in technologies.into_values() {
            model.check_technology(&technology)?;
            model.insert_technology(technology);
        }
        model.check_demand(&demand)?;
        model.demand = demand;

        Ok(model)
    }

    /// The technologies in the model
    pub fn technologies(&self) -> &TechnologyMap {
        &self.technologies
    }

    /// The commodities in the model
    pub fn commodities(&self) -> &CommodityMap {
        &self.commodities
    }

    /// The demand currently applied to the model
    pub fn demand(&self) -> &DemandTable {
        &self.demand
    }

    /// Messages of all committed transactions, oldest first
    pub fn audit_log(&self) -> &[String] {
        &self.audit_log
    }

    fn ensure_checked_out(&self, operation: &str) -> Result<()> {
        ensure!(
            self.checked_out,
            "Cannot {operation}: no transaction is checked out"
        );

        Ok(())
    }

    fn insert_technology(&mut self, technology: Technology) {
        let key = (technology.id.clone(), technology.region_id.clone());
        self.technologies.insert(key, technology);
    }

    fn check_technology(&self, technology: &Technology) -> Result<()> {
        let id = &technology.id;
        ensure!(
            !self.has_technology(id, &technology.region_id),
            "Technology {id} already exists in region {}",
            technology.region_id
        );
        ensure!(
            self.regions.contains_key(&technology.region_id),
            "Technology {id} has unknown region {}",
            technology.region_id
        );
        ensure!(
            self.commodities.contains_key(&technology.output_commodity),
            "Technology {id} has unknown output commodity {}",
            technology.output_commodity
        );
        if let Some(input) = &technology.input_commodity {
            ensure!(
                self.commodities.contains_key(input),
                "Technology {id} has unknown input commodity {input}"
            );
        }
        ensure!(
            technology.efficiency.is_finite() && technology.efficiency > 0.0,
            "Efficiency of technology {id} must be a finite number greater than zero"
        );
        ensure!(
            technology.variable_cost.is_finite(),
            "Variable cost of technology {id} must be finite"
        );
        if let Some(capacity) = technology.capacity {
            ensure!(
                capacity.is_finite() && capacity >= Flow(0.0),
                "Capacity of technology {id} must be a finite, non-negative number"
            );
        }

        Ok(())
    }

    fn check_demand(&self, demand: &DemandTable) -> Result<()> {
        for (key, entry) in demand {
            ensure!(
                self.regions.contains_key(&key.region_id),
                "Demand given for unknown region {}",
                key.region_id
            );
            ensure!(
                self.commodities.contains_key(&key.commodity_id),
                "Demand given for unknown commodity {}",
                key.commodity_id
            );
            ensure!(
                entry.value.is_finite() && entry.value >= Flow(0.0),
                "Demand for {} in {} ({}) must be a finite, non-negative number",
                key.commodity_id,
                key.region_id,
                key.period
            );
        }

        Ok(())
    }

    /// The level at which each demanded commodity is balanced
    fn commodity_levels(&self) -> HashMap<&CommodityID, &LevelID> {
        let mut levels = HashMap::new();
        for key in self.demand.keys() {
            levels.entry(&key.commodity_id).or_insert(&key.level);
        }

        levels
    }

    /// All sub-periods named in the demand, in order of appearance
    fn times(&self) -> Vec<TimeID> {
        let mut times: Vec<TimeID> = Vec::new();
        for key in self.demand.keys() {
            if !times.contains(&key.time) {
                times.push(key.time.clone());
            }
        }
        if times.is_empty() {
            times.push(DEFAULT_TIME.into());
        }

        times
    }

    /// Add activity and unmet-demand variables, collecting the terms of each balance
    fn add_variables(&self, problem: &mut Problem) -> ProblemLayout {
        let levels = self.commodity_levels();
        let supply_level = LevelID::new(SUPPLY_LEVEL);
        let level_of = |commodity_id: &CommodityID| {
            levels
                .get(commodity_id)
                .map_or_else(|| supply_level.clone(), |level| (*level).clone())
        };
        let times = self.times();
        let mut layout = ProblemLayout::default();

        for technology in self.technologies.values() {
            let cost = technology.variable_cost.value();
            for period in self.parameters.model_periods() {
                for time in &times {
                    let var = match technology.capacity {
                        Some(capacity) => problem.add_column(cost, 0.0..=capacity.value()),
                        None => problem.add_column(cost, 0.0..),
                    };
                    layout.column_costs.push(cost);
                    layout.activity.push((
                        technology.id.clone(),
                        technology.region_id.clone(),
                        period,
                        time.clone(),
                    ));

                    let output_key = BalanceKey {
                        region_id: technology.region_id.clone(),
                        commodity_id: technology.output_commodity.clone(),
                        level: level_of(&technology.output_commodity),
                        period,
                        time: time.clone(),
                    };
                    layout
                        .balances
                        .entry(output_key)
                        .or_default()
                        .push((var, 1.0));

                    if let Some(input) = &technology.input_commodity {
                        let input_key = BalanceKey {
                            region_id: technology.region_id.clone(),
                            commodity_id: input.clone(),
                            level: level_of(input),
                            period,
                            time: time.clone(),
                        };
                        layout
                            .balances
                            .entry(input_key)
                            .or_default()
                            .push((var, -1.0 / technology.efficiency));
                    }
                }
            }
        }

        // Every demand in an optimised period needs a balance, even with no technology to meet it
        for key in self.demand.keys() {
            if key.period >= self.parameters.first_model_period {
                let balance_key = BalanceKey {
                    region_id: key.region_id.clone(),
                    commodity_id: key.commodity_id.clone(),
                    level: key.level.clone(),
                    period: key.period,
                    time: key.time.clone(),
                };
                layout.balances.entry(balance_key).or_default();
            }
        }

        if let Some(value_of_lost_load) = self.parameters.value_of_lost_load {
            for terms in layout.balances.values_mut() {
                let var = problem.add_column(value_of_lost_load.value(), 0.0..);
                layout.column_costs.push(value_of_lost_load.value());
                terms.push((var, 1.0));
            }
        }

        layout
    }

    /// Add one constraint per commodity balance
    fn add_balance_constraints(&self, problem: &mut Problem, layout: &ProblemLayout) {
        let demand: HashMap<BalanceKey, f64> = self
            .demand
            .iter()
            .map(|(key, entry)| {
                let balance_key = BalanceKey {
                    region_id: key.region_id.clone(),
                    commodity_id: key.commodity_id.clone(),
                    level: key.level.clone(),
                    period: key.period,
                    time: key.time.clone(),
                };
                (balance_key, entry.value.value())
            })
            .collect();

        for (key, terms) in &layout.balances {
            let rhs = demand.get(key).copied().unwrap_or(0.0);
            problem.add_row(rhs.., terms.iter().copied());
        }
    }

    /// Build and solve the optimisation problem
    fn optimise(&self, config: &SolverConfig) -> Result<ModelSolution> {
        let mut problem = Problem::default();
        let layout = self.add_variables(&mut problem);
        self.add_balance_constraints(&mut problem, &layout);
        debug!(
            "Solving core model with {} variables and {} constraints",
            layout.column_costs.len(),
            layout.balances.len()
        );

        let mut highs_model = problem.optimise(Sense::Minimise);
        configure_highs_logging(&mut highs_model);
        apply_solver_options(&mut highs_model, config);

        let solved = highs_model
            .try_solve()
            .map_err(|status| anyhow!("Could not solve: {status:?}"))?;
        match solved.status() {
            HighsModelStatus::Optimal => {}
            status => bail!("Could not solve: {status:?}"),
        }

        let solution = solved.get_solution();
        let columns = solution.columns();
        let objective = layout
            .column_costs
            .iter()
            .zip(columns)
            .map(|(cost, value)| Money(cost * value))
            .sum();
        let activity = layout
            .activity
            .iter()
            .zip(columns)
            .map(|((technology_id, region_id, period, time), value)| ActivityRow {
                technology_id: technology_id.clone(),
                region_id: region_id.clone(),
                period: *period,
                time: time.clone(),
                value: Flow(*value),
            })
            .collect();
        let prices = layout
            .balances
            .keys()
            .zip(solution.dual_rows())
            .map(|(key, price)| PriceRow {
                region_id: key.region_id.clone(),
                commodity_id: key.commodity_id.clone(),
                level: key.level.clone(),
                period: key.period,
                time: key.time.clone(),
                value: MoneyPerFlow(*price),
            })
            .collect();

        Ok(ModelSolution {
            prices,
            activity,
            objective,
        })
    }
}

/// Only let HiGHS write to the console when debug logging is enabled
fn configure_highs_logging(model: &mut highs::Model) {
    let enabled = log::log_enabled!(log::Level::Debug);
    model.set_option("log_to_console", enabled);
    model.set_option("output_flag", enabled);
}

fn apply_solver_options(model: &mut highs::Model, config: &SolverConfig) {
    for (name, value) in &config.options {
        match value {
            OptionValue::Str(value) => model.set_option(name.as_str(), value.as_str()),
            OptionValue::Int(value) => model.set_option(name.as_str(), *value),
            OptionValue::Float(value) => model.set_option(name.as_str(), *value),
            OptionValue::Bool(value) => model.set_option(name.as_str(), *value),
        }
    }
}

impl CoreModel for LinearModel {
    fn periods(&self) -> &[u32] {
        &self.parameters.periods
    }

    fn first_model_period(&self) -> u32 {
        self.parameters.first_model_period
    }

    fn regions(&self) -> Vec<RegionID> {
        self.regions.keys().cloned().collect()
    }

    fn has_commodity(&self, id: &CommodityID) -> bool {
        self.commodities.contains_key(id)
    }

    fn has_technology(&self, id: &TechnologyID, region_id: &RegionID) -> bool {
        self.technologies
            .contains_key(&(id.clone(), region_id.clone()))
    }

    fn has_parameter(&self, name: &str) -> bool {
        match name {
            VALUE_OF_LOST_LOAD => self.parameters.value_of_lost_load.is_some(),
            _ => false,
        }
    }

    fn add_commodity(&mut self, id: CommodityID) -> Result<()> {
        self.ensure_checked_out("add commodity")?;
        ensure!(
            !self.commodities.contains_key(&id),
            "Commodity {id} already exists"
        );

        debug!("Adding service commodity {id}");
        self.commodities
            .insert(id.clone(), Commodity::new_service(id));
        Ok(())
    }

    fn add_technology(&mut self, technology: Technology) -> Result<()> {
        self.ensure_checked_out("add technology")?;
        self.check_technology(&technology)?;

        debug!(
            "Adding technology {} in region {}",
            technology.id, technology.region_id
        );
        self.insert_technology(technology);
        Ok(())
    }

    fn check_out(&mut self) -> Result<()> {
        ensure!(!self.checked_out, "A transaction is already checked out");
        self.checked_out = true;
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<()> {
        self.ensure_checked_out("commit")?;
        self.checked_out = false;
        info!("Committed core model changes: {message}");
        self.audit_log.push(message.to_string());
        Ok(())
    }

    fn clear_solution(&mut self) {
        self.solution = None;
    }

    fn set_demand(&mut self, demand: &DemandTable) -> Result<()> {
        self.ensure_checked_out("set demand")?;
        self.check_demand(demand)?;

        let commodities = demand.commodities();
        self.demand
            .retain(|key, _| !commodities.contains(&key.commodity_id));
        for (key, entry) in demand {
            self.demand.insert(key.clone(), entry.clone());
        }

        Ok(())
    }

    fn solve(&mut self, config: &SolverConfig) -> Result<()> {
        ensure!(
            !self.checked_out,
            "Cannot solve while a transaction is checked out"
        );

        self.solution = None;
        self.solution = Some(self.optimise(config)?);
        Ok(())
    }

    fn solution(&self) -> Option<&ModelSolution> {
        self.solution.as_ref()
    }

    fn reference_solution(&mut self) -> Result<ModelSolution> {
        if let Some(reference) = &self.reference {
            return Ok(reference.clone());
        }

        info!("No reference prices given: solving the core model as loaded");
        let reference = self
            .optimise(&SolverConfig::backend_default())
            .context("Failed to solve reference scenario")?;
        self.reference = Some(reference.clone());
        Ok(reference)
    }
}
