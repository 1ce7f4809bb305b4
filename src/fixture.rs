//! Fixtures for tests
use crate::commodity::CommodityID;
use crate::core_model::{CoreModel, ModelSolution, Technology, TechnologyID, VALUE_OF_LOST_LOAD};
use crate::coupling::demand::{DemandEntry, DemandKey, DemandTable, RawDemandRecord, RawDemandTable};
use crate::coupling::prices::{PriceKey, PriceTable};
use crate::coupling::solver::SolverConfig;
use crate::region::RegionID;
use crate::simulator::{DemandSimulator, Sector, SimulationConfig};
use crate::units::Flow;
use anyhow::{Context, Result, bail, ensure};
use indexmap::IndexSet;
use map_macro::hash_set;
use rstest::fixture;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// Write a file with the given contents, returning its path
pub fn write_file(dir_path: &Path, file_name: &str, contents: &str) -> PathBuf {
    let file_path = dir_path.join(file_name);
    fs::write(&file_path, contents).unwrap();
    file_path
}

/// A key for useful demand over a whole year
pub fn demand_key(region: &str, commodity: &str, period: u32) -> DemandKey {
    DemandKey {
        region_id: region.into(),
        commodity_id: commodity.into(),
        period,
        level: "useful".into(),
        time: "year".into(),
    }
}

/// A demand entry in GWa
pub fn demand_entry(value: f64) -> DemandEntry {
    DemandEntry {
        value: Flow(value),
        unit: "GWa".into(),
    }
}

pub fn price_key(region: &str, commodity: &str, period: u32) -> PriceKey {
    PriceKey {
        region_id: region.into(),
        commodity_id: commodity.into(),
        period,
    }
}

/// A simulator output record without a unit
pub fn raw_record(region: &str, commodity: &str, period: u32, value: f64) -> RawDemandRecord {
    RawDemandRecord {
        region_id: region.into(),
        commodity_id: commodity.into(),
        period,
        value: Some(value),
        unit: None,
    }
}

#[fixture]
pub fn simulation_config() -> SimulationConfig {
    SimulationConfig {
        scenario: "SSP2".into(),
        climate: "baseline".into(),
        sector: None,
    }
}

/// A simulator which returns preset outputs in turn.
///
/// The last output is repeated once the others are used up. A `None` output is a failure.
pub struct MockSimulator {
    name: String,
    outputs: Vec<Option<RawDemandTable>>,
    calls: Rc<RefCell<Vec<Option<Sector>>>>,
}

impl MockSimulator {
    pub fn new(name: &str, outputs: Vec<Option<RawDemandTable>>) -> Self {
        Self {
            name: name.into(),
            outputs,
            calls: Rc::default(),
        }
    }

    /// The sector of every run, shared so it can be inspected after the simulator is moved
    pub fn calls(&self) -> Rc<RefCell<Vec<Option<Sector>>>> {
        Rc::clone(&self.calls)
    }
}

impl DemandSimulator for MockSimulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, _prices: &PriceTable, config: &SimulationConfig) -> Result<RawDemandTable> {
        let idx = self.calls.borrow().len();
        self.calls.borrow_mut().push(config.sector);

        let output = self
            .outputs
            .get(idx)
            .or(self.outputs.last())
            .with_context(|| format!("Simulator {} has no outputs", self.name))?;
        match output {
            Some(table) => Ok(table.clone()),
            None => bail!("Simulated failure in {}", self.name),
        }
    }
}

/// An in-memory core model which records every change made to it.
///
/// Successive solves produce the solutions in `solutions` in turn, repeating the last one.
#[derive(Debug)]
pub struct MockCoreModel {
    pub periods: Vec<u32>,
    pub regions: Vec<RegionID>,
    pub commodities: IndexSet<CommodityID>,
    pub technologies: BTreeSet<(TechnologyID, RegionID)>,
    pub parameters: HashSet<String>,
    pub commits: Vec<String>,
    pub demand: DemandTable,
    pub solve_attempts: Vec<String>,
    pub failing_solver_configs: HashSet<String>,
    pub reference: ModelSolution,
    pub solutions: Vec<ModelSolution>,
    pub solution: Option<ModelSolution>,
    num_solved: usize,
    checked_out: bool,
}

#[fixture]
pub fn mock_core() -> MockCoreModel {
    MockCoreModel {
        periods: vec![2010, 2020, 2030, 2040],
        regions: vec!["R1".into(), "R1_GLB".into()],
        commodities: ["gas".into(), "electr".into()].into_iter().collect(),
        technologies: BTreeSet::new(),
        parameters: hash_set! {VALUE_OF_LOST_LOAD.to_string()},
        commits: Vec::new(),
        demand: DemandTable::default(),
        solve_attempts: Vec::new(),
        failing_solver_configs: HashSet::new(),
        reference: ModelSolution::default(),
        solutions: Vec::new(),
        solution: None,
        num_solved: 0,
        checked_out: false,
    }
}

impl MockCoreModel {
    fn ensure_checked_out(&self) -> Result<()> {
        ensure!(self.checked_out, "No transaction is checked out");
        Ok(())
    }
}

impl CoreModel for MockCoreModel {
    fn periods(&self) -> &[u32] {
        &self.periods
    }

    fn first_model_period(&self) -> u32 {
        self.periods[1]
    }

    fn regions(&self) -> Vec<RegionID> {
        self.regions.clone()
    }

    fn has_commodity(&self, id: &CommodityID) -> bool {
        self.commodities.contains(id)
    }

    fn has_technology(&self, id: &TechnologyID, region_id: &RegionID) -> bool {
        self.technologies
            .contains(&(id.clone(), region_id.clone()))
    }

    fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains(name)
    }

    fn add_commodity(&mut self, id: CommodityID) -> Result<()> {
        self.ensure_checked_out()?;
        self.commodities.insert(id);
        Ok(())
    }

    fn add_technology(&mut self, technology: Technology) -> Result<()> {
        self.ensure_checked_out()?;
        self.technologies
            .insert((technology.id, technology.region_id));
        Ok(())
    }

    fn check_out(&mut self) -> Result<()> {
        ensure!(!self.checked_out, "A transaction is already checked out");
        self.checked_out = true;
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<()> {
        self.ensure_checked_out()?;
        self.checked_out = false;
        self.commits.push(message.to_string());
        Ok(())
    }

    fn clear_solution(&mut self) {
        self.solution = None;
    }

    fn set_demand(&mut self, demand: &DemandTable) -> Result<()> {
        self.ensure_checked_out()?;
        self.demand = demand.clone();
        Ok(())
    }

    fn solve(&mut self, config: &SolverConfig) -> Result<()> {
        self.solve_attempts.push(config.name.clone());
        if self.failing_solver_configs.contains(&config.name) {
            bail!("Solver {} did not converge", config.name);
        }

        let solution = self
            .solutions
            .get(self.num_solved)
            .or(self.solutions.last())
            .cloned()
            .unwrap_or_default();
        self.num_solved += 1;
        self.solution = Some(solution);
        Ok(())
    }

    fn solution(&self) -> Option<&ModelSolution> {
        self.solution.as_ref()
    }

    fn reference_solution(&mut self) -> Result<ModelSolution> {
        Ok(self.reference.clone())
    }
}
