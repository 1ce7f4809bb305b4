//! The coupling loop between the core model and the demand simulators.
use crate::commodity::CommodityID;
use crate::core_model::CoreModel;
use crate::simulator::{BuildingStockAdapter, DemandSimulator, SimulationConfig};
use crate::units::Dimensionless;
use anyhow::{Result, bail, ensure};
use log::{debug, info, warn};

pub mod convergence;
pub mod demand;
pub mod error;
pub mod history;
pub mod merge;
pub mod prices;
pub mod solver;
pub mod update;
use convergence::ConvergenceEvaluator;
use demand::{DemandTable, RawDemandTable};
use error::CouplingError;
use history::{HistoryRecorder, IterationRecord};
use merge::DemandMerger;
use prices::{PriceTable, extract_prices};
use solver::Solver;
use update::CoreModelUpdater;

/// Whether the loop is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConvergenceStatus {
    /// More iterations are needed
    Running,
    /// Prices or demand stopped changing
    Converged,
    /// The iteration limit was exceeded and the demand was damped
    ForcedStop,
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TerminationReason {
    /// Prices or demand stopped changing
    Converged,
    /// Converged while the deviation was flagged as oscillating
    OscillatingButAccepted,
    /// The iteration limit was exceeded
    ForcedStop,
}

/// The state of the stopping policy, updated once per iteration
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceState {
    /// The iteration being run
    pub iteration: u32,
    /// The price deviation of the last completed iteration
    pub previous_price_deviation: Option<Dimensionless>,
    /// Whether the price deviation barely changed in the last completed iteration
    pub oscillating: bool,
    /// Current status
    pub status: ConvergenceStatus,
}

impl Default for ConvergenceState {
    fn default() -> Self {
        Self {
            iteration: 0,
            previous_price_deviation: None,
            oscillating: false,
            status: ConvergenceStatus::Running,
        }
    }
}

/// Receives the history after every iteration, e.g. to write diagnostic files.
///
/// Failures are logged and do not stop the loop.
pub trait DiagnosticSink {
    /// Record the history so far
    fn write(&mut self, history: &HistoryRecorder) -> Result<()>;
}

/// Settings for the coupling loop
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    /// Settings passed to the simulators
    pub simulation: SimulationConfig,
    /// Commodities whose prices are passed to the simulators
    pub price_commodities: Vec<CommodityID>,
    /// Suffix marking global regions, which are excluded from the price signal
    pub global_region_suffix: String,
    /// Converged when the price deviation is below this value
    pub price_tolerance: f64,
    /// Converged when the demand deviation is below this value
    pub demand_tolerance: f64,
    /// Oscillating when successive price deviations differ by less than this value
    pub oscillation_tolerance: f64,
    /// Stop once the iteration index exceeds this value
    pub max_iterations: u32,
}

/// Runs the coupling loop until prices or demand converge, or the iteration limit is exceeded.
///
/// The controller owns the core model. Both the model and the history can be inspected once
/// [`IterationController::run`] returns, including after an error.
pub struct IterationController<C: CoreModel> {
    core: C,
    end_use: Box<dyn DemandSimulator>,
    building: BuildingStockAdapter,
    merger: DemandMerger,
    updater: CoreModelUpdater,
    solver: Solver,
    evaluator: ConvergenceEvaluator,
    settings: LoopSettings,
    sink: Option<Box<dyn DiagnosticSink>>,
    history: HistoryRecorder,
    state: ConvergenceState,
    commercial_demand: DemandTable,
}

/// Wrap a simulator failure in a [`CouplingError`]
fn simulation_error(component: &str, iteration: u32, err: &anyhow::Error) -> anyhow::Error {
    CouplingError::Simulation {
        component: component.to_string(),
        iteration,
        message: format!("{err:#}"),
    }
    .into()
}

impl<C: CoreModel> IterationController<C> {
    /// Create a controller
    ///
    /// # Arguments
    ///
    /// * `core` - The core model, with its reference solution available
    /// * `end_use` - The end-use demand simulator
    /// * `building` - The building-stock demand simulator
    /// * `merger` - Combines simulator outputs into the demand for the core model
    /// * `updater` - Applies demand to the core model
    /// * `settings` - Tolerances and limits
    pub fn new(
        core: C,
        end_use: Box<dyn DemandSimulator>,
        building: BuildingStockAdapter,
        merger: DemandMerger,
        updater: CoreModelUpdater,
        settings: LoopSettings,
    ) -> Self {
        let evaluator = ConvergenceEvaluator::new(merger.horizon().placeholder_period());
        Self {
            core,
            end_use,
            building,
            merger,
            updater,
            solver: Solver::default(),
            evaluator,
            settings,
            sink: None,
            history: HistoryRecorder::default(),
            state: ConvergenceState::default(),
            commercial_demand: DemandTable::default(),
        }
    }

    /// Use the given solver configurations instead of the defaults
    pub fn with_solver(mut self, solver: Solver) -> Self {
        self.solver = solver;
        self
    }

    /// Pass the history to `sink` after every iteration
    pub fn with_sink(mut self, sink: Box<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The iterations run so far
    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    /// The state of the stopping policy
    pub fn state(&self) -> &ConvergenceState {
        &self.state
    }

    /// The core model
    pub fn core(&self) -> &C {
        &self.core
    }

    /// Take ownership of the core model
    pub fn into_core(self) -> C {
        self.core
    }

    /// Run the loop to completion.
    ///
    /// Any [`CouplingError`] is fatal and is returned immediately; the history up to the failed
    /// iteration is kept.
    pub fn run(&mut self) -> Result<TerminationReason> {
        ensure!(
            self.state.status == ConvergenceStatus::Running,
            "The coupling loop has already finished"
        );

        loop {
            let iteration = self.state.iteration;
            info!("Coupling iteration {iteration}");
            let record = self.run_iteration(iteration)?;
            info!(
                "Iteration {iteration}: price deviation {}, demand deviation {}",
                record.price_deviation,
                record
                    .demand_deviation
                    .map_or_else(|| "n/a".to_string(), |deviation| deviation.to_string())
            );
            self.push_record(record);

            if let Some(reason) = self.next_state()? {
                info!("Coupling loop finished after iteration {iteration}: {reason}");
                return Ok(reason);
            }
        }
    }

    /// Run the simulators, update and solve the core model, and measure the change
    fn run_iteration(&mut self, iteration: u32) -> Result<IterationRecord> {
        let first_iteration = iteration == 0;
        let prices_in = self.input_prices(iteration)?;
        debug!("Iteration {iteration}: {} prices passed to simulators", prices_in.len());

        let config = &self.settings.simulation;
        let end_use_raw = self
            .end_use
            .run(&prices_in, config)
            .map_err(|err| simulation_error(self.end_use.name(), iteration, &err))?;
        let resid_raw = self
            .building
            .run_residential(&prices_in, config)
            .map_err(|err| {
                let component = format!("{} (residential)", self.building.name());
                simulation_error(&component, iteration, &err)
            })?;
        let comm_raw = self
            .building
            .run_commercial(&prices_in, config, !first_iteration)
            .map_err(|err| {
                let component = format!("{} (commercial)", self.building.name());
                simulation_error(&component, iteration, &err)
            })?;

        let demand = self.merge_demand(&end_use_raw, &resid_raw, &comm_raw, first_iteration);
        self.updater
            .apply(&mut self.core, &demand, first_iteration, iteration)?;
        self.solver.solve(&mut self.core, iteration)?;

        let prices = self.solution_prices(iteration)?;
        let previous_demand = self.history.last().map(|record| &record.demand);
        let (price_deviation, demand_deviation) =
            self.evaluator
                .evaluate(&prices, &prices_in, &demand, previous_demand);
        let oscillating = self.state.previous_price_deviation.is_some_and(|previous| {
            (price_deviation.value() - previous.value()).abs() < self.settings.oscillation_tolerance
        });

        Ok(IterationRecord {
            iteration,
            prices,
            demand,
            price_deviation,
            demand_deviation,
            oscillating,
            damped: false,
        })
    }

    /// The prices which drive the simulators: the reference solution's on the first iteration,
    /// otherwise those of the previous iteration
    fn input_prices(&mut self, iteration: u32) -> Result<PriceTable> {
        if let Some(record) = self.history.last() {
            return Ok(record.prices.clone());
        }

        let reference = self
            .core
            .reference_solution()
            .map_err(|err| CouplingError::Solve {
                iteration,
                message: format!("No reference solution available: {err:#}"),
            })?;

        Ok(extract_prices(
            &reference,
            &self.settings.price_commodities,
            &self.settings.global_region_suffix,
        ))
    }

    /// Prices from the core model's current solution
    fn solution_prices(&self, iteration: u32) -> Result<PriceTable> {
        let solution = self.core.solution().ok_or_else(|| CouplingError::Solve {
            iteration,
            message: "Core model has no solution".into(),
        })?;

        Ok(extract_prices(
            solution,
            &self.settings.price_commodities,
            &self.settings.global_region_suffix,
        ))
    }

    /// Merge the simulator outputs, adding the commercial demand of the first iteration to later
    /// ones
    fn merge_demand(
        &mut self,
        end_use_raw: &RawDemandTable,
        resid_raw: &RawDemandTable,
        comm_raw: &RawDemandTable,
        first_iteration: bool,
    ) -> DemandTable {
        let mut demand = self
            .merger
            .merge(end_use_raw, resid_raw, comm_raw, first_iteration);

        if first_iteration {
            self.commercial_demand = self.merger.merge_commercial(comm_raw);
        } else {
            let num_shared = demand.accumulate(&self.commercial_demand);
            debug!(
                "Added {} commercial demand entries ({num_shared} shared with other sub-models)",
                self.commercial_demand.len()
            );
        }

        demand
    }

    /// Append a record to the history and pass it on to the diagnostic sink
    fn push_record(&mut self, record: IterationRecord) {
        self.history.push(record);
        if let Some(sink) = self.sink.as_mut()
            && let Err(err) = sink.write(&self.history)
        {
            warn!("Failed to write diagnostics: {err:#}");
        }
    }

    /// Decide whether to stop after the most recent iteration
    fn next_state(&mut self) -> Result<Option<TerminationReason>> {
        let Some(record) = self.history.last() else {
            return Ok(None);
        };
        let iteration = record.iteration;
        let price_converged = record.price_deviation.value() < self.settings.price_tolerance;
        let demand_converged = iteration > 0
            && record
                .demand_deviation
                .is_some_and(|deviation| deviation.value() < self.settings.demand_tolerance);
        let (price_deviation, oscillating) = (record.price_deviation, record.oscillating);

        if price_converged || demand_converged {
            self.state.status = ConvergenceStatus::Converged;
            return Ok(Some(if self.state.oscillating {
                TerminationReason::OscillatingButAccepted
            } else {
                TerminationReason::Converged
            }));
        }

        if iteration > self.settings.max_iterations {
            self.force_stop(iteration)?;
            self.state.status = ConvergenceStatus::ForcedStop;
            return Ok(Some(TerminationReason::ForcedStop));
        }

        if oscillating {
            warn!("Iteration {iteration}: price deviation is oscillating around {price_deviation}");
        }
        self.state.oscillating = oscillating;
        self.state.previous_price_deviation = Some(price_deviation);
        self.state.iteration += 1;

        Ok(None)
    }

    /// Apply the mean demand of the last two iterations and solve once more
    fn force_stop(&mut self, iteration: u32) -> Result<()> {
        warn!(
            "No convergence after {} iterations: applying the mean demand of the last two",
            iteration + 1
        );

        let (Some(newer), Some(older)) = (self.history.last(), self.history.second_last()) else {
            bail!(
                "A forced stop needs two completed iterations but only {} were recorded",
                self.history.len()
            );
        };
        let demand = DemandTable::average(&older.demand, &newer.demand);
        let damped_iteration = iteration + 1;
        self.updater
            .apply(&mut self.core, &demand, false, damped_iteration)?;
        self.solver.solve(&mut self.core, damped_iteration)?;

        let prices = self.solution_prices(damped_iteration)?;
        let (price_deviation, demand_deviation) =
            self.evaluator
                .evaluate(&prices, &newer.prices, &demand, Some(&newer.demand));
        info!(
            "Damped solution: price deviation {price_deviation} against iteration {iteration}"
        );

        self.push_record(IterationRecord {
            iteration: damped_iteration,
            prices,
            demand,
            price_deviation,
            demand_deviation,
            oscillating: false,
            damped: true,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_model::{ModelSolution, PriceRow};
    use crate::fixture::{
        MockCoreModel, MockSimulator, demand_key, mock_core, raw_record, simulation_config,
    };
    use crate::simulator::Sector;
    use crate::units::MoneyPerFlow;
    use float_cmp::assert_approx_eq;
    use map_macro::hash_set;
    use merge::{Horizon, MergeRules};
    use rstest::{fixture, rstest};
    use std::cell::RefCell;
    use std::rc::Rc;
    use update::{DEMAND_COMMIT_MESSAGE, STRUCTURE_COMMIT_MESSAGE, ServiceTechnologyTemplate};

    fn solution(gas_price: f64) -> ModelSolution {
        ModelSolution {
            prices: vec![
                PriceRow {
                    region_id: "R1".into(),
                    commodity_id: "gas".into(),
                    level: "final".into(),
                    period: 2020,
                    time: "year".into(),
                    value: MoneyPerFlow(gas_price),
                },
                PriceRow {
                    region_id: "R1_GLB".into(),
                    commodity_id: "gas".into(),
                    level: "final".into(),
                    period: 2020,
                    time: "year".into(),
                    value: MoneyPerFlow(1000.0),
                },
            ],
            ..Default::default()
        }
    }

    fn end_use_output(value: f64) -> Option<RawDemandTable> {
        Some(
            [raw_record("R1", "transport", 2020, value)]
                .into_iter()
                .collect(),
        )
    }

    fn resid_output(value: f64) -> Option<RawDemandTable> {
        Some(
            [raw_record("R1", "resid_heat", 2020, value)]
                .into_iter()
                .collect(),
        )
    }

    fn comm_output(value: f64) -> Option<RawDemandTable> {
        Some(
            [raw_record("R1", "comm_cool", 2020, value)]
                .into_iter()
                .collect(),
        )
    }

    #[fixture]
    fn settings(simulation_config: SimulationConfig) -> LoopSettings {
        LoopSettings {
            simulation: simulation_config,
            price_commodities: vec!["gas".into()],
            global_region_suffix: "_GLB".into(),
            price_tolerance: 5e-3,
            demand_tolerance: 5e-3,
            oscillation_tolerance: 1e-5,
            max_iterations: 10,
        }
    }

    fn updater() -> CoreModelUpdater {
        let templates = ["transport", "resid_heat", "comm_cool", "heat"]
            .into_iter()
            .map(|commodity| ServiceTechnologyTemplate {
                commodity_id: commodity.into(),
                input_commodity: "gas".into(),
                efficiency: 1.0,
                variable_cost: MoneyPerFlow(0.0),
            })
            .collect();
        CoreModelUpdater::new(templates, "_GLB")
    }

    fn merger() -> DemandMerger {
        let horizon = Horizon::new(vec![2010, 2020, 2030, 2040], 2020, 2040).unwrap();
        DemandMerger::new(MergeRules::default(), horizon, "useful".into(), "year".into())
    }

    /// A controller where the end-use simulator returns `end_use` and the building-stock
    /// simulator returns `building` on successive calls
    fn controller(
        core: MockCoreModel,
        settings: LoopSettings,
        end_use: Vec<Option<RawDemandTable>>,
        building: Vec<Option<RawDemandTable>>,
    ) -> (IterationController<MockCoreModel>, Rc<RefCell<Vec<Option<Sector>>>>) {
        let building = MockSimulator::new("building stock", building);
        let calls = building.calls();
        let controller = IterationController::new(
            core,
            Box::new(MockSimulator::new("end use", end_use)),
            BuildingStockAdapter::new(Box::new(building)),
            merger(),
            updater(),
            settings,
        );

        (controller, calls)
    }

    #[rstest]
    fn test_two_iterations_converge(mut mock_core: MockCoreModel, settings: LoopSettings) {
        // Price deviations of 0.02 and then 0.001
        let second_solution = solution(202_101.0);
        mock_core.reference = solution(197_901.0);
        mock_core.solutions = vec![solution(201_899.0), second_solution.clone()];
        let (mut controller, calls) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0), end_use_output(5.0)],
            vec![resid_output(3.0), comm_output(6.0), resid_output(3.5)],
        );

        let reason = controller.run().unwrap();
        assert_eq!(reason, TerminationReason::Converged);
        assert_eq!(controller.state().status, ConvergenceStatus::Converged);

        // The commercial sub-model only runs on the first iteration
        assert_eq!(
            *calls.borrow(),
            [
                Some(Sector::Residential),
                Some(Sector::Commercial),
                Some(Sector::Residential)
            ]
        );

        let records = controller.history().records();
        assert_eq!(records.len(), 2);

        assert_approx_eq!(
            f64,
            records[0].price_deviation.value(),
            0.02,
            epsilon = 1e-12
        );
        assert!(records[0].demand_deviation.is_none());
        assert_approx_eq!(
            f64,
            records[1].price_deviation.value(),
            0.001,
            epsilon = 1e-12
        );
        // Converged on prices alone
        assert!(records[1].demand_deviation.unwrap().value() > 5e-3);
        assert!(!records[1].damped);

        // The final solution is that of the second solve
        assert_eq!(controller.core().solution(), Some(&second_solution));

        // Commercial demand is kept unchanged
        let comm = demand_key("R1", "comm_cool", 2020);
        assert_eq!(records[1].demand.get(&comm), records[0].demand.get(&comm));
        let resid = demand_key("R1", "resid_heat", 2020);
        assert_eq!(records[1].demand.get(&resid).unwrap().value.value(), 3.5);

        // Global regions are excluded from the price signal
        assert!(records[0].prices.keys().all(|key| key.region_id.as_str() == "R1"));

        let core = controller.into_core();
        assert_eq!(
            core.commits,
            [
                STRUCTURE_COMMIT_MESSAGE,
                DEMAND_COMMIT_MESSAGE,
                DEMAND_COMMIT_MESSAGE
            ]
        );
    }

    #[rstest]
    fn test_converges_on_demand_after_first_iteration(
        mut mock_core: MockCoreModel,
        settings: LoopSettings,
    ) {
        // Prices keep moving but demand settles
        mock_core.reference = solution(1.0);
        mock_core.solutions = vec![solution(2.0), solution(4.0), solution(8.0)];
        let (mut controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0)],
            vec![resid_output(3.0), comm_output(6.0), resid_output(3.0)],
        );

        assert_eq!(controller.run().unwrap(), TerminationReason::Converged);
        let records = controller.history().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].demand_deviation, Some(Dimensionless(0.0)));
    }

    #[rstest]
    fn test_convergence_transition_is_exact(
        mut mock_core: MockCoreModel,
        mut settings: LoopSettings,
    ) {
        // A non-monotonic sequence of price deviations: stop at the first below tolerance
        settings.price_tolerance = 0.1;
        settings.demand_tolerance = 0.0;
        mock_core.reference = solution(1.0);
        mock_core.solutions = vec![solution(2.0), solution(1.5), solution(3.0), solution(3.1)];
        let (mut controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0)],
            vec![resid_output(3.0), comm_output(6.0), resid_output(3.0)],
        );

        assert_eq!(controller.run().unwrap(), TerminationReason::Converged);
        let deviations = controller
            .history()
            .records()
            .iter()
            .map(|record| record.price_deviation.value())
            .collect::<Vec<_>>();
        assert_eq!(deviations.len(), 4);
        assert!(deviations[..3].iter().all(|deviation| *deviation >= 0.1));
        assert!(deviations[3] < 0.1);
    }

    #[rstest]
    fn test_oscillating_but_accepted(mut mock_core: MockCoreModel, mut settings: LoopSettings) {
        // Deviations of 2/3 repeat, then prices settle
        settings.demand_tolerance = 0.0;
        mock_core.reference = solution(1.0);
        mock_core.solutions = vec![solution(2.0), solution(1.0), solution(1.0)];
        let (mut controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0)],
            vec![resid_output(3.0), comm_output(6.0), resid_output(3.0)],
        );

        assert_eq!(
            controller.run().unwrap(),
            TerminationReason::OscillatingButAccepted
        );
        let records = controller.history().records();
        assert_eq!(records.len(), 3);
        assert!(records[1].oscillating);
    }

    #[rstest]
    fn test_forced_stop_averages_demand(mut mock_core: MockCoreModel, mut settings: LoopSettings) {
        settings.max_iterations = 1;
        settings.demand_tolerance = 0.0;
        mock_core.reference = solution(1.0);
        mock_core.solutions = vec![solution(2.0), solution(4.0), solution(8.0), solution(16.0)];
        let (mut controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(2.0), end_use_output(4.0), end_use_output(8.0)],
            vec![
                resid_output(3.0),
                comm_output(6.0),
                resid_output(3.0),
                resid_output(3.0),
            ],
        );

        assert_eq!(controller.run().unwrap(), TerminationReason::ForcedStop);
        assert_eq!(controller.state().status, ConvergenceStatus::ForcedStop);

        let records = controller.history().records();
        assert_eq!(records.len(), 4);
        let damped = &records[3];
        assert!(damped.damped);
        assert_eq!(damped.iteration, 3);
        assert!(records[..3].iter().all(|record| !record.damped));

        // Mean of the last two iterations
        let transport = demand_key("R1", "transport", 2020);
        assert_eq!(damped.demand.get(&transport).unwrap().value.value(), 6.0);
        for (key, entry) in &damped.demand {
            let older = records[1].demand.get(key).unwrap().value.value();
            let newer = records[2].demand.get(key).unwrap().value.value();
            assert_approx_eq!(f64, entry.value.value(), 0.5 * (older + newer));
        }

        // The damped demand is the last applied to the core model
        assert_eq!(controller.core().demand, damped.demand);
        assert_eq!(controller.core().solve_attempts.len(), 4);
    }

    #[rstest]
    fn test_force_stop_needs_two_iterations(mock_core: MockCoreModel, settings: LoopSettings) {
        let (mut controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0)],
            vec![resid_output(3.0)],
        );

        assert!(controller.force_stop(0).is_err());
        assert!(controller.core().commits.is_empty());
        assert!(controller.history().is_empty());
    }

    #[rstest]
    fn test_commercial_demand_shares_category(
        mut mock_core: MockCoreModel,
        settings: LoopSettings,
    ) {
        let heat = |value: f64| -> Option<RawDemandTable> {
            Some([raw_record("R1", "heat", 2020, value)].into_iter().collect())
        };
        mock_core.reference = solution(1.0);
        mock_core.solutions = vec![solution(2.0), solution(4.0)];
        let (mut controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0)],
            vec![heat(3.0), heat(6.0), heat(3.0)],
        );

        // Residential and commercial demand are summed on every iteration, so demand is steady
        assert_eq!(controller.run().unwrap(), TerminationReason::Converged);
        let records = controller.history().records();
        assert_eq!(records.len(), 2);
        let key = demand_key("R1", "heat", 2020);
        for record in records {
            assert_eq!(record.demand.get(&key).unwrap().value.value(), 9.0);
        }
        assert_eq!(records[1].demand_deviation, Some(Dimensionless(0.0)));
    }

    #[rstest]
    fn test_simulation_failure_is_fatal(mut mock_core: MockCoreModel, settings: LoopSettings) {
        mock_core.reference = solution(1.0);
        mock_core.solutions = vec![solution(2.0), solution(4.0)];
        let (mut controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0), end_use_output(5.0), None],
            vec![resid_output(3.0), comm_output(6.0), resid_output(3.5)],
        );

        let err = controller.run().unwrap_err();
        match err.downcast_ref::<CouplingError>() {
            Some(CouplingError::Simulation {
                component,
                iteration,
                ..
            }) => {
                assert_eq!(component, "end use");
                assert_eq!(*iteration, 2);
            }
            other => panic!("Unexpected error: {other:?}"),
        }

        // Iterations 0 and 1 are kept and nothing was applied in iteration 2
        assert_eq!(controller.history().len(), 2);
        assert_eq!(controller.core().commits.len(), 3);
        assert_eq!(controller.core().solve_attempts.len(), 2);
    }

    #[rstest]
    fn test_commercial_failure_names_sub_model(
        mut mock_core: MockCoreModel,
        settings: LoopSettings,
    ) {
        mock_core.reference = solution(1.0);
        let (mut controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0)],
            vec![resid_output(3.0), None],
        );

        let err = controller.run().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Simulator 'building stock (commercial)' failed at iteration 0: Simulated failure in \
            building stock"
        );
        assert!(controller.history().is_empty());
        assert!(controller.core().commits.is_empty());
    }

    #[rstest]
    fn test_solve_failure_is_fatal(mut mock_core: MockCoreModel, settings: LoopSettings) {
        mock_core.reference = solution(1.0);
        mock_core.failing_solver_configs =
            hash_set! {"barrier".to_string(), "dual simplex".to_string()};
        let (mut controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0)],
            vec![resid_output(3.0), comm_output(6.0)],
        );

        let err = controller.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CouplingError>(),
            Some(CouplingError::Solve { iteration: 0, .. })
        ));
        assert!(controller.core().solution().is_none());
        assert!(controller.history().is_empty());
    }

    #[derive(Default)]
    struct CountingSink {
        lengths: Rc<RefCell<Vec<usize>>>,
        fail: bool,
    }

    impl DiagnosticSink for CountingSink {
        fn write(&mut self, history: &HistoryRecorder) -> Result<()> {
            self.lengths.borrow_mut().push(history.len());
            ensure!(!self.fail, "Disk full");
            Ok(())
        }
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_sink_receives_history(
        mut mock_core: MockCoreModel,
        settings: LoopSettings,
        #[case] fail: bool,
    ) {
        mock_core.reference = solution(1.0);
        mock_core.solutions = vec![solution(2.0), solution(2.0)];
        let sink = CountingSink {
            fail,
            ..Default::default()
        };
        let lengths = Rc::clone(&sink.lengths);
        let (controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0)],
            vec![resid_output(3.0), comm_output(6.0), resid_output(3.0)],
        );
        let mut controller = controller.with_sink(Box::new(sink));

        // Sink failures don't stop the loop
        assert_eq!(controller.run().unwrap(), TerminationReason::Converged);
        assert_eq!(*lengths.borrow(), [1, 2]);
    }

    #[rstest]
    fn test_run_twice_fails(mut mock_core: MockCoreModel, settings: LoopSettings) {
        mock_core.reference = solution(1.0);
        mock_core.solutions = vec![solution(1.0)];
        let (mut controller, _) = controller(
            mock_core,
            settings,
            vec![end_use_output(4.0)],
            vec![resid_output(3.0), comm_output(6.0)],
        );

        assert_eq!(controller.run().unwrap(), TerminationReason::Converged);
        assert!(controller.run().is_err());
    }
}
