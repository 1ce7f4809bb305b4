//! Solving the core model, falling back through an ordered list of solver configurations.
use super::error::CouplingError;
use crate::core_model::CoreModel;
use anyhow::Result;
use log::{debug, info, warn};
use std::fmt;

/// The value of a solver option
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// A string option (e.g. `solver = "ipm"`)
    Str(String),
    /// An integer option
    Int(i32),
    /// A floating-point option
    Float(f64),
    /// A boolean option
    Bool(bool),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// A named set of options passed to the solver backend
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Human-readable name, used in log messages
    pub name: String,
    /// Backend options, applied in order
    pub options: Vec<(String, OptionValue)>,
}

impl SolverConfig {
    /// A configuration with no options, i.e. the backend's defaults
    pub fn backend_default() -> Self {
        Self {
            name: "default".into(),
            options: Vec::new(),
        }
    }

    /// Interior-point (barrier) method
    pub fn barrier() -> Self {
        Self {
            name: "barrier".into(),
            options: vec![("solver".into(), OptionValue::Str("ipm".into()))],
        }
    }

    /// Dual simplex
    pub fn dual_simplex() -> Self {
        Self {
            name: "dual simplex".into(),
            options: vec![
                ("solver".into(), OptionValue::Str("simplex".into())),
                ("simplex_strategy".into(), OptionValue::Int(1)),
            ],
        }
    }
}

/// Tries each solver configuration in turn until one succeeds
pub struct Solver {
    configs: Vec<SolverConfig>,
}

impl Default for Solver {
    /// Barrier first, then dual simplex
    fn default() -> Self {
        Self::new(vec![SolverConfig::barrier(), SolverConfig::dual_simplex()])
    }
}

impl Solver {
    /// Create a solver with the given configurations, tried in order
    pub fn new(configs: Vec<SolverConfig>) -> Self {
        Self { configs }
    }

    /// The configurations, in the order they are attempted
    pub fn configs(&self) -> &[SolverConfig] {
        &self.configs
    }

    /// Solve the core model.
    ///
    /// Returns the name of the configuration which succeeded. If every configuration fails, returns
    /// a [`CouplingError::Solve`] carrying the last failure and the model is left without a
    /// solution.
    pub fn solve<C: CoreModel + ?Sized>(&self, core: &mut C, iteration: u32) -> Result<&str> {
        let mut last_error = None;
        for config in &self.configs {
            debug!("Iteration {iteration}: solving with {} configuration", config.name);
            match core.solve(config) {
                Ok(()) => {
                    info!("Iteration {iteration}: core model solved ({})", config.name);
                    return Ok(config.name.as_str());
                }
                Err(err) => {
                    warn!(
                        "Iteration {iteration}: solve with {} configuration failed: {err:#}",
                        config.name
                    );
                    last_error = Some(err);
                }
            }
        }

        let message = match last_error {
            Some(err) => format!("{err:#}"),
            None => "No solver configurations given".into(),
        };
        core.clear_solution();
        Err(CouplingError::Solve { iteration, message }.into())
    }
}
