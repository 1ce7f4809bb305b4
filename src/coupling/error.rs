//! Errors raised by the coupling loop.
use std::fmt;

/// A fatal error raised by one of the steps of the coupling loop.
///
/// All variants carry the iteration at which they occurred. They are returned wrapped in
/// [`anyhow::Error`], so callers can recover them with `downcast_ref`.
#[derive(Debug, Clone, PartialEq)]
pub enum CouplingError {
    /// A demand simulator failed or returned malformed output
    Simulation {
        /// Name of the simulator (e.g. "building stock (commercial)")
        component: String,
        /// The iteration being run
        iteration: u32,
        /// Underlying error message
        message: String,
    },
    /// A required structural element could not be registered in the core model
    StructuralUpdate {
        /// The iteration being run
        iteration: u32,
        /// Underlying error message
        message: String,
    },
    /// Every solver configuration failed
    Solve {
        /// The iteration being run
        iteration: u32,
        /// The last solver failure
        message: String,
    },
}

impl CouplingError {
    /// The iteration at which the error occurred
    pub fn iteration(&self) -> u32 {
        match self {
            Self::Simulation { iteration, .. }
            | Self::StructuralUpdate { iteration, .. }
            | Self::Solve { iteration, .. } => *iteration,
        }
    }
}

impl fmt::Display for CouplingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulation {
                component,
                iteration,
                message,
            } => write!(
                f,
                "Simulator '{component}' failed at iteration {iteration}: {message}"
            ),
            Self::StructuralUpdate { iteration, message } => write!(
                f,
                "Core model updater failed at iteration {iteration}: {message}"
            ),
            Self::Solve { iteration, message } => write!(
                f,
                "Core model solver failed at iteration {iteration}: {message}"
            ),
        }
    }
}

impl std::error::Error for CouplingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_component_and_iteration() {
        let err = CouplingError::Simulation {
            component: "end-use".into(),
            iteration: 2,
            message: "exit status 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Simulator 'end-use' failed at iteration 2: exit status 1"
        );
        assert_eq!(err.iteration(), 2);
    }

    #[test]
    fn test_downcast_from_anyhow() {
        let err: anyhow::Error = CouplingError::Solve {
            iteration: 4,
            message: "infeasible".into(),
        }
        .into();
        assert_eq!(
            err.downcast_ref::<CouplingError>().map(CouplingError::iteration),
            Some(4)
        );
    }
}
