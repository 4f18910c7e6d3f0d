//! Component registry: an explicit name → constructor table, built once at
//! startup and only read afterwards.

use crate::allocation::{ConvexSolver, ProjectedGradientSolver, SignalProportionalSolver};
use crate::config::{AllocationConfig, SimulatorConfig};
use crate::context::RunContext;
use crate::execution::{ImmediateBackend, SimulatedBroker};
use crate::olm::ExecutionBackend;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Unknown solver: {0}")]
    UnknownSolver(String),
    #[error("Unknown execution backend: {0}")]
    UnknownBackend(String),
}

pub type SolverCtor = Box<dyn Fn(&AllocationConfig) -> Box<dyn ConvexSolver> + Send + Sync>;
pub type BackendCtor =
    Box<dyn Fn(&SimulatorConfig, &RunContext) -> Box<dyn ExecutionBackend> + Send + Sync>;

#[derive(Default)]
pub struct ComponentRegistry {
    solvers: BTreeMap<String, SolverCtor>,
    backends: BTreeMap<String, BackendCtor>,
}

impl ComponentRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in components.
    pub fn standard() -> Self {
        Self::empty()
            .with_solver("projected_gradient", |_| {
                Box::new(ProjectedGradientSolver::default())
            })
            .with_solver("signal_proportional", |_| Box::new(SignalProportionalSolver))
            .with_backend("simulated", |sim, ctx| {
                Box::new(SimulatedBroker::new(
                    sim.clone(),
                    ctx.rng.clone(),
                    ctx.run_id.clone(),
                ))
            })
            .with_backend("immediate", |sim, _| Box::new(ImmediateBackend::new(sim)))
    }

    pub fn with_solver<F>(mut self, name: &str, ctor: F) -> Self
    where
        F: Fn(&AllocationConfig) -> Box<dyn ConvexSolver> + Send + Sync + 'static,
    {
        self.solvers.insert(name.to_string(), Box::new(ctor));
        self
    }

    pub fn with_backend<F>(mut self, name: &str, ctor: F) -> Self
    where
        F: Fn(&SimulatorConfig, &RunContext) -> Box<dyn ExecutionBackend> + Send + Sync + 'static,
    {
        self.backends.insert(name.to_string(), Box::new(ctor));
        self
    }

    pub fn solver(
        &self,
        name: &str,
        config: &AllocationConfig,
    ) -> Result<Box<dyn ConvexSolver>, RegistryError> {
        self.solvers
            .get(name)
            .map(|ctor| ctor(config))
            .ok_or_else(|| RegistryError::UnknownSolver(name.to_string()))
    }

    pub fn backend(
        &self,
        name: &str,
        sim: &SimulatorConfig,
        ctx: &RunContext,
    ) -> Result<Box<dyn ExecutionBackend>, RegistryError> {
        self.backends
            .get(name)
            .map(|ctor| ctor(sim, ctx))
            .ok_or_else(|| RegistryError::UnknownBackend(name.to_string()))
    }

    pub fn solver_names(&self) -> Vec<&str> {
        self.solvers.keys().map(String::as_str).collect()
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("solvers", &self.solver_names())
            .field("backends", &self.backend_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunMode;
    use chrono::{TimeZone, Utc};

    #[test]
    fn standard_table_resolves_builtins() {
        let reg = ComponentRegistry::standard();
        let ctx = RunContext::new(
            "cfg",
            1,
            RunMode::Backtest,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        );
        let solver = reg
            .solver("projected_gradient", &AllocationConfig::default())
            .unwrap();
        assert_eq!(solver.name(), "projected_gradient");
        let backend = reg
            .backend("simulated", &SimulatorConfig::default(), &ctx)
            .unwrap();
        assert_eq!(backend.name(), "simulated");
        assert_eq!(reg.backend_names(), vec!["immediate", "simulated"]);
    }

    #[test]
    fn unknown_names_are_errors() {
        let reg = ComponentRegistry::standard();
        assert!(matches!(
            reg.solver("cvxpy", &AllocationConfig::default()),
            Err(RegistryError::UnknownSolver(_))
        ));
    }
}
