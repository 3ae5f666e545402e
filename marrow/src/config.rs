//! Solver configuration.
use std::str::FromStr;

/// Restart strategy of the search loop.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RestartStrategy {
    Glucose,
    Luby,
    Constant,
}

impl FromStr for RestartStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<RestartStrategy, String> {
        match value {
            "glucose" => Ok(RestartStrategy::Glucose),
            "luby" => Ok(RestartStrategy::Luby),
            "constant" => Ok(RestartStrategy::Constant),
            _ => Err(format!("unknown restart strategy '{}'", value)),
        }
    }
}

/// Varying-resolution strategy of the upper-bound linear search.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VaryingResolution {
    Off,
    Basic,
    Ratio,
}

impl FromStr for VaryingResolution {
    type Err = String;

    fn from_str(value: &str) -> Result<VaryingResolution, String> {
        match value {
            "off" => Ok(VaryingResolution::Off),
            "basic" => Ok(VaryingResolution::Basic),
            "ratio" => Ok(VaryingResolution::Ratio),
            _ => Err(format!("unknown varying-resolution strategy '{}'", value)),
        }
    }
}

/// Value-selection policy used during the upper-bound linear search.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ValueSelection {
    PhaseSaving,
    SolutionGuidedSearch,
    Optimistic,
    OptimisticAux,
}

impl FromStr for ValueSelection {
    type Err = String;

    fn from_str(value: &str) -> Result<ValueSelection, String> {
        match value {
            "phase-saving" => Ok(ValueSelection::PhaseSaving),
            "solution-guided-search" => Ok(ValueSelection::SolutionGuidedSearch),
            "optimistic" => Ok(ValueSelection::Optimistic),
            "optimistic-aux" => Ok(ValueSelection::OptimisticAux),
            _ => Err(format!("unknown value-selection strategy '{}'", value)),
        }
    }
}

/// Stratification strategy of the core-guided lower-bound search.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Stratification {
    Off,
    Basic,
    Ratio,
}

impl FromStr for Stratification {
    type Err = String;

    fn from_str(value: &str) -> Result<Stratification, String> {
        match value {
            "off" => Ok(Stratification::Off),
            "basic" => Ok(Stratification::Basic),
            "ratio" => Ok(Stratification::Ratio),
            _ => Err(format!("unknown stratification strategy '{}'", value)),
        }
    }
}

/// Cardinality constraint encoding used for core reformulation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CardinalityEncoding {
    Totalizer,
    CardinalityNetwork,
}

impl FromStr for CardinalityEncoding {
    type Err = String;

    fn from_str(value: &str) -> Result<CardinalityEncoding, String> {
        match value {
            "totaliser" => Ok(CardinalityEncoding::Totalizer),
            "cardinality-network" => Ok(CardinalityEncoding::CardinalityNetwork),
            _ => Err(format!("unknown cardinality encoding '{}'", value)),
        }
    }
}

/// Configurable parameters used during solving.
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Restart strategy.
    pub restart_strategy: RestartStrategy,

    /// Multiplier for Luby and constant restart budgets (number of conflicts).
    pub restart_coefficient: u64,

    /// Minimum number of conflicts between two restarts.
    pub num_min_conflicts_per_restart: u64,

    /// Window of the fast LBD moving average used by Glucose restarts.
    pub glucose_queue_lbd_limit: usize,

    /// Window of the trail-length moving average used to block Glucose restarts.
    pub glucose_queue_reset_limit: usize,

    /// Multiplicative decay for clause activities.
    pub clause_activity_decay: f32,

    /// LBD boundary between the low-LBD and the temporary learned clause tiers.
    pub lbd_threshold: u32,

    /// Target size of the temporary learned clause pool before a reduction.
    pub limit_num_temporary_clauses: usize,

    /// Sort the temporary pool by LBD (and activity) instead of activity alone.
    pub lbd_sorting_temporary_clauses: bool,

    /// Fraction of deleted arena words that triggers a garbage collection.
    pub garbage_tolerance_factor: f64,

    /// Multiplicative decay for the VSIDS decision heuristic.
    pub vsids_decay: f64,

    /// Give decision variables appearing in the learned clause an extra activity bump.
    pub bump_decision_variables: bool,

    /// Enable learned clause minimization by self-subsumption.
    pub clause_minimization: bool,

    /// Enforce the objective upper bound with a propagator instead of an encoding.
    pub ub_propagator: bool,

    /// Varying-resolution strategy of the upper-bound search.
    pub varying_resolution: VaryingResolution,

    /// Value selection during the upper-bound search.
    pub value_selection: ValueSelection,

    /// Stratification strategy of the lower-bound search.
    pub stratification: Stratification,

    /// Cardinality encoding used to reformulate cores.
    pub cardinality_encoding: CardinalityEncoding,

    /// Keep extracting cores under the same weight threshold before reformulating.
    pub weight_aware_core_extraction: bool,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            restart_strategy: RestartStrategy::Glucose,
            restart_coefficient: 512,
            num_min_conflicts_per_restart: 50,
            glucose_queue_lbd_limit: 50,
            glucose_queue_reset_limit: 5000,
            clause_activity_decay: 0.99,
            lbd_threshold: 5,
            limit_num_temporary_clauses: 20000,
            lbd_sorting_temporary_clauses: true,
            garbage_tolerance_factor: 0.2,
            vsids_decay: 0.95,
            bump_decision_variables: false,
            clause_minimization: true,
            ub_propagator: false,
            varying_resolution: VaryingResolution::Off,
            value_selection: ValueSelection::SolutionGuidedSearch,
            stratification: Stratification::Basic,
            cardinality_encoding: CardinalityEncoding::Totalizer,
            weight_aware_core_extraction: true,
        }
    }
}
