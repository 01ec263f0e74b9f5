#![forbid(unsafe_code)]

use crate::compare::{CompareError, ComparisonResult, compare};
use crate::{OracleConfig, RunLogEntry, append_run_log, now_unix_ms};
use mxo_matrix::Matrix;
use mxo_random::{DeterministicRng, FixtureSpec, SpecError, generate};
use mxo_store::{FixtureStore, StoreError, payload_digest};
use mxo_transform::{UnaryTransform, compute_expected};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

pub const STANDARD_ROWS: usize = 10;
pub const STANDARD_COLS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    Configured,
    FixturesGenerated,
    Persisted,
    Executed,
    Compared,
}

impl ScenarioState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::FixturesGenerated => "fixtures_generated",
            Self::Persisted => "persisted",
            Self::Executed => "executed",
            Self::Compared => "compared",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    TimedOut { detail: String },
    Failed { detail: String },
}

impl RunnerError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::TimedOut { .. } => "runner_timed_out",
            Self::Failed { .. } => "runner_execution_failed",
        }
    }
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut { detail } => write!(f, "engine run timed out: {detail}"),
            Self::Failed { detail } => write!(f, "engine run failed: {detail}"),
        }
    }
}

impl std::error::Error for RunnerError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioError {
    Sequence {
        expected: ScenarioState,
        actual: ScenarioState,
    },
    Spec(SpecError),
    Store(StoreError),
    Runner(RunnerError),
    Timeout {
        elapsed_ms: u128,
        budget_ms: u128,
    },
    Compare(CompareError),
    Log {
        detail: String,
    },
}

impl ScenarioError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Sequence { .. } => "scenario_sequence_violation",
            Self::Spec(err) => err.reason_code(),
            Self::Store(err) => err.reason_code(),
            Self::Runner(err) => err.reason_code(),
            Self::Timeout { .. } => "scenario_runner_timeout",
            Self::Compare(err) => err.reason_code(),
            Self::Log { .. } => "scenario_log_append_failed",
        }
    }
}

impl std::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequence { expected, actual } => {
                write!(
                    f,
                    "scenario step out of order: requires state '{}', currently '{}'",
                    expected.as_str(),
                    actual.as_str()
                )
            }
            Self::Spec(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Runner(err) => write!(f, "{err}"),
            Self::Timeout {
                elapsed_ms,
                budget_ms,
            } => {
                write!(f, "engine run exceeded budget: {elapsed_ms}ms > {budget_ms}ms")
            }
            Self::Compare(err) => write!(f, "{err}"),
            Self::Log { detail } => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spec(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Runner(err) => Some(err),
            Self::Compare(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SpecError> for ScenarioError {
    fn from(err: SpecError) -> Self {
        Self::Spec(err)
    }
}

impl From<StoreError> for ScenarioError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<CompareError> for ScenarioError {
    fn from(err: CompareError) -> Self {
        Self::Compare(err)
    }
}

/// Named binding of fixture specs to one transform. Immutable once
/// built; `with_seed` derives a re-seeded copy for repeated runs.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    name: String,
    transform: UnaryTransform,
    fixture_specs: BTreeMap<String, FixtureSpec>,
}

impl Scenario {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        transform: UnaryTransform,
        fixture_specs: BTreeMap<String, FixtureSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            transform,
            fixture_specs,
        }
    }

    /// One 10x1 vector and one 10x10 matrix, sparsity 0, distinguished
    /// from sibling scenarios solely by the value range.
    #[must_use]
    pub fn signed_range(name: &str, min_value: f64, max_value: f64, seed: u64) -> Self {
        let mut stream = DeterministicRng::new(seed);
        let mut fixture_specs = BTreeMap::new();
        fixture_specs.insert(
            "matrix".to_string(),
            FixtureSpec::uniform(
                STANDARD_ROWS,
                STANDARD_COLS,
                min_value,
                max_value,
                stream.next_u64(),
            ),
        );
        fixture_specs.insert(
            "vector".to_string(),
            FixtureSpec::uniform(STANDARD_ROWS, 1, min_value, max_value, stream.next_u64()),
        );
        Self::new(name, UnaryTransform::Abs, fixture_specs)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn transform(&self) -> UnaryTransform {
        self.transform
    }

    #[must_use]
    pub fn fixture_specs(&self) -> &BTreeMap<String, FixtureSpec> {
        &self.fixture_specs
    }

    /// Re-derives every fixture seed from `seed`, in fixture-name
    /// order, so one scenario can be re-run as an independent instance.
    #[must_use]
    pub fn with_seed(&self, seed: u64) -> Self {
        let mut stream = DeterministicRng::new(seed);
        let fixture_specs = self
            .fixture_specs
            .iter()
            .map(|(name, spec)| (name.clone(), spec.with_seed(stream.next_u64())))
            .collect();
        Self {
            name: self.name.clone(),
            transform: self.transform,
            fixture_specs,
        }
    }

    /// Folds the fixture seeds into one instance fingerprint; used to
    /// namespace the store so re-seeded runs never collide.
    #[must_use]
    pub fn seed_fingerprint(&self) -> u64 {
        self.fixture_specs
            .values()
            .fold(0xA076_1D64_78BD_642F_u64, |acc, spec| {
                DeterministicRng::new(acc ^ spec.seed).next_u64()
            })
    }

    #[must_use]
    pub fn namespace(&self) -> String {
        format!("{}-{:016x}", self.name, self.seed_fingerprint())
    }
}

/// The three sign regimes as parameterized instances of one scenario
/// shape: positive-only, negative-only, and mixed-sign ranges.
#[must_use]
pub fn standard_scenarios(seed: u64) -> Vec<Scenario> {
    let mut stream = DeterministicRng::new(seed);
    vec![
        Scenario::signed_range("positive-range", 0.0, 1.0, stream.next_u64()),
        Scenario::signed_range("negative-range", -1.0, 0.0, stream.next_u64()),
        Scenario::signed_range("mixed-range", -1.0, 1.0, stream.next_u64()),
    ]
}

#[must_use]
pub fn input_name(fixture: &str) -> String {
    format!("{fixture}.input")
}

#[must_use]
pub fn expected_name(fixture: &str) -> String {
    format!("{fixture}.expected")
}

#[must_use]
pub fn actual_name(fixture: &str) -> String {
    format!("{fixture}.actual")
}

/// Everything an engine adapter needs for one run: the persisted
/// inputs are under `<fixture>.input` in `store`, and the adapter must
/// leave its results under `<fixture>.actual` before returning.
#[derive(Debug)]
pub struct RunRequest<'a> {
    pub scenario: &'a str,
    pub transform: UnaryTransform,
    pub fixture_names: &'a [String],
    pub store: &'a FixtureStore,
}

pub trait TestRunner {
    fn execute(&self, request: &RunRequest<'_>) -> Result<(), RunnerError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixtureVerdict {
    pub fixture: String,
    pub result: ComparisonResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub transform: String,
    pub namespace: String,
    pub passed: bool,
    pub verdicts: Vec<FixtureVerdict>,
}

struct GeneratedFixture {
    input: Matrix,
    expected: Matrix,
}

/// Strictly-forward pipeline over one scenario instance. Each step
/// refuses to run unless the previous one completed.
pub struct ScenarioExecution<'a> {
    scenario: &'a Scenario,
    config: &'a OracleConfig,
    store: FixtureStore,
    state: ScenarioState,
    generated: BTreeMap<String, GeneratedFixture>,
}

impl<'a> ScenarioExecution<'a> {
    pub fn new(scenario: &'a Scenario, config: &'a OracleConfig) -> Result<Self, ScenarioError> {
        let store = FixtureStore::new(&config.fixture_root, &scenario.namespace())?;
        Ok(Self {
            scenario,
            config,
            store,
            state: ScenarioState::Configured,
            generated: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> ScenarioState {
        self.state
    }

    #[must_use]
    pub fn store(&self) -> &FixtureStore {
        &self.store
    }

    fn require_state(&self, expected: ScenarioState) -> Result<(), ScenarioError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ScenarioError::Sequence {
                expected,
                actual: self.state,
            })
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log(
        &self,
        stage: &'static str,
        fixture: Option<&str>,
        seed: Option<u64>,
        input_digest: Option<String>,
        outcome: &'static str,
        reason_code: &'static str,
        detail: String,
    ) -> Result<(), ScenarioError> {
        let entry = RunLogEntry {
            ts_unix_ms: now_unix_ms(),
            scenario: self.scenario.name().to_string(),
            namespace: self.store.namespace().to_string(),
            stage,
            fixture: fixture.map(str::to_string),
            seed,
            input_digest,
            outcome,
            reason_code,
            detail,
        };
        append_run_log(self.config, &entry).map_err(|detail| ScenarioError::Log { detail })
    }

    pub fn generate_fixtures(&mut self) -> Result<(), ScenarioError> {
        self.require_state(ScenarioState::Configured)?;

        let scenario = self.scenario;
        for (name, spec) in scenario.fixture_specs() {
            let input = generate(spec)?;
            let expected = compute_expected(&input, scenario.transform());
            self.log(
                "generate",
                Some(name),
                Some(spec.seed),
                Some(payload_digest(&input)),
                "ok",
                "fixtures_generated",
                String::new(),
            )?;
            self.generated
                .insert(name.clone(), GeneratedFixture { input, expected });
        }

        self.state = ScenarioState::FixturesGenerated;
        Ok(())
    }

    pub fn persist_fixtures(&mut self) -> Result<(), ScenarioError> {
        self.require_state(ScenarioState::FixturesGenerated)?;

        for (name, fixture) in &self.generated {
            self.store.save(&input_name(name), &fixture.input)?;
            self.store.save(&expected_name(name), &fixture.expected)?;
        }
        self.log(
            "persist",
            None,
            None,
            None,
            "ok",
            "fixtures_persisted",
            String::new(),
        )?;

        self.state = ScenarioState::Persisted;
        Ok(())
    }

    pub fn execute_engine(&mut self, runner: &dyn TestRunner) -> Result<(), ScenarioError> {
        self.require_state(ScenarioState::Persisted)?;

        let fixture_names: Vec<String> = self.generated.keys().cloned().collect();
        let request = RunRequest {
            scenario: self.scenario.name(),
            transform: self.scenario.transform(),
            fixture_names: &fixture_names,
            store: &self.store,
        };

        let started = Instant::now();
        let outcome = runner.execute(&request);
        let elapsed = started.elapsed();
        let budget = self.config.runner_timeout;

        match outcome {
            Err(RunnerError::TimedOut { detail }) => {
                self.log("execute", None, None, None, "fail", "runner_timed_out", detail)?;
                Err(ScenarioError::Timeout {
                    elapsed_ms: elapsed.as_millis(),
                    budget_ms: budget.as_millis(),
                })
            }
            Err(err) => {
                self.log(
                    "execute",
                    None,
                    None,
                    None,
                    "fail",
                    err.reason_code(),
                    err.to_string(),
                )?;
                Err(ScenarioError::Runner(err))
            }
            Ok(()) if elapsed > budget => {
                self.log(
                    "execute",
                    None,
                    None,
                    None,
                    "fail",
                    "scenario_runner_timeout",
                    format!("elapsed {}ms", elapsed.as_millis()),
                )?;
                Err(ScenarioError::Timeout {
                    elapsed_ms: elapsed.as_millis(),
                    budget_ms: budget.as_millis(),
                })
            }
            Ok(()) => {
                self.log(
                    "execute",
                    None,
                    None,
                    None,
                    "ok",
                    "engine_executed",
                    format!("elapsed {}ms", elapsed.as_millis()),
                )?;
                self.state = ScenarioState::Executed;
                Ok(())
            }
        }
    }

    /// Loads every actual/expected pair back from the store and
    /// verdicts them fixture by fixture. All failing fixtures are
    /// surfaced together in the report.
    pub fn compare_results(&mut self) -> Result<ScenarioReport, ScenarioError> {
        self.require_state(ScenarioState::Executed)?;

        let mut verdicts = Vec::with_capacity(self.generated.len());
        for name in self.generated.keys() {
            let expected = self.store.load(&expected_name(name))?;
            let actual = self.store.load(&actual_name(name))?;
            let result = compare(&actual, &expected, self.config.tolerance)?;
            let (outcome, reason_code) = if result.passed {
                ("pass", "matrix_within_tolerance")
            } else {
                ("fail", "matrix_mismatch")
            };
            self.log(
                "compare",
                Some(name),
                None,
                None,
                outcome,
                reason_code,
                format!(
                    "mismatches={} max_abs_difference={}",
                    result.mismatch_count, result.max_abs_difference
                ),
            )?;
            verdicts.push(FixtureVerdict {
                fixture: name.clone(),
                result,
            });
        }

        self.state = ScenarioState::Compared;
        Ok(ScenarioReport {
            scenario: self.scenario.name().to_string(),
            transform: self.scenario.transform().as_str().to_string(),
            namespace: self.store.namespace().to_string(),
            passed: verdicts.iter().all(|v| v.result.passed),
            verdicts,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Completed {
        report: ScenarioReport,
    },
    Aborted {
        scenario: String,
        reason_code: &'static str,
        detail: String,
    },
}

impl ScenarioOutcome {
    #[must_use]
    pub fn scenario(&self) -> &str {
        match self {
            Self::Completed { report } => &report.scenario,
            Self::Aborted { scenario, .. } => scenario,
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        match self {
            Self::Completed { report } => report.passed,
            Self::Aborted { .. } => false,
        }
    }
}

/// Drives scenarios end to end against one engine adapter. Scenario
/// errors abort that scenario without retry; sibling scenarios still
/// run.
pub struct ScenarioOrchestrator<R: TestRunner> {
    config: OracleConfig,
    runner: R,
}

impl<R: TestRunner> ScenarioOrchestrator<R> {
    #[must_use]
    pub fn new(config: OracleConfig, runner: R) -> Self {
        Self { config, runner }
    }

    #[must_use]
    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn run_scenario(&self, scenario: &Scenario) -> Result<ScenarioReport, ScenarioError> {
        let mut execution = ScenarioExecution::new(scenario, &self.config)?;
        execution.generate_fixtures()?;
        execution.persist_fixtures()?;
        execution.execute_engine(&self.runner)?;
        execution.compare_results()
    }

    pub fn run_all(&self, scenarios: &[Scenario]) -> Vec<ScenarioOutcome> {
        scenarios
            .iter()
            .map(|scenario| match self.run_scenario(scenario) {
                Ok(report) => ScenarioOutcome::Completed { report },
                Err(err) => ScenarioOutcome::Aborted {
                    scenario: scenario.name().to_string(),
                    reason_code: err.reason_code(),
                    detail: err.to_string(),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Scenario, ScenarioError, ScenarioExecution, ScenarioState, standard_scenarios,
    };
    use crate::OracleConfig;

    #[test]
    fn standard_scenarios_cover_the_three_sign_regimes() {
        let scenarios = standard_scenarios(1234);
        let names: Vec<&str> = scenarios.iter().map(Scenario::name).collect();
        assert_eq!(names, ["positive-range", "negative-range", "mixed-range"]);

        for scenario in &scenarios {
            let specs = scenario.fixture_specs();
            assert_eq!(specs.len(), 2);
            let vector = specs.get("vector").expect("vector spec");
            assert_eq!((vector.rows, vector.cols), (10, 1));
            let matrix = specs.get("matrix").expect("matrix spec");
            assert_eq!((matrix.rows, matrix.cols), (10, 10));
            assert_eq!(vector.sparsity, 0.0);
        }

        let mixed = &scenarios[2];
        let spec = mixed.fixture_specs().get("matrix").expect("matrix spec");
        assert_eq!((spec.min_value, spec.max_value), (-1.0, 1.0));
    }

    #[test]
    fn with_seed_re_derives_fixture_seeds_deterministically() {
        let base = Scenario::signed_range("mixed-range", -1.0, 1.0, 9);
        let lhs = base.with_seed(77);
        let rhs = base.with_seed(77);
        let other = base.with_seed(78);

        assert_eq!(lhs.fixture_specs(), rhs.fixture_specs());
        assert_ne!(lhs.fixture_specs(), other.fixture_specs());
        assert_eq!(lhs.namespace(), rhs.namespace());
        assert_ne!(lhs.namespace(), other.namespace());
    }

    #[test]
    fn namespace_embeds_the_scenario_name() {
        let scenario = Scenario::signed_range("negative-range", -1.0, 0.0, 5);
        assert!(scenario.namespace().starts_with("negative-range-"));
    }

    #[test]
    fn steps_refuse_to_run_out_of_order() {
        let root = tempfile::tempdir().expect("temp root");
        let config = OracleConfig::new(root.path());
        let scenario = Scenario::signed_range("mixed-range", -1.0, 1.0, 3);
        let mut execution = ScenarioExecution::new(&scenario, &config).expect("execution");

        let err = execution.persist_fixtures().expect_err("persist first");
        assert_eq!(
            err,
            ScenarioError::Sequence {
                expected: ScenarioState::FixturesGenerated,
                actual: ScenarioState::Configured,
            }
        );

        let err = execution.compare_results().expect_err("compare first");
        assert!(matches!(err, ScenarioError::Sequence { .. }));

        execution.generate_fixtures().expect("generate");
        let err = execution.generate_fixtures().expect_err("generate twice");
        assert_eq!(
            err,
            ScenarioError::Sequence {
                expected: ScenarioState::Configured,
                actual: ScenarioState::FixturesGenerated,
            }
        );
    }

    #[test]
    fn state_progresses_through_generation_and_persistence() {
        let root = tempfile::tempdir().expect("temp root");
        let config = OracleConfig::new(root.path());
        let scenario = Scenario::signed_range("positive-range", 0.0, 1.0, 8);
        let mut execution = ScenarioExecution::new(&scenario, &config).expect("execution");

        assert_eq!(execution.state(), ScenarioState::Configured);
        execution.generate_fixtures().expect("generate");
        assert_eq!(execution.state(), ScenarioState::FixturesGenerated);
        execution.persist_fixtures().expect("persist");
        assert_eq!(execution.state(), ScenarioState::Persisted);

        let store = execution.store();
        let input = store.load("vector.input").expect("persisted input");
        assert_eq!(input.shape(), (10, 1));
        let expected = store.load("vector.expected").expect("persisted expected");
        assert_eq!(expected.shape(), (10, 1));
    }
}
