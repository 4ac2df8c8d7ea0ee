//! ExplorationRunner - drives a property through a provider
//!
//! The runner asks its provider for one iteration at a time until a failure is
//! reproduced, the provider reports that the path space is covered, or the
//! iteration and time budgets run out. Discarded iterations are counted per
//! reason so that a run made only of discards can say why.

use crate::config::ProviderConfig;
use crate::data::TestCase;
use crate::errors::{BridgeError, CannotProceedScope};
use crate::providers::{provider_registry, PrimitiveProvider, SYMBOLIC_BACKEND};
use crate::verdict::{Counterexample, DiscardReason, Verdict};
use std::time::{Duration, Instant};

/// Configuration for the ExplorationRunner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum number of iterations (explored paths)
    pub max_iterations: u32,

    /// Seed handed to backends that sample randomly
    pub seed: u64,

    /// Registry name of the provider backend
    pub backend: String,

    /// Settings of the provider
    pub provider: ProviderConfig,

    /// Maximum time allowed for the entire run
    pub max_time: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            seed: 0,
            backend: SYMBOLIC_BACKEND.to_string(),
            provider: ProviderConfig::default(),
            max_time: Some(Duration::from_secs(60)),
        }
    }
}

/// Statistics about a run
#[derive(Debug, Clone, Default)]
pub struct RunnerStats {
    pub iterations: u32,
    pub passed: u32,
    pub unsatisfiable: u32,
    pub nondeterministic: u32,
    pub timeouts: u32,
    pub model_artifacts: u32,
    pub overruns: u32,
    pub undecided: u32,
    pub total_runtime: Duration,
}

impl RunnerStats {
    fn record_discard(&mut self, reason: DiscardReason) {
        match reason {
            DiscardReason::UnsatisfiablePath => self.unsatisfiable += 1,
            DiscardReason::Nondeterminism => self.nondeterministic += 1,
            DiscardReason::PathTimeout => self.timeouts += 1,
            DiscardReason::ModelArtifact => self.model_artifacts += 1,
            DiscardReason::Overrun => self.overruns += 1,
            DiscardReason::Undecided => self.undecided += 1,
        }
    }

    pub fn discarded(&self) -> u32 {
        self.unsatisfiable + self.nondeterministic + self.timeouts + self.model_artifacts + self.overruns + self.undecided
    }

    /// The most frequent discard reason. Ties go to the more severe one.
    pub fn dominant_discard(&self) -> Option<DiscardReason> {
        let counts = [
            (DiscardReason::UnsatisfiablePath, self.unsatisfiable),
            (DiscardReason::Nondeterminism, self.nondeterministic),
            (DiscardReason::PathTimeout, self.timeouts),
            (DiscardReason::Overrun, self.overruns),
            (DiscardReason::Undecided, self.undecided),
            (DiscardReason::ModelArtifact, self.model_artifacts),
        ];
        let mut best: Option<(DiscardReason, u32)> = None;
        for (reason, count) in counts {
            if count > 0 && best.map_or(true, |(_, top)| count > top) {
                best = Some((reason, count));
            }
        }
        best.map(|(reason, _)| reason)
    }
}

/// Result of running a property
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    /// No failure found within the budget
    Passed,
    /// A failure was reproduced concretely
    Failed(Counterexample),
    /// Every path was explored and passed
    Verified,
    /// No iteration produced a result
    Inconclusive(Option<DiscardReason>),
}

/// Main exploration engine
#[derive(Debug)]
pub struct ExplorationRunner {
    pub config: RunnerConfig,
    pub stats: RunnerStats,
    provider: Box<dyn PrimitiveProvider>,
}

impl ExplorationRunner {
    /// Runner over the backend named in `config`, looked up in the global
    /// registry.
    pub fn new(config: RunnerConfig) -> Result<Self, BridgeError> {
        let provider = provider_registry().create(&config.backend, &config.provider, config.seed)?;
        Ok(Self::with_provider(config, provider))
    }

    pub fn with_provider(config: RunnerConfig, provider: Box<dyn PrimitiveProvider>) -> Self {
        Self {
            config,
            stats: RunnerStats::default(),
            provider,
        }
    }

    pub fn provider(&self) -> &dyn PrimitiveProvider {
        self.provider.as_ref()
    }

    /// Explore `property` until it fails, is verified, or the budget runs out.
    /// Each call starts a fresh exploration, so one runner can check several
    /// properties in turn.
    pub fn run<F>(&mut self, mut property: F) -> Result<RunResult, BridgeError>
    where
        F: FnMut(&mut TestCase<'_>) -> bool,
    {
        let started = Instant::now();
        self.stats = RunnerStats::default();
        self.provider.reset();
        log::info!(
            "exploring with the {} backend, up to {} iterations",
            self.provider.name(),
            self.config.max_iterations
        );
        let result = self.explore(&mut property, started);
        self.stats.total_runtime = started.elapsed();
        if let Ok(result) = &result {
            log::info!(
                "run finished after {} iterations ({} passed, {} discarded): {:?}",
                self.stats.iterations,
                self.stats.passed,
                self.stats.discarded(),
                result
            );
        }
        result
    }

    fn explore<F>(&mut self, property: &mut F, started: Instant) -> Result<RunResult, BridgeError>
    where
        F: FnMut(&mut TestCase<'_>) -> bool,
    {
        while self.stats.iterations < self.config.max_iterations {
            if self.config.max_time.map_or(false, |limit| started.elapsed() >= limit) {
                log::warn!("run stopped by the time limit");
                break;
            }

            self.stats.iterations += 1;
            match self.provider.run_test_case(property) {
                Ok(Verdict::Passed) => self.stats.passed += 1,
                Ok(Verdict::Verified) => {
                    self.stats.passed += 1;
                    return Ok(RunResult::Verified);
                }
                Ok(Verdict::Failed(example)) => return Ok(RunResult::Failed(example)),
                Ok(Verdict::Discarded(reason)) => self.stats.record_discard(reason),
                Ok(Verdict::InternalError(err)) => return Err(BridgeError::EngineInternal(err)),
                Err(BridgeError::CannotProceed(scope)) => {
                    self.stats.iterations -= 1;
                    return Ok(self.finish(scope == CannotProceedScope::Verified));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(self.finish(false))
    }

    fn finish(&self, covered: bool) -> RunResult {
        if self.stats.passed == 0 {
            RunResult::Inconclusive(self.stats.dominant_discard())
        } else if covered {
            RunResult::Verified
        } else {
            RunResult::Passed
        }
    }

    /// Run `property` and turn the outcome into a `Result`: only a reproduced
    /// failure or a run where no path could be executed is an error.
    pub fn check<F>(&mut self, property: F) -> Result<(), BridgeError>
    where
        F: FnMut(&mut TestCase<'_>) -> bool,
    {
        match self.run(property)? {
            RunResult::Passed | RunResult::Verified => Ok(()),
            RunResult::Failed(example) => Err(BridgeError::UserFailure(example)),
            RunResult::Inconclusive(reason) => match reason {
                Some(DiscardReason::UnsatisfiablePath) => Err(BridgeError::Unsatisfiable),
                Some(DiscardReason::PathTimeout) => Err(BridgeError::PathTimeout),
                Some(DiscardReason::Nondeterminism) => Err(BridgeError::Nondeterminism),
                other => {
                    log::warn!("no iteration produced a result (dominant discard: {:?})", other);
                    Ok(())
                }
            },
        }
    }
}
