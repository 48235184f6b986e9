//! Fit sessions
//!
//! A [`FitSession`] owns the dashboard, the loaded data and the results of a
//! fit, and enforces the order of operations:
//!
//! ```text
//! Built -> Resolved -> Loaded -> Converged | Failed -> Reported
//! ```
//!
//! Editing the dashboard or the options drops the session back to `Built`;
//! every later stage must be redone. Data sets of a suite are fitted
//! independently with the same resolved dashboard, optionally seeding each
//! run with the previous best fit, or in parallel on snapshots of the start
//! vector. A global fit instead stacks every data set into one objective:
//! shared parameters get one slot, local ones a slot per data set.

use crate::asymmetry::engine::AsymmetryEngine;
use crate::asymmetry::grouping::DetectorGroup;
use crate::asymmetry::histogram::RunHistograms;
use crate::error::{MuFitError, Result};
use crate::fit::minimizer::{Minimizer, MinimizerOutcome};
use crate::fit::objective::{AsymmetryObjective, FitData, GlobalObjective, Objective};
use crate::fit::report::FitReport;
use crate::models::Registry;
use crate::parameters::dashboard::Dashboard;
use crate::parameters::resolver::{
    ComponentBinding, ErrorPropagation, FreeParameterVector, ParameterResolver,
};
use crate::suite::Suite;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Stage of a [`FitSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Built,
    Resolved,
    Loaded,
    Converged,
    Failed,
    Reported,
}

/// How data sets are fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// First fitted bin of the asymmetry window
    pub first_bin: usize,

    /// End of the fitted bins (exclusive); `None` fits to the end
    pub last_bin: Option<usize>,

    /// Start each run of a suite from the previous valid best fit
    pub feed_forward: bool,

    /// Fit the runs of a suite concurrently
    pub parallel: bool,

    /// Fit every data set of a suite jointly, with one chi-square
    pub global: bool,

    /// Error of COMPUTED parameters
    pub error_propagation: ErrorPropagation,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            first_bin: 0,
            last_bin: None,
            feed_forward: false,
            parallel: false,
            global: false,
            error_propagation: ErrorPropagation::default(),
        }
    }
}

/// Minimizer result of one data set.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFit {
    /// Raw runs of the data set
    pub runs: Vec<u32>,
    pub outcome: MinimizerOutcome,
    pub dof: usize,
}

impl RunFit {
    pub fn is_valid(&self) -> bool {
        self.outcome.valid
    }

    /// Non-convergence error of an invalid fit.
    pub fn error(&self) -> Option<MuFitError> {
        if self.outcome.valid {
            return None;
        }
        Some(MuFitError::NonConvergence {
            run: self.runs.first().copied().unwrap_or_default(),
            message: self.outcome.message.clone(),
        })
    }
}

/// Dashboard, data and results of one fit.
#[derive(Debug, Clone)]
pub struct FitSession {
    registry: Registry,
    dashboard: Dashboard,
    options: FitOptions,
    state: SessionState,
    resolver: Option<ParameterResolver>,
    /// Component bindings by run and detector group
    bindings: Vec<Vec<Vec<ComponentBinding>>>,
    start: Option<FreeParameterVector>,
    data: Vec<FitData>,
    fits: Vec<RunFit>,
}

impl FitSession {
    pub fn new(dashboard: Dashboard, registry: Registry) -> Self {
        Self {
            registry,
            dashboard,
            options: FitOptions::default(),
            state: SessionState::Built,
            resolver: None,
            bindings: Vec::new(),
            start: None,
            data: Vec::new(),
            fits: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: FitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    /// Edit the dashboard; the session goes back to `Built`.
    pub fn dashboard_mut(&mut self) -> &mut Dashboard {
        self.invalidate();
        &mut self.dashboard
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Change the options; the session goes back to `Built`.
    pub fn set_options(&mut self, options: FitOptions) {
        self.invalidate();
        self.options = options;
    }

    pub fn resolver(&self) -> Option<&ParameterResolver> {
        self.resolver.as_ref()
    }

    /// Loaded data sets, already restricted to the fit range.
    pub fn data(&self) -> &[FitData] {
        &self.data
    }

    pub fn fits(&self) -> &[RunFit] {
        &self.fits
    }

    fn invalidate(&mut self) {
        self.state = SessionState::Built;
        self.resolver = None;
        self.bindings.clear();
        self.start = None;
        self.data.clear();
        self.fits.clear();
    }

    fn require(&self, allowed: &[SessionState], operation: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(MuFitError::InvalidState(format!(
                "cannot {} a session in state {:?}",
                operation, self.state
            )))
        }
    }

    /// Resolve the dashboard and bind its components.
    ///
    /// Always allowed; discards any loaded data and results.
    pub fn resolve(&mut self) -> Result<&FreeParameterVector> {
        self.invalidate();
        let resolver = ParameterResolver::resolve(&self.dashboard)?;
        let bindings = resolver.int2_multirun(&self.dashboard, &self.registry)?;
        let start = resolver.int2min(&self.dashboard)?;
        log::debug!(
            "resolved {} parameters into {} slots, {} free",
            self.dashboard.parameter_count(),
            start.len(),
            start.free_count
        );
        self.resolver = Some(resolver);
        self.bindings = bindings;
        self.state = SessionState::Resolved;
        Ok(self.start.insert(start))
    }

    /// Bind data sets to the objective.
    ///
    /// Every data set must have one row per dashboard group and, within the
    /// fit range, more bins than FREE parameters. A global fit re-resolves
    /// the dashboard with local slots for every data set and only needs more
    /// bins in total than FREE slots.
    pub fn load(&mut self, data: Vec<FitData>) -> Result<()> {
        use SessionState::*;
        self.require(&[Resolved, Loaded, Converged, Failed, Reported], "load")?;
        let free_count = if self.options.global {
            0
        } else {
            self.start.as_ref().map_or(0, |s| s.free_count)
        };
        if data.is_empty() {
            return Err(MuFitError::Configuration("no data to fit".to_string()));
        }

        let mut windowed = Vec::with_capacity(data.len());
        for set in &data {
            if set.groups() != usize::from(self.dashboard.groups()) {
                return Err(MuFitError::Configuration(format!(
                    "runs {:?} have {} group(s), the model fits {}",
                    set.runs,
                    set.groups(),
                    self.dashboard.groups()
                )));
            }
            let set = set.window(self.options.first_bin, self.options.last_bin)?;
            if set.bins() <= free_count {
                return Err(MuFitError::Configuration(format!(
                    "runs {:?}: {} bins leave no degrees of freedom for {} free parameters",
                    set.runs,
                    set.bins(),
                    free_count
                )));
            }
            windowed.push(set);
        }

        if self.options.global {
            self.resolve_global(&windowed)?;
        }
        self.data = windowed;
        self.fits.clear();
        self.state = SessionState::Loaded;
        Ok(())
    }

    fn resolve_global(&mut self, data: &[FitData]) -> Result<()> {
        let resolver = ParameterResolver::resolve_global(&self.dashboard, data.len())?;
        let start = resolver.int2min(&self.dashboard)?;
        let bins: usize = data.iter().map(FitData::bins).sum();
        if bins <= start.free_count {
            return Err(MuFitError::Configuration(format!(
                "{} bins leave no degrees of freedom for {} free slots",
                bins, start.free_count
            )));
        }
        log::debug!(
            "global fit of {} data sets over {} slots, {} free",
            data.len(),
            start.len(),
            start.free_count
        );
        self.bindings = resolver.int2_multirun(&self.dashboard, &self.registry)?;
        self.resolver = Some(resolver);
        self.start = Some(start);
        Ok(())
    }

    /// Compute the asymmetry of every suite entry for `groups` and load it.
    ///
    /// Runs whose normalization is degenerate are dropped and returned; the
    /// others are loaded.
    pub fn load_suite(
        &mut self,
        suite: &Suite,
        engine: &AsymmetryEngine,
        groups: &[DetectorGroup],
    ) -> Result<Vec<MuFitError>> {
        use SessionState::*;
        self.require(&[Resolved, Loaded, Converged, Failed, Reported], "load")?;

        let mut runs: Vec<RunHistograms> = suite.runs().to_vec();
        let mut rejected = Vec::new();
        let result = loop {
            if runs.is_empty() {
                return Err(MuFitError::Configuration("no run left to fit".to_string()));
            }
            match engine.multigroup_suite(&runs, groups) {
                Ok(result) => break result,
                Err(err) => match err.run().and_then(|r| runs.iter().position(|h| h.run() == r)) {
                    Some(k) => {
                        log::warn!("dropping run {}: {}", runs[k].run(), err);
                        runs.remove(k);
                        rejected.push(err);
                    }
                    None => return Err(err),
                },
            }
        };

        let numbers: Vec<u32> = runs.iter().map(RunHistograms::run).collect();
        let alphas: Vec<f64> = groups.iter().map(DetectorGroup::alpha).collect();
        let mut data = FitData::suite(&numbers, &result, &alphas)?;
        for (set, run) in data.iter_mut().zip(&runs) {
            set.runs = run.added().to_vec();
        }
        self.load(data)?;
        Ok(rejected)
    }

    /// Fit every loaded data set.
    ///
    /// A data set that does not converge is kept as an invalid fit and the
    /// loop goes on; the session ends `Failed` if any did.
    pub fn minimize(&mut self, minimizer: &dyn Minimizer) -> Result<&[RunFit]> {
        use SessionState::*;
        self.require(&[Loaded, Converged, Failed, Reported], "minimize")?;
        let start = self
            .start
            .clone()
            .ok_or_else(|| MuFitError::InvalidState("session is not resolved".to_string()))?;

        let parallel = self.options.parallel && !self.options.feed_forward && self.data.len() > 1;
        if self.options.global && (self.options.parallel || self.options.feed_forward) {
            log::warn!("a global fit is a single minimization, parallel and feed-forward are ignored");
        } else if self.options.parallel && self.options.feed_forward {
            log::warn!("feed-forward suites are fitted sequentially");
        }

        self.fits = if self.options.global {
            vec![self.fit_global(minimizer, &start)?]
        } else if parallel {
            self.fit_parallel(minimizer, &start)
        } else {
            self.fit_sequential(minimizer, &start)
        };

        let invalid = self.fits.iter().filter(|f| !f.is_valid()).count();
        self.state = if invalid == 0 { Converged } else { Failed };
        log::info!(
            "fitted {} data set(s), {} invalid",
            self.fits.len(),
            invalid
        );
        Ok(&self.fits)
    }

    fn fit_sequential(&self, minimizer: &dyn Minimizer, start: &FreeParameterVector) -> Vec<RunFit> {
        let mut fits: Vec<RunFit> = Vec::with_capacity(self.data.len());
        let mut guess = start.clone();
        for set in &self.data {
            let fit = fit_one(&self.bindings[0], set, &guess, minimizer);
            if self.options.feed_forward && fit.is_valid() {
                for (m, value) in fit.outcome.values.iter().enumerate() {
                    guess.values[m] = guess.limits[m].clamp(*value);
                }
            }
            fits.push(fit);
        }
        fits
    }

    fn fit_global(&self, minimizer: &dyn Minimizer, start: &FreeParameterVector) -> Result<RunFit> {
        let parts = self
            .data
            .iter()
            .zip(&self.bindings)
            .map(|(set, bindings)| AsymmetryObjective::per_group(bindings.clone(), set.clone()))
            .collect::<Result<Vec<_>>>()?;
        let objective = GlobalObjective::new(parts);
        let runs = self.data.iter().flat_map(|set| set.runs.iter().copied()).collect();
        Ok(run_fit(runs, &objective, start, minimizer))
    }

    #[cfg(feature = "parallel")]
    fn fit_parallel(&self, minimizer: &dyn Minimizer, start: &FreeParameterVector) -> Vec<RunFit> {
        self.data
            .par_iter()
            .map(|set| fit_one(&self.bindings[0], set, start, minimizer))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn fit_parallel(&self, minimizer: &dyn Minimizer, start: &FreeParameterVector) -> Vec<RunFit> {
        log::warn!("built without the parallel feature, fitting sequentially");
        self.fit_sequential(minimizer, start)
    }

    /// Write the best fits back into dashboard values and report them.
    ///
    /// A global fit gives one report per data set, each carrying the global
    /// chi-square. The session dashboard ends up holding the last valid fit.
    pub fn report(&mut self) -> Result<Vec<FitReport>> {
        use SessionState::*;
        self.require(&[Converged, Failed, Reported], "report")?;
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| MuFitError::InvalidState("session is not resolved".to_string()))?;

        // (fit, run of the resolution, raw runs) of every report
        let views: Vec<(&RunFit, usize, Vec<u32>)> = if self.options.global {
            match self.fits.first() {
                Some(fit) => self
                    .data
                    .iter()
                    .enumerate()
                    .map(|(r, set)| (fit, r, set.runs.clone()))
                    .collect(),
                None => Vec::new(),
            }
        } else {
            self.fits.iter().map(|fit| (fit, 0, fit.runs.clone())).collect()
        };

        let mut reports = Vec::with_capacity(views.len());
        let mut last_valid = None;
        for (fit, run, runs) in views {
            let mut snapshot = self.dashboard.clone();
            resolver.min2int_run(
                &mut snapshot,
                run,
                &fit.outcome.values,
                &fit.outcome.errors,
                self.options.error_propagation,
            )?;
            reports.push(FitReport::new(
                runs,
                &snapshot,
                resolver,
                run,
                fit.outcome.chi_square,
                fit.dof,
                fit.outcome.valid,
                fit.outcome.message.clone(),
            ));
            if fit.is_valid() {
                last_valid = Some(snapshot);
            }
        }
        if let Some(snapshot) = last_valid {
            self.dashboard = snapshot;
        }
        self.state = Reported;
        Ok(reports)
    }
}

fn fit_one(
    bindings: &[Vec<ComponentBinding>],
    data: &FitData,
    start: &FreeParameterVector,
    minimizer: &dyn Minimizer,
) -> RunFit {
    match AsymmetryObjective::per_group(bindings.to_vec(), data.clone()) {
        Ok(objective) => run_fit(data.runs.clone(), &objective, start, minimizer),
        Err(err) => failed_fit(data.runs.clone(), data.bins(), start, err),
    }
}

fn run_fit(
    runs: Vec<u32>,
    objective: &dyn Objective,
    start: &FreeParameterVector,
    minimizer: &dyn Minimizer,
) -> RunFit {
    let dof = objective.bins() - start.free_count;
    let outcome = match minimizer.minimize(objective, start) {
        Ok(outcome) => outcome,
        Err(err) => return failed_fit(runs, objective.bins(), start, err),
    };
    let fit = RunFit { runs, outcome, dof };
    match fit.error() {
        Some(err) => log::warn!("{}", err),
        None => log::info!(
            "runs {:?}: χ²/dof = {:.3}",
            fit.runs,
            fit.outcome.chi_square / dof as f64
        ),
    }
    fit
}

fn failed_fit(runs: Vec<u32>, bins: usize, start: &FreeParameterVector, err: MuFitError) -> RunFit {
    let fit = RunFit {
        runs,
        outcome: MinimizerOutcome {
            values: start.values.clone(),
            errors: start.errors.clone(),
            chi_square: f64::NAN,
            valid: false,
            message: err.to_string(),
            iterations: 0,
            evaluations: 0,
        },
        dof: bins.saturating_sub(start.free_count),
    };
    if let Some(err) = fit.error() {
        log::warn!("{}", err);
    }
    fit
}
