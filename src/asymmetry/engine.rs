//! Decay-corrected asymmetry from forward/backward counts
//!
//! For a group with balance α the engine sums the background-subtracted
//! counts of the forward counters into `Nf(t)` and of the backward counters
//! into `Nb(t)`, normalizes with the initial rate `N0` and removes the muon
//! decay:
//!
//! ```text
//! A(t) = (Nf(t) - α Nb(t)) / N0 · exp(t/τμ)
//! σ(t) = sqrt(|Nf_raw - bf(1 - 1/M)| + α² |Nb_raw - bb(1 - 1/M)|) / N0 · exp(t/τμ)
//! ```
//!
//! `N0` is the slope of a straight-line fit of `Nf + α Nb` against
//! `exp(-t/τμ)`; `bf`, `bb` are the summed per-counter background means over
//! `M` pre-prompt bins.

use crate::asymmetry::grouping::DetectorGroup;
use crate::asymmetry::histogram::RunHistograms;
use crate::error::{MuFitError, Result};
use crate::models::TAU_MU_US;
use ndarray::{Array, Array1, Array3, Axis, Dimension, Ix1, Ix2, Ix3};
use serde::{Deserialize, Serialize};

/// Pre-prompt bins `[first, last)` used to estimate the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundWindow {
    pub first: usize,
    pub last: usize,
}

impl BackgroundWindow {
    pub fn new(first: usize, last: usize) -> Result<Self> {
        if first >= last {
            return Err(MuFitError::Configuration(format!(
                "background window [{}, {}) is empty",
                first, last
            )));
        }
        Ok(Self { first, last })
    }

    /// Number of bins `M`.
    pub fn len(&self) -> usize {
        self.last - self.first
    }

    pub fn is_empty(&self) -> bool {
        self.last <= self.first
    }
}

/// Time axis with asymmetry and error arrays of dimension `D`.
///
/// Rows of the 2-D and 3-D shapes are runs and/or groups; the last axis is
/// always time.
#[derive(Debug, Clone, PartialEq)]
pub struct AsymmetryResult<D: Dimension> {
    /// Bin centers in μs
    pub time: Array1<f64>,
    pub asymmetry: Array<f64, D>,
    pub error: Array<f64, D>,
}

impl<D: Dimension> AsymmetryResult<D> {
    /// Number of time bins.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Forward and backward sums of one run and group.
struct GroupCounts {
    forward: Array1<f64>,
    backward: Array1<f64>,
    forward_background: f64,
    backward_background: f64,
}

/// Computes asymmetries for one offset and background choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AsymmetryEngine {
    /// First good bin, counted from each counter's prompt bin
    pub offset: usize,

    /// Background window; `None` uses raw counts
    pub background: Option<BackgroundWindow>,
}

impl AsymmetryEngine {
    pub fn new(offset: usize) -> Self {
        Self {
            offset,
            background: None,
        }
    }

    pub fn with_background(mut self, window: BackgroundWindow) -> Self {
        self.background = Some(window);
        self
    }

    /// Asymmetry of one run and group.
    pub fn single(&self, run: &RunHistograms, group: &DetectorGroup) -> Result<AsymmetryResult<Ix1>> {
        let result = self.multigroup_suite(std::slice::from_ref(run), std::slice::from_ref(group))?;
        Ok(AsymmetryResult {
            time: result.time,
            asymmetry: result.asymmetry.index_axis_move(Axis(0), 0).index_axis_move(Axis(0), 0),
            error: result.error.index_axis_move(Axis(0), 0).index_axis_move(Axis(0), 0),
        })
    }

    /// One row per run, same group.
    pub fn suite(&self, runs: &[RunHistograms], group: &DetectorGroup) -> Result<AsymmetryResult<Ix2>> {
        let result = self.multigroup_suite(runs, std::slice::from_ref(group))?;
        Ok(AsymmetryResult {
            time: result.time,
            asymmetry: result.asymmetry.index_axis_move(Axis(1), 0),
            error: result.error.index_axis_move(Axis(1), 0),
        })
    }

    /// One row per group, same run.
    pub fn multigroup(
        &self,
        run: &RunHistograms,
        groups: &[DetectorGroup],
    ) -> Result<AsymmetryResult<Ix2>> {
        let result = self.multigroup_suite(std::slice::from_ref(run), groups)?;
        Ok(AsymmetryResult {
            time: result.time,
            asymmetry: result.asymmetry.index_axis_move(Axis(0), 0),
            error: result.error.index_axis_move(Axis(0), 0),
        })
    }

    /// Indexed `[run][group][t]`.
    ///
    /// The time axis is computed once, from the first run and the mean
    /// sub-bin prompt offset of all counters in all groups.
    pub fn multigroup_suite(
        &self,
        runs: &[RunHistograms],
        groups: &[DetectorGroup],
    ) -> Result<AsymmetryResult<Ix3>> {
        let first = runs
            .first()
            .ok_or_else(|| MuFitError::Configuration("no runs selected".to_string()))?;
        if groups.is_empty() {
            return Err(MuFitError::Configuration("no detector groups".to_string()));
        }
        for run in runs {
            for warning in first.identity().check_compatible(run.identity())? {
                log::warn!("{}", warning);
            }
            for group in groups {
                group.check_counters(run.identity().counters, run.run())?;
            }
            self.check_background(run)?;
        }

        let length = self.window_length(runs, groups)?;
        let time = self.time_axis(first, groups, length);
        let decay = time.mapv(|t| (t / TAU_MU_US).exp());

        let mut asymmetry = Array3::zeros((runs.len(), groups.len(), length));
        let mut error = Array3::zeros((runs.len(), groups.len(), length));
        for (r, run) in runs.iter().enumerate() {
            for (g, group) in groups.iter().enumerate() {
                let counts = self.group_counts(run, group, length);
                let (a, e) = self.group_asymmetry(run, group, &counts, &decay)?;
                asymmetry.slice_mut(ndarray::s![r, g, ..]).assign(&a);
                error.slice_mut(ndarray::s![r, g, ..]).assign(&e);
            }
        }

        log::debug!(
            "asymmetry of {} run(s) × {} group(s), {} bins from {:.4} μs",
            runs.len(),
            groups.len(),
            length,
            time[0]
        );
        Ok(AsymmetryResult {
            time,
            asymmetry,
            error,
        })
    }

    /// Bins available after `offset` in every counter of every run.
    fn window_length(&self, runs: &[RunHistograms], groups: &[DetectorGroup]) -> Result<usize> {
        let mut length = usize::MAX;
        for run in runs {
            let max_t0 = groups
                .iter()
                .flat_map(|g| g.counters())
                .map(|c| run.t0()[c])
                .max()
                .unwrap_or(0);
            let available = run
                .identity()
                .length
                .saturating_sub(max_t0 + self.offset);
            length = length.min(available);
        }
        if length < 2 {
            return Err(MuFitError::Configuration(format!(
                "offset {} leaves {} bin(s) after the prompt",
                self.offset, length
            )));
        }
        Ok(length)
    }

    fn time_axis(&self, run: &RunHistograms, groups: &[DetectorGroup], length: usize) -> Array1<f64> {
        let counters: Vec<usize> = groups.iter().flat_map(|g| g.counters()).collect();
        let mean_dt0 =
            counters.iter().map(|&c| run.dt0()[c]).sum::<f64>() / counters.len() as f64;
        let bin_width_us = run.identity().bin_width_ns / 1000.0;
        Array1::from_iter(
            (0..length).map(|i| (i as f64 + self.offset as f64 + mean_dt0) * bin_width_us),
        )
    }

    fn check_background(&self, run: &RunHistograms) -> Result<()> {
        if let Some(window) = self.background {
            if window.last > run.identity().length {
                return Err(MuFitError::Configuration(format!(
                    "background window [{}, {}) exceeds the {} bins of run {}",
                    window.first,
                    window.last,
                    run.identity().length,
                    run.run()
                )));
            }
            if let Some(&t0) = run.t0().iter().min() {
                if window.last > t0 {
                    log::warn!(
                        "background window [{}, {}) of run {} reaches past the prompt bin {}",
                        window.first,
                        window.last,
                        run.run(),
                        t0
                    );
                }
            }
        }
        Ok(())
    }

    fn group_counts(&self, run: &RunHistograms, group: &DetectorGroup, length: usize) -> GroupCounts {
        let sum = |counters: &[usize]| {
            let mut total = Array1::zeros(length);
            let mut background = 0.0;
            for &c in counters {
                let start = run.t0()[c] + self.offset;
                let histogram = run.counter(c);
                total += &histogram.slice(ndarray::s![start..start + length]);
                if let Some(window) = self.background {
                    background += histogram
                        .slice(ndarray::s![window.first..window.last])
                        .mean()
                        .unwrap_or(0.0);
                }
            }
            (total, background)
        };
        let (forward, forward_background) = sum(group.forward());
        let (backward, backward_background) = sum(group.backward());
        GroupCounts {
            forward,
            backward,
            forward_background,
            backward_background,
        }
    }

    fn group_asymmetry(
        &self,
        run: &RunHistograms,
        group: &DetectorGroup,
        counts: &GroupCounts,
        decay: &Array1<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let alpha = group.alpha();
        let nf = &counts.forward - counts.forward_background;
        let nb = &counts.backward - counts.backward_background;

        let n0 = normalization(&(&nf + &(alpha * &nb)), decay).map_err(|message| {
            MuFitError::DegenerateNormalization {
                run: run.run(),
                message,
            }
        })?;

        let asymmetry = (&nf - &(alpha * &nb)) / n0 * decay;

        let correction = match self.background {
            Some(window) => 1.0 - 1.0 / window.len() as f64,
            None => 0.0,
        };
        let bf = counts.forward_background * correction;
        let bb = counts.backward_background * correction;
        let mut clamped = 0;
        let variance = ndarray::Zip::from(&counts.forward)
            .and(&counts.backward)
            .map_collect(|&f, &b| {
                let v = (f - bf).abs() + alpha * alpha * (b - bb).abs();
                // zero-count bins would give a zero error; one count is the floor
                if v == 0.0 {
                    clamped += 1;
                    1.0
                } else {
                    v
                }
            });
        if clamped > 0 {
            log::warn!(
                "run {}: {} bin(s) with zero variance set to one count",
                run.run(),
                clamped
            );
        }
        let error = variance.mapv(f64::sqrt) / n0 * decay;
        Ok((asymmetry, error))
    }
}

/// Slope of the least-squares line of `y` against `exp(-t/τμ)`, given
/// `decay = exp(t/τμ)`.
fn normalization(y: &Array1<f64>, decay: &Array1<f64>) -> std::result::Result<f64, String> {
    let x = decay.mapv(|d| 1.0 / d);
    let n = x.len() as f64;
    let x_mean = x.sum() / n;
    let y_mean = y.sum() / n;
    let sxx: f64 = x.iter().map(|xi| (xi - x_mean).powi(2)).sum();
    let sxy: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(xi, yi)| (xi - x_mean) * (yi - y_mean))
        .sum();
    if !(sxx > 0.0) {
        return Err("time window too short to separate the decay".to_string());
    }
    let n0 = sxy / sxx;
    if !n0.is_finite() || n0 <= 0.0 {
        return Err(format!("normalization N0 = {} is not positive", n0));
    }
    Ok(n0)
}
