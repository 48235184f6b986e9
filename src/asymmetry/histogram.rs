//! Raw detector histograms of one run
//!
//! A [`RunHistograms`] holds the counts of every counter of a run together
//! with the prompt-peak position of each counter and the scalar metadata the
//! asymmetry engine and the suite need. Runs come from a [`HistogramSource`];
//! file readers live outside this crate.

use crate::error::{MuFitError, Result};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Relative tolerance when comparing bin widths.
const BIN_WIDTH_TOLERANCE: f64 = 1e-9;

/// Geometry and timing of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Run number
    pub run: u32,

    /// Number of counters (detectors)
    pub counters: usize,

    /// Bins per histogram
    pub length: usize,

    /// Bin width in ns
    pub bin_width_ns: f64,

    /// Instrument name
    #[serde(default)]
    pub instrument: String,

    /// Acquisition start, as written by the instrument
    #[serde(default)]
    pub date: String,
}

impl RunIdentity {
    pub fn new(run: u32, counters: usize, length: usize, bin_width_ns: f64) -> Self {
        Self {
            run,
            counters,
            length,
            bin_width_ns,
            instrument: String::new(),
            date: String::new(),
        }
    }

    /// Check that `other` can be summed with or compared to `self`.
    ///
    /// Counter count, histogram length and bin width must agree; the error
    /// names `other`'s run. Differences in instrument or date are returned as
    /// warnings.
    pub fn check_compatible(&self, other: &RunIdentity) -> Result<Vec<String>> {
        let incompatible = |message: String| MuFitError::Compatibility {
            run: other.run,
            message,
        };
        if other.counters != self.counters {
            return Err(incompatible(format!(
                "{} counters, run {} has {}",
                other.counters, self.run, self.counters
            )));
        }
        if other.length != self.length {
            return Err(incompatible(format!(
                "histogram length {} differs from {} of run {}",
                other.length, self.length, self.run
            )));
        }
        let scale = self.bin_width_ns.abs().max(other.bin_width_ns.abs());
        if (other.bin_width_ns - self.bin_width_ns).abs() > BIN_WIDTH_TOLERANCE * scale {
            return Err(incompatible(format!(
                "bin width {} ns differs from {} ns of run {}",
                other.bin_width_ns, self.bin_width_ns, self.run
            )));
        }

        let mut warnings = Vec::new();
        if other.instrument != self.instrument {
            warnings.push(format!(
                "run {} was taken on '{}', run {} on '{}'",
                other.run, other.instrument, self.run, self.instrument
            ));
        }
        if other.date != self.date && !other.date.is_empty() && !self.date.is_empty() {
            let day = |d: &str| d.split_whitespace().next().unwrap_or("").to_string();
            if day(&other.date) != day(&self.date) {
                warnings.push(format!(
                    "run {} ({}) and run {} ({}) were taken on different days",
                    other.run, other.date, self.run, self.date
                ));
            }
        }
        Ok(warnings)
    }
}

/// Counts of every counter of a run, with prompt positions and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RunHistograms {
    identity: RunIdentity,

    /// counters × bins
    counts: Array2<f64>,

    /// Integer prompt bin per counter
    t0: Vec<usize>,

    /// Prompt position minus `t0`, in bins, within [-0.5, 0.5]
    dt0: Vec<f64>,

    /// Runs summed into this one, first is the identity's run
    added: Vec<u32>,

    /// Sample temperature and its spread, K
    pub temperature: f64,
    pub temperature_error: f64,

    /// Applied field, mT
    pub field_mt: f64,
}

impl RunHistograms {
    /// Wrap raw counts.
    ///
    /// `prompt` is the (possibly fractional) prompt-peak bin of every counter.
    /// `counts` must be `counters × length`.
    pub fn new(identity: RunIdentity, counts: Array2<u32>, prompt: &[f64]) -> Result<Self> {
        let run = identity.run;
        let invalid = |message: String| {
            MuFitError::Configuration(format!("run {}: {}", run, message))
        };
        if counts.dim() != (identity.counters, identity.length) {
            return Err(invalid(format!(
                "histograms are {}×{}, expected {} counters of {} bins",
                counts.nrows(),
                counts.ncols(),
                identity.counters,
                identity.length
            )));
        }
        if prompt.len() != identity.counters {
            return Err(invalid(format!(
                "{} prompt positions for {} counters",
                prompt.len(),
                identity.counters
            )));
        }
        if !(identity.bin_width_ns > 0.0) || !identity.bin_width_ns.is_finite() {
            return Err(invalid(format!("bin width {} ns", identity.bin_width_ns)));
        }

        let mut t0 = Vec::with_capacity(prompt.len());
        let mut dt0 = Vec::with_capacity(prompt.len());
        for (counter, &x0) in prompt.iter().enumerate() {
            let nt0 = x0.round();
            if !x0.is_finite() || nt0 < 0.0 || nt0 >= identity.length as f64 {
                return Err(invalid(format!(
                    "prompt {} of counter {} is outside the histogram",
                    x0,
                    counter + 1
                )));
            }
            t0.push(nt0 as usize);
            dt0.push(x0 - nt0);
        }

        Ok(Self {
            added: vec![run],
            identity,
            counts: counts.mapv(f64::from),
            t0,
            dt0,
            temperature: 0.0,
            temperature_error: 0.0,
            field_mt: 0.0,
        })
    }

    pub fn with_temperature(mut self, temperature: f64, error: f64) -> Self {
        self.temperature = temperature;
        self.temperature_error = error;
        self
    }

    pub fn with_field(mut self, field_mt: f64) -> Self {
        self.field_mt = field_mt;
        self
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn run(&self) -> u32 {
        self.identity.run
    }

    /// Runs summed into this one.
    pub fn added(&self) -> &[u32] {
        &self.added
    }

    pub fn counts(&self) -> &Array2<f64> {
        &self.counts
    }

    pub fn counter(&self, counter: usize) -> ArrayView1<'_, f64> {
        self.counts.row(counter)
    }

    pub fn t0(&self) -> &[usize] {
        &self.t0
    }

    pub fn dt0(&self) -> &[f64] {
        &self.dt0
    }

    /// Total counts over all counters.
    pub fn total_counts(&self) -> f64 {
        self.counts.sum()
    }

    /// Sum several runs bin by bin into one effective run.
    ///
    /// Every counter is aligned on the first run's prompt bin; bins shifted
    /// beyond either end of a histogram are dropped. Temperature and field
    /// are count-weighted averages. Runs that differ in geometry or timing
    /// are rejected with an error naming them.
    pub fn add(runs: &[RunHistograms]) -> Result<RunHistograms> {
        let (first, rest) = runs.split_first().ok_or_else(|| {
            MuFitError::Configuration("no runs to add".to_string())
        })?;
        let mut sum = first.clone();
        if rest.is_empty() {
            return Ok(sum);
        }

        let mut weight = first.total_counts();
        let mut temperature = first.temperature * weight;
        let mut variance = (first.temperature_error * weight).powi(2);
        let mut field = first.field_mt * weight;

        for run in rest {
            for warning in first.identity.check_compatible(&run.identity)? {
                log::warn!("{}", warning);
            }
            let length = first.identity.length as isize;
            for counter in 0..first.identity.counters {
                let shift = run.t0[counter] as isize - first.t0[counter] as isize;
                let source = run.counts.row(counter);
                let mut target = sum.counts.row_mut(counter);
                for i in 0..length {
                    let j = i + shift;
                    if (0..length).contains(&j) {
                        target[i as usize] += source[j as usize];
                    }
                }
            }
            let w = run.total_counts();
            weight += w;
            temperature += run.temperature * w;
            variance += (run.temperature_error * w).powi(2);
            field += run.field_mt * w;
            sum.added.push(run.run());
        }

        if weight > 0.0 {
            sum.temperature = temperature / weight;
            sum.temperature_error = variance.sqrt() / weight;
            sum.field_mt = field / weight;
        }
        log::debug!("added runs {:?}", sum.added);
        Ok(sum)
    }
}

/// Supplier of raw run data.
pub trait HistogramSource {
    /// Load run number `run`.
    fn load(&self, run: u32) -> Result<RunHistograms>;
}

/// A [`HistogramSource`] over runs kept in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    runs: HashMap<u32, RunHistograms>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a run, replacing any run with the same number.
    pub fn insert(&mut self, histograms: RunHistograms) {
        self.runs.insert(histograms.run(), histograms);
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl FromIterator<RunHistograms> for MemorySource {
    fn from_iter<I: IntoIterator<Item = RunHistograms>>(iter: I) -> Self {
        let mut source = Self::new();
        for run in iter {
            source.insert(run);
        }
        source
    }
}

impl HistogramSource for MemorySource {
    fn load(&self, run: u32) -> Result<RunHistograms> {
        self.runs
            .get(&run)
            .cloned()
            .ok_or_else(|| MuFitError::Configuration(format!("run {} is not available", run)))
    }
}
