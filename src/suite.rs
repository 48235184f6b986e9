//! Run suites
//!
//! A [`Suite`] is the ordered list of effective runs analysed together. Each
//! entry may itself be the sum of several raw runs. All entries share the
//! counter count, histogram length and bin width of the first one; a run that
//! does not is rejected while the entries already loaded are kept.

use crate::asymmetry::histogram::{HistogramSource, RunHistograms};
use crate::error::{MuFitError, Result};
use serde::{Deserialize, Serialize};

/// Relative spread above which a temperature or field is considered scanned.
const SCAN_THRESHOLD: f64 = 1e-3;

/// Parse a run list into suite entries, each a list of runs to add.
///
/// Items are separated by commas or whitespace: `l` is one run, `l:m` the
/// inclusive range, `l:m:-1` the same range in reverse order and `l+m+n` a
/// single entry summing the listed runs.
///
/// # Examples
///
/// ```
/// use mufit_rs::suite::parse_run_list;
///
/// assert_eq!(parse_run_list("5, 7:9").unwrap(), vec![vec![5], vec![7], vec![8], vec![9]]);
/// assert!(parse_run_list("3:1").is_err());
/// assert_eq!(parse_run_list("1:3:-1").unwrap(), vec![vec![3], vec![2], vec![1]]);
/// assert_eq!(parse_run_list("4+6 8").unwrap(), vec![vec![4, 6], vec![8]]);
/// ```
pub fn parse_run_list(list: &str) -> Result<Vec<Vec<u32>>> {
    let invalid = |item: &str| {
        MuFitError::Configuration(format!("cannot read '{}' in run list '{}'", item, list))
    };
    let number = |item: &str, text: &str| text.trim().parse::<u32>().map_err(|_| invalid(item));

    let mut entries = Vec::new();
    for item in list
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
    {
        if item.contains('+') {
            let runs = item
                .split('+')
                .map(|r| number(item, r))
                .collect::<Result<Vec<_>>>()?;
            entries.push(runs);
            continue;
        }

        let parts: Vec<&str> = item.split(':').collect();
        match parts.as_slice() {
            [run] => entries.push(vec![number(item, *run)?]),
            [low, high] | [low, high, _] => {
                let (low, high) = (number(item, *low)?, number(item, *high)?);
                if low > high {
                    return Err(invalid(item));
                }
                let reversed = match parts.get(2) {
                    None => false,
                    Some(step) if step.trim() == "-1" => true,
                    Some(_) => return Err(invalid(item)),
                };
                if reversed {
                    entries.extend((low..=high).rev().map(|r| vec![r]));
                } else {
                    entries.extend((low..=high).map(|r| vec![r]));
                }
            }
            _ => return Err(invalid(item)),
        }
    }
    if entries.is_empty() {
        return Err(MuFitError::Configuration(format!(
            "run list '{}' selects no runs",
            list
        )));
    }
    Ok(entries)
}

/// What changes along a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    /// Fewer than two entries
    Single,
    Temperature,
    Field,
    /// Both or neither
    Generic,
}

/// Ordered effective runs.
#[derive(Debug, Clone, Default)]
pub struct Suite {
    runs: Vec<RunHistograms>,
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Effective runs in suite order.
    pub fn runs(&self) -> &[RunHistograms] {
        &self.runs
    }

    /// Run numbers of the first raw run of every entry.
    pub fn run_numbers(&self) -> Vec<u32> {
        self.runs.iter().map(RunHistograms::run).collect()
    }

    /// Sum `runs` into one entry and append it.
    ///
    /// Fails, leaving the suite unchanged, if the runs cannot be summed or the
    /// sum is incompatible with the first entry.
    pub fn try_add(&mut self, runs: &[RunHistograms]) -> Result<()> {
        let entry = RunHistograms::add(runs)?;
        if let Some(first) = self.runs.first() {
            for warning in first.identity().check_compatible(entry.identity())? {
                log::warn!("{}", warning);
            }
            if first.t0() != entry.t0() {
                log::warn!(
                    "run {} has prompt bins {:?}, run {} {:?}",
                    entry.run(),
                    entry.t0(),
                    first.run(),
                    first.t0()
                );
            }
        }
        log::info!(
            "loaded run {:?}, {} counts",
            entry.added(),
            entry.total_counts()
        );
        self.runs.push(entry);
        Ok(())
    }

    /// Load every entry of `list` from `source`.
    ///
    /// A run that cannot be loaded or added is rejected and its error
    /// returned; the remaining entries are still loaded. Only an unreadable
    /// run list fails as a whole.
    pub fn load(&mut self, source: &dyn HistogramSource, list: &str) -> Result<Vec<MuFitError>> {
        let mut rejected = Vec::new();
        for entry in parse_run_list(list)? {
            let loaded = entry
                .iter()
                .map(|&run| source.load(run))
                .collect::<Result<Vec<_>>>()
                .and_then(|runs| self.try_add(&runs));
            if let Err(err) = loaded {
                log::warn!("rejected {:?}: {}", entry, err);
                rejected.push(err);
            }
        }
        Ok(rejected)
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.runs.clear();
    }

    /// Classify the suite by what varies between entries.
    pub fn scan(&self) -> ScanKind {
        if self.runs.len() < 2 {
            return ScanKind::Single;
        }
        let varies = |values: Vec<f64>| {
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let scale = min.abs().max(max.abs());
            scale > 0.0 && (max - min) > SCAN_THRESHOLD * scale
        };
        let temperature = varies(self.runs.iter().map(|r| r.temperature).collect());
        let field = varies(self.runs.iter().map(|r| r.field_mt).collect());
        match (temperature, field) {
            (true, false) => ScanKind::Temperature,
            (false, true) => ScanKind::Field,
            _ => ScanKind::Generic,
        }
    }

    /// Count-weighted temperature of entry `k` and its error.
    pub fn temperature(&self, k: usize) -> Option<(f64, f64)> {
        self.runs
            .get(k)
            .map(|r| (r.temperature, r.temperature_error))
    }
}
