//! Chi-square objective over asymmetry data

use crate::asymmetry::engine::AsymmetryResult;
use crate::error::{MuFitError, Result};
use crate::parameters::resolver::{evaluate_model, ComponentBinding};
use ndarray::{s, Array1, Array2, Axis, Ix1, Ix2, Ix3};

/// What a minimizer needs from a fit.
pub trait Objective: Send + Sync {
    /// Normalized residuals `(A - model)/σ` for the optimizer vector `x`.
    ///
    /// Model values that cannot be computed give non-finite residuals rather
    /// than an error, so that a minimizer can reject the step.
    fn residuals(&self, x: &[f64]) -> Result<Array1<f64>>;

    /// Number of residuals.
    fn bins(&self) -> usize;

    /// Sum of squared residuals.
    fn chi_square(&self, x: &[f64]) -> Result<f64> {
        Ok(self.residuals(x)?.iter().map(|r| r * r).sum())
    }
}

/// Data of one fit: rows are detector groups sharing a time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct FitData {
    /// Raw runs summed into this data set
    pub runs: Vec<u32>,
    pub time: Array1<f64>,
    /// groups × bins
    pub asymmetry: Array2<f64>,
    pub error: Array2<f64>,
    /// α of every group
    pub alphas: Vec<f64>,
}

impl FitData {
    /// Check shapes and errors.
    pub fn new(
        runs: Vec<u32>,
        time: Array1<f64>,
        asymmetry: Array2<f64>,
        error: Array2<f64>,
        alphas: Vec<f64>,
    ) -> Result<Self> {
        if asymmetry.dim() != error.dim()
            || asymmetry.ncols() != time.len()
            || asymmetry.nrows() != alphas.len()
        {
            return Err(MuFitError::DimensionMismatch(format!(
                "runs {:?}: {} times, asymmetry {:?}, error {:?}, {} alphas",
                runs,
                time.len(),
                asymmetry.dim(),
                error.dim(),
                alphas.len()
            )));
        }
        if error.iter().any(|e| !(*e > 0.0) || !e.is_finite()) {
            return Err(MuFitError::Numerical(format!(
                "runs {:?}: asymmetry errors must be positive",
                runs
            )));
        }
        Ok(Self {
            runs,
            time,
            asymmetry,
            error,
            alphas,
        })
    }

    pub fn single(run: u32, result: AsymmetryResult<Ix1>, alpha: f64) -> Result<Self> {
        Self::new(
            vec![run],
            result.time,
            result.asymmetry.insert_axis(Axis(0)),
            result.error.insert_axis(Axis(0)),
            vec![alpha],
        )
    }

    /// Groups of one run, fitted together.
    pub fn multigroup(run: u32, result: AsymmetryResult<Ix2>, alphas: Vec<f64>) -> Result<Self> {
        Self::new(vec![run], result.time, result.asymmetry, result.error, alphas)
    }

    /// One data set per run of a suite, each with all groups.
    pub fn suite(runs: &[u32], result: &AsymmetryResult<Ix3>, alphas: &[f64]) -> Result<Vec<Self>> {
        if runs.len() != result.asymmetry.len_of(Axis(0)) {
            return Err(MuFitError::DimensionMismatch(format!(
                "{} run numbers for {} asymmetry rows",
                runs.len(),
                result.asymmetry.len_of(Axis(0))
            )));
        }
        runs.iter()
            .enumerate()
            .map(|(r, &run)| {
                Self::new(
                    vec![run],
                    result.time.clone(),
                    result.asymmetry.index_axis(Axis(0), r).to_owned(),
                    result.error.index_axis(Axis(0), r).to_owned(),
                    alphas.to_vec(),
                )
            })
            .collect()
    }

    /// Restrict to bins `[first, last)`; `last` defaults to the end.
    pub fn window(&self, first: usize, last: Option<usize>) -> Result<Self> {
        let last = last.unwrap_or(self.time.len()).min(self.time.len());
        if first >= last {
            return Err(MuFitError::Configuration(format!(
                "fit range [{}, {}) of runs {:?} is empty",
                first, last, self.runs
            )));
        }
        Ok(Self {
            runs: self.runs.clone(),
            time: self.time.slice(s![first..last]).to_owned(),
            asymmetry: self.asymmetry.slice(s![.., first..last]).to_owned(),
            error: self.error.slice(s![.., first..last]).to_owned(),
            alphas: self.alphas.clone(),
        })
    }

    /// Number of data points.
    pub fn bins(&self) -> usize {
        self.asymmetry.len()
    }

    /// Number of detector groups.
    pub fn groups(&self) -> usize {
        self.asymmetry.nrows()
    }
}

/// Sum of the bound model components against every row of a [`FitData`].
///
/// Every detector group has its own bindings, so that component parameters
/// given by group formulas can differ between rows.
#[derive(Debug, Clone)]
pub struct AsymmetryObjective {
    bindings: Vec<Vec<ComponentBinding>>,
    data: FitData,
}

impl AsymmetryObjective {
    /// Objective with the same bindings for every group.
    pub fn new(bindings: Vec<ComponentBinding>, data: FitData) -> Self {
        Self {
            bindings: vec![bindings; data.groups()],
            data,
        }
    }

    /// Objective with one set of bindings per group.
    pub fn per_group(bindings: Vec<Vec<ComponentBinding>>, data: FitData) -> Result<Self> {
        if bindings.len() != data.groups() {
            return Err(MuFitError::DimensionMismatch(format!(
                "runs {:?}: {} group bindings for {} groups",
                data.runs,
                bindings.len(),
                data.groups()
            )));
        }
        Ok(Self { bindings, data })
    }

    pub fn data(&self) -> &FitData {
        &self.data
    }

    /// Model of group `g` at the data times.
    pub fn model(&self, x: &[f64], g: usize) -> Result<Array1<f64>> {
        evaluate_model(&self.bindings[g], &self.data.time, x, self.data.alphas[g])
    }
}

impl Objective for AsymmetryObjective {
    fn residuals(&self, x: &[f64]) -> Result<Array1<f64>> {
        let mut residuals = Array1::zeros(self.bins());
        let n = self.data.time.len();
        for g in 0..self.data.groups() {
            let mut row = residuals.slice_mut(s![g * n..(g + 1) * n]);
            match self.model(x, g) {
                Ok(model) => {
                    let a = self.data.asymmetry.row(g);
                    let e = self.data.error.row(g);
                    row.assign(&((&a - &model) / &e));
                }
                Err(MuFitError::Numerical(message)) => {
                    log::debug!("model not computable: {}", message);
                    row.fill(f64::NAN);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(residuals)
    }

    fn bins(&self) -> usize {
        self.data.bins()
    }
}

/// Several data sets fitted with one optimizer vector, residuals stacked
/// in data set order.
#[derive(Debug, Clone)]
pub struct GlobalObjective {
    parts: Vec<AsymmetryObjective>,
}

impl GlobalObjective {
    pub fn new(parts: Vec<AsymmetryObjective>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[AsymmetryObjective] {
        &self.parts
    }
}

impl Objective for GlobalObjective {
    fn residuals(&self, x: &[f64]) -> Result<Array1<f64>> {
        let mut residuals = Array1::zeros(self.bins());
        let mut first = 0;
        for part in &self.parts {
            let r = part.residuals(x)?;
            residuals.slice_mut(s![first..first + r.len()]).assign(&r);
            first += r.len();
        }
        Ok(residuals)
    }

    fn bins(&self) -> usize {
        self.parts.iter().map(Objective::bins).sum()
    }
}
