//! Fit reports

use crate::parameters::dashboard::Dashboard;
use crate::parameters::parameter::Flag;
use crate::parameters::resolver::ParameterResolver;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Render `value(error)` with one significant digit of error.
///
/// # Examples
///
/// ```
/// use mufit_rs::fit::format_value_error;
///
/// assert_eq!(format_value_error(1.2341, 0.005), "1.234(5)");
/// assert_eq!(format_value_error(0.0962, 0.0096), "0.10(1)");
/// assert_eq!(format_value_error(123.4, 12.0), "120(10)");
/// ```
pub fn format_value_error(value: f64, error: f64) -> String {
    if !(error > 0.0) || !error.is_finite() || !value.is_finite() {
        return format!("{}", value);
    }
    let mut digits = -error.log10().floor() as i32;
    let mut leading = (error * 10f64.powi(digits)).round();
    if leading >= 10.0 {
        digits -= 1;
        leading = (error * 10f64.powi(digits)).round();
    }
    if digits > 0 {
        format!("{:.*}({})", digits as usize, value, leading)
    } else {
        let scale = 10f64.powi(-digits);
        format!("{:.0}({:.0})", (value / scale).round() * scale, leading * scale)
    }
}

/// One dashboard parameter in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterLine {
    pub nint: usize,
    pub name: String,
    pub flag: Flag,

    /// Optimizer slot, `None` for COMPUTED parameters
    pub nmin: Option<usize>,

    /// Formula text of COMPUTED parameters
    pub formula: String,

    pub value: f64,
    pub error: f64,

    /// Value and error of every detector group, when they differ
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_errors: Vec<f64>,
}

/// Best fit of one data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Raw runs of the data set
    pub runs: Vec<u32>,
    pub parameters: Vec<ParameterLine>,
    pub chi_square: f64,
    pub dof: usize,
    pub valid: bool,
    pub message: String,
}

impl FitReport {
    /// Collect the parameters of `dashboard`, already updated by `min2int`
    /// for run `run` of the resolution.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runs: Vec<u32>,
        dashboard: &Dashboard,
        resolver: &ParameterResolver,
        run: usize,
        chi_square: f64,
        dof: usize,
        valid: bool,
        message: String,
    ) -> Self {
        let parameters = dashboard
            .iter()
            .map(|(nint, p)| ParameterLine {
                nint,
                name: p.name.clone(),
                flag: p.flag,
                nmin: resolver.run_slot(run, nint),
                formula: p.formula_text(),
                value: p.value,
                error: p.error,
                group_values: p.group_values.clone(),
                group_errors: p.group_errors.clone(),
            })
            .collect();
        Self {
            runs,
            parameters,
            chi_square,
            dof,
            valid,
            message,
        }
    }

    pub fn reduced_chi_square(&self) -> f64 {
        self.chi_square / self.dof as f64
    }

    /// Line of the parameter called `name`.
    pub fn parameter(&self, name: &str) -> Option<&ParameterLine> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for FitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let runs: Vec<String> = self.runs.iter().map(u32::to_string).collect();
        writeln!(
            f,
            "Run {}: χ² = {:.2}, dof = {}, χ²/dof = {:.3}{}",
            runs.join("+"),
            self.chi_square,
            self.dof,
            self.reduced_chi_square(),
            if self.valid { "" } else { " (INVALID)" }
        )?;
        for p in &self.parameters {
            let index = match (p.flag, p.nmin) {
                (Flag::Computed, _) | (_, None) => format!("= {}", p.formula),
                (_, Some(m)) => format!("{} {}", p.flag.symbol(), m),
            };
            writeln!(
                f,
                "  {:>3} {:<8} {:<16} {}",
                p.nint,
                p.name,
                format_value_error(p.value, p.error),
                index
            )?;
            if !p.group_values.is_empty() {
                let groups: Vec<String> = p
                    .group_values
                    .iter()
                    .zip(&p.group_errors)
                    .map(|(v, e)| format_value_error(*v, *e))
                    .collect();
                writeln!(f, "      groups: {}", groups.join(", "))?;
            }
        }
        if !self.valid {
            writeln!(f, "  {}", self.message)?;
        }
        Ok(())
    }
}
