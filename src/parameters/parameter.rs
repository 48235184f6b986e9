//! Parameter definition
//!
//! A [`Parameter`] is one named entry of a dashboard component: its value, its
//! step/error, optional limits, a [`Flag`] telling the resolver whether the
//! optimizer varies it, holds it, or never sees it, and the formula used when
//! the flag is [`Flag::Computed`].

use crate::parameters::bounds::{Bounds, BoundsError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when working with parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Parameter '{name}' is COMPUTED but has an empty formula")]
    EmptyFormula { name: String },

    #[error("Parameter '{name}' has group formulas but is not COMPUTED")]
    GroupFormulaNotComputed { name: String },

    #[error("Parameter '{name}' has a non-finite value")]
    NonFiniteValue { name: String },

    #[error("Unknown parameter flag '{flag}'")]
    UnknownFlag { flag: String },

    #[error("Parameter '{name}' not found")]
    NotFound { name: String },

    #[error("Limits error: {0}")]
    BoundsError(#[from] BoundsError),
}

/// How the resolver treats a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    /// Varied by the optimizer.
    #[default]
    Free,
    /// Passed to the optimizer but held constant.
    Fixed,
    /// Derived from other parameters by a formula; not an optimizer slot.
    Computed,
}

impl Flag {
    /// One-character dashboard symbol: `~` free, `!` fixed, `=` computed.
    pub fn symbol(self) -> char {
        match self {
            Flag::Free => '~',
            Flag::Fixed => '!',
            Flag::Computed => '=',
        }
    }

    /// True for FREE and FIXED, the flags that own an optimizer slot.
    pub fn has_slot(self) -> bool {
        !matches!(self, Flag::Computed)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flag::Free => "free",
            Flag::Fixed => "fixed",
            Flag::Computed => "computed",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Flag {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "~" | "free" | "FREE" => Ok(Flag::Free),
            "!" | "fixed" | "FIXED" => Ok(Flag::Fixed),
            "=" | "computed" | "COMPUTED" => Ok(Flag::Computed),
            other => Err(ParameterError::UnknownFlag {
                flag: other.to_string(),
            }),
        }
    }
}

/// One named parameter of a dashboard component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Unique name, base name plus component label (e.g. `λb`)
    pub name: String,

    /// Current value (guess before a fit, best fit after it)
    pub value: f64,

    /// Initial step before a fit, parameter error after it
    pub error: f64,

    /// Limits; unbounded unless set
    #[serde(default)]
    pub limits: Bounds,

    /// FREE, FIXED or COMPUTED
    #[serde(default)]
    pub flag: Flag,

    /// Formula text, only meaningful for COMPUTED parameters
    #[serde(default)]
    pub formula: String,

    /// One formula per detector group, replacing `formula` in multigroup fits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_formulas: Vec<String>,

    /// Values of every group after a fit, for parameters with group formulas
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_values: Vec<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_errors: Vec<f64>,

    /// Own optimizer slot for every run of a global suite fit
    #[serde(default)]
    pub local: bool,

    /// Plot panel this parameter is drawn in by reporting collaborators
    #[serde(default)]
    pub plot_panel: u32,
}

impl Parameter {
    /// Create a FREE, unbounded parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// use mufit_rs::parameters::parameter::{Flag, Parameter};
    ///
    /// let param = Parameter::new("Aa", 0.2);
    /// assert_eq!(param.value, 0.2);
    /// assert_eq!(param.flag, Flag::Free);
    /// assert!(param.formula.is_empty());
    /// ```
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            error: 0.0,
            limits: Bounds::unbounded(),
            flag: Flag::Free,
            formula: String::new(),
            group_formulas: Vec::new(),
            group_values: Vec::new(),
            group_errors: Vec::new(),
            local: false,
            plot_panel: 0,
        }
    }

    /// Builder-style setter for the initial step/error.
    pub fn with_error(mut self, error: f64) -> Self {
        self.error = error;
        self
    }

    /// Builder-style setter for the limits.
    pub fn with_limits(mut self, limits: Bounds) -> Self {
        self.limits = limits;
        self
    }

    /// Mark the parameter FIXED at its current value.
    pub fn fixed(mut self) -> Self {
        self.flag = Flag::Fixed;
        self
    }

    /// Mark the parameter COMPUTED from `formula`.
    pub fn computed(mut self, formula: &str) -> Self {
        self.flag = Flag::Computed;
        self.formula = formula.to_string();
        self
    }

    /// Mark the parameter COMPUTED from one formula per detector group.
    pub fn computed_per_group(mut self, formulas: &[&str]) -> Self {
        self.flag = Flag::Computed;
        self.formula.clear();
        self.group_formulas = formulas.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Give the parameter its own slot for every run of a global fit.
    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    /// Formula of detector group `g`.
    pub fn formula_for(&self, g: usize) -> &str {
        self.group_formulas
            .get(g)
            .map(String::as_str)
            .unwrap_or(&self.formula)
    }

    /// Formula text as reported: the formula, or the group formulas
    /// separated by `;`.
    pub fn formula_text(&self) -> String {
        if self.group_formulas.is_empty() {
            self.formula.clone()
        } else {
            self.group_formulas.join("; ")
        }
    }

    pub fn is_free(&self) -> bool {
        self.flag == Flag::Free
    }

    pub fn is_fixed(&self) -> bool {
        self.flag == Flag::Fixed
    }

    pub fn is_computed(&self) -> bool {
        self.flag == Flag::Computed
    }

    /// Check the local consistency of the parameter.
    ///
    /// Formula references are checked later by the resolver, which knows
    /// the parameter's position in the dashboard.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if !self.value.is_finite() || !self.error.is_finite() {
            return Err(ParameterError::NonFiniteValue {
                name: self.name.clone(),
            });
        }
        if !self.group_formulas.is_empty() && !self.is_computed() {
            return Err(ParameterError::GroupFormulaNotComputed {
                name: self.name.clone(),
            });
        }
        let empty = if self.group_formulas.is_empty() {
            self.formula.trim().is_empty()
        } else {
            self.group_formulas.iter().any(|f| f.trim().is_empty())
        };
        if self.is_computed() && empty {
            return Err(ParameterError::EmptyFormula {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}
