//! Parameter limits and the Minuit-style bounded-parameter transform.
//!
//! Dashboard limits are stored as a `(low, high)` pair where either side may be
//! missing. The pair `(0, 0)` is the historical sentinel for "no limit" and is
//! normalized to an unbounded range on construction. The optimizer never sees
//! limits directly: [`BoundsTransform`] maps a bounded external value onto an
//! unbounded internal coordinate and back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with parameter limits
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid limits: low ({min}) must not exceed high ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Value {value} of '{name}' is outside its limits [{min}, {max}]")]
    ValueOutsideBounds {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Infinite parameter value is not allowed")]
    InfiniteValue,
}

/// Limits on a parameter. Missing sides are stored as infinities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Lower limit, `-inf` if absent
    pub min: f64,

    /// Upper limit, `+inf` if absent
    pub max: f64,
}

impl Serialize for Bounds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Persisted as [low, high] with null for a missing side.
        let low = self.min.is_finite().then_some(self.min);
        let high = self.max.is_finite().then_some(self.max);
        (low, high).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (low, high) = <(Option<f64>, Option<f64>)>::deserialize(deserializer)?;
        Bounds::from_pair(low, high).map_err(serde::de::Error::custom)
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }
}

impl Bounds {
    /// Create limits from explicit min and max values.
    ///
    /// # Examples
    ///
    /// ```
    /// use mufit_rs::parameters::bounds::Bounds;
    ///
    /// let bounds = Bounds::new(0.0, 10.0).unwrap();
    /// assert_eq!(bounds.min, 0.0);
    /// assert!(Bounds::new(1.0, 0.0).is_err());
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if min > max {
            return Err(BoundsError::InvalidBounds { min, max });
        }

        Ok(Self { min, max })
    }

    /// Create limits from a dashboard `(low, high)` pair.
    ///
    /// `None` on either side means no limit on that side, and `(0, 0)` means
    /// no limits at all.
    ///
    /// # Examples
    ///
    /// ```
    /// use mufit_rs::parameters::bounds::Bounds;
    ///
    /// assert!(Bounds::from_pair(Some(0.0), Some(0.0)).unwrap().is_unbounded());
    /// assert!(Bounds::from_pair(Some(0.0), None).unwrap().has_lower_bound());
    /// ```
    pub fn from_pair(low: Option<f64>, high: Option<f64>) -> Result<Self, BoundsError> {
        if low == Some(0.0) && high == Some(0.0) {
            return Ok(Self::unbounded());
        }
        Self::new(
            low.unwrap_or(f64::NEG_INFINITY),
            high.unwrap_or(f64::INFINITY),
        )
    }

    /// Unbounded limits.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Limits with only a lower side, as used for positive-definite parameters.
    pub fn min_only(min: f64) -> Self {
        Self {
            min,
            max: f64::INFINITY,
        }
    }

    /// Limits with only an upper side.
    pub fn max_only(max: f64) -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max,
        }
    }

    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn has_lower_bound(&self) -> bool {
        self.min.is_finite()
    }

    pub fn has_upper_bound(&self) -> bool {
        self.max.is_finite()
    }

    /// True when neither side is limited.
    pub fn is_unbounded(&self) -> bool {
        !self.has_lower_bound() && !self.has_upper_bound()
    }

    /// The `(low, high)` pair handed to an optimizer, `None` meaning no limit.
    pub fn as_pair(&self) -> (Option<f64>, Option<f64>) {
        (
            self.has_lower_bound().then_some(self.min),
            self.has_upper_bound().then_some(self.max),
        )
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Minuit-style transform between a bounded external value and an unbounded
/// internal coordinate.
///
/// Lower limit only: `x = min - 1 + sqrt(u^2 + 1)`.
/// Upper limit only: `x = max + 1 - sqrt(u^2 + 1)`.
/// Both limits: `x = min + (sin(u) + 1) (max - min) / 2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsTransform {
    bounds: Bounds,
}

impl BoundsTransform {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Map an internal coordinate to the external (physical) value.
    pub fn to_external(&self, internal_value: f64) -> f64 {
        let b = &self.bounds;
        match (b.has_lower_bound(), b.has_upper_bound()) {
            (false, false) => internal_value,
            (true, false) => b.min - 1.0 + (internal_value * internal_value + 1.0).sqrt(),
            (false, true) => b.max + 1.0 - (internal_value * internal_value + 1.0).sqrt(),
            (true, true) => b.min + (internal_value.sin() + 1.0) * (b.max - b.min) / 2.0,
        }
    }

    /// Map an external value to the internal coordinate.
    ///
    /// `name` only labels the error when the value lies outside the limits.
    pub fn to_internal(&self, name: &str, external_value: f64) -> Result<f64, BoundsError> {
        if !external_value.is_finite() {
            return Err(BoundsError::InfiniteValue);
        }

        let b = &self.bounds;
        if !b.is_within_bounds(external_value) {
            return Err(BoundsError::ValueOutsideBounds {
                name: name.to_string(),
                value: external_value,
                min: b.min,
                max: b.max,
            });
        }

        Ok(match (b.has_lower_bound(), b.has_upper_bound()) {
            (false, false) => external_value,
            (true, false) => ((external_value - b.min + 1.0).powi(2) - 1.0).sqrt(),
            (false, true) => ((b.max - external_value + 1.0).powi(2) - 1.0).sqrt(),
            (true, true) => {
                let scaled = 2.0 * (external_value - b.min) / (b.max - b.min) - 1.0;
                scaled.clamp(-1.0, 1.0).asin()
            }
        })
    }

    /// Derivative `dx/du` of the external value with respect to the internal coordinate.
    pub fn derivative(&self, internal_value: f64) -> f64 {
        let b = &self.bounds;
        let u = internal_value;
        match (b.has_lower_bound(), b.has_upper_bound()) {
            (false, false) => 1.0,
            (true, false) => u / (u * u + 1.0).sqrt(),
            (false, true) => -u / (u * u + 1.0).sqrt(),
            (true, true) => u.cos() * (b.max - b.min) / 2.0,
        }
    }
}
