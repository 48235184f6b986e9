//! # Lineshape components
//!
//! Every fit component implements [`Lineshape`]: a two-letter code, a parameter
//! template, and `eval(t, p)` returning the component's contribution to the
//! asymmetry at times `t` (μs). A [`Registry`] maps codes to components; the
//! default registry holds the built-in muSR lineshapes:
//!
//! | code | parameters | shape |
//! |------|------------|-------|
//! | `da` | dα | linearized α correction applied to the summed model |
//! | `bl` | A, λ | `A exp(-λt)` |
//! | `bg` | A, σ | `A exp(-(σt)²/2)` |
//! | `ba` | A, λ, σ | `bl × bg` |
//! | `bs` | A, Λ, β | `A exp(-(Λt)^β)` |
//! | `ml` | A, B, φ, λ | `A cos(2πγBt + φ) exp(-λt)` |
//! | `mg` | A, B, φ, σ | precession × Gaussian |
//! | `mu` | A, B, φ, λ, σ | precession × Lorentzian × Gaussian |
//! | `ms` | A, B, φ, Λ, β | precession × stretched |
//! | `fm` | A, B, λ | F-μ-F powder pattern × Lorentzian |
//! | `jl` | A, B, φ, λ | `A j0(2πγBt + φ) exp(-λt)` |
//! | `jg` | A, B, φ, σ | `A j0(2πγBt + φ) exp(-(σt)²/2)` |
//! | `kg` | A, BL, Δ | static Gaussian Kubo-Toyabe in longitudinal field |
//! | `kl` | A, BL, Γ | static Lorentzian Kubo-Toyabe in longitudinal field |
//! | `kd` | A, Δ, λ | zero-field Gaussian KT × Lorentzian |
//! | `ks` | A, Δ, Λ, β | zero-field Gaussian KT × stretched |
//!
//! Fields are in mT, rates in μs⁻¹, phases in degrees.

pub mod kubo_toyabe;
pub mod precession;
pub mod relaxation;

use crate::parameters::bounds::Bounds;
use ndarray::Array1;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Muon gyromagnetic ratio over 2π, MHz/mT.
pub const GAMMA_MU_MHZ_PER_MT: f64 = 0.135538817;

/// Muon mean lifetime, μs.
pub const TAU_MU_US: f64 = 2.1969811;

/// Degrees to radians.
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Default step for parameters without a specific one.
pub(crate) const DEFAULT_STEP: f64 = 0.002;

/// Template for one parameter of a component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterTemplate {
    /// Base name, suffixed with the component label in the dashboard
    pub base: &'static str,

    /// Initial optimizer step
    pub step: f64,

    /// Lower limit, if any
    pub low: Option<f64>,
}

impl ParameterTemplate {
    /// Template with the default step and no limits.
    pub const fn new(base: &'static str) -> Self {
        Self {
            base,
            step: DEFAULT_STEP,
            low: None,
        }
    }

    /// Template for a positive-definite or positive-parity parameter.
    pub const fn positive(base: &'static str) -> Self {
        Self {
            base,
            step: DEFAULT_STEP,
            low: Some(0.0),
        }
    }

    pub const fn with_step(self, step: f64) -> Self {
        Self {
            base: self.base,
            step,
            low: self.low,
        }
    }

    pub fn limits(&self) -> Bounds {
        match self.low {
            Some(low) => Bounds::min_only(low),
            None => Bounds::unbounded(),
        }
    }
}

/// Amplitude.
pub(crate) const AMPLITUDE: ParameterTemplate = ParameterTemplate::new("A");
/// Field, mT.
pub(crate) const FIELD: ParameterTemplate = ParameterTemplate::new("B").with_step(0.05);
/// Longitudinal field, mT.
pub(crate) const LONGITUDINAL_FIELD: ParameterTemplate = ParameterTemplate::new("BL").with_step(0.05);
/// Phase, degrees.
pub(crate) const PHASE: ParameterTemplate = ParameterTemplate::new("φ").with_step(1.0);
pub(crate) const LORENTZ_RATE: ParameterTemplate = ParameterTemplate::new("λ");
pub(crate) const GAUSS_RATE: ParameterTemplate = ParameterTemplate::positive("σ");
pub(crate) const STRETCHED_RATE: ParameterTemplate = ParameterTemplate::positive("Λ");
pub(crate) const STRETCH_EXPONENT: ParameterTemplate = ParameterTemplate::positive("β");
pub(crate) const KT_WIDTH: ParameterTemplate = ParameterTemplate::positive("Δ");
pub(crate) const KT_LORENTZ_WIDTH: ParameterTemplate = ParameterTemplate::new("Γ");

/// A fit component: a named function of time and of its own parameters.
pub trait Lineshape: Send + Sync {
    /// Two-letter code used in model strings.
    fn code(&self) -> &'static str;

    /// Human-readable formula.
    fn description(&self) -> &'static str;

    /// Parameter templates, in evaluation order.
    fn parameters(&self) -> &'static [ParameterTemplate];

    /// Contribution at times `t`; `p` holds exactly `parameters().len()` values.
    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64>;

    /// True for the α-correction pseudo-component, which modifies the summed
    /// model instead of adding to it.
    fn corrects_alpha(&self) -> bool {
        false
    }
}

impl fmt::Debug for dyn Lineshape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lineshape({})", self.code())
    }
}

/// Linearized α correction, `da`.
///
/// With `q = dα/α` the summed model `f` becomes
/// `((2 + q) f - q) / ((2 + q) - q f)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaCorrection;

const ALPHA_CORRECTION: [ParameterTemplate; 1] = [ParameterTemplate::new("dα").with_step(0.01)];

impl AlphaCorrection {
    /// Apply the correction with `dalpha` to the summed model `f`.
    pub fn apply(f: &mut Array1<f64>, dalpha: f64, alpha: f64) {
        if alpha == 0.0 || dalpha == 0.0 {
            return;
        }
        let q = dalpha / alpha;
        f.mapv_inplace(|v| ((2.0 + q) * v - q) / ((2.0 + q) - q * v));
    }
}

impl Lineshape for AlphaCorrection {
    fn code(&self) -> &'static str {
        "da"
    }

    fn description(&self) -> &'static str {
        "linearized alpha correction: ((2+q)f - q)/((2+q) - qf), q = dα/α"
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        &ALPHA_CORRECTION
    }

    fn eval(&self, t: &Array1<f64>, _p: &[f64]) -> Array1<f64> {
        Array1::zeros(t.len())
    }

    fn corrects_alpha(&self) -> bool {
        true
    }
}

/// Map from component code to lineshape.
#[derive(Clone)]
pub struct Registry {
    components: BTreeMap<&'static str, Arc<dyn Lineshape>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.components.keys()).finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    /// Empty registry.
    pub fn empty() -> Self {
        Self {
            components: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in lineshape.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(AlphaCorrection));
        relaxation::register(&mut registry);
        precession::register(&mut registry);
        kubo_toyabe::register(&mut registry);
        registry
    }

    /// Add or replace a component.
    pub fn register(&mut self, lineshape: Arc<dyn Lineshape>) {
        self.components.insert(lineshape.code(), lineshape);
    }

    pub fn get(&self, code: &str) -> Option<Arc<dyn Lineshape>> {
        self.components.get(code).cloned()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.components.contains_key(code)
    }

    /// Registered codes, sorted.
    pub fn codes(&self) -> Vec<&'static str> {
        self.components.keys().copied().collect()
    }
}
