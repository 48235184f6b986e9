//! Static Kubo-Toyabe relaxation functions.
//!
//! The longitudinal-field forms have no closed expression; their time
//! integrals are evaluated with composite Simpson quadrature, the number of
//! intervals scaling with the number of oscillations and widths covered.

use super::relaxation::{lorentz, stretched};
use super::{
    Lineshape, ParameterTemplate, Registry, AMPLITUDE, GAMMA_MU_MHZ_PER_MT, KT_LORENTZ_WIDTH,
    KT_WIDTH, LONGITUDINAL_FIELD, LORENTZ_RATE, STRETCHED_RATE, STRETCH_EXPONENT,
};
use ndarray::Array1;
use std::f64::consts::PI;
use std::sync::Arc;

const MIN_INTERVALS: usize = 8;
const MAX_INTERVALS: usize = 4000;
const INTERVALS_PER_UNIT: f64 = 10.0;

/// Below this `ωτ` the integrands switch to their series.
const SERIES_THRESHOLD: f64 = 1e-2;

/// Composite Simpson rule on `[0, t]`, `n` rounded up to even.
fn simpson<F: Fn(f64) -> f64>(f: F, t: f64, n: usize) -> f64 {
    let n = if n % 2 == 0 { n } else { n + 1 };
    let h = t / n as f64;
    let mut sum = f(0.0) + f(t);
    for i in 1..n {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(i as f64 * h);
    }
    sum * h / 3.0
}

fn intervals(t: f64, scale: f64) -> usize {
    let n = (t.abs() * scale * INTERVALS_PER_UNIT).ceil();
    if n.is_finite() {
        (n as usize).clamp(MIN_INTERVALS, MAX_INTERVALS)
    } else {
        MAX_INTERVALS
    }
}

/// Zero-field static Gaussian Kubo-Toyabe.
pub fn gaussian_zf(t: f64, delta: f64) -> f64 {
    let x = (delta * t).powi(2);
    1.0 / 3.0 + 2.0 / 3.0 * (1.0 - x) * (-0.5 * x).exp()
}

/// Zero-field static Lorentzian Kubo-Toyabe.
pub fn lorentzian_zf(t: f64, gamma: f64) -> f64 {
    let x = gamma * t;
    1.0 / 3.0 + 2.0 / 3.0 * (1.0 - x) * (-x).exp()
}

/// Static Gaussian Kubo-Toyabe in a longitudinal field, `omega` in rad/μs.
///
/// The closed part `1 - (2Δ²/ω²)(1 - e^{-Δ²t²/2} cos ωt)` and the integral
/// `(2Δ⁴/ω³) ∫ e^{-Δ²τ²/2} sin ωτ dτ` cancel to leading order for small `ω`,
/// so both are folded into a single integral of the time derivative.
pub fn gaussian_lf(t: f64, delta: f64, omega: f64) -> f64 {
    if omega == 0.0 {
        return gaussian_zf(t, delta);
    }
    let d2 = delta * delta;
    let derivative = |tau: f64| {
        let x = omega * tau;
        let bracket = if x.abs() < SERIES_THRESHOLD {
            let x2 = x * x;
            2.0 * d2 * d2 * tau.powi(3) * (1.0 / 3.0 - x2 / 30.0) - 2.0 * d2 * tau * (1.0 - x2 / 6.0)
        } else {
            2.0 * d2 * d2 * (x.sin() - x * x.cos()) / omega.powi(3) - 2.0 * d2 * x.sin() / omega
        };
        (-0.5 * d2 * tau * tau).exp() * bracket
    };
    1.0 + simpson(derivative, t, intervals(t, omega.abs() + delta.abs()))
}

/// Static Lorentzian Kubo-Toyabe in a longitudinal field, `omega` in rad/μs.
pub fn lorentzian_lf(t: f64, gamma: f64, omega: f64) -> f64 {
    if omega == 0.0 {
        return lorentzian_zf(t, gamma);
    }
    let derivative = |tau: f64| {
        let x = omega * tau;
        let k = gamma * (1.0 + gamma * tau);
        let bracket = if x.abs() < SERIES_THRESHOLD {
            let x2 = x * x;
            k * (1.0 / 3.0 - x2 / 30.0) - gamma * (1.0 - x2 / 6.0)
        } else {
            let c = k / (x * x);
            x.sin() / x * (c - gamma) - c * x.cos()
        };
        (-gamma * tau).exp() * bracket
    };
    1.0 + 2.0 * simpson(derivative, t, intervals(t, omega.abs() + gamma.abs()))
}

fn larmor(field_mt: f64) -> f64 {
    2.0 * PI * GAMMA_MU_MHZ_PER_MT * field_mt
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianKuboToyabe;

#[derive(Debug, Clone, Copy, Default)]
pub struct LorentzianKuboToyabe;

#[derive(Debug, Clone, Copy, Default)]
pub struct DampedKuboToyabe;

#[derive(Debug, Clone, Copy, Default)]
pub struct StretchedKuboToyabe;

const KG: [ParameterTemplate; 3] = [AMPLITUDE, LONGITUDINAL_FIELD, KT_WIDTH];
const KL: [ParameterTemplate; 3] = [AMPLITUDE, LONGITUDINAL_FIELD, KT_LORENTZ_WIDTH];
const KD: [ParameterTemplate; 3] = [AMPLITUDE, KT_WIDTH, LORENTZ_RATE];
const KS: [ParameterTemplate; 4] = [AMPLITUDE, KT_WIDTH, STRETCHED_RATE, STRETCH_EXPONENT];

impl Lineshape for GaussianKuboToyabe {
    fn code(&self) -> &'static str {
        "kg"
    }

    fn description(&self) -> &'static str {
        "static Gaussian Kubo-Toyabe in longitudinal field BL"
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        &KG
    }

    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64> {
        let (a, omega, delta) = (p[0], larmor(p[1]), p[2]);
        t.mapv(|t| a * gaussian_lf(t, delta, omega))
    }
}

impl Lineshape for LorentzianKuboToyabe {
    fn code(&self) -> &'static str {
        "kl"
    }

    fn description(&self) -> &'static str {
        "static Lorentzian Kubo-Toyabe in longitudinal field BL"
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        &KL
    }

    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64> {
        let (a, omega, gamma) = (p[0], larmor(p[1]), p[2]);
        t.mapv(|t| a * lorentzian_lf(t, gamma, omega))
    }
}

impl Lineshape for DampedKuboToyabe {
    fn code(&self) -> &'static str {
        "kd"
    }

    fn description(&self) -> &'static str {
        "zero-field Gaussian Kubo-Toyabe times Lorentz decay"
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        &KD
    }

    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64> {
        let (a, delta, lambda) = (p[0], p[1], p[2]);
        t.mapv(|t| a * gaussian_zf(t, delta) * lorentz(t, lambda))
    }
}

impl Lineshape for StretchedKuboToyabe {
    fn code(&self) -> &'static str {
        "ks"
    }

    fn description(&self) -> &'static str {
        "zero-field Gaussian Kubo-Toyabe times stretched decay"
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        &KS
    }

    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64> {
        let (a, delta, rate, beta) = (p[0], p[1], p[2], p[3]);
        t.mapv(|t| a * gaussian_zf(t, delta) * stretched(t, rate, beta))
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(Arc::new(GaussianKuboToyabe));
    registry.register(Arc::new(LorentzianKuboToyabe));
    registry.register(Arc::new(DampedKuboToyabe));
    registry.register(Arc::new(StretchedKuboToyabe));
}
