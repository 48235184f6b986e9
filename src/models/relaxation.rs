//! Non-oscillating relaxation components.

use super::{
    Lineshape, ParameterTemplate, Registry, AMPLITUDE, GAUSS_RATE, LORENTZ_RATE,
    STRETCHED_RATE, STRETCH_EXPONENT,
};
use ndarray::Array1;
use std::sync::Arc;

/// `exp(-λt)`
pub fn lorentz(t: f64, lambda: f64) -> f64 {
    (-lambda * t).exp()
}

/// `exp(-(σt)²/2)`
pub fn gauss(t: f64, sigma: f64) -> f64 {
    (-0.5 * (sigma * t).powi(2)).exp()
}

/// `exp(-(Λt)^β)`; zero argument gives 1 for every β.
pub fn stretched(t: f64, rate: f64, beta: f64) -> f64 {
    let x = (rate * t).abs();
    if x == 0.0 {
        1.0
    } else {
        (-x.powf(beta)).exp()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LorentzDecay;

#[derive(Debug, Clone, Copy, Default)]
pub struct GaussDecay;

#[derive(Debug, Clone, Copy, Default)]
pub struct LorentzGaussDecay;

#[derive(Debug, Clone, Copy, Default)]
pub struct StretchedDecay;

const BL: [ParameterTemplate; 2] = [AMPLITUDE, LORENTZ_RATE];
const BG: [ParameterTemplate; 2] = [AMPLITUDE, GAUSS_RATE];
const BA: [ParameterTemplate; 3] = [AMPLITUDE, LORENTZ_RATE, GAUSS_RATE];
const BS: [ParameterTemplate; 3] = [AMPLITUDE, STRETCHED_RATE, STRETCH_EXPONENT];

impl Lineshape for LorentzDecay {
    fn code(&self) -> &'static str {
        "bl"
    }

    fn description(&self) -> &'static str {
        "Lorentz decay: A exp(-λt)"
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        &BL
    }

    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64> {
        let (a, lambda) = (p[0], p[1]);
        t.mapv(|t| a * lorentz(t, lambda))
    }
}

impl Lineshape for GaussDecay {
    fn code(&self) -> &'static str {
        "bg"
    }

    fn description(&self) -> &'static str {
        "Gauss decay: A exp(-(σt)²/2)"
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        &BG
    }

    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64> {
        let (a, sigma) = (p[0], p[1]);
        t.mapv(|t| a * gauss(t, sigma))
    }
}

impl Lineshape for LorentzGaussDecay {
    fn code(&self) -> &'static str {
        "ba"
    }

    fn description(&self) -> &'static str {
        "Lorentz times Gauss decay: A exp(-λt) exp(-(σt)²/2)"
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        &BA
    }

    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64> {
        let (a, lambda, sigma) = (p[0], p[1], p[2]);
        t.mapv(|t| a * lorentz(t, lambda) * gauss(t, sigma))
    }
}

impl Lineshape for StretchedDecay {
    fn code(&self) -> &'static str {
        "bs"
    }

    fn description(&self) -> &'static str {
        "stretched decay: A exp(-(Λt)^β)"
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        &BS
    }

    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64> {
        let (a, rate, beta) = (p[0], p[1], p[2]);
        t.mapv(|t| a * stretched(t, rate, beta))
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(Arc::new(LorentzDecay));
    registry.register(Arc::new(GaussDecay));
    registry.register(Arc::new(LorentzGaussDecay));
    registry.register(Arc::new(StretchedDecay));
}
