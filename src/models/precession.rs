//! Precessing components (transverse field, internal fields, F-μ-F).

use super::relaxation::{gauss, lorentz, stretched};
use super::{
    Lineshape, ParameterTemplate, Registry, AMPLITUDE, FIELD, GAMMA_MU_MHZ_PER_MT,
    GAUSS_RATE, LORENTZ_RATE, PHASE, RADEG, STRETCHED_RATE, STRETCH_EXPONENT,
};
use ndarray::Array1;
use std::f64::consts::PI;
use std::sync::Arc;

/// Precession angle `2πγBt + φ` in radians, `φ` in degrees.
pub fn angle(t: f64, field_mt: f64, phase_deg: f64) -> f64 {
    2.0 * PI * GAMMA_MU_MHZ_PER_MT * field_mt * t + phase_deg * RADEG
}

/// Bessel function of the first kind, order zero.
///
/// Rational approximation for `|x| < 8`, asymptotic expansion above;
/// absolute accuracy is better than 1e-7.
pub fn bessel_j0(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 8.0 {
        let y = x * x;
        let num = 57568490574.0
            + y * (-13362590354.0
                + y * (651619640.7 + y * (-11214424.18 + y * (77392.33017 + y * (-184.9052456)))));
        let den = 57568490411.0
            + y * (1029532985.0 + y * (9494680.718 + y * (59272.64853 + y * (267.8532712 + y))));
        num / den
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 0.785398164;
        let p = 1.0
            + y * (-0.1098628627e-2
                + y * (0.2734510407e-4 + y * (-0.2073370639e-5 + y * 0.2093887211e-6)));
        let q = -0.1562499995e-1
            + y * (0.1430488765e-3
                + y * (-0.6911147651e-5 + y * (0.7621095161e-6 - y * 0.934935152e-7)));
        (0.636619772 / ax).sqrt() * (xx.cos() * p - z * xx.sin() * q)
    }
}

/// Oscillating factor of a precessing component.
#[derive(Debug, Clone, Copy)]
enum Oscillation {
    Cosine,
    Bessel,
}

impl Oscillation {
    fn at(self, t: f64, field: f64, phase: f64) -> f64 {
        match self {
            Oscillation::Cosine => angle(t, field, phase).cos(),
            Oscillation::Bessel => bessel_j0(angle(t, field, phase)),
        }
    }
}

/// Damping envelope of a precessing component.
#[derive(Debug, Clone, Copy)]
enum Envelope {
    Lorentz,
    Gauss,
    LorentzGauss,
    Stretched,
}

impl Envelope {
    fn at(self, t: f64, p: &[f64]) -> f64 {
        match self {
            Envelope::Lorentz => lorentz(t, p[0]),
            Envelope::Gauss => gauss(t, p[0]),
            Envelope::LorentzGauss => lorentz(t, p[0]) * gauss(t, p[1]),
            Envelope::Stretched => stretched(t, p[0], p[1]),
        }
    }
}

/// `A osc(2πγBt + φ) envelope(t)`, with parameters `A, B, φ, envelope...`.
#[derive(Debug, Clone, Copy)]
pub struct Precession {
    code: &'static str,
    description: &'static str,
    oscillation: Oscillation,
    envelope: Envelope,
    parameters: &'static [ParameterTemplate],
}

const ML: [ParameterTemplate; 4] = [AMPLITUDE, FIELD, PHASE, LORENTZ_RATE];
const MG: [ParameterTemplate; 4] = [AMPLITUDE, FIELD, PHASE, GAUSS_RATE];
const MU: [ParameterTemplate; 5] = [AMPLITUDE, FIELD, PHASE, LORENTZ_RATE, GAUSS_RATE];
const MS: [ParameterTemplate; 5] = [AMPLITUDE, FIELD, PHASE, STRETCHED_RATE, STRETCH_EXPONENT];
const FM: [ParameterTemplate; 3] = [AMPLITUDE, FIELD, LORENTZ_RATE];

impl Precession {
    pub const LORENTZ: Precession = Precession {
        code: "ml",
        description: "precession, Lorentz decay: A cos(2πγBt + φ) exp(-λt)",
        oscillation: Oscillation::Cosine,
        envelope: Envelope::Lorentz,
        parameters: &ML,
    };

    pub const GAUSS: Precession = Precession {
        code: "mg",
        description: "precession, Gauss decay: A cos(2πγBt + φ) exp(-(σt)²/2)",
        oscillation: Oscillation::Cosine,
        envelope: Envelope::Gauss,
        parameters: &MG,
    };

    pub const LORENTZ_GAUSS: Precession = Precession {
        code: "mu",
        description: "precession, Lorentz and Gauss decay: A cos(2πγBt + φ) exp(-λt) exp(-(σt)²/2)",
        oscillation: Oscillation::Cosine,
        envelope: Envelope::LorentzGauss,
        parameters: &MU,
    };

    pub const STRETCHED: Precession = Precession {
        code: "ms",
        description: "precession, stretched decay: A cos(2πγBt + φ) exp(-(Λt)^β)",
        oscillation: Oscillation::Cosine,
        envelope: Envelope::Stretched,
        parameters: &MS,
    };

    pub const BESSEL_LORENTZ: Precession = Precession {
        code: "jl",
        description: "Bessel precession, Lorentz decay: A j0(2πγBt + φ) exp(-λt)",
        oscillation: Oscillation::Bessel,
        envelope: Envelope::Lorentz,
        parameters: &ML,
    };

    pub const BESSEL_GAUSS: Precession = Precession {
        code: "jg",
        description: "Bessel precession, Gauss decay: A j0(2πγBt + φ) exp(-(σt)²/2)",
        oscillation: Oscillation::Bessel,
        envelope: Envelope::Gauss,
        parameters: &MG,
    };
}

impl Lineshape for Precession {
    fn code(&self) -> &'static str {
        self.code
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        self.parameters
    }

    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64> {
        let (a, field, phase) = (p[0], p[1], p[2]);
        let damping = &p[3..];
        t.mapv(|t| a * self.oscillation.at(t, field, phase) * self.envelope.at(t, damping))
    }
}

/// F-μ-F powder pattern times Lorentz decay; `B` is the dipolar field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FmuF;

impl Lineshape for FmuF {
    fn code(&self) -> &'static str {
        "fm"
    }

    fn description(&self) -> &'static str {
        "F-mu-F: A/6 (1 + cos(2πγBt) + 2(cos(πγBt) + cos(3πγBt))) exp(-λt)"
    }

    fn parameters(&self) -> &'static [ParameterTemplate] {
        &FM
    }

    fn eval(&self, t: &Array1<f64>, p: &[f64]) -> Array1<f64> {
        let (a, field, lambda) = (p[0], p[1], p[2]);
        let w = PI * GAMMA_MU_MHZ_PER_MT * field;
        t.mapv(|t| {
            a / 6.0
                * (1.0 + (2.0 * w * t).cos() + 2.0 * ((w * t).cos() + (3.0 * w * t).cos()))
                * lorentz(t, lambda)
        })
    }
}

pub(crate) fn register(registry: &mut Registry) {
    for shape in [
        Precession::LORENTZ,
        Precession::GAUSS,
        Precession::LORENTZ_GAUSS,
        Precession::STRETCHED,
        Precession::BESSEL_LORENTZ,
        Precession::BESSEL_GAUSS,
    ] {
        registry.register(Arc::new(shape));
    }
    registry.register(Arc::new(FmuF));
}
