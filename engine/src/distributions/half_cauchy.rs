//! Half-Cauchy distribution on the positive reals, the weakly informative
//! prior used for every scale parameter of the hierarchy.

use rand::Rng;
use std::f64::consts::PI;

/// Log density of HalfCauchy(scale) at `x`; −∞ for x ≤ 0 or an invalid scale.
pub fn half_cauchy_log_pdf(x: f64, scale: f64) -> f64 {
    if !(x > 0.0) || !(scale > 0.0) || !x.is_finite() {
        return f64::NEG_INFINITY;
    }
    let r = x / scale;
    (2.0 / (PI * scale)).ln() - (r * r).ln_1p()
}

/// Draw |C| with C ~ Cauchy(0, scale), by inversion.
pub fn sample_half_cauchy<R: Rng + ?Sized>(scale: f64, rng: &mut R) -> f64 {
    // u in (0, 1] keeps the draw strictly positive
    let u = 1.0 - rng.gen::<f64>();
    scale * (0.5 * PI * u).tan()
}
