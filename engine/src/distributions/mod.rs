//! Probability primitives for bounded and positive quantities.

pub mod half_cauchy;
pub mod special;
pub mod truncnorm;

pub use half_cauchy::{half_cauchy_log_pdf, sample_half_cauchy};
pub use truncnorm::{NumericalDegeneracy, TruncatedNormal};
