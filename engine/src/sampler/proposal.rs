//! Metropolis-Hastings steps for a single scalar parameter.
//!
//! Each step takes the local log conditional as a closure, so the same code
//! drives every block of the sweep. A `NumericalDegeneracy` raised by the
//! conditional rejects the proposal.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::{ProposalKind, RatingBounds};
use crate::distributions::{NumericalDegeneracy, TruncatedNormal};

/// What happened to one proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Accepted(f64),
    Rejected,
    /// Proposal left the support; no density was evaluated
    OutOfBounds,
    Degenerate,
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }
}

impl From<Result<Option<f64>, NumericalDegeneracy>> for Outcome {
    fn from(result: Result<Option<f64>, NumericalDegeneracy>) -> Self {
        match result {
            Ok(Some(x)) => Outcome::Accepted(x),
            Ok(None) => Outcome::Rejected,
            Err(_) => Outcome::Degenerate,
        }
    }
}

/// Accept with probability min(1, exp(log_ratio)); NaN never accepts.
pub fn accept<R: Rng + ?Sized>(log_ratio: f64, rng: &mut R) -> bool {
    if log_ratio >= 0.0 {
        return true;
    }
    let u: f64 = rng.gen();
    u.ln() < log_ratio
}

fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.sample(StandardNormal)
}

/// Location update on [a, b] by random walk or Langevin proposal.
pub fn location_step<R, F, G>(
    current: f64,
    step: f64,
    kind: ProposalKind,
    bounds: &RatingBounds,
    rng: &mut R,
    log_target: F,
    gradient: G,
) -> Outcome
where
    R: Rng + ?Sized,
    F: Fn(f64) -> Result<f64, NumericalDegeneracy>,
    G: Fn(f64) -> Result<f64, NumericalDegeneracy>,
{
    match kind {
        ProposalKind::RandomWalk => random_walk_step(current, step, bounds, rng, log_target),
        ProposalKind::Langevin => {
            langevin_step(current, step, bounds, rng, log_target, gradient)
        }
    }
}

pub fn random_walk_step<R, F>(
    current: f64,
    step: f64,
    bounds: &RatingBounds,
    rng: &mut R,
    log_target: F,
) -> Outcome
where
    R: Rng + ?Sized,
    F: Fn(f64) -> Result<f64, NumericalDegeneracy>,
{
    let proposal = current + step * gaussian(rng);
    if !bounds.contains(proposal) {
        return Outcome::OutOfBounds;
    }
    let result: Result<Option<f64>, NumericalDegeneracy> = (|| {
        let log_ratio = log_target(proposal)? - log_target(current)?;
        Ok(accept(log_ratio, rng).then_some(proposal))
    })();
    Outcome::from(result)
}

/// Metropolis-adjusted Langevin step:
/// x' = x + (ε²/2)∇log p(x) + ε·z, with the asymmetric proposal density
/// included in the acceptance ratio.
pub fn langevin_step<R, F, G>(
    current: f64,
    step: f64,
    bounds: &RatingBounds,
    rng: &mut R,
    log_target: F,
    gradient: G,
) -> Outcome
where
    R: Rng + ?Sized,
    F: Fn(f64) -> Result<f64, NumericalDegeneracy>,
    G: Fn(f64) -> Result<f64, NumericalDegeneracy>,
{
    let half_var = 0.5 * step * step;
    let drift = |x: f64| -> Result<f64, NumericalDegeneracy> { Ok(x + half_var * gradient(x)?) };
    let log_q = |to: f64, from_drift: f64| -> f64 {
        let d = to - from_drift;
        -d * d / (4.0 * half_var)
    };

    let forward = match drift(current) {
        Ok(m) => m,
        Err(_) => return Outcome::Degenerate,
    };
    let proposal = forward + step * gaussian(rng);
    if !proposal.is_finite() || !bounds.contains(proposal) {
        return Outcome::OutOfBounds;
    }
    let result: Result<Option<f64>, NumericalDegeneracy> = (|| {
        let backward = drift(proposal)?;
        let log_ratio = log_target(proposal)? - log_target(current)? + log_q(current, backward)
            - log_q(proposal, forward);
        Ok(accept(log_ratio, rng).then_some(proposal))
    })();
    Outcome::from(result)
}

/// Random walk on ln x for a positive scale; the Jacobian term ln x' − ln x
/// enters the ratio.
pub fn log_scale_step<R, F>(current: f64, step: f64, rng: &mut R, log_target: F) -> Outcome
where
    R: Rng + ?Sized,
    F: Fn(f64) -> Result<f64, NumericalDegeneracy>,
{
    let log_proposal = current.ln() + step * gaussian(rng);
    let proposal = log_proposal.exp();
    if !(proposal > 0.0 && proposal.is_finite()) {
        return Outcome::OutOfBounds;
    }
    let result: Result<Option<f64>, NumericalDegeneracy> = (|| {
        let log_ratio =
            log_target(proposal)? - log_target(current)? + log_proposal - current.ln();
        Ok(accept(log_ratio, rng).then_some(proposal))
    })();
    Outcome::from(result)
}

/// Independence step: draw from `proposal` and correct by its density.
pub fn independence_step<R, F>(
    current: f64,
    proposal: &TruncatedNormal,
    rng: &mut R,
    log_target: F,
) -> Outcome
where
    R: Rng + ?Sized,
    F: Fn(f64) -> Result<f64, NumericalDegeneracy>,
{
    let result: Result<Option<f64>, NumericalDegeneracy> = (|| {
        let candidate = proposal.sample(rng)?;
        let log_ratio = (log_target(candidate)? - proposal.log_pdf(candidate))
            - (log_target(current)? - proposal.log_pdf(current));
        Ok(accept(log_ratio, rng).then_some(candidate))
    })();
    Outcome::from(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn bounds() -> RatingBounds {
        RatingBounds::default()
    }

    /// Run a step repeatedly against a truncated-normal target and return the
    /// sample mean.
    fn chain_mean<S>(mut step: S, start: f64, n: usize) -> f64
    where
        S: FnMut(f64, &mut ChaCha20Rng) -> Outcome,
    {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let mut x = start;
        let mut sum = 0.0;
        for _ in 0..n {
            if let Outcome::Accepted(next) = step(x, &mut rng) {
                x = next;
            }
            sum += x;
        }
        sum / n as f64
    }

    #[test]
    fn test_accept_rules() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        assert!(accept(0.5, &mut rng));
        assert!(!accept(f64::NEG_INFINITY, &mut rng));
        assert!(!accept(f64::NAN, &mut rng));
    }

    #[test]
    fn test_out_of_bounds_is_rejected_without_evaluation() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let outcome = random_walk_step(9.99, 1e6, &bounds(), &mut rng, |_| {
            panic!("density evaluated")
        });
        // A step of 1e6 from 9.99 lands inside [1, 10] with negligible probability
        assert_eq!(outcome, Outcome::OutOfBounds);
    }

    #[test]
    fn test_degenerate_target_rejects() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let degenerate = NumericalDegeneracy {
            center: 0.0,
            scale: 0.0,
            lower: 1.0,
            upper: 10.0,
        };
        let outcome = random_walk_step(5.0, 1e-3, &bounds(), &mut rng, |_| Err(degenerate));
        assert_eq!(outcome, Outcome::Degenerate);
    }

    #[test]
    fn test_random_walk_and_langevin_target_mean() {
        let target = TruncatedNormal::new(4.0, 0.7, 1.0, 10.0).unwrap();
        let log_target = |x: f64| -> Result<f64, NumericalDegeneracy> { Ok(target.log_pdf(x)) };
        let gradient = |x: f64| -> Result<f64, NumericalDegeneracy> { Ok(-(x - 4.0) / 0.49) };

        let rw = chain_mean(
            |x, rng| random_walk_step(x, 1.0, &bounds(), rng, log_target),
            8.0,
            40_000,
        );
        assert!((rw - 4.0).abs() < 0.05, "random walk mean {}", rw);

        let mala = chain_mean(
            |x, rng| langevin_step(x, 0.8, &bounds(), rng, log_target, gradient),
            8.0,
            40_000,
        );
        assert!((mala - 4.0).abs() < 0.05, "langevin mean {}", mala);
    }

    #[test]
    fn test_log_scale_walk_half_cauchy_median() {
        use crate::distributions::half_cauchy_log_pdf;
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let mut x: f64 = 1.0;
        let mut draws = Vec::new();
        for _ in 0..60_000 {
            if let Outcome::Accepted(next) =
                log_scale_step(x, 1.5, &mut rng, |t| Ok(half_cauchy_log_pdf(t, 2.0)))
            {
                x = next;
            }
            draws.push(x);
        }
        draws.sort_by(f64::total_cmp);
        let median = draws[draws.len() / 2];
        // Median of HalfCauchy(2) is 2
        assert!((median - 2.0).abs() < 0.25, "median {}", median);
    }

    #[test]
    fn test_independence_step_exact_proposal_always_accepts() {
        let prior = TruncatedNormal::new(6.0, 1.2, 1.0, 10.0).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        for _ in 0..100 {
            let outcome = independence_step(6.5, &prior, &mut rng, |x| Ok(prior.log_pdf(x)));
            assert!(outcome.is_accepted());
        }
    }
}
