use ndarray::ArrayViewMutD;
use rand::RngCore;
use rand_distr::{Distribution, Normal, Uniform};
use std::fmt::Debug;

/// Fills new parameter values.
///
/// Draws from the provided `rng` so that networks built from the same seed are identical.
pub trait Initializer: Debug {
    fn fill(&self, array: ArrayViewMutD<f32>, rng: &mut dyn RngCore);
}

#[derive(Debug)]
pub struct Zeros;

impl Initializer for Zeros {
    fn fill(&self, mut array: ArrayViewMutD<f32>, _rng: &mut dyn RngCore) {
        array.fill(0.);
    }
}

/// Samples every element from `distr`.
#[derive(Debug)]
pub struct Random<R> {
    distr: R,
}

impl<R> Random<R> {
    pub fn new(distr: R) -> Self {
        Self { distr }
    }
}

impl<R: Distribution<f32> + Debug> Initializer for Random<R> {
    fn fill(&self, mut array: ArrayViewMutD<f32>, mut rng: &mut dyn RngCore) {
        array.map_inplace(|x| *x = self.distr.sample(&mut rng));
    }
}

/// He normal, with fan in the first axis of the weight.
#[derive(Debug)]
pub struct HeNormal;

impl Initializer for HeNormal {
    fn fill(&self, array: ArrayViewMutD<f32>, rng: &mut dyn RngCore) {
        let units = array.shape().first().copied().unwrap_or(1).max(1) as f32;
        let std_dev = (2. / units).sqrt();
        // std_dev is finite and positive.
        if let Ok(normal) = Normal::new(0., std_dev) {
            Random::new(normal).fill(array, rng);
        }
    }
}

/// Uniform phase offsets in `[0, 2pi)`.
#[derive(Debug)]
pub struct UniformPhase;

impl Initializer for UniformPhase {
    fn fill(&self, array: ArrayViewMutD<f32>, rng: &mut dyn RngCore) {
        Random::new(Uniform::new(0., std::f32::consts::TAU)).fill(array, rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn seeded_fill_is_deterministic() {
        let mut a = ArrayD::zeros(IxDyn(&[16, 4]));
        let mut b = ArrayD::zeros(IxDyn(&[16, 4]));
        HeNormal.fill(a.view_mut(), &mut StdRng::seed_from_u64(1));
        HeNormal.fill(b.view_mut(), &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
        assert!(a.iter().any(|x| *x != 0.));
    }

    #[test]
    fn uniform_phase_range() {
        let mut a = ArrayD::zeros(IxDyn(&[100]));
        UniformPhase.fill(a.view_mut(), &mut StdRng::seed_from_u64(0));
        assert!(a
            .iter()
            .all(|x| (0. ..std::f32::consts::TAU).contains(x)));
    }
}
