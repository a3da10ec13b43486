/*!
Host layers of the reference networks.

Each layer caches what its backward pass needs during [`forward`](Dense::forward) and accumulates
parameter gradients in [`backward`](Dense::backward).
*/
use super::{
    init::{HeNormal, Initializer, UniformPhase, Zeros},
    parameter::{Parameter, ParameterGroup},
};
use crate::error::Error;
use anyhow::{Context, Result};
use ndarray::{s, Array2, Array4, ArrayView2, ArrayView4, Axis, Ix2, Zip};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

/// Dense builders.
pub mod builder {
    use super::*;

    /// Builder for creating a [`Dense`].
    #[derive(Debug)]
    pub struct DenseBuilder {
        pub(super) name: String,
        pub(super) inputs: usize,
        pub(super) outputs: usize,
        pub(super) bias: bool,
    }

    impl DenseBuilder {
        /// The number of inputs.
        pub fn inputs(self, inputs: usize) -> Self {
            Self { inputs, ..self }
        }
        /// The number of outputs.
        pub fn outputs(self, outputs: usize) -> Self {
            Self { outputs, ..self }
        }
        /// Whether to add a bias. Default is true.
        pub fn bias(self, bias: bool) -> Self {
            Self { bias, ..self }
        }
        /// Builds the layer, drawing the weight from `rng`.
        pub fn build(self, rng: &mut dyn RngCore) -> Dense {
            let Self {
                name,
                inputs,
                outputs,
                bias,
            } = self;
            let mut weight = Parameter::new(
                format!("{name}.weight"),
                Array2::zeros([inputs, outputs]).into_dyn(),
            );
            HeNormal.fill(weight.value_mut(), rng);
            let bias = bias.then(|| {
                let mut bias =
                    Parameter::new(format!("{name}.bias"), Array2::zeros([1, outputs]).into_dyn());
                Zeros.fill(bias.value_mut(), rng);
                bias
            });
            Dense {
                weight,
                bias,
                input: None,
            }
        }
    }
}
use builder::DenseBuilder;

/// Fully connected layer, `y = x W + b`.
#[derive(Debug)]
pub struct Dense {
    weight: Parameter,
    bias: Option<Parameter>,
    input: Option<Array2<f32>>,
}

impl Dense {
    /// A builder named `name`, its parameters are "`name`.weight" and "`name`.bias".
    pub fn builder(name: impl Into<String>) -> DenseBuilder {
        DenseBuilder {
            name: name.into(),
            inputs: 0,
            outputs: 0,
            bias: true,
        }
    }
    fn weight(&self) -> Result<ArrayView2<f32>> {
        Ok(self.weight.value().into_dimensionality::<Ix2>()?)
    }
    /// Computes the output, caching `input`.
    pub fn forward(&mut self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        let weight = self.weight()?;
        if input.ncols() != weight.nrows() {
            return Err(Error::shape_mismatch(
                format!("{} input", self.weight.name()),
                &[input.nrows(), weight.nrows()],
                input.shape(),
            )
            .into());
        }
        let mut output = input.dot(&weight);
        if let Some(bias) = self.bias.as_ref() {
            output += &bias.value().into_dimensionality::<Ix2>()?;
        }
        self.input.replace(input.to_owned());
        Ok(output)
    }
    /// Accumulates parameter gradients and returns the gradient of the input.
    pub fn backward(&mut self, output_grad: ArrayView2<f32>) -> Result<Array2<f32>> {
        let input = self
            .input
            .take()
            .with_context(|| format!("{} backward before forward!", self.weight.name()))?;
        let input_grad = output_grad.dot(&self.weight()?.t());
        self.weight
            .accumulate_grad(input.t().dot(&output_grad).into_dyn())?;
        if let Some(bias) = self.bias.as_mut() {
            let bias_grad = output_grad.sum_axis(Axis(0)).insert_axis(Axis(0));
            bias.accumulate_grad(bias_grad.into_dyn())?;
        }
        Ok(input_grad)
    }
    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        std::iter::once(&self.weight).chain(self.bias.as_ref())
    }
    pub fn parameters_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        std::iter::once(&mut self.weight).chain(self.bias.as_mut())
    }
}

/// Rectified linear unit.
#[derive(Default, Debug)]
pub struct Relu {
    output: Option<Array2<f32>>,
}

impl Relu {
    pub fn forward(&mut self, input: Array2<f32>) -> Array2<f32> {
        let output = input.mapv_into(|x| x.max(0.));
        self.output.replace(output.clone());
        output
    }
    pub fn backward(&mut self, mut output_grad: Array2<f32>) -> Result<Array2<f32>> {
        let output = self.output.take().context("Relu backward before forward!")?;
        Zip::from(&mut output_grad)
            .and(&output)
            .for_each(|dx, y| {
                if *y <= 0. {
                    *dx = 0.;
                }
            });
        Ok(output_grad)
    }
}

/// Inverted dropout.
///
/// Active only in training, where each element is zeroed with `probability` and the rest are
/// scaled by `1 / (1 - probability)`.
#[derive(Debug)]
pub struct Dropout {
    probability: f32,
    training: bool,
    rng: StdRng,
    mask: Option<Array2<f32>>,
}

impl Dropout {
    /// Creates the layer, seeding its own generator from `rng`.
    pub fn new(probability: f32, rng: &mut dyn RngCore) -> Self {
        Self {
            probability,
            training: false,
            rng: StdRng::seed_from_u64(rng.next_u64()),
            mask: None,
        }
    }
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }
    pub fn forward(&mut self, input: Array2<f32>) -> Array2<f32> {
        if !self.training || self.probability <= 0. {
            self.mask = None;
            return input;
        }
        let keep = 1. - self.probability;
        let rng = &mut self.rng;
        let mask = Array2::from_shape_simple_fn(input.raw_dim(), || {
            if rng.gen::<f32>() < keep {
                1. / keep
            } else {
                0.
            }
        });
        let output = input * &mask;
        self.mask.replace(mask);
        output
    }
    pub fn backward(&mut self, output_grad: Array2<f32>) -> Array2<f32> {
        match self.mask.take() {
            Some(mask) => output_grad * &mask,
            None => output_grad,
        }
    }
}

/// Zero padded central differences of NHWC images.
///
/// Returns `(gx, gy)`, the half differences along the width and height axes. These are fixed
/// 3x3 stencils, not learned.
pub fn central_differences(input: ArrayView4<f32>) -> (Array4<f32>, Array4<f32>) {
    let (_, height, width, _) = input.dim();
    let mut gx = Array4::zeros(input.raw_dim());
    let mut gy = Array4::zeros(input.raw_dim());
    if width > 1 {
        let right = input.slice(s![.., .., 2.., ..]);
        let left = input.slice(s![.., .., ..width - 2, ..]);
        gx.slice_mut(s![.., .., 1..width - 1, ..])
            .assign(&((&right - &left) * 0.5));
        gx.slice_mut(s![.., .., 0, ..])
            .assign(&(&input.slice(s![.., .., 1, ..]) * 0.5));
        gx.slice_mut(s![.., .., width - 1, ..])
            .assign(&(&input.slice(s![.., .., width - 2, ..]) * -0.5));
    }
    if height > 1 {
        let below = input.slice(s![.., 2.., .., ..]);
        let above = input.slice(s![.., ..height - 2, .., ..]);
        gy.slice_mut(s![.., 1..height - 1, .., ..])
            .assign(&((&below - &above) * 0.5));
        gy.slice_mut(s![.., 0, .., ..])
            .assign(&(&input.slice(s![.., 1, .., ..]) * 0.5));
        gy.slice_mut(s![.., height - 1, .., ..])
            .assign(&(&input.slice(s![.., height - 2, .., ..]) * -0.5));
    }
    (gx, gy)
}

/// First order circular harmonic responses with learned phase.
///
/// For each input channel `c` and phase `k`, outputs `Re(e^{i psi} (gx + i gy))` with
/// `psi = psi[c * phases + k]`, where `gx` and `gy` are the [`central_differences`] of the
/// channel. The phase offsets are registered in [`ParameterGroup::PHASE`].
#[derive(Debug)]
pub struct Harmonic {
    phases: usize,
    psi: Parameter,
    gradients: Option<(Array4<f32>, Array4<f32>)>,
}

impl Harmonic {
    /// Creates the layer for `channels` inputs with `phases` outputs each.
    pub fn new(
        name: impl AsRef<str>,
        channels: usize,
        phases: usize,
        rng: &mut dyn RngCore,
    ) -> Self {
        let mut psi = Parameter::new(
            format!("{}.psi", name.as_ref()),
            Array2::zeros([1, channels * phases]).into_dyn(),
        )
        .with_group(ParameterGroup::PHASE);
        UniformPhase.fill(psi.value_mut(), rng);
        Self {
            phases,
            psi,
            gradients: None,
        }
    }
    /// The number of output channels per input channel.
    pub fn phases(&self) -> usize {
        self.phases
    }
    /// Maps `[n, h, w, c]` to `[n, h, w, c * phases]`.
    pub fn forward(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (n, h, w, c) = input.dim();
        if c * self.phases != self.psi.len() {
            return Err(Error::shape_mismatch(
                format!("{} input", self.psi.name()),
                &[n, h, w, self.psi.len() / self.phases.max(1)],
                input.shape(),
            )
            .into());
        }
        let (gx, gy) = central_differences(input);
        let psi = self.psi.value();
        let mut output = Array4::zeros([n, h, w, c * self.phases]);
        for ((mut output, gx), gy) in output
            .lanes_mut(Axis(3))
            .into_iter()
            .zip(gx.lanes(Axis(3)))
            .zip(gy.lanes(Axis(3)))
        {
            for (j, (y, psi)) in output.iter_mut().zip(psi.iter()).enumerate() {
                let channel = j / self.phases;
                *y = psi.cos() * gx[channel] - psi.sin() * gy[channel];
            }
        }
        self.gradients.replace((gx, gy));
        Ok(output)
    }
    /// Accumulates the gradient of the phase offsets.
    pub fn backward(&mut self, output_grad: ArrayView4<f32>) -> Result<()> {
        let (gx, gy) = self
            .gradients
            .take()
            .with_context(|| format!("{} backward before forward!", self.psi.name()))?;
        let psi = self.psi.value().to_owned();
        let mut psi_grad = psi.clone();
        psi_grad.fill(0.);
        for ((dy, gx), gy) in output_grad
            .lanes(Axis(3))
            .into_iter()
            .zip(gx.lanes(Axis(3)))
            .zip(gy.lanes(Axis(3)))
        {
            for (j, ((dpsi, psi), dy)) in psi_grad
                .iter_mut()
                .zip(psi.iter())
                .zip(dy.iter())
                .enumerate()
            {
                let channel = j / self.phases;
                *dpsi += dy * (-psi.sin() * gx[channel] - psi.cos() * gy[channel]);
            }
        }
        self.psi.accumulate_grad(psi_grad)
    }
    pub fn parameter(&self) -> &Parameter {
        &self.psi
    }
    pub fn parameter_mut(&mut self) -> &mut Parameter {
        &mut self.psi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array};

    #[test]
    fn dense_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dense = Dense::builder("dense").inputs(3).outputs(2).build(&mut rng);
        let x = array![[0.5, -1., 2.], [1., 0.25, -0.5]];
        let y = dense.forward(x.view()).unwrap();
        // loss = sum(y)
        let dx = dense.backward(Array2::ones(y.raw_dim()).view()).unwrap();
        let weight = dense.weight().unwrap().to_owned();
        assert_eq!(dx, Array2::ones([2, 2]).dot(&weight.t()));
        let weight_grad = dense.parameters().next().unwrap().grad().unwrap().to_owned();
        assert_eq!(weight_grad, x.t().dot(&Array2::ones([2, 2])).into_dyn());
        let bias_grad = dense.parameters().nth(1).unwrap().grad().unwrap().to_owned();
        assert_eq!(bias_grad, array![[2., 2.]].into_dyn());
    }

    #[test]
    fn dense_input_mismatch() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dense = Dense::builder("dense").inputs(3).outputs(2).build(&mut rng);
        let err = dense.forward(Array2::zeros([1, 4]).view()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn dropout_only_in_training() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dropout = Dropout::new(0.5, &mut rng);
        let x = Array2::ones([8, 8]);
        assert_eq!(dropout.forward(x.clone()), x);
        dropout.set_training(true);
        let y = dropout.forward(x);
        assert!(y.iter().all(|y| *y == 0. || *y == 2.));
        assert!(y.iter().any(|y| *y == 0.));
    }

    #[test]
    fn central_differences_of_ramp() {
        let x = Array::from_shape_fn([1, 3, 4, 1], |(_, h, w, _)| (w + 10 * h) as f32);
        let (gx, gy) = central_differences(x.view());
        assert_eq!(gx[[0, 1, 1, 0]], 1.);
        assert_eq!(gy[[0, 1, 1, 0]], 10.);
        // zero padding
        assert_eq!(gx[[0, 1, 0, 0]], 0.5 * x[[0, 1, 1, 0]]);
        assert_eq!(gy[[0, 2, 3, 0]], -0.5 * x[[0, 1, 3, 0]]);
    }

    #[test]
    fn harmonic_phase_gradient() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut harmonic = Harmonic::new("harmonic", 2, 3, &mut rng);
        let x = Array::from_shape_fn([2, 4, 4, 2], |(n, h, w, c)| {
            ((n + 1) * (h + 2 * w) + 3 * c) as f32 * 0.1 - (h * w) as f32 * 0.05
        });
        let y = harmonic.forward(x.view()).unwrap();
        assert_eq!(y.shape(), [2, 4, 4, 6]);
        // loss = sum(y)
        harmonic
            .backward(Array4::ones(y.raw_dim()).view())
            .unwrap();
        let grad = harmonic.parameter().grad().unwrap().to_owned();
        let h = 1e-2;
        for j in 0..6 {
            let mut loss = |delta: f32| {
                harmonic.parameter_mut().value_mut()[[0, j]] += delta;
                let loss = harmonic.forward(x.view()).unwrap().sum();
                harmonic.parameter_mut().value_mut()[[0, j]] -= delta;
                loss
            };
            let numeric = (loss(h) - loss(-h)) / (2. * h);
            assert_relative_eq!(grad[[0, j]], numeric, epsilon = 1e-2, max_relative = 1e-2);
        }
    }
}
