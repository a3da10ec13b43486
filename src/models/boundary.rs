use super::ModelKind;
use crate::{
    error::Error,
    learn::{
        layer::{central_differences, Dense, Harmonic},
        network::{Network, Predictions},
        parameter::Parameter,
    },
};
use anyhow::{Context, Result};
use ndarray::{concatenate, s, Array2, Array4, ArrayD, ArrayViewD, Axis, Ix4, Zip};
use rand::RngCore;

/// Per pixel boundary detector.
///
/// Features of each pixel are its channels, the gradient magnitude of each channel and, with
/// [`ModelKind::HNet`], the harmonic responses of each channel. A "side" output is computed from
/// the features and the "fuse" output from the features and the side output. Both are logits
/// shaped `[n, h, w, 1]`.
#[derive(Debug)]
pub struct BoundaryNet {
    channels: usize,
    harmonic: Option<Harmonic>,
    side: Dense,
    fuse: Dense,
    batch_shape: Option<(usize, usize, usize)>,
}

impl BoundaryNet {
    /// Creates the network for `channels` input channels.
    ///
    /// `n_filters` is the number of harmonic phases per channel.
    pub fn new(kind: ModelKind, channels: usize, n_filters: usize, rng: &mut dyn RngCore) -> Self {
        let harmonic = match kind {
            ModelKind::HNet => Some(Harmonic::new("harmonic", channels, n_filters, rng)),
            ModelKind::Baseline => None,
        };
        let features = channels * (2 + harmonic.as_ref().map_or(0, Harmonic::phases));
        let side = Dense::builder("side")
            .inputs(features)
            .outputs(1)
            .build(rng);
        let fuse = Dense::builder("fuse")
            .inputs(features + 1)
            .outputs(1)
            .build(rng);
        Self {
            channels,
            harmonic,
            side,
            fuse,
            batch_shape: None,
        }
    }
    fn features(&self) -> usize {
        self.channels * (2 + self.harmonic.as_ref().map_or(0, Harmonic::phases))
    }
}

fn into_rows(array: ArrayD<f32>, rows: usize, cols: usize) -> Result<Array2<f32>> {
    Ok(array
        .as_standard_layout()
        .into_owned()
        .into_shape((rows, cols))?)
}

fn into_maps(array: Array2<f32>, (n, h, w): (usize, usize, usize), c: usize) -> Result<Array4<f32>> {
    Ok(array.as_standard_layout().into_owned().into_shape((n, h, w, c))?)
}

impl Network for BoundaryNet {
    fn set_training(&mut self, _training: bool) {}
    fn forward(&mut self, input: ArrayViewD<f32>) -> Result<Predictions> {
        let input = input
            .into_dimensionality::<Ix4>()
            .context("Boundary input must be NHWC!")?;
        let (n, h, w, c) = input.dim();
        if c != self.channels {
            return Err(Error::shape_mismatch(
                "boundary input",
                &[n, h, w, self.channels],
                input.shape(),
            )
            .into());
        }
        let (gx, gy) = central_differences(input.view());
        let mut magnitude = gx;
        Zip::from(&mut magnitude)
            .and(&gy)
            .for_each(|gx, gy| *gx = (*gx * *gx + gy * gy).sqrt());
        let responses = self
            .harmonic
            .as_mut()
            .map(|harmonic| harmonic.forward(input.view()))
            .transpose()?;
        let mut parts = vec![input.view(), magnitude.view()];
        parts.extend(responses.as_ref().map(|x| x.view()));
        let features = concatenate(Axis(3), &parts)?;
        let rows = n * h * w;
        let features = into_rows(features.into_dyn(), rows, self.features())?;
        let side = self.side.forward(features.view())?;
        let fuse_input = concatenate(Axis(1), &[features.view(), side.view()])?;
        let fuse = self.fuse.forward(fuse_input.view())?;
        self.batch_shape.replace((n, h, w));
        let mut predictions = Predictions::new();
        predictions.insert("side".to_string(), into_maps(side, (n, h, w), 1)?.into_dyn());
        predictions.insert("fuse".to_string(), into_maps(fuse, (n, h, w), 1)?.into_dyn());
        Ok(predictions)
    }
    fn backward(&mut self, mut output_grads: Predictions) -> Result<()> {
        let batch_shape = self
            .batch_shape
            .take()
            .context("BoundaryNet backward before forward!")?;
        let (n, h, w) = batch_shape;
        let rows = n * h * w;
        let features = self.features();
        let mut take = |name: &str| -> Result<Array2<f32>> {
            let grad = output_grads
                .remove(name)
                .ok_or_else(|| Error::MissingOutput(name.to_string()))?;
            into_rows(grad, rows, 1)
        };
        let fuse_grad = take("fuse")?;
        let mut side_grad = take("side")?;
        let fuse_input_grad = self.fuse.backward(fuse_grad.view())?;
        side_grad += &fuse_input_grad.slice(s![.., features..]);
        let mut features_grad = self.side.backward(side_grad.view())?;
        features_grad += &fuse_input_grad.slice(s![.., ..features]);
        if let Some(harmonic) = self.harmonic.as_mut() {
            let responses_grad = features_grad.slice(s![.., 2 * self.channels..]).to_owned();
            let responses_grad = into_maps(
                responses_grad,
                batch_shape,
                self.channels * harmonic.phases(),
            )?;
            harmonic.backward(responses_grad.view())?;
        }
        Ok(())
    }
    fn parameters(&self) -> Vec<&Parameter> {
        self.harmonic
            .iter()
            .map(Harmonic::parameter)
            .chain(self.side.parameters())
            .chain(self.fuse.parameters())
            .collect()
    }
    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.harmonic
            .iter_mut()
            .map(Harmonic::parameter_mut)
            .chain(self.side.parameters_mut())
            .chain(self.fuse.parameters_mut())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learn::parameter::ParameterGroup;
    use approx::assert_relative_eq;
    use ndarray::Array;
    use rand::{rngs::StdRng, SeedableRng};

    fn image() -> ArrayD<f32> {
        Array::from_shape_fn([2, 5, 4, 3], |(n, h, w, c)| {
            (((n + 1) * (h * 3 + w) + c * 7) % 11) as f32 / 10.
        })
        .into_dyn()
    }

    fn sum_outputs(net: &mut BoundaryNet, x: &ArrayD<f32>) -> f32 {
        net.forward(x.view())
            .unwrap()
            .values()
            .map(|y| y.sum())
            .sum()
    }

    fn shift_phase(net: &mut BoundaryNet, index: usize, delta: f32) {
        let psi = net.parameters_mut().into_iter().next().unwrap();
        psi.value_mut()[[0, index]] += delta;
    }

    #[test]
    fn outputs_side_and_fuse() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = BoundaryNet::new(ModelKind::Baseline, 3, 4, &mut rng);
        let predictions = net.forward(image().view()).unwrap();
        assert_eq!(predictions.keys().collect::<Vec<_>>(), ["fuse", "side"]);
        assert_eq!(predictions["fuse"].shape(), [2, 5, 4, 1]);
        assert_eq!(net.parameter_count(), (6 + 1) + (7 + 1));
    }

    #[test]
    fn phase_gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut net = BoundaryNet::new(ModelKind::HNet, 3, 2, &mut rng);
        let x = image();
        let predictions = net.forward(x.view()).unwrap();
        let grads = predictions
            .iter()
            .map(|(name, y)| (name.clone(), ArrayD::ones(y.raw_dim())))
            .collect();
        net.backward(grads).unwrap();
        let psi = net
            .parameters()
            .into_iter()
            .find(|x| *x.group() == ParameterGroup::PHASE)
            .unwrap();
        let grad = psi.grad().unwrap().to_owned();
        let h = 1e-2;
        for j in 0..grad.len() {
            shift_phase(&mut net, j, h);
            let plus = sum_outputs(&mut net, &x);
            shift_phase(&mut net, j, -2. * h);
            let minus = sum_outputs(&mut net, &x);
            shift_phase(&mut net, j, h);
            let numeric = (plus - minus) / (2. * h);
            assert_relative_eq!(grad[[0, j]], numeric, epsilon = 2e-2, max_relative = 2e-2);
        }
    }

    #[test]
    fn rejects_wrong_channels() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = BoundaryNet::new(ModelKind::Baseline, 1, 4, &mut rng);
        assert!(net.forward(image().view()).is_err());
    }
}
