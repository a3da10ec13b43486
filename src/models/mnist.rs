use super::ModelKind;
use crate::{
    error::Error,
    learn::{
        layer::{Dense, Dropout, Harmonic, Relu},
        network::{Network, Predictions},
        parameter::Parameter,
    },
};
use anyhow::Result;
use ndarray::{concatenate, s, ArrayViewD, Axis, Ix2};
use rand::RngCore;

const HIDDEN: usize = 128;
const DROPOUT: f32 = 0.3;

/// Rotated MNIST classifier.
///
/// Flattened pixels, plus harmonic responses with [`ModelKind::HNet`], feed a hidden layer with
/// dropout and a "logits" output.
#[derive(Debug)]
pub struct MnistNet {
    dim: usize,
    harmonic: Option<Harmonic>,
    hidden: Dense,
    relu: Relu,
    dropout: Dropout,
    logits: Dense,
}

impl MnistNet {
    /// Creates the network for `dim` x `dim` images and `classes` outputs.
    ///
    /// `n_filters` is the number of harmonic phases per pixel.
    pub fn new(
        kind: ModelKind,
        dim: usize,
        n_filters: usize,
        classes: usize,
        rng: &mut dyn RngCore,
    ) -> Self {
        let pixels = dim * dim;
        let (harmonic, features) = match kind {
            ModelKind::HNet => (
                Some(Harmonic::new("harmonic", 1, n_filters, rng)),
                pixels * (1 + n_filters),
            ),
            ModelKind::Baseline => (None, pixels),
        };
        let hidden = Dense::builder("hidden")
            .inputs(features)
            .outputs(HIDDEN)
            .build(rng);
        let dropout = Dropout::new(DROPOUT, rng);
        let logits = Dense::builder("logits")
            .inputs(HIDDEN)
            .outputs(classes)
            .build(rng);
        Self {
            dim,
            harmonic,
            hidden,
            relu: Relu::default(),
            dropout,
            logits,
        }
    }
}

impl Network for MnistNet {
    fn set_training(&mut self, training: bool) {
        self.dropout.set_training(training);
    }
    fn forward(&mut self, input: ArrayViewD<f32>) -> Result<Predictions> {
        let batch_size = input.shape().first().copied().unwrap_or(0);
        let (dim, pixels) = (self.dim, self.dim * self.dim);
        if input.len() != batch_size * pixels {
            return Err(
                Error::shape_mismatch("mnist input", &[batch_size, pixels], input.shape()).into(),
            );
        }
        let x = input
            .as_standard_layout()
            .into_shape((batch_size, pixels))?
            .into_owned();
        let features = if let Some(harmonic) = self.harmonic.as_mut() {
            let responses = harmonic.forward(x.view().into_shape((batch_size, dim, dim, 1))?)?;
            let responses = responses.into_shape((batch_size, pixels * harmonic.phases()))?;
            concatenate(Axis(1), &[x.view(), responses.view()])?
        } else {
            x
        };
        let hidden = self.hidden.forward(features.view())?;
        let hidden = self.dropout.forward(self.relu.forward(hidden));
        let logits = self.logits.forward(hidden.view())?;
        let mut predictions = Predictions::new();
        predictions.insert("logits".to_string(), logits.into_dyn());
        Ok(predictions)
    }
    fn backward(&mut self, mut output_grads: Predictions) -> Result<()> {
        let grad = output_grads
            .remove("logits")
            .ok_or_else(|| Error::MissingOutput("logits".to_string()))?
            .into_dimensionality::<Ix2>()?;
        let grad = self.logits.backward(grad.view())?;
        let grad = self.relu.backward(self.dropout.backward(grad))?;
        let grad = self.hidden.backward(grad.view())?;
        if let Some(harmonic) = self.harmonic.as_mut() {
            let (dim, pixels) = (self.dim, self.dim * self.dim);
            let harmonic_grad = grad
                .slice(s![.., pixels..])
                .to_owned()
                .into_shape((grad.nrows(), dim, dim, harmonic.phases()))?;
            harmonic.backward(harmonic_grad.view())?;
        }
        Ok(())
    }
    fn parameters(&self) -> Vec<&Parameter> {
        self.harmonic
            .iter()
            .map(Harmonic::parameter)
            .chain(self.hidden.parameters())
            .chain(self.logits.parameters())
            .collect()
    }
    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.harmonic
            .iter_mut()
            .map(Harmonic::parameter_mut)
            .chain(self.hidden.parameters_mut())
            .chain(self.logits.parameters_mut())
            .collect()
    }
}
