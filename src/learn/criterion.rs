use super::network::Predictions;
use crate::error::Error;
use anyhow::{bail, Result};
use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, Axis, Ix1, Ix2, Zip};

/// Evaluates `input` against `target`.
pub trait Criterion<X, T> {
    type Output;
    fn eval(&self, input: X, target: T) -> Result<Self::Output>;
}

/// Argmax accuracy.
///
/// Targets are class indices stored as floats. Outputs the number of correct rows.
#[derive(Default, Debug)]
pub struct Accuracy;

impl<'a> Criterion<ArrayView2<'a, f32>, ArrayViewD<'a, f32>> for Accuracy {
    type Output = usize;
    fn eval(&self, input: ArrayView2<'a, f32>, target: ArrayViewD<'a, f32>) -> Result<usize> {
        let target = target.into_dimensionality::<Ix1>()?;
        Ok(input
            .outer_iter()
            .zip(target.iter().map(|t| *t as usize))
            .filter(|(input, class)| {
                let mut max = input[0];
                let mut max_index = 0;
                for (i, x) in input.iter().copied().enumerate() {
                    if x > max {
                        max = x;
                        max_index = i;
                    }
                }
                max_index == *class
            })
            .count())
    }
}

/// Pixel accuracy of boundary logits.
///
/// A pixel is predicted as boundary when its logit is positive, and is a boundary when its
/// target is greater than 0.5. Outputs the number of matching pixels.
#[derive(Default, Debug)]
pub struct PixelAccuracy;

impl<'a> Criterion<ArrayViewD<'a, f32>, ArrayViewD<'a, f32>> for PixelAccuracy {
    type Output = usize;
    fn eval(&self, input: ArrayViewD<'a, f32>, target: ArrayViewD<'a, f32>) -> Result<usize> {
        check_shape("pixel accuracy target", input.shape(), target.shape())?;
        Ok(input
            .iter()
            .zip(target.iter())
            .filter(|(x, y)| (**x > 0.) == (**y > 0.5))
            .count())
    }
}

/// Cross entropy loss.
///
/// Mean softmax cross entropy of logits `[batch, classes]` with class index targets. Outputs
/// the loss and its gradient with respect to the logits.
#[derive(Default, Debug)]
pub struct CrossEntropyLoss {}

impl<'a> Criterion<ArrayView2<'a, f32>, ArrayViewD<'a, f32>> for CrossEntropyLoss {
    type Output = (f32, Array2<f32>);
    fn eval(&self, input: ArrayView2<'a, f32>, target: ArrayViewD<'a, f32>) -> Result<Self::Output> {
        let target = target.into_dimensionality::<Ix1>()?;
        let (batch_size, classes) = input.dim();
        if target.len() != batch_size {
            return Err(Error::LengthMismatch {
                inputs: batch_size,
                targets: target.len(),
            }
            .into());
        }
        let mut grad = Array2::zeros(input.raw_dim());
        if batch_size == 0 {
            return Ok((0., grad));
        }
        let scale = 1. / batch_size as f32;
        let mut loss = 0.;
        for ((x, t), mut dx) in input
            .outer_iter()
            .zip(target.iter())
            .zip(grad.outer_iter_mut())
        {
            let class = *t as usize;
            if class >= classes {
                bail!("Class {class} is out of range for {classes} outputs!");
            }
            let max = x.fold(f32::NEG_INFINITY, |m, x| m.max(*x));
            let sum: f32 = x.iter().map(|x| (x - max).exp()).sum();
            let log_sum = max + sum.ln();
            loss += log_sum - x[class];
            Zip::from(&mut dx).and(&x).for_each(|dx, x| {
                *dx = (x - log_sum).exp() * scale;
            });
            dx[class] -= scale;
        }
        Ok((loss * scale, grad))
    }
}

/// Class balanced sigmoid cross entropy.
///
/// With `beta = 1 - mean(y)` over the batch, positives are weighted by `beta / (1 - beta)`.
/// `mean(y)` is clamped to `[1e-6, 1 - 1e-6]`. Outputs the mean loss and its gradient with
/// respect to the logits.
#[derive(Default, Debug)]
pub struct WeightedCrossEntropyLoss {}

impl<'a> Criterion<ArrayViewD<'a, f32>, ArrayViewD<'a, f32>> for WeightedCrossEntropyLoss {
    type Output = (f32, ArrayD<f32>);
    fn eval(&self, input: ArrayViewD<'a, f32>, target: ArrayViewD<'a, f32>) -> Result<Self::Output> {
        check_shape("weighted cross entropy target", input.shape(), target.shape())?;
        let mut grad = ArrayD::zeros(input.raw_dim());
        let n = input.len();
        if n == 0 {
            return Ok((0., grad));
        }
        let y_mean = clamp_ratio(target.mean().unwrap_or(0.));
        let beta = 1. - y_mean;
        let pos_weight = beta / (1. - beta);
        let scale = 1. / n as f32;
        let mut loss = 0.;
        Zip::from(&mut grad)
            .and(&input)
            .and(&target)
            .for_each(|dx, x, y| {
                let w = 1. + (pos_weight - 1.) * y;
                loss += (1. - y) * x + w * ((-x.abs()).exp().ln_1p() + (-x).max(0.));
                *dx = ((1. - y) - w * (1. - sigmoid(*x))) * scale;
            });
        Ok((loss * scale, grad))
    }
}

/// Sparsity penalty.
///
/// Cross entropy between the mean activation `q = mean(sigmoid(x))` and the target ratio
/// `s = mean(y)`, scaled by `weight`.
#[derive(Debug)]
pub struct SparsityRegularizer {
    weight: f32,
}

impl SparsityRegularizer {
    pub fn new(weight: f32) -> Self {
        Self { weight }
    }
}

impl<'a> Criterion<ArrayViewD<'a, f32>, ArrayViewD<'a, f32>> for SparsityRegularizer {
    type Output = (f32, ArrayD<f32>);
    fn eval(&self, input: ArrayViewD<'a, f32>, target: ArrayViewD<'a, f32>) -> Result<Self::Output> {
        check_shape("sparsity target", input.shape(), target.shape())?;
        let n = input.len();
        if n == 0 || self.weight == 0. {
            return Ok((0., ArrayD::zeros(input.raw_dim())));
        }
        let s = target.mean().unwrap_or(0.);
        let sigma = input.mapv(sigmoid);
        let q = clamp_ratio(sigma.mean().unwrap_or(0.));
        let loss = self.weight * (-s * q.ln() - (1. - s) * (1. - q).ln());
        let dq = self.weight * (-s / q + (1. - s) / (1. - q)) / n as f32;
        let grad = sigma.mapv_into(|p| dq * p * (1. - p));
        Ok((loss, grad))
    }
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

fn clamp_ratio(x: f32) -> f32 {
    x.clamp(1e-6, 1. - 1e-6)
}

fn check_shape(name: &str, expected: &[usize], found: &[usize]) -> Result<()> {
    if expected != found {
        return Err(Error::shape_mismatch(name, expected, found).into());
    }
    Ok(())
}

/// Loss, accuracy and output gradients of one batch.
#[derive(Debug)]
pub struct Evaluation {
    /// The loss.
    pub loss: f32,
    /// Number of correct predictions.
    pub correct: usize,
    /// Number of predictions.
    pub count: usize,
    /// Gradient of the loss with respect to each output.
    pub grads: Predictions,
}

/// Task objective.
///
/// Maps the named outputs of a network and the batch targets to an [`Evaluation`].
pub trait Objective {
    /// Evaluates `predictions` against `target`.
    ///
    /// **Errors**
    /// - [`Error::MissingOutput`] if a required output was not produced.
    /// - [`Error::ShapeMismatch`] if an output does not match the target.
    fn evaluate(&self, predictions: &Predictions, target: ArrayViewD<f32>) -> Result<Evaluation>;
}

/// Classification with [`CrossEntropyLoss`] and [`Accuracy`] on the "logits" output.
#[derive(Default, Debug)]
pub struct Classification;

impl Classification {
    /// Name of the evaluated output.
    pub const OUTPUT: &'static str = "logits";
}

impl Objective for Classification {
    fn evaluate(&self, predictions: &Predictions, target: ArrayViewD<f32>) -> Result<Evaluation> {
        let logits = predictions
            .get(Self::OUTPUT)
            .ok_or_else(|| Error::MissingOutput(Self::OUTPUT.to_string()))?
            .view()
            .into_dimensionality::<Ix2>()?;
        let (loss, grad) = CrossEntropyLoss::default().eval(logits.view(), target.view())?;
        let correct = Accuracy.eval(logits.view(), target.view())?;
        let mut grads = Predictions::new();
        grads.insert(Self::OUTPUT.to_string(), grad.into_dyn());
        Ok(Evaluation {
            loss,
            correct,
            count: logits.len_of(Axis(0)),
            grads,
        })
    }
}

/// Boundary detection.
///
/// Every output is penalized with [`WeightedCrossEntropyLoss`] plus a [`SparsityRegularizer`],
/// the losses are summed. Accuracy is [`PixelAccuracy`] of the "fuse" output.
#[derive(Debug)]
pub struct Boundary {
    sparsity: SparsityRegularizer,
}

impl Boundary {
    /// Name of the output used for accuracy and predictions.
    pub const FUSE: &'static str = "fuse";
    /// Creates the objective with sparsity `weight`.
    pub fn new(sparsity: f32) -> Self {
        Self {
            sparsity: SparsityRegularizer::new(sparsity),
        }
    }
}

impl Objective for Boundary {
    fn evaluate(&self, predictions: &Predictions, target: ArrayViewD<f32>) -> Result<Evaluation> {
        let fuse = predictions
            .get(Self::FUSE)
            .ok_or_else(|| Error::MissingOutput(Self::FUSE.to_string()))?;
        let mut loss = 0.;
        let mut grads = Predictions::new();
        for (name, output) in predictions.iter() {
            let (output_loss, mut grad) =
                WeightedCrossEntropyLoss::default().eval(output.view(), target.view())?;
            let (penalty, penalty_grad) = self.sparsity.eval(output.view(), target.view())?;
            grad += &penalty_grad;
            loss += output_loss + penalty;
            grads.insert(name.clone(), grad);
        }
        Ok(Evaluation {
            loss,
            correct: PixelAccuracy.eval(fuse.view(), target.view())?,
            count: fuse.len(),
            grads,
        })
    }
}
