use super::parameter::Parameter;
use anyhow::Result;
use ndarray::{ArrayD, ArrayViewD};
use std::collections::BTreeMap;

/// Named outputs of a forward pass, or the gradients of the loss with respect to them.
pub type Predictions = BTreeMap<String, ArrayD<f32>>;

/// A trainable network.
///
/// Implementations build their parameters at construction, registering each in its
/// [`ParameterGroup`](super::parameter::ParameterGroup), and compute gradients themselves.
pub trait Network {
    /// Enables or disables stochastic behavior like dropout.
    fn set_training(&mut self, training: bool);
    /// Computes the named outputs for a batch.
    ///
    /// **Errors**
    /// Returns an error if `input` does not have the expected shape.
    fn forward(&mut self, input: ArrayViewD<f32>) -> Result<Predictions>;
    /// Back propagates the gradients of the outputs of the last [`.forward()`](Network::forward)
    /// into the gradients of the parameters.
    fn backward(&mut self, output_grads: Predictions) -> Result<()>;
    fn parameters(&self) -> Vec<&Parameter>;
    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;
    /// The total number of parameter elements.
    fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|x| x.len()).sum()
    }
    /// Clears the gradients of all parameters.
    fn zero_grad(&mut self) {
        for parameter in self.parameters_mut() {
            parameter.zero_grad();
        }
    }
}
