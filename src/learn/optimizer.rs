#[cfg(doc)]
use super::parameter::Preconditioner;
use super::parameter::Parameter;
use anyhow::{bail, Result};
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};

/// Optimizer builders.
pub mod builder {
    use super::*;

    /// Builder for creating a [`SGD`].
    pub struct SGDBuilder {
        momentum: Option<f32>,
    }

    impl SGDBuilder {
        pub(super) fn new() -> Self {
            Self { momentum: None }
        }
        /// Momentum. Default is 0.
        ///
        /// If `momentum` is greater than 0, a "velocity" tensor will
        /// be added to the [`OptimizerState`] of each [`Parameter`].
        pub fn momentum(self, momentum: f32) -> Self {
            Self {
                momentum: Some(momentum),
            }
        }
        /// Builds the optimizer.
        pub fn build(self) -> SGD {
            let Self { momentum } = self;
            SGD { momentum }
        }
    }

    /// Builder for creating an [`Adam`].
    pub struct AdamBuilder {
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    }

    impl AdamBuilder {
        pub(super) fn new() -> Self {
            Self {
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 1e-8,
            }
        }
        /// Decay of the first moment. Default is 0.9.
        pub fn beta1(self, beta1: f32) -> Self {
            Self { beta1, ..self }
        }
        /// Decay of the second moment. Default is 0.999.
        pub fn beta2(self, beta2: f32) -> Self {
            Self { beta2, ..self }
        }
        /// Added to the denominator. Default is 1e-8.
        pub fn epsilon(self, epsilon: f32) -> Self {
            Self { epsilon, ..self }
        }
        /// Builds the optimizer.
        pub fn build(self) -> Adam {
            let Self {
                beta1,
                beta2,
                epsilon,
            } = self;
            Adam {
                beta1,
                beta2,
                epsilon,
            }
        }
    }
}
use builder::*;

/// [`OptimizerState`] value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A tensor with the parameter's shape.
    Tensor(ArrayD<f32>),
    /// A scalar.
    Elem(f32),
}

/// Optimizer State.
///
/// Stores per parameter training progress, saved with checkpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    name: String,
    key_values: Vec<(String, Value)>,
}

impl OptimizerState {
    /// Creates a new state for optimizer `name`.
    pub fn new(name: impl Into<String>, key_values: Vec<(String, Value)>) -> Self {
        Self {
            name: name.into(),
            key_values,
        }
    }
    /// Name of the [`Optimizer`].
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Iterator over keys and values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.key_values
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }
    fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.key_values
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }
}

/// Optimizer.
pub trait Optimizer {
    /// Performs the optimization, updating the parameter with `learning_rate`.
    ///
    /// Parameters without a gradient are left unchanged. Gradients are used as is, any
    /// [`Preconditioner`] must be applied before.
    fn update(&self, learning_rate: f32, parameter: &mut Parameter) -> Result<()>;
}

/// Stochastic Gradient Descent.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct SGD {
    momentum: Option<f32>,
}

impl SGD {
    /// An SGD builder.
    pub fn builder() -> SGDBuilder {
        SGDBuilder::new()
    }
    fn init_state(&self, parameter: &mut Parameter) {
        if let Some(state) = parameter.optimizer_state() {
            if state.name() == "SGD" && self.momentum.is_some() == state.iter().next().is_some() {
                return;
            }
        }
        let mut key_values = Vec::new();
        if self.momentum.is_some() {
            let velocity = ArrayD::zeros(parameter.shape());
            key_values.push(("velocity".to_string(), Value::Tensor(velocity)));
        }
        parameter.init_optimizer_state(OptimizerState::new("SGD", key_values));
    }
}

impl Optimizer for SGD {
    fn update(&self, learning_rate: f32, parameter: &mut Parameter) -> Result<()> {
        if parameter.grad().is_none() {
            return Ok(());
        }
        self.init_state(parameter);
        let (mut value, grad, state) = parameter.value_grad_state_mut();
        let Some(grad) = grad else {
            return Ok(());
        };
        if let Some(momentum) = self.momentum {
            let Some(Value::Tensor(velocity)) = state.and_then(|state| state.get_mut("velocity"))
            else {
                bail!("SGD velocity missing!");
            };
            Zip::from(&mut value)
                .and(&grad)
                .and(velocity)
                .for_each(|w, &dw, v| sgd_update_with_momentum(w, dw, learning_rate, momentum, v));
        } else {
            value.scaled_add(-learning_rate, &grad);
        }
        Ok(())
    }
}

fn sgd_update_with_momentum(w: &mut f32, dw: f32, lr: f32, m: f32, v: &mut f32) {
    *v = m * *v + dw;
    *w -= lr * *v;
}

/// Adam.
///
/// See [Adam: A Method for Stochastic Optimization](<https://arxiv.org/abs/1412.6980>).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    epsilon: f32,
}

impl Default for Adam {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Adam {
    /// An Adam builder.
    pub fn builder() -> AdamBuilder {
        AdamBuilder::new()
    }
    fn init_state(&self, parameter: &mut Parameter) {
        if let Some(state) = parameter.optimizer_state() {
            if state.name() == "Adam" {
                return;
            }
        }
        let key_values = vec![
            ("m".to_string(), Value::Tensor(ArrayD::zeros(parameter.shape()))),
            ("v".to_string(), Value::Tensor(ArrayD::zeros(parameter.shape()))),
            ("t".to_string(), Value::Elem(0.)),
        ];
        parameter.init_optimizer_state(OptimizerState::new("Adam", key_values));
    }
}

impl Optimizer for Adam {
    fn update(&self, learning_rate: f32, parameter: &mut Parameter) -> Result<()> {
        if parameter.grad().is_none() {
            return Ok(());
        }
        self.init_state(parameter);
        let Self {
            beta1,
            beta2,
            epsilon,
        } = *self;
        let (mut value, grad, state) = parameter.value_grad_state_mut();
        let Some(grad) = grad else {
            return Ok(());
        };
        let Some(state) = state else {
            bail!("Adam state missing!");
        };
        let t = match state.get_mut("t") {
            Some(Value::Elem(t)) => {
                *t += 1.;
                *t
            }
            _ => bail!("Adam step missing!"),
        };
        // Bias corrections are folded into the step size.
        let lr_t = learning_rate * (1. - beta2.powf(t)).sqrt() / (1. - beta1.powf(t));
        let mut m = match state.get_mut("m") {
            Some(Value::Tensor(m)) => std::mem::take(m),
            _ => bail!("Adam first moment missing!"),
        };
        let Some(Value::Tensor(v)) = state.get_mut("v") else {
            bail!("Adam second moment missing!");
        };
        Zip::from(&mut value)
            .and(&grad)
            .and(&mut m)
            .and(v)
            .for_each(|w, &dw, m, v| {
                *m = beta1 * *m + (1. - beta1) * dw;
                *v = beta2 * *v + (1. - beta2) * dw * dw;
                *w -= lr_t * *m / (v.sqrt() + epsilon);
            });
        if let Some(Value::Tensor(slot)) = state.get_mut("m") {
            *slot = m;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array, ArrayD};

    fn parameter(value: f32, grad: f32) -> Parameter {
        let mut parameter = Parameter::new("w", Array::from_elem(3, value).into_dyn());
        parameter
            .accumulate_grad(Array::from_elem(3, grad).into_dyn())
            .unwrap();
        parameter
    }

    #[test]
    fn sgd_uses_runtime_learning_rate() {
        let sgd = SGD::default();
        let mut w = parameter(1., 2.);
        sgd.update(0.1, &mut w).unwrap();
        assert_relative_eq!(w.value()[[0]], 0.8, epsilon = 1e-6);
        sgd.update(0.01, &mut w).unwrap();
        assert_relative_eq!(w.value()[[0]], 0.78, epsilon = 1e-6);
    }

    #[test]
    fn sgd_momentum_accumulates_velocity() {
        let sgd = SGD::builder().momentum(0.5).build();
        let mut w = parameter(0., 1.);
        sgd.update(1., &mut w).unwrap();
        assert_relative_eq!(w.value()[[1]], -1., epsilon = 1e-6);
        sgd.update(1., &mut w).unwrap();
        // v = 0.5 * 1 + 1
        assert_relative_eq!(w.value()[[1]], -2.5, epsilon = 1e-6);
    }

    #[test]
    fn adam_first_step_is_learning_rate_times_sign() {
        let adam = Adam::default();
        let mut w = parameter(0., -4.);
        adam.update(0.01, &mut w).unwrap();
        assert_relative_eq!(w.value()[[2]], 0.01, max_relative = 1e-4);
        let state = w.optimizer_state().unwrap();
        assert_eq!(state.name(), "Adam");
        assert!(state
            .iter()
            .any(|(key, value)| key == "t" && *value == Value::Elem(1.)));
    }

    #[test]
    fn no_grad_no_update() {
        let mut w = Parameter::new("w", ArrayD::from_elem(vec![2], 1.));
        Adam::default().update(1., &mut w).unwrap();
        SGD::default().update(1., &mut w).unwrap();
        assert!(w.value().iter().all(|x| *x == 1.));
        assert!(w.optimizer_state().is_none());
    }
}
