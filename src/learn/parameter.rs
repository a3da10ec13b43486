use super::optimizer::OptimizerState;
use crate::error::Error;
use anyhow::Result;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::BTreeMap, fmt};

/// Group a [`Parameter`] belongs to.
///
/// Declared when the parameter is created. Gradient preconditioning and other per family
/// treatment look up the group instead of parsing parameter names.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterGroup(Cow<'static, str>);

impl ParameterGroup {
    /// Weights and biases.
    pub const DEFAULT: Self = Self(Cow::Borrowed("default"));
    /// Phase offsets of harmonic filters.
    pub const PHASE: Self = Self(Cow::Borrowed("phase"));
    /// A custom group.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }
    /// The name of the group.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Default for ParameterGroup {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ParameterGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A trainable parameter.
///
/// Stores the value, the gradient computed by the last backward pass and the optimizer state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    #[serde(default)]
    group: ParameterGroup,
    value: ArrayD<f32>,
    #[serde(skip)]
    grad: Option<ArrayD<f32>>,
    #[serde(default)]
    optimizer_state: Option<OptimizerState>,
}

impl Parameter {
    /// Creates a parameter in [`ParameterGroup::DEFAULT`].
    pub fn new(name: impl Into<String>, value: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            group: ParameterGroup::DEFAULT,
            value,
            grad: None,
            optimizer_state: None,
        }
    }
    /// Registers the parameter in `group`.
    pub fn with_group(self, group: ParameterGroup) -> Self {
        Self { group, ..self }
    }
    /// The name.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The group.
    pub fn group(&self) -> &ParameterGroup {
        &self.group
    }
    /// The shape.
    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }
    /// The number of elements.
    pub fn len(&self) -> usize {
        self.value.len()
    }
    /// Whether the parameter has no elements.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
    /// The value.
    pub fn value(&self) -> ArrayViewD<f32> {
        self.value.view()
    }
    /// The value, mutably.
    pub fn value_mut(&mut self) -> ArrayViewMutD<f32> {
        self.value.view_mut()
    }
    /// The gradient, if computed.
    pub fn grad(&self) -> Option<ArrayViewD<f32>> {
        self.grad.as_ref().map(|grad| grad.view())
    }
    /// The gradient, mutably.
    pub fn grad_mut(&mut self) -> Option<ArrayViewMutD<f32>> {
        self.grad.as_mut().map(|grad| grad.view_mut())
    }
    /// Adds `grad` to the gradient.
    ///
    /// **Errors**
    /// [`Error::ShapeMismatch`] if `grad` does not have the parameter's shape.
    pub fn accumulate_grad(&mut self, grad: ArrayD<f32>) -> Result<()> {
        if grad.shape() != self.value.shape() {
            return Err(Error::shape_mismatch(
                format!("gradient of {:?}", self.name),
                self.value.shape(),
                grad.shape(),
            )
            .into());
        }
        match self.grad.as_mut() {
            Some(acc) => *acc += &grad,
            None => self.grad = Some(grad),
        }
        Ok(())
    }
    /// Clears the gradient.
    pub fn zero_grad(&mut self) {
        self.grad = None;
    }
    /// The optimizer state.
    pub fn optimizer_state(&self) -> Option<&OptimizerState> {
        self.optimizer_state.as_ref()
    }
    /// Replaces the optimizer state.
    pub fn init_optimizer_state(&mut self, state: OptimizerState) {
        self.optimizer_state = Some(state);
    }
    /// Splits into the value, the gradient and the optimizer state.
    pub(crate) fn value_grad_state_mut(
        &mut self,
    ) -> (
        ArrayViewMutD<f32>,
        Option<ArrayViewD<f32>>,
        Option<&mut OptimizerState>,
    ) {
        (
            self.value.view_mut(),
            self.grad.as_ref().map(|grad| grad.view()),
            self.optimizer_state.as_mut(),
        )
    }
    /// Copies the value and optimizer state of `saved`.
    ///
    /// **Errors**
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn load(&mut self, saved: Parameter) -> Result<()> {
        if saved.value.shape() != self.value.shape() {
            return Err(Error::shape_mismatch(
                format!("checkpoint parameter {:?}", self.name),
                self.value.shape(),
                saved.value.shape(),
            )
            .into());
        }
        self.value = saved.value;
        self.optimizer_state = saved.optimizer_state;
        self.grad = None;
        Ok(())
    }
}

/// Scales gradients per [`ParameterGroup`].
///
/// Applied after the backward pass and before the optimizer update, so parameter families with
/// a different natural scale (ie phase offsets) can take larger or smaller effective steps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preconditioner {
    factors: BTreeMap<ParameterGroup, f32>,
}

impl Preconditioner {
    /// Multiplies gradients of `group` by `factor`.
    pub fn with_factor(mut self, group: ParameterGroup, factor: f32) -> Self {
        self.factors.insert(group, factor);
        self
    }
    /// The factor for `group`, if any.
    pub fn factor(&self, group: &ParameterGroup) -> Option<f32> {
        self.factors.get(group).copied()
    }
    /// Iterator over groups and factors.
    pub fn iter(&self) -> impl Iterator<Item = (&ParameterGroup, f32)> {
        self.factors.iter().map(|(group, factor)| (group, *factor))
    }
    /// Scales the gradient of each parameter in a registered group.
    pub fn apply<'a>(&self, parameters: impl IntoIterator<Item = &'a mut Parameter>) {
        for parameter in parameters {
            if let Some(factor) = self.factor(parameter.group()) {
                if let Some(mut grad) = parameter.grad_mut() {
                    grad.map_inplace(|dx| *dx *= factor);
                }
            }
        }
    }
}

impl FromIterator<(ParameterGroup, f32)> for Preconditioner {
    fn from_iter<I: IntoIterator<Item = (ParameterGroup, f32)>>(iter: I) -> Self {
        Self {
            factors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, ArrayD, IxDyn};

    fn parameter(name: &str, group: ParameterGroup) -> Parameter {
        let mut parameter =
            Parameter::new(name, ArrayD::zeros(IxDyn(&[2, 2]))).with_group(group);
        parameter
            .accumulate_grad(ArrayD::from_elem(IxDyn(&[2, 2]), 1.))
            .unwrap();
        parameter
    }

    #[test]
    fn preconditioner_scales_registered_groups_only() {
        let mut weight = parameter("psi_weight", ParameterGroup::DEFAULT);
        let mut phase = parameter("b", ParameterGroup::PHASE);
        let preconditioner = Preconditioner::default().with_factor(ParameterGroup::PHASE, 7.8);
        preconditioner.apply([&mut weight, &mut phase]);
        assert!(weight.grad().unwrap().iter().all(|x| *x == 1.));
        assert!(phase.grad().unwrap().iter().all(|x| *x == 7.8));
    }

    #[test]
    fn preconditioner_skips_missing_grads() {
        let mut phase =
            Parameter::new("psi", ArrayD::zeros(IxDyn(&[3]))).with_group(ParameterGroup::PHASE);
        Preconditioner::default()
            .with_factor(ParameterGroup::PHASE, 2.)
            .apply([&mut phase]);
        assert!(phase.grad().is_none());
    }

    #[test]
    fn accumulate_grad_sums() {
        let mut weight = parameter("w", ParameterGroup::DEFAULT);
        weight
            .accumulate_grad(Array::from_elem([2, 2], 2.).into_dyn())
            .unwrap();
        assert!(weight.grad().unwrap().iter().all(|x| *x == 3.));
        let err = weight
            .accumulate_grad(Array::from_elem(3, 2.).into_dyn())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn preconditioner_serde_map() {
        let preconditioner: Preconditioner = serde_json::from_str(r#"{"phase": 3.4}"#).unwrap();
        assert_eq!(preconditioner.factor(&ParameterGroup::PHASE), Some(3.4));
        assert_eq!(preconditioner.factor(&ParameterGroup::DEFAULT), None);
    }
}
