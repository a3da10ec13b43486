/*!
Run options.

[`Options`] holds every hyperparameter and path of a run. It is resolved once, from the task
defaults ([`Options::mnist_rot`], [`Options::bsd500`]) and an optional JSON object of overrides,
and is then only read. The current learning rate is not an option, it is owned by the
[`Scheduler`](crate::schedule::Scheduler).
*/
use crate::{
    learn::{
        optimizer::{Adam, Optimizer, SGD},
        parameter::{ParameterGroup, Preconditioner},
    },
    models::ModelKind,
    schedule::Schedule,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// The benchmark.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Rotated MNIST classification.
    MnistRot,
    /// BSD500 boundary detection.
    Bsd500,
}

/// How the learning rate changes, see [`Schedule`].
///
/// The divisor is [`Options::lr_div`] and the patience [`Options::delay`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Policy {
    AdaptivePatience,
    FixedIntervalDecay { interval: usize },
    Constant,
}

/// Optimizer selection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam {
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    Sgd {
        #[serde(default)]
        momentum: Option<f32>,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl OptimizerConfig {
    /// Builds the optimizer.
    pub fn build(&self) -> Box<dyn Optimizer> {
        match *self {
            Self::Adam {
                beta1,
                beta2,
                epsilon,
            } => Box::new(
                Adam::builder()
                    .beta1(beta1)
                    .beta2(beta2)
                    .epsilon(epsilon)
                    .build(),
            ),
            Self::Sgd { momentum } => {
                let mut builder = SGD::builder();
                if let Some(momentum) = momentum {
                    builder = builder.momentum(momentum);
                }
                Box::new(builder.build())
            }
        }
    }
}

/// Options of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Options {
    pub task: Task,
    /// The network variant.
    pub mode: ModelKind,
    /// The initial learning rate.
    pub learning_rate: f32,
    pub batch_size: usize,
    pub n_epochs: usize,
    /// Epochs without improvement tolerated by [`Policy::AdaptivePatience`].
    pub delay: usize,
    /// Divides the learning rate on decay.
    pub lr_div: f32,
    pub policy: Policy,
    pub optimizer: OptimizerConfig,
    /// Gradient factors per parameter group.
    pub preconditioner: Preconditioner,
    /// Weight of the sparsity penalty of boundary maps.
    pub sparsity: f32,
    /// Checkpoint (and predict) when `epoch % checkpoint_interval == 0`.
    pub checkpoint_interval: usize,
    /// Write validation predictions as images.
    pub predict: bool,
    /// Train on the training and validation splits.
    pub combine_train_val: bool,
    /// Randomly flip training images.
    pub augment: bool,
    pub seed: u64,
    /// Harmonic phases per input channel.
    pub n_filters: usize,
    /// Side length of MNIST images.
    pub dim: usize,
    pub n_classes: usize,
    pub data_dir: PathBuf,
    /// Prediction images are written to `<test_path>/T_<epoch>`.
    pub test_path: PathBuf,
    pub log_path: PathBuf,
    pub checkpoint_path: PathBuf,
}

impl Options {
    /// Defaults of the rotated MNIST program, outputs under "deep_mnist".
    pub fn mnist_rot() -> Self {
        let (test_path, log_path, checkpoint_path) = output_paths("deep_mnist");
        Self {
            task: Task::MnistRot,
            mode: ModelKind::HNet,
            learning_rate: 0.0076,
            batch_size: 46,
            n_epochs: 200,
            delay: 12,
            lr_div: 10.,
            policy: Policy::AdaptivePatience,
            optimizer: OptimizerConfig::default(),
            preconditioner: Preconditioner::default().with_factor(ParameterGroup::PHASE, 7.8),
            sparsity: 0.,
            checkpoint_interval: 10,
            predict: false,
            combine_train_val: false,
            augment: false,
            seed: 0,
            n_filters: 8,
            dim: 28,
            n_classes: 10,
            data_dir: PathBuf::from("./data/mnist_rotation_new"),
            test_path,
            log_path,
            checkpoint_path,
        }
    }
    /// Defaults of the BSD500 program, outputs under `save_name`.
    pub fn bsd500(save_name: &str) -> Self {
        let (test_path, log_path, checkpoint_path) = output_paths(save_name);
        Self {
            task: Task::Bsd500,
            mode: ModelKind::HNet,
            learning_rate: 1e-2,
            batch_size: 10,
            n_epochs: 250,
            delay: 8,
            lr_div: 10.,
            policy: Policy::FixedIntervalDecay { interval: 40 },
            optimizer: OptimizerConfig::default(),
            preconditioner: Preconditioner::default().with_factor(ParameterGroup::PHASE, 3.4),
            sparsity: 1.,
            checkpoint_interval: 10,
            predict: true,
            combine_train_val: true,
            augment: true,
            seed: 0,
            n_filters: 7,
            dim: 321,
            n_classes: 2,
            data_dir: PathBuf::from("./data/bsd500"),
            test_path,
            log_path,
            checkpoint_path,
        }
    }
    /// Replaces the fields named in `overrides`, a JSON object.
    ///
    /// **Errors**
    /// `overrides` is not an object or a value does not deserialize.
    pub fn merge_json(&self, overrides: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(overrides) = overrides else {
            bail!("Option overrides must be a JSON object!");
        };
        let mut value = serde_json::to_value(self)?;
        if let serde_json::Value::Object(fields) = &mut value {
            fields.extend(overrides);
        }
        serde_json::from_value(value).context("Invalid option overrides!")
    }
    /// [`.merge_json()`](Self::merge_json) with the contents of `path`.
    pub fn merge_file(&self, path: &Path) -> Result<Self> {
        let json =
            fs::read_to_string(path).with_context(|| format!("Unable to read {path:?}!"))?;
        let overrides = serde_json::from_str(&json)
            .with_context(|| format!("Unable to parse {path:?}!"))?;
        self.merge_json(overrides)
    }
    /// The learning rate schedule.
    pub fn schedule(&self) -> Schedule {
        match self.policy {
            Policy::AdaptivePatience => Schedule::AdaptivePatience {
                delay: self.delay,
                divisor: self.lr_div,
            },
            Policy::FixedIntervalDecay { interval } => Schedule::FixedIntervalDecay {
                interval,
                divisor: self.lr_div,
            },
            Policy::Constant => Schedule::Constant,
        }
    }
    /// Creates the output directories and writes "options.json" to the log directory.
    pub fn prepare_outputs(&self) -> Result<()> {
        let mut dirs = vec![&self.log_path, &self.checkpoint_path];
        if self.predict {
            dirs.push(&self.test_path);
        }
        for dir in dirs {
            fs::create_dir_all(dir).with_context(|| format!("Unable to create {dir:?}!"))?;
        }
        let path = self.log_path.join("options.json");
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Unable to write {path:?}!"))?;
        Ok(())
    }
}

fn output_paths(save_name: &str) -> (PathBuf, PathBuf, PathBuf) {
    (
        Path::new(".").join(save_name),
        Path::new(".").join("logs").join(save_name),
        Path::new(".").join("checkpoints").join(save_name),
    )
}
