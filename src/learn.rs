use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Criteria and task objectives.
pub mod criterion;
/// Initializers.
pub mod init;
/// Layers.
pub mod layer;
/// Networks.
pub mod network;
/// Optimizers.
pub mod optimizer;
/// Parameters and preconditioning.
pub mod parameter;

/// Training / Testing statistics.
///
/// Loss and accuracy are accumulated per batch, the means are over batches.
#[derive(Default, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    batches: usize,
    samples: usize,
    loss: f32,
    accuracy: f32,
}

impl Stats {
    /// Adds a batch of `samples` with `loss` and `accuracy`.
    pub fn push(&mut self, samples: usize, loss: f32, accuracy: f32) {
        self.batches += 1;
        self.samples += samples;
        self.loss += loss;
        self.accuracy += accuracy;
    }
    /// The number of batches.
    pub fn batches(&self) -> usize {
        self.batches
    }
    /// The number of samples.
    pub fn samples(&self) -> usize {
        self.samples
    }
    /// The mean batch loss, 0 if there were no batches.
    pub fn mean_loss(&self) -> f32 {
        if self.batches > 0 {
            self.loss / self.batches as f32
        } else {
            0.
        }
    }
    /// The mean batch accuracy, 0 if there were no batches.
    pub fn mean_accuracy(&self) -> f32 {
        if self.batches > 0 {
            self.accuracy / self.batches as f32
        } else {
            0.
        }
    }
}

/// Summary of training.
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct Summary {
    /// The epoch, 0 based.
    pub epoch: usize,
    /// Time of the epoch.
    pub epoch_time: Duration,
    /// Time since training started.
    pub total_time: Duration,
    pub train: Stats,
    pub valid: Stats,
    /// The learning rate used for the epoch.
    pub learning_rate: f32,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{:04} | {:.1}] Loss: {:.6}, Train Acc.: {:.6}, Validation Acc.: {:.6}, Learning rate: {:.2e}",
            self.epoch,
            self.total_time.as_secs_f32(),
            self.train.mean_loss(),
            self.train.mean_accuracy(),
            self.valid.mean_accuracy(),
            self.learning_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_means_over_batches() {
        let mut stats = Stats::default();
        assert_eq!(stats.mean_loss(), 0.);
        stats.push(4, 1., 0.5);
        stats.push(4, 3., 1.);
        assert_eq!(stats.batches(), 2);
        assert_eq!(stats.samples(), 8);
        assert_eq!(stats.mean_loss(), 2.);
        assert_eq!(stats.mean_accuracy(), 0.75);
    }

    #[test]
    fn summary_line() {
        let mut train = Stats::default();
        train.push(2, 0.5, 0.25);
        let summary = Summary {
            epoch: 3,
            epoch_time: Duration::from_millis(1500),
            total_time: Duration::from_millis(4500),
            train,
            valid: Stats::default(),
            learning_rate: 0.0076,
        };
        assert_eq!(
            summary.to_string(),
            "[0003 | 4.5] Loss: 0.500000, Train Acc.: 0.250000, Validation Acc.: 0.000000, Learning rate: 7.60e-3"
        );
    }
}
