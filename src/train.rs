/*!
The training loop.

A [`Trainer`] advances through [`Phase`]s one [`.step()`](Trainer::step) at a time:

```text
Initializing -> TrainingEpoch -> Validating -> CheckpointIfDue -> PredictAndDumpIfDue
    -> SchedulerUpdate -> TrainingEpoch | Testing | Finished
```

Every epoch is logged as a [`Summary`] and appended to `<log_path>/summary.jsonl`.
*/
use crate::{
    batch::{minibatches, Augment},
    checkpoint::CheckpointWriter,
    config::{Options, Task},
    dataset::{Split, Splits},
    learn::{
        criterion::Objective,
        network::Network,
        optimizer::Optimizer,
        Stats, Summary,
    },
    predictions::PredictionWriter,
    schedule::{Scheduler, SchedulerState},
};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, SeedableRng};
use std::{fs::OpenOptions, io::Write, time::Instant};
use tracing::{debug, info};

/// State of a [`Trainer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Creates output directories.
    Initializing,
    /// One shuffled pass over the training split.
    TrainingEpoch,
    /// One pass over the validation split with training disabled.
    Validating,
    /// Saves a checkpoint when `epoch % checkpoint_interval == 0`, with the scheduler state
    /// the next epoch starts from.
    CheckpointIfDue,
    /// Writes validation predictions on the checkpoint cadence.
    PredictAndDumpIfDue,
    /// Updates the learning rate and decides whether to continue.
    SchedulerUpdate,
    /// One pass over the test split, for rotated MNIST.
    Testing,
    Finished,
}

/// Trains a network on a task.
pub struct Trainer<'a, N> {
    options: &'a Options,
    network: N,
    objective: Box<dyn Objective>,
    optimizer: Box<dyn Optimizer>,
    scheduler: Scheduler,
    checkpoints: CheckpointWriter,
    predictions: PredictionWriter,
    rng: StdRng,
    phase: Phase,
    epoch: usize,
    start: Instant,
    epoch_start: Instant,
    summary: Summary,
    test: Option<Stats>,
}

impl<'a, N: Network> Trainer<'a, N> {
    /// Creates a trainer at epoch 0.
    pub fn new(options: &'a Options, network: N, objective: impl Objective + 'static) -> Self {
        let now = Instant::now();
        Self {
            options,
            network,
            objective: Box::new(objective),
            optimizer: options.optimizer.build(),
            scheduler: Scheduler::new(options.schedule(), options.learning_rate),
            checkpoints: CheckpointWriter::new(&options.checkpoint_path),
            predictions: PredictionWriter::new(&options.test_path),
            rng: StdRng::seed_from_u64(options.seed),
            phase: Phase::Initializing,
            epoch: 0,
            start: now,
            epoch_start: now,
            summary: Summary::default(),
            test: None,
        }
    }
    /// Restores the network and the scheduler from the last checkpoint.
    ///
    /// Training continues at the epoch after the saved one.
    pub fn resume(&mut self) -> Result<()> {
        let checkpoint = self.checkpoints.load()?;
        let (epoch, state) = checkpoint.restore(&mut self.network)?;
        self.scheduler = Scheduler::new(self.options.schedule(), state.learning_rate)
            .with_state(state);
        self.epoch = epoch + 1;
        info!(
            "Resumed from {:?} at epoch {}",
            self.checkpoints.path(),
            self.epoch
        );
        Ok(())
    }
    pub fn phase(&self) -> Phase {
        self.phase
    }
    /// The current epoch, 0 based.
    pub fn epoch(&self) -> usize {
        self.epoch
    }
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
    pub fn network(&self) -> &N {
        &self.network
    }
    /// The summary of the last validated epoch.
    pub fn summary(&self) -> &Summary {
        &self.summary
    }
    /// The test stats, once [`Phase::Testing`] has run.
    pub fn test_stats(&self) -> Option<Stats> {
        self.test
    }
    fn due(&self) -> bool {
        let interval = self.options.checkpoint_interval;
        interval > 0 && self.epoch % interval == 0
    }
    fn after_training(&self) -> Phase {
        match self.options.task {
            Task::MnistRot => Phase::Testing,
            Task::Bsd500 => Phase::Finished,
        }
    }
    /// Saves the network with the scheduler `state` for the next epoch.
    fn save_checkpoint(&self, state: SchedulerState) -> Result<()> {
        let path = self
            .checkpoints
            .save(self.epoch, state, self.network.parameters())?;
        info!("Model saved to {path:?}");
        Ok(())
    }
    /// Runs the current phase and moves to the next.
    ///
    /// Returns the new phase. Does nothing once [`Phase::Finished`].
    pub fn step(&mut self, splits: &Splits) -> Result<Phase> {
        self.phase = match self.phase {
            Phase::Initializing => {
                self.options.prepare_outputs()?;
                info!(
                    "{:?} {} network with {} parameters",
                    self.options.task,
                    self.options.mode,
                    self.network.parameter_count()
                );
                info!("Starting training loop...");
                if self.epoch < self.options.n_epochs {
                    Phase::TrainingEpoch
                } else {
                    self.after_training()
                }
            }
            Phase::TrainingEpoch => {
                self.epoch_start = Instant::now();
                self.summary.train = self.train_epoch(&splits.train)?;
                Phase::Validating
            }
            Phase::Validating => {
                let valid = self.evaluate(&splits.valid)?;
                self.summary.epoch = self.epoch;
                self.summary.valid = valid;
                self.summary.epoch_time = self.epoch_start.elapsed();
                self.summary.total_time = self.start.elapsed();
                self.summary.learning_rate = self.scheduler.learning_rate();
                info!("{}", self.summary);
                self.append_summary()?;
                Phase::CheckpointIfDue
            }
            Phase::CheckpointIfDue => {
                if self.due() {
                    // state the next epoch starts from
                    let mut scheduler = self.scheduler.clone();
                    scheduler.step(self.epoch, self.summary.valid.mean_accuracy());
                    self.save_checkpoint(scheduler.state())?;
                }
                Phase::PredictAndDumpIfDue
            }
            Phase::PredictAndDumpIfDue => {
                if self.options.predict && self.due() {
                    self.network.set_training(false);
                    let dir = self.predictions.write(
                        self.epoch,
                        &mut self.network,
                        &splits.valid,
                        self.options.batch_size,
                    )?;
                    info!("Saved predictions to: {dir:?}");
                }
                Phase::SchedulerUpdate
            }
            Phase::SchedulerUpdate => {
                let metric = self.summary.valid.mean_accuracy();
                let learning_rate = self.scheduler.step(self.epoch, metric);
                debug!("Next learning rate: {learning_rate:.2e}");
                if self.epoch + 1 < self.options.n_epochs {
                    self.epoch += 1;
                    Phase::TrainingEpoch
                } else {
                    self.save_checkpoint(self.scheduler.state())?;
                    self.epoch += 1;
                    self.after_training()
                }
            }
            Phase::Testing => {
                let test = self.evaluate(&splits.test)?;
                info!("Test Acc.: {:.6}", test.mean_accuracy());
                self.test.replace(test);
                Phase::Finished
            }
            Phase::Finished => Phase::Finished,
        };
        Ok(self.phase)
    }
    /// Steps until [`Phase::Finished`].
    ///
    /// Returns the test stats if the task has a test phase.
    pub fn fit(&mut self, splits: &Splits) -> Result<Option<Stats>> {
        while self.step(splits)? != Phase::Finished {}
        info!("Finished in {:.1}s", self.start.elapsed().as_secs_f32());
        Ok(self.test)
    }
    fn progress_bar(&self, len: usize, name: &str) -> Result<ProgressBar> {
        let style = ProgressStyle::default_bar()
            .template(&format!(
                "{name} [{{bar}}] {{pos:>5}}/{{len:5}} [eta: {{eta}}]",
            ))?
            .progress_chars("=> ");
        Ok(ProgressBar::new(len as u64).with_style(style))
    }
    /// Trains one epoch on `split`.
    ///
    /// Batches are shuffled and flipped when augmentation is enabled. Each batch is evaluated,
    /// back propagated, preconditioned and applied with the current learning rate.
    pub fn train_epoch(&mut self, split: &Split) -> Result<Stats> {
        let options = self.options;
        let learning_rate = self.scheduler.learning_rate();
        let augment = options.augment.then_some(Augment);
        self.network.set_training(true);
        let batches = minibatches(
            split.x().view(),
            split.y().view(),
            options.batch_size,
            true,
            &mut self.rng,
        )
        .context("Unable to batch the training split!")?;
        let bar = self.progress_bar(batches.len(), "train")?;
        let mut stats = Stats::default();
        for mut batch in batches {
            if let Some(augment) = augment.as_ref() {
                augment.apply(&mut batch, &mut self.rng)?;
            }
            self.network.zero_grad();
            let predictions = self.network.forward(batch.x.view())?;
            let evaluation = self.objective.evaluate(&predictions, batch.y.view())?;
            self.network.backward(evaluation.grads)?;
            let mut parameters = self.network.parameters_mut();
            options
                .preconditioner
                .apply(parameters.iter_mut().map(|x| &mut **x));
            for parameter in parameters {
                self.optimizer.update(learning_rate, parameter)?;
            }
            let accuracy = evaluation.correct as f32 / evaluation.count.max(1) as f32;
            debug!("batch loss: {}, accuracy: {}", evaluation.loss, accuracy);
            stats.push(batch.len(), evaluation.loss, accuracy);
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok(stats)
    }
    /// Evaluates the network on `split` in order, with training disabled.
    pub fn evaluate(&mut self, split: &Split) -> Result<Stats> {
        self.network.set_training(false);
        let batches = minibatches(
            split.x().view(),
            split.y().view(),
            self.options.batch_size,
            false,
            &mut self.rng,
        )
        .context("Unable to batch the evaluation split!")?;
        let bar = self.progress_bar(batches.len(), "eval")?;
        let mut stats = Stats::default();
        for batch in batches {
            let predictions = self.network.forward(batch.x.view())?;
            let evaluation = self.objective.evaluate(&predictions, batch.y.view())?;
            let accuracy = evaluation.correct as f32 / evaluation.count.max(1) as f32;
            stats.push(batch.len(), evaluation.loss, accuracy);
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok(stats)
    }
    fn append_summary(&self) -> Result<()> {
        let path = self.options.log_path.join("summary.jsonl");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Unable to open {path:?}!"))?;
        let mut line = serde_json::to_vec(&self.summary)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }
}
