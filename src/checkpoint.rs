/*!
Checkpoints.

A checkpoint is a single JSON file, "model.ckpt.json" in the checkpoint directory, overwritten
on every save. It stores the epoch, the [`SchedulerState`] and every parameter with its
optimizer state, enough to resume training at the next epoch.
*/
use crate::{
    learn::{network::Network, parameter::Parameter},
    schedule::SchedulerState,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

/// A saved training state.
#[derive(Debug, Deserialize)]
pub struct Checkpoint {
    /// The last completed epoch.
    pub epoch: usize,
    pub scheduler: SchedulerState,
    pub parameters: Vec<Parameter>,
}

#[derive(Serialize)]
struct CheckpointRef<'a> {
    epoch: usize,
    scheduler: SchedulerState,
    parameters: Vec<&'a Parameter>,
}

impl Checkpoint {
    /// Loads the saved parameters into `network`.
    ///
    /// **Errors**
    /// The checkpoint does not have exactly the parameters of `network`, with the same shapes.
    pub fn restore(self, network: &mut dyn Network) -> Result<(usize, SchedulerState)> {
        let mut saved: BTreeMap<String, Parameter> = self
            .parameters
            .into_iter()
            .map(|x| (x.name().to_string(), x))
            .collect();
        for parameter in network.parameters_mut() {
            let Some(value) = saved.remove(parameter.name()) else {
                bail!("Checkpoint is missing parameter {:?}!", parameter.name());
            };
            parameter.load(value)?;
        }
        if let Some(name) = saved.keys().next() {
            bail!("Checkpoint has unknown parameter {name:?}!");
        }
        Ok((self.epoch, self.scheduler))
    }
}

/// Saves and loads [`Checkpoint`]s in a directory.
#[derive(Clone, Debug)]
pub struct CheckpointWriter {
    dir: PathBuf,
}

impl CheckpointWriter {
    pub const FILE_NAME: &'static str = "model.ckpt.json";
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
    /// The checkpoint file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }
    /// Writes a checkpoint, returning its path.
    pub fn save<'a>(
        &self,
        epoch: usize,
        scheduler: SchedulerState,
        parameters: impl IntoIterator<Item = &'a Parameter>,
    ) -> Result<PathBuf> {
        let checkpoint = CheckpointRef {
            epoch,
            scheduler,
            parameters: parameters.into_iter().collect(),
        };
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Unable to create {:?}!", self.dir))?;
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(&checkpoint)?;
        fs::write(&tmp, json).with_context(|| format!("Unable to write {tmp:?}!"))?;
        fs::rename(&tmp, &path).with_context(|| format!("Unable to write {path:?}!"))?;
        tracing::debug!("Saved checkpoint: epoch {epoch}");
        Ok(path)
    }
    /// Reads the checkpoint.
    pub fn load(&self) -> Result<Checkpoint> {
        load(&self.path())
    }
}

fn load(path: &Path) -> Result<Checkpoint> {
    let json = fs::read(path).with_context(|| {
        format!("Cannot load checkpoint {path:?}. Has the model been trained?")
    })?;
    serde_json::from_slice(&json).with_context(|| format!("Invalid checkpoint {path:?}!"))
}
