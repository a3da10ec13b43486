use crate::{config::Options, error::Error, models::ModelKind};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Arguments common to both programs.
///
/// Applied over the task defaults in order: `--config`, then the individual flags.
#[derive(Args, Debug, Default, Clone)]
pub struct CommonArgs {
    /// Network variant, "hnet" or "baseline".
    #[arg(long)]
    pub mode: Option<String>,
    /// Directory containing the `<split>_{x,y}.idx.gz` arrays.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// JSON object of option overrides.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Number of epochs to train.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Seed for initialization, shuffling and augmentation.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Continue from the last checkpoint.
    #[arg(long)]
    pub resume: bool,
}

impl CommonArgs {
    /// The parsed `--mode`, if given.
    ///
    /// **Errors**
    /// [`Error::InvalidMode`] if the value is not a known variant.
    pub fn mode(&self) -> Result<Option<ModelKind>, Error> {
        self.mode.as_deref().map(str::parse).transpose()
    }
    /// Applies the arguments to `options`.
    pub fn apply(&self, options: Options) -> Result<Options> {
        let mut options = match self.config.as_ref() {
            Some(path) => options.merge_file(path)?,
            None => options,
        };
        if let Some(mode) = self.mode()? {
            options.mode = mode;
        }
        if let Some(data_dir) = self.data_dir.clone() {
            options.data_dir = data_dir;
        }
        if let Some(epochs) = self.epochs {
            options.n_epochs = epochs;
        }
        if let Some(seed) = self.seed {
            options.seed = seed;
        }
        Ok(options)
    }
}

/// Installs the global subscriber.
///
/// Filters with `RUST_LOG`, defaulting to "hnet=info".
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hnet=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
