/*!
# hnet
Training harmonic networks (H-Nets) on two benchmarks:
- rotated MNIST classification, with a test pass after training,
- BSD500 boundary detection, writing validation boundary maps as images.

A run is described by [`Options`](config::Options), built from the task defaults and optional
JSON overrides. The [`Trainer`](train::Trainer) then steps through epochs of training and
validation, checkpoints on a fixed interval and adapts the learning rate with a
[`Scheduler`](schedule::Scheduler).

```no_run
# fn main() -> anyhow::Result<()> {
use hnet::{
    config::Options,
    dataset::Splits,
    learn::criterion::Classification,
    models::MnistNet,
    train::Trainer,
};
use rand::{rngs::StdRng, SeedableRng};

let options = Options::mnist_rot();
let splits = Splits::load(&options.data_dir, options.combine_train_val)?;
let mut rng = StdRng::seed_from_u64(options.seed);
let network = MnistNet::new(
    options.mode,
    options.dim,
    options.n_filters,
    options.n_classes,
    &mut rng,
);
let mut trainer = Trainer::new(&options, network, Classification);
let test = trainer.fit(&splits)?;
# Ok(())
# }
```

# Binaries
- `mnist-rot --mode hnet|baseline`
- `bsd500 --mode hnet|baseline --save_name <name>`

Both accept `--data-dir`, `--config <overrides.json>`, `--epochs`, `--seed` and `--resume`.
Logging is configured with `RUST_LOG`, for example `RUST_LOG=hnet=debug`.
*/

/// Minibatching and augmentation.
pub mod batch;
pub mod checkpoint;
/// Command line arguments shared by the binaries.
pub mod cli;
pub mod config;
pub mod dataset;
/// Errors.
pub mod error;
/// Networks, layers, criteria and optimizers.
pub mod learn;
pub mod models;
pub mod predictions;
/// Learning rate schedules.
pub mod schedule;
pub mod train;

pub use error::Error;
