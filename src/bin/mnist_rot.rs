use anyhow::Result;
use clap::Parser;
use hnet::{
    cli::{init_tracing, CommonArgs},
    config::Options,
    dataset::Splits,
    learn::criterion::Classification,
    models::MnistNet,
    train::Trainer,
};
use rand::{rngs::StdRng, SeedableRng};
use std::process::ExitCode;
use tracing::info;

/// Trains an H-Net or baseline classifier on rotated MNIST.
#[derive(Parser, Debug)]
#[command(name = "mnist-rot")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = cli.common.mode() {
        println!("{e}");
        println!("Usage: mnist-rot --mode hnet|baseline [OPTIONS]");
        return Ok(ExitCode::FAILURE);
    }
    let options = cli.common.apply(Options::mnist_rot())?;
    let splits = Splits::load(&options.data_dir, options.combine_train_val)?;
    info!(
        "train: {}, valid: {}, test: {}",
        splits.train.len(),
        splits.valid.len(),
        splits.test.len()
    );
    let mut rng = StdRng::seed_from_u64(options.seed);
    let network = MnistNet::new(
        options.mode,
        options.dim,
        options.n_filters,
        options.n_classes,
        &mut rng,
    );
    let mut trainer = Trainer::new(&options, network, Classification);
    if cli.common.resume {
        trainer.resume()?;
    }
    trainer.fit(&splits)?;
    Ok(ExitCode::SUCCESS)
}
