use anyhow::Result;
use clap::Parser;
use hnet::{
    cli::{init_tracing, CommonArgs},
    config::Options,
    dataset::Splits,
    learn::criterion::Boundary,
    models::BoundaryNet,
    train::Trainer,
};
use rand::{rngs::StdRng, SeedableRng};
use std::process::ExitCode;
use tracing::info;

/// Trains an H-Net or baseline boundary detector on BSD500.
#[derive(Parser, Debug)]
#[command(name = "bsd500")]
struct Cli {
    /// Name of the prediction, log and checkpoint directories.
    #[arg(long, alias = "save_name", default_value = "my_model")]
    save_name: String,
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = cli.common.mode() {
        println!("{e}");
        println!("Usage: bsd500 --mode hnet|baseline [--save_name NAME] [OPTIONS]");
        return Ok(ExitCode::FAILURE);
    }
    let options = cli.common.apply(Options::bsd500(&cli.save_name))?;
    let splits = Splits::load(&options.data_dir, options.combine_train_val)?;
    info!(
        "train: {}, valid: {}",
        splits.train.len(),
        splits.valid.len()
    );
    let channels = splits.train.x().shape().get(3).copied().unwrap_or(1);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let network = BoundaryNet::new(options.mode, channels, options.n_filters, &mut rng);
    let mut trainer = Trainer::new(&options, network, Boundary::new(options.sparsity));
    if cli.common.resume {
        trainer.resume()?;
    }
    trainer.fit(&splits)?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_name_spellings() {
        let cli = Cli::try_parse_from(["bsd500", "--save_name", "x"]).unwrap();
        assert_eq!(cli.save_name, "x");
        let cli =
            Cli::try_parse_from(["bsd500", "--save-name", "y", "--mode", "baseline"]).unwrap();
        assert_eq!(cli.save_name, "y");
        assert_eq!(cli.common.mode.as_deref(), Some("baseline"));
        let cli = Cli::try_parse_from(["bsd500"]).unwrap();
        assert_eq!(cli.save_name, "my_model");
        assert!(cli.common.mode.is_none());
    }
}
