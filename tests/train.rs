use anyhow::Result;
use approx::assert_relative_eq;
use hnet::{
    checkpoint::CheckpointWriter,
    config::{Options, Policy},
    dataset::{SampleMeta, Split, Splits},
    learn::{criterion::{Boundary, Classification}, Summary},
    models::{BoundaryNet, MnistNet, ModelKind},
    train::{Phase, Trainer},
};
use ndarray::{Array, Array1};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{fs, path::Path};

const DIM: usize = 4;

fn with_paths(mut options: Options, dir: &Path) -> Options {
    options.data_dir = dir.join("data");
    options.test_path = dir.join("predictions");
    options.log_path = dir.join("logs");
    options.checkpoint_path = dir.join("checkpoints");
    options
}

fn mnist_options(dir: &Path, n_epochs: usize) -> Options {
    let mut options = with_paths(Options::mnist_rot(), dir);
    options.dim = DIM;
    options.n_filters = 2;
    options.n_classes = 2;
    options.batch_size = 4;
    options.n_epochs = n_epochs;
    options.checkpoint_interval = 2;
    options.learning_rate = 1e-2;
    options
}

/// Class 1 images are bright on the left half.
fn mnist_split(len: usize, rng: &mut StdRng) -> Result<Split> {
    let labels: Vec<usize> = (0..len).map(|i| i % 2).collect();
    let x = Array::from_shape_fn([len, DIM, DIM], |(n, _, w)| {
        let base: f32 = if labels[n] == 1 && w < DIM / 2 { 0.9 } else { 0.1 };
        base + rng.gen_range(0. ..0.05)
    });
    let y = Array1::from_iter(labels.iter().map(|x| *x as f32));
    Split::new(x.into_dyn(), y.into_dyn(), None)
}

fn write_mnist(dir: &Path) -> Result<()> {
    let data = dir.join("data");
    fs::create_dir_all(&data)?;
    let mut rng = StdRng::seed_from_u64(11);
    for (name, len) in [("train", 16), ("valid", 8), ("test", 8)] {
        mnist_split(len, &mut rng)?.save(&data, name)?;
    }
    Ok(())
}

fn mnist_network(options: &Options) -> MnistNet {
    MnistNet::new(
        options.mode,
        options.dim,
        options.n_filters,
        options.n_classes,
        &mut StdRng::seed_from_u64(options.seed),
    )
}

fn summaries(options: &Options) -> Result<Vec<Summary>> {
    let text = fs::read_to_string(options.log_path.join("summary.jsonl"))?;
    let summaries = text
        .lines()
        .map(serde_json::from_str::<Summary>)
        .collect::<serde_json::Result<Vec<_>>>()?;
    Ok(summaries)
}

#[test]
fn mnist_fit_tests_and_checkpoints() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_mnist(dir.path())?;
    let options = mnist_options(dir.path(), 3);
    let splits = Splits::load(&options.data_dir, options.combine_train_val)?;
    assert_eq!(splits.train.len(), 16);
    let mut trainer = Trainer::new(&options, mnist_network(&options), Classification);
    let test = trainer.fit(&splits)?.expect("test stats");
    assert_eq!(test.batches(), 2);
    assert_eq!(test.samples(), 8);
    assert!(test.mean_loss().is_finite());
    assert!((0. ..=1.).contains(&test.mean_accuracy()));
    assert_eq!(trainer.phase(), Phase::Finished);
    assert!(options.log_path.join("options.json").is_file());
    let summaries = summaries(&options)?;
    let epochs: Vec<usize> = summaries.iter().map(|x| x.epoch).collect();
    assert_eq!(epochs, [0, 1, 2]);
    assert!(summaries.iter().all(|x| x.train.batches() == 4));
    let checkpoint = CheckpointWriter::new(&options.checkpoint_path).load()?;
    assert_eq!(checkpoint.epoch, 2);
    assert!(!options.test_path.exists());
    Ok(())
}

#[test]
fn mnist_phases() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_mnist(dir.path())?;
    let mut options = mnist_options(dir.path(), 2);
    options.mode = ModelKind::Baseline;
    options.policy = Policy::Constant;
    let splits = Splits::load(&options.data_dir, false)?;
    let mut trainer = Trainer::new(&options, mnist_network(&options), Classification);
    assert_eq!(trainer.phase(), Phase::Initializing);
    let mut phases = Vec::new();
    while trainer.phase() != Phase::Finished {
        phases.push(trainer.step(&splits)?);
    }
    use Phase::*;
    let epoch = [
        TrainingEpoch,
        Validating,
        CheckpointIfDue,
        PredictAndDumpIfDue,
        SchedulerUpdate,
    ];
    let expected: Vec<Phase> = epoch
        .iter()
        .chain(&epoch)
        .chain(&[Testing, Finished])
        .copied()
        .collect();
    assert_eq!(phases, expected);
    assert_eq!(trainer.step(&splits)?, Finished);
    assert_eq!(trainer.scheduler().learning_rate(), options.learning_rate);
    Ok(())
}

#[test]
fn mnist_resume_continues_after_checkpoint() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_mnist(dir.path())?;
    let options = mnist_options(dir.path(), 2);
    let splits = Splits::load(&options.data_dir, false)?;
    Trainer::new(&options, mnist_network(&options), Classification).fit(&splits)?;

    let mut options = options;
    options.n_epochs = 4;
    options.seed = 1;
    let mut trainer = Trainer::new(&options, mnist_network(&options), Classification);
    trainer.resume()?;
    assert_eq!(trainer.epoch(), 2);
    trainer.fit(&splits)?;
    let epochs: Vec<usize> = summaries(&options)?.iter().map(|x| x.epoch).collect();
    assert_eq!(epochs, [0, 1, 2, 3]);
    assert_eq!(CheckpointWriter::new(&options.checkpoint_path).load()?.epoch, 3);
    Ok(())
}

#[test]
fn resume_from_periodic_checkpoint_matches_uninterrupted() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_mnist(dir.path())?;
    let mut options = mnist_options(dir.path(), 3);
    options.policy = Policy::FixedIntervalDecay { interval: 1 };
    options.checkpoint_interval = 1;
    options.learning_rate = 1.;
    let splits = Splits::load(&options.data_dir, false)?;

    let mut uninterrupted = Trainer::new(&options, mnist_network(&options), Classification);
    while uninterrupted.epoch() < 1 {
        uninterrupted.step(&splits)?;
    }
    assert_eq!(uninterrupted.phase(), Phase::TrainingEpoch);

    let mut options = options.clone();
    options.log_path = dir.path().join("interrupted_logs");
    options.checkpoint_path = dir.path().join("interrupted_checkpoints");
    let mut interrupted = Trainer::new(&options, mnist_network(&options), Classification);
    while interrupted.step(&splits)? != Phase::PredictAndDumpIfDue {}
    assert_eq!(interrupted.epoch(), 0);

    let mut resumed = Trainer::new(&options, mnist_network(&options), Classification);
    resumed.resume()?;
    assert_eq!(resumed.epoch(), uninterrupted.epoch());
    assert_eq!(resumed.scheduler().state(), uninterrupted.scheduler().state());
    assert_relative_eq!(resumed.scheduler().learning_rate(), 0.1);
    Ok(())
}

#[test]
fn resume_without_checkpoint_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let options = mnist_options(dir.path(), 1);
    let mut trainer = Trainer::new(&options, mnist_network(&options), Classification);
    assert!(trainer.resume().is_err());
    Ok(())
}

fn boundary_split(len: usize, ids: &[&str], rng: &mut StdRng) -> Result<Split> {
    let (h, w) = (6, 5);
    let y = Array::from_shape_fn([len, h, w, 1], |(n, _, j, _)| (j == 2 + n % 2) as u8 as f32);
    let x = y.map(|y| 0.2 + 0.6 * y + rng.gen_range(0. ..0.1));
    let samples = ids
        .iter()
        .enumerate()
        .map(|(i, id)| SampleMeta {
            id: id.to_string(),
            transposed: i == 0,
        })
        .collect();
    Split::new(x.into_dyn(), y.into_dyn(), Some(samples))
}

#[test]
fn bsd500_writes_predictions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut options = with_paths(Options::bsd500("run"), dir.path());
    options.n_epochs = 2;
    options.batch_size = 2;
    options.checkpoint_interval = 1;
    options.n_filters = 2;
    let mut rng = StdRng::seed_from_u64(3);
    let train = boundary_split(4, &["0.jpg", "1.jpg", "2.jpg", "3.jpg"], &mut rng)?;
    let valid = boundary_split(3, &["100075.jpg", "100080.jpg", "100098.jpg"], &mut rng)?;
    let splits = Splits {
        train: train.concat(valid.clone())?,
        test: valid.clone(),
        valid,
    };
    let network = BoundaryNet::new(options.mode, 1, options.n_filters, &mut rng);
    let mut trainer = Trainer::new(&options, network, Boundary::new(options.sparsity));
    assert!(trainer.fit(&splits)?.is_none());
    for epoch in 0..2 {
        let dir = options.test_path.join(format!("T_{epoch}"));
        let mut names: Vec<String> = fs::read_dir(&dir)?
            .map(|entry| entry.map(|x| x.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<_>>()?;
        names.sort();
        assert_eq!(names, ["100075.png", "100080.png", "100098.png"]);
        let transposed = image::open(dir.join("100075.png"))?;
        assert_eq!((transposed.width(), transposed.height()), (6, 5));
        let image = image::open(dir.join("100098.png"))?;
        assert_eq!((image.width(), image.height()), (5, 6));
    }
    let summaries = summaries(&options)?;
    assert_eq!(summaries.len(), 2);
    assert!(summaries
        .iter()
        .all(|x| x.train.mean_loss().is_finite() && x.valid.batches() == 1));
    Ok(())
}
