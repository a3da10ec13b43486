use anyhow::Result;
use hnet::{batch::minibatches, Error};
use ndarray::{Array, Array1};
use rand::{rngs::StdRng, SeedableRng};
use std::collections::BTreeSet;

fn data(len: usize) -> (Array<f32, ndarray::IxDyn>, Array<u8, ndarray::IxDyn>) {
    let x = Array::from_shape_fn([len, 3], |(i, j)| (10 * i + j) as f32).into_dyn();
    let y = Array1::from_iter((0..len).map(|i| i as u8)).into_dyn();
    (x, y)
}

#[test]
fn unshuffled_batches_in_order() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0);
    for len in 1..20 {
        let (x, y) = data(len);
        for batch_size in 1..=len {
            let batches: Vec<_> =
                minibatches(x.view(), y.view(), batch_size, false, &mut rng)?.collect();
            assert_eq!(batches.len(), len / batch_size);
            let mut targets = Vec::new();
            for batch in batches.iter() {
                assert_eq!(batch.len(), batch_size);
                assert_eq!(batch.x.shape(), [batch_size, 3]);
                targets.extend(batch.y.iter().copied());
            }
            let expected: Vec<u8> = (0..(batch_size * (len / batch_size)) as u8).collect();
            assert_eq!(targets, expected);
        }
    }
    Ok(())
}

#[test]
fn shuffled_batches_repeat_with_seed() -> Result<()> {
    let (x, y) = data(10);
    let indices = |seed| -> Result<Vec<Vec<usize>>> {
        let mut rng = StdRng::seed_from_u64(seed);
        Ok(minibatches(x.view(), y.view(), 5, true, &mut rng)?
            .map(|batch| batch.indices)
            .collect())
    };
    let first = indices(42)?;
    assert_eq!(first, indices(42)?);
    assert_eq!(first.len(), 2);
    let union: BTreeSet<usize> = first.iter().flatten().copied().collect();
    assert_eq!(union.len(), 10);
    Ok(())
}

#[test]
fn shuffled_batches_keep_pairs() -> Result<()> {
    let (x, y) = data(10);
    let mut rng = StdRng::seed_from_u64(7);
    for batch in minibatches(x.view(), y.view(), 5, true, &mut rng)? {
        for ((x, y), index) in batch.x.outer_iter().zip(batch.y.iter()).zip(&batch.indices) {
            assert_eq!(*y as usize, *index);
            assert_eq!(x[0], (10 * index) as f32);
        }
    }
    Ok(())
}

#[test]
fn remainder_dropped() -> Result<()> {
    let (x, y) = data(7);
    let mut rng = StdRng::seed_from_u64(0);
    for shuffle in [false, true] {
        let batches = minibatches(x.view(), y.view(), 3, shuffle, &mut rng)?;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches.count(), 2);
    }
    Ok(())
}

#[test]
fn invalid_inputs() {
    let (x, _) = data(4);
    let (_, y) = data(5);
    let mut rng = StdRng::seed_from_u64(0);
    let error = minibatches(x.view(), y.view(), 2, false, &mut rng).err().unwrap();
    assert!(matches!(
        error.downcast_ref::<Error>(),
        Some(Error::LengthMismatch {
            inputs: 4,
            targets: 5
        })
    ));
    let (x, y) = data(4);
    for batch_size in [0, 5] {
        let error = minibatches(x.view(), y.view(), batch_size, false, &mut rng)
            .err()
            .unwrap();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::BatchSize { .. })
        ));
    }
}
