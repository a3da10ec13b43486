/*!
Minibatching.

[`minibatches`] slices aligned inputs and targets into equal size batches along the first axis.
The final partial batch is dropped.

```
# use hnet::batch::minibatches;
# use ndarray::Array;
# use rand::{rngs::StdRng, SeedableRng};
# fn main() -> anyhow::Result<()> {
let x = Array::from_shape_vec([7, 2], (0..14).collect::<Vec<u32>>())?.into_dyn();
let y = Array::from_shape_vec(7, (0..7).collect::<Vec<u32>>())?.into_dyn();
let mut rng = StdRng::seed_from_u64(0);
let batches: Vec<_> = minibatches(x.view(), y.view(), 3, false, &mut rng)?.collect();
assert_eq!(batches.len(), 2);
assert_eq!(batches[1].indices, [3, 4, 5]);
# Ok(())
# }
```
*/
use crate::error::Error;
use anyhow::Result;
use ndarray::{s, ArrayD, ArrayViewD, Axis, Ix4, Slice};
use rand::{seq::SliceRandom, Rng};
use std::{iter::FusedIterator, ops::Range};

/// A batch of inputs and targets.
#[derive(Clone, Debug)]
pub struct Batch<X, Y> {
    /// Inputs.
    pub x: ArrayD<X>,
    /// Targets.
    pub y: ArrayD<Y>,
    /// Indices of the samples in the source arrays.
    pub indices: Vec<usize>,
}

impl<X, Y> Batch<X, Y> {
    /// The number of samples.
    pub fn len(&self) -> usize {
        self.indices.len()
    }
    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Iterator over [`Batch`]es.
///
/// Created by [`minibatches`].
pub struct Minibatches<'a, X, Y> {
    inputs: ArrayViewD<'a, X>,
    targets: ArrayViewD<'a, Y>,
    batch_size: usize,
    order: Option<Vec<usize>>,
    starts: std::iter::StepBy<Range<usize>>,
}

/// Iterates over `inputs` and `targets` in batches of `batch_size`.
///
/// Yields `len / batch_size` batches, the remainder is dropped. If `shuffle` is true, a single
/// permutation is drawn from `rng` when this is called and the batches slice through it in
/// order. Otherwise the batches are contiguous.
///
/// **Errors**
/// - [`Error::LengthMismatch`] if `inputs` and `targets` have a different number of samples.
/// - [`Error::BatchSize`] if `batch_size` is 0 or exceeds the number of samples.
pub fn minibatches<'a, X, Y, R>(
    inputs: ArrayViewD<'a, X>,
    targets: ArrayViewD<'a, Y>,
    batch_size: usize,
    shuffle: bool,
    rng: &mut R,
) -> Result<Minibatches<'a, X, Y>>
where
    R: Rng + ?Sized,
{
    let len = inputs.shape().first().copied().unwrap_or(0);
    let target_len = targets.shape().first().copied().unwrap_or(0);
    if len != target_len {
        return Err(Error::LengthMismatch {
            inputs: len,
            targets: target_len,
        }
        .into());
    }
    if batch_size == 0 || batch_size > len {
        return Err(Error::BatchSize { batch_size, len }.into());
    }
    let order = if shuffle {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(rng);
        Some(indices)
    } else {
        None
    };
    let end = len - len % batch_size;
    Ok(Minibatches {
        inputs,
        targets,
        batch_size,
        order,
        starts: (0..end).step_by(batch_size),
    })
}

impl<X: Clone, Y: Clone> Iterator for Minibatches<'_, X, Y> {
    type Item = Batch<X, Y>;
    fn next(&mut self) -> Option<Self::Item> {
        let start = self.starts.next()?;
        let end = start + self.batch_size;
        if let Some(order) = self.order.as_ref() {
            let indices = order[start..end].to_vec();
            Some(Batch {
                x: self.inputs.select(Axis(0), &indices),
                y: self.targets.select(Axis(0), &indices),
                indices,
            })
        } else {
            let slice = Slice::from(start..end);
            Some(Batch {
                x: self.inputs.slice_axis(Axis(0), slice).to_owned(),
                y: self.targets.slice_axis(Axis(0), slice).to_owned(),
                indices: (start..end).collect(),
            })
        }
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.starts.size_hint()
    }
}

impl<X: Clone, Y: Clone> ExactSizeIterator for Minibatches<'_, X, Y> {}

impl<X: Clone, Y: Clone> FusedIterator for Minibatches<'_, X, Y> {}

/// Random flips of spatial batches.
///
/// Inputs and targets are NHWC, each sample is flipped horizontally and / or vertically with
/// probability 0.5, the same flips are applied to its target.
#[derive(Clone, Copy, Debug, Default)]
pub struct Augment;

impl Augment {
    /// Flips samples of `batch` in place.
    pub fn apply<R: Rng + ?Sized>(&self, batch: &mut Batch<f32, f32>, rng: &mut R) -> Result<()> {
        let mut x = batch.x.view_mut().into_dimensionality::<Ix4>()?;
        let mut y = batch.y.view_mut().into_dimensionality::<Ix4>()?;
        if x.shape()[..3] != y.shape()[..3] {
            return Err(
                Error::shape_mismatch("augment target", &x.shape()[..3], &y.shape()[..3]).into(),
            );
        }
        for (mut x, mut y) in x.outer_iter_mut().zip(y.outer_iter_mut()) {
            if rng.gen_bool(0.5) {
                let flipped = x.slice(s![.., ..;-1, ..]).to_owned();
                x.assign(&flipped);
                let flipped = y.slice(s![.., ..;-1, ..]).to_owned();
                y.assign(&flipped);
            }
            if rng.gen_bool(0.5) {
                let flipped = x.slice(s![..;-1, .., ..]).to_owned();
                x.assign(&flipped);
                let flipped = y.slice(s![..;-1, .., ..]).to_owned();
                y.assign(&flipped);
            }
        }
        Ok(())
    }
}
