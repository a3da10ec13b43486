/*!
Datasets.

Both tasks use the same layout in the data directory:
- `train_x`, `train_y`, `valid_x`, `valid_y`, `test_x`, `test_y` as gzip compressed IDX arrays
  named `<key>.idx.gz` (see [`idx`]),
- optionally `<split>_meta.json`, a list of [`SampleMeta`] aligned with the split.

u8 inputs are scaled to `[0, 1]`, targets are converted to f32 as is.
*/
use crate::error::Error;
use anyhow::{Context, Result};
use ndarray::{concatenate, ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// IDX arrays.
pub mod idx;

/// Per sample metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMeta {
    /// Identifier, used as the prediction file name.
    pub id: String,
    /// Whether the sample was transposed when packed, predictions are transposed back.
    #[serde(default)]
    pub transposed: bool,
}

impl SampleMeta {
    fn from_index(index: usize) -> Self {
        Self {
            id: format!("{index}.png"),
            transposed: false,
        }
    }
}

/// Aligned inputs, targets and metadata.
#[derive(Clone, Debug)]
pub struct Split {
    x: ArrayD<f32>,
    y: ArrayD<f32>,
    samples: Vec<SampleMeta>,
}

impl Split {
    /// Creates a split.
    ///
    /// If `samples` is `None`, ids are "`index`.png".
    ///
    /// **Errors**
    /// [`Error::LengthMismatch`] if the first axes or the metadata differ in length.
    pub fn new(x: ArrayD<f32>, y: ArrayD<f32>, samples: Option<Vec<SampleMeta>>) -> Result<Self> {
        let len = x.shape().first().copied().unwrap_or(0);
        let targets = y.shape().first().copied().unwrap_or(0);
        if len != targets {
            return Err(Error::LengthMismatch {
                inputs: len,
                targets,
            }
            .into());
        }
        let samples = samples.unwrap_or_else(|| (0..len).map(SampleMeta::from_index).collect());
        if samples.len() != len {
            return Err(Error::LengthMismatch {
                inputs: len,
                targets: samples.len(),
            }
            .into());
        }
        Ok(Self { x, y, samples })
    }
    /// Loads `<name>_x`, `<name>_y` and `<name>_meta.json` from `dir`.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let x = idx::load(&dir.join(format!("{name}_x.idx.gz")))?.into_f32(255.);
        let y = idx::load(&dir.join(format!("{name}_y.idx.gz")))?.into_f32(1.);
        let meta_path = dir.join(format!("{name}_meta.json"));
        let samples = if meta_path.exists() {
            let json = fs::read_to_string(&meta_path)
                .with_context(|| format!("Unable to read {meta_path:?}!"))?;
            let samples = serde_json::from_str(&json)
                .with_context(|| format!("Unable to parse {meta_path:?}!"))?;
            Some(samples)
        } else {
            None
        };
        Self::new(x, y, samples).with_context(|| format!("Invalid {name} split!"))
    }
    /// Saves the split to `dir`, inverse of [`.load()`](Self::load), with f32 arrays.
    pub fn save(&self, dir: &Path, name: &str) -> Result<()> {
        idx::save(
            &dir.join(format!("{name}_x.idx.gz")),
            &idx::IdxArray::F32(self.x.clone()),
        )?;
        idx::save(
            &dir.join(format!("{name}_y.idx.gz")),
            &idx::IdxArray::F32(self.y.clone()),
        )?;
        let json = serde_json::to_string_pretty(&self.samples)?;
        fs::write(dir.join(format!("{name}_meta.json")), json)?;
        Ok(())
    }
    /// Appends `other`.
    pub fn concat(self, other: Self) -> Result<Self> {
        let x = concatenate(Axis(0), &[self.x.view(), other.x.view()])?;
        let y = concatenate(Axis(0), &[self.y.view(), other.y.view()])?;
        let mut samples = self.samples;
        samples.extend(other.samples);
        Self::new(x, y, Some(samples))
    }
    /// The number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    /// Whether there are no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    /// The inputs.
    pub fn x(&self) -> &ArrayD<f32> {
        &self.x
    }
    /// The targets.
    pub fn y(&self) -> &ArrayD<f32> {
        &self.y
    }
    /// The metadata.
    pub fn samples(&self) -> &[SampleMeta] {
        &self.samples
    }
}

/// The train, validation and test splits.
#[derive(Clone, Debug)]
pub struct Splits {
    pub train: Split,
    pub valid: Split,
    pub test: Split,
}

impl Splits {
    /// Loads all splits from `dir`.
    ///
    /// If `combine_train_val` is true, the validation split is appended to the training split.
    /// It is still used for validation.
    ///
    /// **Errors**
    /// - A file is missing or malformed.
    /// - The arrays of a split are not aligned.
    pub fn load(dir: &Path, combine_train_val: bool) -> Result<Self> {
        let mut train = Split::load(dir, "train")?;
        let valid = Split::load(dir, "valid")?;
        let test = Split::load(dir, "test")?;
        if combine_train_val {
            train = train.concat(valid.clone())?;
        }
        Ok(Self { train, valid, test })
    }
}
