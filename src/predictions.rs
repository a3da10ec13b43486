/*!
Boundary map images.

Validation predictions of the "fuse" output are mapped through a sigmoid, scaled to 8 bits and
written as grayscale PNGs to `<root>/T_<epoch>/<id>.png`.
*/
use crate::{
    dataset::Split,
    error::Error,
    learn::{
        criterion::Boundary,
        network::{Network, Predictions},
    },
};
use anyhow::{Context, Result};
use image::GrayImage;
use ndarray::{ArrayView2, Axis, Ix4};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Converts boundary logits `[h, w]` to an image.
///
/// Each pixel is `(255 * sigmoid(x)) as u8`. If `transposed`, the map is transposed first.
pub fn boundary_image(logits: ArrayView2<f32>, transposed: bool) -> Result<GrayImage> {
    let map = if transposed {
        logits.reversed_axes()
    } else {
        logits
    };
    let (height, width) = map.dim();
    let pixels = map
        .iter()
        .map(|x| (255. / (1. + (-x).exp())) as u8)
        .collect();
    GrayImage::from_raw(u32::try_from(width)?, u32::try_from(height)?, pixels)
        .context("Image buffer does not match dimensions!")
}

/// The file name of the prediction for sample `id`, with the extension replaced by "png".
pub fn file_name(id: &str) -> PathBuf {
    let name = Path::new(id).file_name().unwrap_or(id.as_ref());
    Path::new(name).with_extension("png")
}

/// Writes prediction images.
#[derive(Clone, Debug)]
pub struct PredictionWriter {
    root: PathBuf,
}

impl PredictionWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
    /// The directory of `epoch`, "T_`epoch`".
    pub fn epoch_dir(&self, epoch: usize) -> PathBuf {
        self.root.join(format!("T_{epoch}"))
    }
    /// Infers every sample of `split` in batches of `batch_size` and writes one image each.
    ///
    /// The last partial batch is included. Training should be disabled on `network`.
    ///
    /// Returns the directory written to.
    pub fn write(
        &self,
        epoch: usize,
        network: &mut dyn Network,
        split: &Split,
        batch_size: usize,
    ) -> Result<PathBuf> {
        let dir = self.epoch_dir(epoch);
        fs::create_dir_all(&dir).with_context(|| format!("Unable to create {dir:?}!"))?;
        let mut samples = split.samples().iter();
        for x in split.x().axis_chunks_iter(Axis(0), batch_size.max(1)) {
            let mut predictions: Predictions = network.forward(x)?;
            let fuse = predictions
                .remove(Boundary::FUSE)
                .ok_or_else(|| Error::MissingOutput(Boundary::FUSE.to_string()))?
                .into_dimensionality::<Ix4>()?;
            for (map, sample) in fuse.outer_iter().zip(&mut samples) {
                let image = boundary_image(map.index_axis(Axis(2), 0), sample.transposed)?;
                let path = dir.join(file_name(&sample.id));
                image
                    .save(&path)
                    .with_context(|| format!("Unable to save {path:?}!"))?;
            }
        }
        Ok(dir)
    }
}
