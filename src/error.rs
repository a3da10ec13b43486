/// Errors raised by the training pipeline.
///
/// Functions in this crate return [`anyhow::Result`], these are the typed causes that can be
/// recovered with [`anyhow::Error::downcast_ref`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The model mode is not one of the supported builders.
    #[error("Must execute with a valid --mode flag: \"hnet\" or \"baseline\" (found {0:?})")]
    InvalidMode(String),
    /// Inputs and targets do not have the same number of samples.
    #[error("Inputs have {inputs} samples but targets have {targets}!")]
    LengthMismatch {
        /// Number of input samples.
        inputs: usize,
        /// Number of target samples.
        targets: usize,
    },
    /// The batch size is zero or larger than the dataset.
    #[error("Batch size {batch_size} is invalid for {len} samples!")]
    BatchSize {
        /// The requested batch size.
        batch_size: usize,
        /// Number of samples.
        len: usize,
    },
    /// A named prediction output was expected but not produced.
    #[error("Missing prediction output {0:?}!")]
    MissingOutput(String),
    /// An array did not have the expected shape.
    #[error("{name} expected shape {expected:?}, found {found:?}!")]
    ShapeMismatch {
        /// What was being checked.
        name: String,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        found: Vec<usize>,
    },
    /// A malformed IDX file.
    #[error("Invalid IDX data: {0}")]
    InvalidIdx(IdxDefect),
}

/// What was wrong with an IDX file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum IdxDefect {
    /// The magic number did not start with two zero bytes.
    #[error("bad magic number")]
    Magic,
    /// The element type code is not supported.
    #[error("unsupported element type 0x{0:02X}")]
    ElementType(u8),
    /// The payload length does not match the header.
    #[error("payload does not match header dimensions")]
    Truncated,
}

impl Error {
    pub(crate) fn shape_mismatch(
        name: impl Into<String>,
        expected: &[usize],
        found: &[usize],
    ) -> Self {
        Self::ShapeMismatch {
            name: name.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}
