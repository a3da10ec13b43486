/*!
IDX arrays.

A big endian header `[0, 0, type, ndim]`, `ndim` u32 dimensions, then the row major payload.
Files on disk are gzip compressed.
*/
use crate::error::{Error, IdxDefect};
use anyhow::{Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

const U8: u8 = 0x08;
const F32: u8 = 0x0D;

/// A decoded IDX array.
#[derive(Clone, Debug, PartialEq)]
pub enum IdxArray {
    U8(ArrayD<u8>),
    F32(ArrayD<f32>),
}

impl IdxArray {
    /// The shape.
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::U8(array) => array.shape(),
            Self::F32(array) => array.shape(),
        }
    }
    /// Converts to f32, dividing u8 values by `u8_divisor`.
    pub fn into_f32(self, u8_divisor: f32) -> ArrayD<f32> {
        match self {
            Self::U8(array) => array.mapv(|x| x as f32 / u8_divisor),
            Self::F32(array) => array,
        }
    }
}

fn invalid(defect: IdxDefect) -> anyhow::Error {
    Error::InvalidIdx(defect).into()
}

/// Reads an uncompressed IDX array.
///
/// **Errors**
/// [`Error::InvalidIdx`] if the header is malformed or the payload does not match it.
pub fn read<R: Read>(mut reader: R) -> Result<IdxArray> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| invalid(IdxDefect::Magic))?;
    let [0, 0, kind, ndim] = magic else {
        return Err(invalid(IdxDefect::Magic));
    };
    let elem_size = match kind {
        U8 => 1,
        F32 => 4,
        _ => return Err(invalid(IdxDefect::ElementType(kind))),
    };
    let mut shape = Vec::with_capacity(ndim as usize);
    for _ in 0..ndim {
        let dim = reader
            .read_u32::<BigEndian>()
            .map_err(|_| invalid(IdxDefect::Truncated))?;
        shape.push(dim as usize);
    }
    let (len, bytes) = shape
        .iter()
        .try_fold(1usize, |len, dim| len.checked_mul(*dim))
        .and_then(|len| Some((len, len.checked_mul(elem_size)?)))
        .ok_or_else(|| invalid(IdxDefect::Truncated))?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    if data.len() != bytes {
        return Err(invalid(IdxDefect::Truncated));
    }
    let array = match kind {
        U8 => IdxArray::U8(ArrayD::from_shape_vec(IxDyn(&shape), data)?),
        _ => {
            let mut values = vec![0f32; len];
            data.as_slice()
                .read_f32_into::<BigEndian>(&mut values)
                .map_err(|_| invalid(IdxDefect::Truncated))?;
            IdxArray::F32(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
        }
    };
    Ok(array)
}

fn write_header<W: Write>(writer: &mut W, kind: u8, shape: &[usize]) -> Result<()> {
    writer.write_all(&[0, 0, kind, u8::try_from(shape.len())?])?;
    for dim in shape {
        writer.write_u32::<BigEndian>(u32::try_from(*dim)?)?;
    }
    Ok(())
}

/// Writes an uncompressed u8 IDX array.
pub fn write_u8<W: Write>(mut writer: W, array: ArrayViewD<u8>) -> Result<()> {
    write_header(&mut writer, U8, array.shape())?;
    for x in array.iter() {
        writer.write_u8(*x)?;
    }
    Ok(())
}

/// Writes an uncompressed f32 IDX array.
pub fn write_f32<W: Write>(mut writer: W, array: ArrayViewD<f32>) -> Result<()> {
    write_header(&mut writer, F32, array.shape())?;
    for x in array.iter() {
        writer.write_f32::<BigEndian>(*x)?;
    }
    Ok(())
}

/// Loads a gzip compressed IDX array from `path`.
pub fn load(path: &Path) -> Result<IdxArray> {
    let file = File::open(path).with_context(|| format!("Unable to open {path:?}!"))?;
    read(GzDecoder::new(BufReader::new(file))).with_context(|| format!("Unable to load {path:?}!"))
}

/// Saves `array` gzip compressed to `path`.
pub fn save(path: &Path, array: &IdxArray) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Unable to create {path:?}!"))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    match array {
        IdxArray::U8(array) => write_u8(&mut encoder, array.view())?,
        IdxArray::F32(array) => write_f32(&mut encoder, array.view())?,
    }
    encoder.finish()?.flush()?;
    Ok(())
}
