//! TIFF reading/writing with the `tiff` crate
//!
//! Reads single-page, chunky (interleaved) TIFFs of any sample type into an
//! [`InMemoryImage`]; writes class-index rasters as 8-bit grayscale and
//! probability stacks as one 32-bit float page per class.

use crate::error::{Error, Result};
use crate::image::InMemoryImage;
use crate::raster::{BandStack, Raster};
use crate::resolution::PixelCalibration;
use ndarray::Array3;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{Gray32Float, Gray8};
use tiff::encoder::TiffEncoder;
use tiff::tags::{ResolutionUnit, Tag};
use tiff::ColorType;

fn tiff_err(context: &str) -> impl Fn(tiff::TiffError) -> Error + '_ {
    move |e| Error::Other(format!("{context}: {e}"))
}

/// Read a TIFF file into an in-memory image.
pub fn read_tiff_image<P: AsRef<Path>>(path: P) -> Result<InMemoryImage> {
    let file = File::open(path.as_ref())?;
    decode_image(BufReader::new(file))
}

/// Read a TIFF from a byte buffer.
pub fn read_tiff_image_from_buffer(data: &[u8]) -> Result<InMemoryImage> {
    decode_image(Cursor::new(data))
}

fn decode_image<R>(reader: R) -> Result<InMemoryImage>
where
    R: std::io::Read + std::io::Seek,
{
    let mut decoder = Decoder::new(reader).map_err(tiff_err("TIFF decode error"))?;
    let (width, height) = decoder
        .dimensions()
        .map_err(tiff_err("Cannot read dimensions"))?;
    let n_channels = match decoder
        .colortype()
        .map_err(tiff_err("Cannot read color type"))?
    {
        ColorType::Gray(_) => 1,
        ColorType::GrayA(_) => 2,
        ColorType::RGB(_) | ColorType::YCbCr(_) => 3,
        ColorType::RGBA(_) | ColorType::CMYK(_) => 4,
        ColorType::Multiband { num_samples, .. } => num_samples as usize,
        other => {
            return Err(Error::UnsupportedDataType(format!(
                "TIFF color type {other:?}"
            )));
        }
    };

    let rows = height as usize;
    let cols = width as usize;
    let calibration = read_calibration(&mut decoder);

    let result = decoder
        .read_image()
        .map_err(tiff_err("Cannot read image data"))?;
    let values: Vec<f32> = match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ));
        }
    };

    if values.len() != rows * cols * n_channels {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    tracing::debug!(rows, cols, n_channels, ?calibration, "decoded TIFF");

    // Samples are interleaved per pixel
    let data = Array3::from_shape_fn((n_channels, rows, cols), |(ch, r, c)| {
        values[(r * cols + c) * n_channels + ch]
    });
    Ok(InMemoryImage::new(data).with_calibration(calibration))
}

/// Pixel size from the XResolution/YResolution tags, when given per cm or inch.
fn read_calibration<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> PixelCalibration {
    let microns_per_unit = match decoder
        .find_tag_unsigned::<u16>(Tag::ResolutionUnit)
        .ok()
        .flatten()
        .and_then(ResolutionUnit::from_u16)
    {
        Some(ResolutionUnit::Centimeter) => 10_000.0,
        Some(ResolutionUnit::Inch) => 25_400.0,
        _ => return PixelCalibration::default(),
    };
    let mut size = |tag: Tag| -> Option<f64> {
        let pixels_per_unit = match decoder.find_tag(tag).ok().flatten()? {
            tiff::decoder::ifd::Value::Rational(n, d) if d != 0 => n as f64 / d as f64,
            _ => return None,
        };
        (pixels_per_unit > 0.0).then(|| microns_per_unit / pixels_per_unit)
    };
    PixelCalibration {
        pixel_width_microns: size(Tag::XResolution),
        pixel_height_microns: size(Tag::YResolution),
    }
}

/// Write a class-index raster as an 8-bit grayscale TIFF.
pub fn write_classification_tiff<P: AsRef<Path>>(raster: &Raster<u8>, path: P) -> Result<()> {
    let file = File::create(path.as_ref())?;
    encode_classification(raster, BufWriter::new(file))
}

/// Encode a class-index raster into a byte buffer.
pub fn write_classification_tiff_to_buffer(raster: &Raster<u8>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_classification(raster, Cursor::new(&mut buf))?;
    Ok(buf)
}

fn encode_classification<W>(raster: &Raster<u8>, writer: W) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    let mut encoder = TiffEncoder::new(writer).map_err(tiff_err("TIFF encoder error"))?;
    let (rows, cols) = raster.shape();
    let data: Vec<u8> = raster.data().iter().copied().collect();
    encoder
        .write_image::<Gray8>(cols as u32, rows as u32, &data)
        .map_err(tiff_err("Cannot write image data"))
}

/// Write a probability stack as a multi-page 32-bit float TIFF, one page per band.
pub fn write_probability_tiff<P: AsRef<Path>>(bands: &BandStack, path: P) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut encoder =
        TiffEncoder::new(BufWriter::new(file)).map_err(tiff_err("TIFF encoder error"))?;
    let (rows, cols) = (bands.rows(), bands.cols());
    for b in 0..bands.n_bands() {
        let data: Vec<f32> = bands.band(b).iter().copied().collect();
        encoder
            .write_image::<Gray32Float>(cols as u32, rows as u32, &data)
            .map_err(tiff_err("Cannot write image data"))?;
    }
    Ok(())
}
