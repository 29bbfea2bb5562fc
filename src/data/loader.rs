use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::{CoordinateSpace, WORKING_SIZE};
use image::error::{DecodingError, ImageFormatHint};
use image::imageops::{self, FilterType};
use image::{
    DynamicImage, GrayImage, ImageBuffer, ImageError, ImageFormat, Luma, Rgb, RgbImage, RgbaImage,
};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;

/// A source image reduced to the working space, with its native size.
#[derive(Debug, Clone)]
pub struct WorkingImage {
    pub native: CoordinateSpace,
    pub image: RgbImage,
}

pub fn load_image<P: AsRef<Path>>(path: P) -> CoreResult<DynamicImage> {
    let path = path.as_ref();
    image::open(path).map_err(|source| MesoscalerError::Image {
        path: path.display().to_string(),
        source,
    })
}

/// Load a source image and prepare the 512x512 three-channel working copy.
pub fn load_working_image<P: AsRef<Path>>(path: P) -> CoreResult<WorkingImage> {
    working_image(&load_image(path)?)
}

/// Working copy of one page of a multi-page TIFF; `index` counts from 0.
pub fn load_working_frame<P: AsRef<Path>>(path: P, index: usize) -> CoreResult<WorkingImage> {
    working_image(&load_tiff_frame(path.as_ref(), index)?)
}

fn working_image(img: &DynamicImage) -> CoreResult<WorkingImage> {
    let native = CoordinateSpace::new(img.width(), img.height());
    validate_image_size(native)?;
    Ok(WorkingImage {
        native,
        image: to_working_rgb(&grayscale_mean(img)),
    })
}

pub fn is_tiff(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| e == "tif" || e == "tiff")
}

fn tiff_error(path: &Path, reason: impl ToString) -> MesoscalerError {
    MesoscalerError::Image {
        path: path.display().to_string(),
        source: ImageError::Decoding(DecodingError::new(
            ImageFormatHint::Exact(ImageFormat::Tiff),
            reason.to_string(),
        )),
    }
}

fn open_tiff(path: &Path) -> CoreResult<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| MesoscalerError::Image {
        path: path.display().to_string(),
        source: ImageError::IoError(e),
    })?;
    Decoder::new(BufReader::new(file)).map_err(|e| tiff_error(path, e))
}

/// Number of pages in a TIFF; 1 for every other format.
pub fn count_frames(path: &Path) -> CoreResult<usize> {
    if !is_tiff(path) {
        return Ok(1);
    }
    let mut decoder = open_tiff(path)?;
    let mut frames = 1;
    while decoder.more_images() {
        decoder.next_image().map_err(|e| tiff_error(path, e))?;
        frames += 1;
    }
    Ok(frames)
}

/// Decode page `index` of a TIFF.
pub fn load_tiff_frame(path: &Path, index: usize) -> CoreResult<DynamicImage> {
    let mut decoder = open_tiff(path)?;
    for _ in 0..index {
        if !decoder.more_images() {
            return Err(tiff_error(path, format!("frame {} out of range", index)));
        }
        decoder.next_image().map_err(|e| tiff_error(path, e))?;
    }

    let (w, h) = decoder.dimensions().map_err(|e| tiff_error(path, e))?;
    let color = decoder.colortype().map_err(|e| tiff_error(path, e))?;
    let data = decoder.read_image().map_err(|e| tiff_error(path, e))?;
    let img = match (color, data) {
        (ColorType::Gray(8), DecodingResult::U8(buf)) => {
            GrayImage::from_raw(w, h, buf).map(DynamicImage::ImageLuma8)
        }
        (ColorType::Gray(16), DecodingResult::U16(buf)) => {
            ImageBuffer::<Luma<u16>, _>::from_raw(w, h, buf).map(DynamicImage::ImageLuma16)
        }
        (ColorType::RGB(8), DecodingResult::U8(buf)) => {
            RgbImage::from_raw(w, h, buf).map(DynamicImage::ImageRgb8)
        }
        (ColorType::RGB(16), DecodingResult::U16(buf)) => {
            ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, buf).map(DynamicImage::ImageRgb16)
        }
        (ColorType::RGBA(8), DecodingResult::U8(buf)) => {
            RgbaImage::from_raw(w, h, buf).map(DynamicImage::ImageRgba8)
        }
        (color, _) => {
            return Err(tiff_error(path, format!("unsupported pixel layout {:?}", color)));
        }
    };
    img.ok_or_else(|| tiff_error(path, format!("frame {} is shorter than {}x{}", index, w, h)))
}

pub fn validate_image_size(space: CoordinateSpace) -> CoreResult<()> {
    space.validate()
}

/// Plain average of the colour channels; single-channel images pass through.
pub fn grayscale_mean(img: &DynamicImage) -> GrayImage {
    if !img.color().has_color() {
        return img.to_luma8();
    }
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        Luma([((r as u16 + g as u16 + b as u16) / 3) as u8])
    })
}

/// Linear resize to the working space, replicated into three channels.
pub fn to_working_rgb(gray: &GrayImage) -> RgbImage {
    let resized = imageops::resize(gray, WORKING_SIZE, WORKING_SIZE, FilterType::Triangle);
    DynamicImage::ImageLuma8(resized).to_rgb8()
}
