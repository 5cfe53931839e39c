//! Perceptual hashing — the external collaborator referenced throughout
//! §4.4, made concrete here as an 8×8 average-hash over the `image` crate's
//! decode/resize/grayscale pipeline (functionally equivalent to the
//! source's `imagehash.average_hash`, not a line-by-line port of it).

use image::{imageops::FilterType, DynamicImage};
use thiserror::Error;

use crate::types::ImageHash;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Compute the average-hash of image bytes, rendered as lowercase hex
/// ASCII (matching the source's `str(imagehash.average_hash(...))`).
pub fn average_hash(bytes: &[u8]) -> Result<ImageHash, HashError> {
    let img = image::load_from_memory(bytes)?;
    Ok(average_hash_of(&img))
}

fn average_hash_of(img: &DynamicImage) -> ImageHash {
    let small = img.resize_exact(8, 8, FilterType::Lanczos3).to_luma8();
    let pixels: Vec<u64> = small.pixels().map(|p| p[0] as u64).collect();
    let mean = pixels.iter().sum::<u64>() / pixels.len() as u64;

    let mut bits: u64 = 0;
    for (i, &p) in pixels.iter().enumerate() {
        if p > mean {
            bits |= 1 << i;
        }
    }
    format!("{bits:016x}").into_bytes()
}

/// Total pixel count — the primary duplicate tie-break criterion (§4.4).
pub fn pixel_count(bytes: &[u8]) -> Result<u64, HashError> {
    let img = image::load_from_memory(bytes)?;
    Ok(img.width() as u64 * img.height() as u64)
}

/// Number of distinct colors — the secondary duplicate tie-break criterion.
pub fn color_count(bytes: &[u8]) -> Result<usize, HashError> {
    let img = image::load_from_memory(bytes)?;
    let rgba = img.to_rgba8();
    let distinct: std::collections::HashSet<[u8; 4]> =
        rgba.pixels().map(|p| p.0).collect();
    Ok(distinct.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_png(w: u32, h: u32, color: [u8; 3]) -> Vec<u8> {
        let mut img = image::RgbImage::new(w, h);
        for p in img.pixels_mut() {
            *p = image::Rgb(color);
        }
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn identical_images_hash_identically() {
        let a = solid_png(16, 16, [10, 20, 30]);
        let b = solid_png(16, 16, [10, 20, 30]);
        assert_eq!(average_hash(&a).unwrap(), average_hash(&b).unwrap());
    }

    #[test]
    fn pixel_count_matches_dimensions() {
        let a = solid_png(4, 5, [1, 2, 3]);
        assert_eq!(pixel_count(&a).unwrap(), 20);
    }

    #[test]
    fn color_count_is_one_for_a_solid_fill() {
        let a = solid_png(10, 10, [1, 2, 3]);
        assert_eq!(color_count(&a).unwrap(), 1);
    }

    #[test]
    fn bigger_image_has_more_pixels_for_tie_break() {
        let small = solid_png(4, 4, [0, 0, 0]);
        let big = solid_png(40, 40, [0, 0, 0]);
        assert!(pixel_count(&big).unwrap() > pixel_count(&small).unwrap());
    }
}
