use std::io::Cursor;

use image::{imageops::FilterType, ImageFormat};

/// Edge length of stored avatars, in pixels.
pub const AVATAR_SIZE: u32 = 250;

/// Crop to a centered square, scale to `AVATAR_SIZE` and re-encode as PNG.
pub(super) fn square_avatar(raw: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(raw)?;
    let cropped = img.resize_to_fill(AVATAR_SIZE, AVATAR_SIZE, FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::new());
    cropped.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::png_fixture;

    #[test]
    fn crops_landscape_to_square() {
        let out = square_avatar(&png_fixture(400, 300)).expect("transform");
        let img = image::load_from_memory(&out).expect("decode output");
        assert_eq!((img.width(), img.height()), (AVATAR_SIZE, AVATAR_SIZE));
    }

    #[test]
    fn upscales_small_images() {
        let out = square_avatar(&png_fixture(40, 90)).expect("transform");
        let img = image::load_from_memory(&out).expect("decode output");
        assert_eq!((img.width(), img.height()), (AVATAR_SIZE, AVATAR_SIZE));
    }

    #[test]
    fn rejects_non_image_bytes() {
        assert!(square_avatar(b"definitely not an image").is_err());
    }
}
