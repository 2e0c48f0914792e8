use image::{GenericImageView, ImageFormat};

use crate::error::{ExecError, Result};

/// Pixel dimensions of a PNG, decoded in full so truncated or corrupt
/// files are rejected.
pub fn dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(|e| ExecError::resource(format!("screenshot is not a valid PNG image: {e}")))?;
    Ok(image.dimensions())
}

#[cfg(test)]
pub(crate) fn fixture(width: u32, height: u32) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image::RgbaImage::new(width, height)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}
