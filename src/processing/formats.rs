//! Source recognition, encoding and atomic output writes

use std::borrow::Cow;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::DynamicImage;
use tracing::debug;

use crate::config::TargetFormat;
use crate::error::{ConvertError, Result};

/// Check whether `path` carries one of the (lower-cased) source extensions
pub fn has_source_extension<P: AsRef<Path>>(path: P, extensions: &[String]) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Convert our TargetFormat to image crate format
impl From<TargetFormat> for image::ImageFormat {
    fn from(format: TargetFormat) -> Self {
        match format {
            TargetFormat::Png => image::ImageFormat::Png,
            TargetFormat::Jpeg => image::ImageFormat::Jpeg,
            TargetFormat::Bmp => image::ImageFormat::Bmp,
        }
    }
}

/// Adapt the pixel layout to what the target encoder accepts.
///
/// JPEG takes 8-bit luma or RGB only, BMP 8-bit channels, and PNG has no
/// floating point variant.
pub fn prepare_for_encoding(image: &DynamicImage, format: TargetFormat) -> Cow<'_, DynamicImage> {
    use DynamicImage::*;

    match (format, image) {
        (TargetFormat::Jpeg, ImageLuma8(_) | ImageRgb8(_)) => Cow::Borrowed(image),
        (TargetFormat::Jpeg, ImageLuma16(_) | ImageLumaA8(_) | ImageLumaA16(_)) => {
            Cow::Owned(ImageLuma8(image.to_luma8()))
        }
        (TargetFormat::Jpeg, _) => Cow::Owned(ImageRgb8(image.to_rgb8())),

        (TargetFormat::Bmp, ImageLuma8(_) | ImageLumaA8(_) | ImageRgb8(_) | ImageRgba8(_)) => {
            Cow::Borrowed(image)
        }
        (TargetFormat::Bmp, _) => Cow::Owned(ImageRgba8(image.to_rgba8())),

        (TargetFormat::Png, ImageRgb32F(_) | ImageRgba32F(_)) => {
            Cow::Owned(ImageRgba16(image.to_rgba16()))
        }
        (TargetFormat::Png, _) => Cow::Borrowed(image),
    }
}

/// Encode `image` as `format` into `writer`
pub fn encode<W: Write>(
    image: &DynamicImage,
    mut writer: W,
    format: TargetFormat,
    jpeg_quality: u8,
) -> image::ImageResult<()> {
    let image = prepare_for_encoding(image, format);

    match format {
        TargetFormat::Png => image.write_with_encoder(PngEncoder::new(writer)),
        TargetFormat::Jpeg => {
            image.write_with_encoder(JpegEncoder::new_with_quality(writer, jpeg_quality))
        }
        TargetFormat::Bmp => image.write_with_encoder(BmpEncoder::new(&mut writer)),
    }
}

/// Encode into a hidden sibling of `destination` and rename it into place.
///
/// A later run never sees a truncated file under the final name: either the
/// rename happened and the file is complete, or the temporary file is removed
/// when it goes out of scope. Returns the number of bytes written.
pub fn write_atomically(
    image: &DynamicImage,
    destination: &Path,
    format: TargetFormat,
    jpeg_quality: u8,
) -> Result<u64> {
    let write_error = |message: String| ConvertError::write(destination.to_path_buf(), message);

    let parent = destination
        .parent()
        .ok_or_else(|| write_error("destination has no parent directory".to_string()))?;
    let file_name = destination
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("output");

    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(|e| write_error(e.to_string()))?;

    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        encode(image, &mut writer, format, jpeg_quality).map_err(|e| write_error(e.to_string()))?;
        writer.flush().map_err(|e| write_error(e.to_string()))?;
    }

    let file = temp.as_file();
    file.sync_all().map_err(|e| write_error(e.to_string()))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);

    // tempfile creates 0600 files; outputs are meant to be shared
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o644))
            .map_err(|e| write_error(e.to_string()))?;
    }

    temp.persist(destination)
        .map_err(|e| write_error(e.error.to_string()))?;

    debug!("Wrote {:?} ({} bytes)", destination, size);
    Ok(size)
}
