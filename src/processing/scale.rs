//! Target size computation and resampling

use image::DynamicImage;
use tracing::debug;

use crate::config::{ResizeFilter, ScaleSpec};
use crate::error::{ConvertError, Result};

/// Compute the output dimensions for a `width`x`height` source.
///
/// Fractional pixels are truncated toward zero. A result with a zero edge is
/// rejected with [`ConvertError::InvalidScale`] instead of producing an empty
/// image.
pub fn compute_target_size(width: u32, height: u32, spec: Option<ScaleSpec>) -> Result<(u32, u32)> {
    let spec = match spec {
        Some(spec) => spec,
        None => return Ok((width, height)),
    };

    let degenerate = || ConvertError::invalid_scale(width, height, spec.to_string(), None);

    if width == 0 || height == 0 {
        return Err(degenerate());
    }

    let (target_width, target_height) = match spec {
        ScaleSpec::Relative(factor) => (
            (f64::from(width) * factor) as u32,
            (f64::from(height) * factor) as u32,
        ),
        ScaleSpec::Absolute(longest) => {
            // integer math keeps the longer edge exact
            let shorter_of = |shorter: u32, longer: u32| {
                (u64::from(shorter) * u64::from(longest) / u64::from(longer)) as u32
            };
            if width >= height {
                (longest, shorter_of(height, width))
            } else {
                (shorter_of(width, height), longest)
            }
        }
    };

    if target_width == 0 || target_height == 0 {
        return Err(degenerate());
    }

    Ok((target_width, target_height))
}

/// Resamples decoded images to the size a scale spec asks for
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageScaler {
    filter: ResizeFilter,
}

impl ImageScaler {
    /// Create a scaler with the given resampling filter
    pub fn new(filter: ResizeFilter) -> Self {
        Self { filter }
    }

    /// Scale `image` according to `spec`; images already at the target size
    /// are returned untouched
    pub fn scale(&self, image: DynamicImage, spec: Option<ScaleSpec>) -> Result<DynamicImage> {
        let (width, height) = (image.width(), image.height());
        let (target_width, target_height) = compute_target_size(width, height, spec)?;

        if (target_width, target_height) == (width, height) {
            return Ok(image);
        }

        debug!(
            "Resizing {}x{} -> {}x{} using {:?}",
            width, height, target_width, target_height, self.filter
        );

        Ok(image.resize_exact(target_width, target_height, self.filter.into()))
    }
}
