use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, RgbaImage};
use thiserror::Error;

pub const DEFAULT_THUMBNAIL_SIZE: u32 = 200;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Invalid thumbnail size: {size}")]
    InvalidSize { size: u32 },
}

/// Renders the fixed-size previews attached to catalog records.
///
/// The source is scaled to fit a `size`x`size` canvas with its aspect ratio
/// kept and centered on a transparent background.
#[derive(Debug, Clone)]
pub struct ThumbnailRenderer {
    size: u32,
    filter: FilterType,
}

impl ThumbnailRenderer {
    pub fn new(size: u32) -> Result<Self, ThumbnailError> {
        if size == 0 {
            return Err(ThumbnailError::InvalidSize { size });
        }
        Ok(Self {
            size,
            filter: FilterType::Triangle,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn render(&self, img: &DynamicImage) -> Result<RgbaImage, ThumbnailError> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(ThumbnailError::EmptyImage { width, height });
        }

        let (fit_width, fit_height) = self.fit_dimensions(width, height);
        let resized = imageops::resize(&img.to_rgba8(), fit_width, fit_height, self.filter);

        let mut canvas = RgbaImage::new(self.size, self.size);
        let x = (self.size - fit_width) / 2;
        let y = (self.size - fit_height) / 2;
        imageops::overlay(&mut canvas, &resized, i64::from(x), i64::from(y));
        Ok(canvas)
    }

    /// Largest size that fits the canvas while keeping the aspect ratio.
    fn fit_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let target = self.size as f64;
        let (new_width, new_height) = if width >= height {
            let ratio = target / width as f64;
            (self.size, (height as f64 * ratio).round() as u32)
        } else {
            let ratio = target / height as f64;
            ((width as f64 * ratio).round() as u32, self.size)
        };
        (new_width.clamp(1, self.size), new_height.clamp(1, self.size))
    }
}

impl Default for ThumbnailRenderer {
    fn default() -> Self {
        Self {
            size: DEFAULT_THUMBNAIL_SIZE,
            filter: FilterType::Triangle,
        }
    }
}
