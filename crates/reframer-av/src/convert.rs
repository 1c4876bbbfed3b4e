//! Pixel layout conversion between decoder, display and encoder formats.
//!
//! Decoders hand out frames in whatever layout the codec produces, the
//! renderer wants interleaved 8-bit RGB, and the encoder wants planar
//! YUV 4:2:0. [`PixelConverter`] wraps a software scaler for one direction
//! and rebuilds it only when the source geometry changes.

use crate::{Error, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{Context as Scaler, Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;

/// Interleaved 8-bit pixel layouts exchanged with the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// 3 bytes per pixel, R G B
    Rgb24,
    /// 3 bytes per pixel, B G R (typical framebuffer readback)
    Bgr24,
    /// 4 bytes per pixel, R G B A
    Rgba,
    /// 4 bytes per pixel, B G R A
    Bgra,
}

impl PixelLayout {
    /// Bytes used by one pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Rgb24 | PixelLayout::Bgr24 => 3,
            PixelLayout::Rgba | PixelLayout::Bgra => 4,
        }
    }

    /// The matching FFmpeg pixel format.
    pub fn pixel(&self) -> Pixel {
        match self {
            PixelLayout::Rgb24 => Pixel::RGB24,
            PixelLayout::Bgr24 => Pixel::BGR24,
            PixelLayout::Rgba => Pixel::RGBA,
            PixelLayout::Bgra => Pixel::BGRA,
        }
    }
}

/// A borrowed interleaved image.
///
/// Rows are `stride` bytes apart; only the first `width * bytes_per_pixel`
/// bytes of each row are pixels.
#[derive(Debug, Clone, Copy)]
pub struct ImageRef<'a> {
    pub layout: PixelLayout,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub data: &'a [u8],
}

impl<'a> ImageRef<'a> {
    /// Wrap a buffer, checking that it is large enough for the geometry.
    pub fn new(
        layout: PixelLayout,
        width: u32,
        height: u32,
        stride: usize,
        data: &'a [u8],
    ) -> Result<Self> {
        let image = Self {
            layout,
            width,
            height,
            stride,
            data,
        };
        image.validate()?;
        Ok(image)
    }

    /// Check that the buffer is large enough for the geometry.
    ///
    /// The fields are public, so images built without [`ImageRef::new`] are
    /// checked again before their rows are read.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidInput(format!(
                "image has no pixels ({}x{})",
                self.width, self.height
            )));
        }
        if self.stride < self.row_bytes() {
            return Err(Error::InvalidInput(format!(
                "stride {} shorter than row of {} bytes",
                self.stride,
                self.row_bytes()
            )));
        }
        let needed = self.stride * (self.height as usize - 1) + self.row_bytes();
        if self.data.len() < needed {
            return Err(Error::InvalidInput(format!(
                "image buffer holds {} bytes, {} needed",
                self.data.len(),
                needed
            )));
        }
        Ok(())
    }

    /// Pixel bytes in one row.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// The pixel bytes of row `y`.
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_bytes()]
    }

    /// Copy into a tightly packed owned image.
    pub fn to_owned_image(&self) -> Image {
        let mut data = Vec::with_capacity(self.row_bytes() * self.height as usize);
        for y in 0..self.height {
            data.extend_from_slice(self.row(y));
        }
        Image {
            layout: self.layout,
            width: self.width,
            height: self.height,
            data,
        }
    }
}

/// An owned, tightly packed interleaved image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub layout: PixelLayout,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Image {
    /// Allocate a black image.
    pub fn new(layout: PixelLayout, width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * layout.bytes_per_pixel();
        Self {
            layout,
            width,
            height,
            data: vec![0; len],
        }
    }

    /// Pixel bytes in one row.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// Borrow as an [`ImageRef`].
    pub fn as_image_ref(&self) -> ImageRef<'_> {
        ImageRef {
            layout: self.layout,
            width: self.width,
            height: self.height,
            stride: self.row_bytes(),
            data: &self.data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    src_format: Pixel,
    src_width: u32,
    src_height: u32,
    dst_format: Pixel,
    dst_width: u32,
    dst_height: u32,
}

/// Cached software scaler for one conversion direction.
#[derive(Default)]
pub struct PixelConverter {
    cached: Option<(Geometry, Scaler)>,
}

impl PixelConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a scaler has been built.
    pub fn is_ready(&self) -> bool {
        self.cached.is_some()
    }

    /// Drop the cached scaler.
    pub fn reset(&mut self) {
        self.cached = None;
    }

    /// Convert `src` into `dst`, which must already be allocated with the
    /// destination format and size.
    pub fn convert(&mut self, src: &VideoFrame, dst: &mut VideoFrame) -> Result<()> {
        if dst.format() == Pixel::None || dst.width() == 0 || dst.height() == 0 {
            return Err(Error::scale("destination frame is not allocated"));
        }

        let scaler = self.scaler_for(Geometry {
            src_format: src.format(),
            src_width: src.width(),
            src_height: src.height(),
            dst_format: dst.format(),
            dst_width: dst.width(),
            dst_height: dst.height(),
        })?;

        scaler.run(src, dst).map_err(|e| Error::scale(e.to_string()))
    }

    fn scaler_for(&mut self, geometry: Geometry) -> Result<&mut Scaler> {
        if self.cached.as_ref().map(|(g, _)| *g) != Some(geometry) {
            let scaler = Scaler::get(
                geometry.src_format,
                geometry.src_width,
                geometry.src_height,
                geometry.dst_format,
                geometry.dst_width,
                geometry.dst_height,
                Flags::BILINEAR,
            )
            .map_err(|e| {
                Error::scale(format!(
                    "no scaler from {:?} {}x{} to {:?} {}x{}: {}",
                    geometry.src_format,
                    geometry.src_width,
                    geometry.src_height,
                    geometry.dst_format,
                    geometry.dst_width,
                    geometry.dst_height,
                    e
                ))
            })?;

            #[cfg(feature = "tracing")]
            tracing::trace!(?geometry, "Built pixel converter");

            self.cached = Some((geometry, scaler));
        }

        let (_, scaler) = self
            .cached
            .as_mut()
            .ok_or_else(|| Error::scale("scaler unavailable"))?;
        Ok(scaler)
    }
}

/// Copy an interleaved image into a frame allocated with the same layout
/// and size.
pub fn fill_frame(image: &ImageRef<'_>, frame: &mut VideoFrame) -> Result<()> {
    image.validate()?;
    if frame.format() != image.layout.pixel()
        || frame.width() != image.width
        || frame.height() != image.height
    {
        return Err(Error::scale(format!(
            "staging frame is {:?} {}x{}, image is {:?} {}x{}",
            frame.format(),
            frame.width(),
            frame.height(),
            image.layout,
            image.width,
            image.height
        )));
    }

    let row_bytes = image.row_bytes();
    let stride = frame.stride(0);
    let plane = frame.data_mut(0);
    for y in 0..image.height {
        let start = y as usize * stride;
        plane[start..start + row_bytes].copy_from_slice(image.row(y));
    }

    Ok(())
}

/// Borrow an interleaved frame as an image.
pub fn frame_image(frame: &VideoFrame, layout: PixelLayout) -> ImageRef<'_> {
    ImageRef {
        layout,
        width: frame.width(),
        height: frame.height(),
        stride: frame.stride(0),
        data: frame.data(0),
    }
}
