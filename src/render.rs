//! Renderer boundary.
//!
//! The player hands each decoded frame to a [`FrameRenderer`] and, while
//! recording, encodes whatever image comes back. A real renderer draws the
//! frame with the GPU and reads the framebuffer back; the implementations
//! here stand in for that without a display.

use reframer_av::{DecodedFrame, Image, PixelLayout};

/// An image produced by a renderer, ready to be encoded.
pub type RenderedImage = Image;

/// Turns decoded frames into rendered images.
pub trait FrameRenderer {
    /// Render `frame`. `None` means nothing was drawn and nothing should be
    /// recorded for this frame.
    fn render(&mut self, frame: &DecodedFrame<'_>) -> Option<RenderedImage>;
}

impl<R: FrameRenderer + ?Sized> FrameRenderer for Box<R> {
    fn render(&mut self, frame: &DecodedFrame<'_>) -> Option<RenderedImage> {
        (**self).render(frame)
    }
}

/// Passes the decoded RGB frame through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityRenderer;

impl FrameRenderer for IdentityRenderer {
    fn render(&mut self, frame: &DecodedFrame<'_>) -> Option<RenderedImage> {
        Some(frame.image.to_owned_image())
    }
}

/// Behaves like an OpenGL framebuffer readback: pixels come back as BGR
/// with the bottom row first, and are flipped upright before encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlippedReadback;

impl FrameRenderer for FlippedReadback {
    fn render(&mut self, frame: &DecodedFrame<'_>) -> Option<RenderedImage> {
        let mut image = read_back_bgr(frame);
        flip_vertical(&mut image);
        Some(image)
    }
}

/// Copy an RGB frame into a bottom-up BGR image.
pub fn read_back_bgr(frame: &DecodedFrame<'_>) -> Image {
    let source = &frame.image;
    let mut image = Image::new(PixelLayout::Bgr24, source.width, source.height);
    let row_bytes = image.row_bytes();

    for y in 0..source.height {
        let target_row = (source.height - 1 - y) as usize;
        let target = &mut image.data[target_row * row_bytes..(target_row + 1) * row_bytes];
        for (dst, src) in target
            .chunks_exact_mut(3)
            .zip(source.row(y).chunks_exact(source.layout.bytes_per_pixel()))
        {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
        }
    }

    image
}

/// Reverse the row order of a packed image in place.
pub fn flip_vertical(image: &mut Image) {
    let row_bytes = image.row_bytes();
    let height = image.height as usize;

    for y in 0..height / 2 {
        let (top, bottom) = image.data.split_at_mut((height - 1 - y) * row_bytes);
        top[y * row_bytes..(y + 1) * row_bytes].swap_with_slice(&mut bottom[..row_bytes]);
    }
}
