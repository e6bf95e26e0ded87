//! Thumbnail rendering: decode, bounded-box resize, re-encode.
//!
//! The output format is inferred from the source file's extension and the
//! encode is retried once as PNG when the inferred format cannot be written.
//! Undecodable input short-circuits before any retry so corrupt uploads are
//! reported as such rather than as an encoder problem.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageOutputFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Bounding box for produced thumbnails. The box is a maximum, not a fixed
/// canvas: sources already inside it pass through unscaled.
#[derive(Clone, Debug)]
pub struct ThumbnailSpec {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality (0-100).
    pub jpeg_quality: u8,
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self {
            max_width: 100,
            max_height: 100,
            jpeg_quality: 85,
        }
    }
}

/// Encoded thumbnail plus the format actually written (may differ from the
/// inferred format when the PNG fallback kicked in).
#[derive(Clone, Debug)]
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

impl Thumbnail {
    pub fn content_type(&self) -> &'static str {
        content_type_for(self.format)
    }
}

#[derive(Debug, Error)]
pub enum ThumbnailError {
    /// The input bytes are not decodable by any supported codec.
    #[error("source is not a valid image: {0}")]
    InvalidImage(image::ImageError),
    /// The input decoded but neither the inferred format nor the PNG
    /// fallback could be encoded.
    #[error("failed to create thumbnail: {0}")]
    EncodeFailed(image::ImageError),
}

/// Map a file extension to the output format, case-insensitively. Anything
/// unrecognized falls back to PNG.
pub fn infer_format_from_ext(name: &str) -> ImageFormat {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => ImageFormat::Jpeg,
        Some("png") => ImageFormat::Png,
        Some("gif") => ImageFormat::Gif,
        Some("bmp") => ImageFormat::Bmp,
        Some("tif") | Some("tiff") => ImageFormat::Tiff,
        Some("webp") => ImageFormat::WebP,
        _ => ImageFormat::Png,
    }
}

pub fn content_type_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        ImageFormat::Gif => "image/gif",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::WebP => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Render a thumbnail for `object_name` from raw image bytes.
///
/// Pipeline: decode once, normalize the color type, resize to fit the box,
/// encode in the format inferred from the extension, and on encode failure
/// retry as PNG. Decode failure is terminal (`InvalidImage`); a second
/// encode failure is terminal (`EncodeFailed`).
pub fn render_thumbnail(
    bytes: &[u8],
    object_name: &str,
    spec: &ThumbnailSpec,
) -> Result<Thumbnail, ThumbnailError> {
    let img = image::load_from_memory(bytes).map_err(ThumbnailError::InvalidImage)?;
    let img = fit_within(normalize_color(img), spec);

    let inferred = infer_format_from_ext(object_name);
    match encode(&img, inferred, spec.jpeg_quality) {
        Ok(bytes) => Ok(Thumbnail {
            bytes,
            format: inferred,
        }),
        Err(err) => {
            tracing::debug!(
                object = object_name,
                format = ?inferred,
                error = %err,
                "inferred-format encode failed, retrying as PNG"
            );
            let bytes = encode(&img, ImageFormat::Png, spec.jpeg_quality)
                .map_err(ThumbnailError::EncodeFailed)?;
            Ok(Thumbnail {
                bytes,
                format: ImageFormat::Png,
            })
        }
    }
}

/// Bring exotic decode results (16-bit, float) down to 8-bit channels, which
/// is all the output codecs here accept. Luminance-alpha widens to full
/// RGBA so the alpha survives encoders that have no LA mode.
fn normalize_color(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => img,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Scale down to fit the bounding box, preserving aspect ratio exactly.
/// Sources already within the box are returned untouched (never upscale).
fn fit_within(img: DynamicImage, spec: &ThumbnailSpec) -> DynamicImage {
    if img.width() <= spec.max_width && img.height() <= spec.max_height {
        return img;
    }
    img.resize(spec.max_width, spec.max_height, FilterType::Lanczos3)
}

fn encode(img: &DynamicImage, format: ImageFormat, jpeg_quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    match format {
        ImageFormat::Jpeg => {
            // JPEG cannot carry transparency; composite onto opaque white
            // using the source's own alpha as the blend mask.
            let flat = if img.color().has_alpha() {
                DynamicImage::ImageRgb8(flatten_onto_white(img))
            } else {
                DynamicImage::ImageRgb8(img.to_rgb8())
            };
            flat.write_to(&mut cursor, ImageOutputFormat::Jpeg(jpeg_quality))?;
        }
        other => {
            img.write_to(&mut cursor, ImageOutputFormat::from(other))?;
        }
    }
    Ok(buf)
}

fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let a = px[3] as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn infer_format_is_case_insensitive() {
        assert_eq!(infer_format_from_ext("photo.JPG"), ImageFormat::Jpeg);
        assert_eq!(infer_format_from_ext("photo.jpeg"), ImageFormat::Jpeg);
        assert_eq!(infer_format_from_ext("scan.TIFF"), ImageFormat::Tiff);
    }

    #[test]
    fn unknown_extensions_fall_back_to_png() {
        assert_eq!(infer_format_from_ext("archive.zip"), ImageFormat::Png);
        assert_eq!(infer_format_from_ext("noext"), ImageFormat::Png);
    }

    #[test]
    fn resize_clamps_longer_side_and_preserves_aspect() {
        let src = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            400,
            200,
            Rgba([200, 30, 30, 255]),
        ));
        let thumb = render_thumbnail(&png_bytes(src), "wide.png", &ThumbnailSpec::default())
            .unwrap();
        let out = image::load_from_memory(&thumb.bytes).unwrap();
        assert_eq!(out.dimensions(), (100, 50));
    }

    #[test]
    fn small_sources_are_never_upscaled() {
        let src = DynamicImage::ImageRgba8(RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 255])));
        let thumb = render_thumbnail(&png_bytes(src), "small.png", &ThumbnailSpec::default())
            .unwrap();
        let out = image::load_from_memory(&thumb.bytes).unwrap();
        assert_eq!(out.dimensions(), (50, 50));
    }

    #[test]
    fn jpeg_output_flattens_alpha_onto_white() {
        let src = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 64, Rgba([0, 0, 0, 0])));
        let thumb = render_thumbnail(&png_bytes(src), "ghost.jpg", &ThumbnailSpec::default())
            .unwrap();
        assert_eq!(thumb.format, ImageFormat::Jpeg);

        let out = image::load_from_memory(&thumb.bytes).unwrap();
        assert!(!out.color().has_alpha());
        // JPEG is lossy, so allow a little headroom below pure white.
        let px = out.to_rgb8().get_pixel(32, 32).0;
        assert!(px.iter().all(|&c| c >= 250), "expected near-white, got {px:?}");
    }

    #[test]
    fn luminance_alpha_widens_to_rgba_and_keeps_the_inferred_format() {
        use image::{GrayAlphaImage, LumaA};

        let src = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(
            40,
            40,
            LumaA([128, 200]),
        ));
        let thumb = render_thumbnail(&png_bytes(src), "badge.gif", &ThumbnailSpec::default())
            .unwrap();
        // An LA source must not punt to the PNG fallback just because GIF
        // has no luminance-alpha mode.
        assert_eq!(thumb.format, ImageFormat::Gif);
        assert!(image::load_from_memory(&thumb.bytes).is_ok());
    }

    #[test]
    fn undecodable_input_is_invalid_image() {
        let err = render_thumbnail(b"definitely not an image", "x.png", &ThumbnailSpec::default())
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::InvalidImage(_)));
    }

    #[test]
    fn unknown_extension_encodes_as_png() {
        let src = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([1, 2, 3, 255])));
        let thumb = render_thumbnail(&png_bytes(src), "archive.zip", &ThumbnailSpec::default())
            .unwrap();
        assert_eq!(thumb.format, ImageFormat::Png);
        assert_eq!(thumb.content_type(), "image/png");
    }
}
