use framebus::DetectionBox;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};

/// JPEG quality used for every frame this process encodes. Keeps a frame of
/// the model input resolution well under the 16-bit wire length.
pub const JPEG_QUALITY: u8 = 50;

const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const BOX_THICKNESS: u32 = 2;

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(img)?;
    Ok(jpeg)
}

/// Gradient test card, shifted horizontally by `phase` so consecutive frames differ.
pub fn test_pattern(width: u32, height: u32, phase: u32) -> anyhow::Result<Vec<u8>> {
    let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
        let sx = (x + phase) % width.max(1);
        Rgb([
            ((sx * 255) / width.max(1)) as u8,
            ((y * 255) / height.max(1)) as u8,
            (((sx + y) * 127) / (width + height).max(1)) as u8,
        ])
    });
    encode_jpeg(&img, JPEG_QUALITY)
}

/// Decode `jpeg`, outline every detection, and re-encode.
pub fn draw_detections(jpeg: &[u8], detections: &[DetectionBox]) -> anyhow::Result<Vec<u8>> {
    let mut img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgb8();
    for detection in detections {
        outline(&mut img, *detection);
    }
    encode_jpeg(&img, JPEG_QUALITY)
}

fn outline(img: &mut RgbImage, detection: DetectionBox) {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let clamp_x = |v: u16| u32::from(v).min(width - 1);
    let clamp_y = |v: u16| u32::from(v).min(height - 1);
    let (x0, x1) = {
        let (a, b) = (clamp_x(detection.x_min), clamp_x(detection.x_max));
        (a.min(b), a.max(b))
    };
    let (y0, y1) = {
        let (a, b) = (clamp_y(detection.y_min), clamp_y(detection.y_max));
        (a.min(b), a.max(b))
    };

    for t in 0..BOX_THICKNESS {
        let top = (y0 + t).min(y1);
        let bottom = y1.saturating_sub(t).max(y0);
        for x in x0..=x1 {
            img.put_pixel(x, top, BOX_COLOR);
            img.put_pixel(x, bottom, BOX_COLOR);
        }
        let left = (x0 + t).min(x1);
        let right = x1.saturating_sub(t).max(x0);
        for y in y0..=y1 {
            img.put_pixel(left, y, BOX_COLOR);
            img.put_pixel(right, y, BOX_COLOR);
        }
    }
}
