//! Device pixel layouts → interleaved RGB.

use crate::PipelineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv,
    Nv12,
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, PipelineError> {
    let area = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| PipelineError::InvalidFrame("frame dimensions overflow".into()))?;
    match format {
        PixelFormat::Rgb24 => {
            expect_len(pixels, area * 3, "RGB")?;
            Ok(pixels.to_vec())
        }
        PixelFormat::Bgr24 => {
            expect_len(pixels, area * 3, "BGR")?;
            Ok(pixels
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width as usize, area),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width as usize, height as usize, area),
    }
}

fn expect_len(pixels: &[u8], expected: usize, layout: &str) -> Result<(), PipelineError> {
    if pixels.len() != expected {
        return Err(PipelineError::InvalidFrame(format!(
            "{} frame length mismatch: expected {}, got {}",
            layout,
            expected,
            pixels.len()
        )));
    }
    Ok(())
}

// Packed 4:2:2, two pixels per Y0 U Y1 V quad.
fn yuyv_to_rgb(pixels: &[u8], width: usize, area: usize) -> Result<Vec<u8>, PipelineError> {
    if width % 2 != 0 {
        return Err(PipelineError::InvalidFrame(
            "YUYV frame width must be even".into(),
        ));
    }
    expect_len(pixels, area * 2, "YUYV")?;

    let mut rgb = Vec::with_capacity(area * 3);
    for quad in pixels.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            rgb.extend_from_slice(&yuv_pixel(y as f32, u, v));
        }
    }
    Ok(rgb)
}

fn nv12_to_rgb(
    pixels: &[u8],
    w: usize,
    h: usize,
    y_plane: usize,
) -> Result<Vec<u8>, PipelineError> {
    expect_len(pixels, y_plane + y_plane / 2, "NV12")?;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&yuv_pixel(y, u, v));
        }
    }
    Ok(rgb)
}

fn yuv_pixel(y: f32, u: f32, v: f32) -> [u8; 3] {
    [
        clamp_to_u8(y + 1.402_f32 * v),
        clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v),
        clamp_to_u8(y + 1.772_f32 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
