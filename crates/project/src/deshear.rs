//! Shear correction for waterfall frames.
//!
//! A line-scan sensor mounted at an angle to the scan direction smears
//! vertical features into diagonals. Each row `i` of a decoded frame is
//! shifted `i * shift_per_row` pixels to undo it, with subpixel linear
//! interpolation. Pixels shifted in from outside the sensor are filled
//! white so the corrected region reads as foreground on a light field.

use strobe_camera::PixelFormat;

/// Geometry of the sensor mount, as entered by the operator.
#[derive(Debug, Clone, Copy)]
pub struct DeshearParams {
    /// Mount angle in degrees, 0 meaning no correction.
    pub angle_deg: f64,
    /// Physical pixel pitch of the sensor in micrometers.
    pub pixel_pitch_um: f64,
    /// Scan advance between consecutive lines in micrometers.
    pub line_spacing_um: f64,
}

impl DeshearParams {
    /// Horizontal correction per row, in pixels.
    pub fn shift_per_row_px(&self) -> f64 {
        self.angle_deg.to_radians().tan() * self.line_spacing_um / self.pixel_pitch_um
    }
}

/// Applies the per-row shift to a frame payload in place of the original.
///
/// `data` holds `rows` rows of `width` pixels in `format`. Returns the
/// corrected payload with the same layout.
pub fn deshear(
    data: &[u8],
    width: u32,
    rows: u32,
    format: PixelFormat,
    shift_per_row: f64,
) -> Vec<u8> {
    match format {
        PixelFormat::Mono8 => deshear_plane::<u8>(data, width, rows, shift_per_row),
        PixelFormat::Mono16 => {
            let pixels: Vec<u16> = data
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect();
            deshear_plane(&pixels, width, rows, shift_per_row)
                .iter()
                .flat_map(|px| px.to_le_bytes())
                .collect()
        }
    }
}

fn deshear_plane<T: Pixel>(pixels: &[T], width: u32, rows: u32, shift_per_row: f64) -> Vec<T> {
    let w = width as usize;
    let mut out = Vec::with_capacity(pixels.len());

    for i in 0..rows as usize {
        let row = &pixels[i * w..(i + 1) * w];
        let shift = i as f64 * shift_per_row;
        for x in 0..w {
            let src = x as f64 - shift;
            if src < 0.0 || src > (w - 1) as f64 {
                out.push(T::WHITE);
                continue;
            }
            let lo = src.floor() as usize;
            let hi = src.ceil() as usize;
            let frac = src - lo as f64;
            let value = row[lo].to_f64() * (1.0 - frac) + row[hi].to_f64() * frac;
            out.push(T::from_f64(value));
        }
    }

    out
}

trait Pixel: Copy {
    const WHITE: Self;

    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl Pixel for u8 {
    const WHITE: Self = u8::MAX;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, u8::MAX as f64) as u8
    }
}

impl Pixel for u16 {
    const WHITE: Self = u16::MAX;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, u16::MAX as f64) as u16
    }
}
