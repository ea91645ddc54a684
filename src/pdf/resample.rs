//! DPI math and area-weighted downsampling for RGBA buffers

/// PDF user-space units per inch
const POINTS_PER_INCH: f32 = 72.0;

/// Effective resolution of an image drawn across a whole page.
///
/// The lower of the horizontal and vertical DPI, so the axis with the
/// least detail decides.
pub fn effective_dpi(width: u32, height: u32, placement: (f32, f32)) -> f32 {
    let (page_width, page_height) = placement;
    let dpi_x = width as f32 * POINTS_PER_INCH / page_width;
    let dpi_y = height as f32 * POINTS_PER_INCH / page_height;
    dpi_x.min(dpi_y)
}

/// New dimensions for an image whose effective DPI exceeds `max_dpi`.
///
/// Both axes scale by `max_dpi / effective_dpi`, rounded to nearest and at
/// least 1. Returns `None` unless both new dimensions are strictly smaller.
pub fn target_dimensions(width: u32, height: u32, effective_dpi: f32, max_dpi: f32) -> Option<(u32, u32)> {
    if !(effective_dpi > max_dpi) || max_dpi <= 0.0 {
        return None;
    }
    let scale = max_dpi / effective_dpi;
    let scaled = |n: u32| ((n as f32 * scale).round() as u32).max(1);
    let (new_width, new_height) = (scaled(width), scaled(height));
    (new_width < width && new_height < height).then_some((new_width, new_height))
}

/// Source pixels covering one destination pixel along an axis
struct Span {
    start: usize,
    weights: Vec<f64>,
}

/// Coverage of each source pixel by each destination pixel along one axis
fn spans(src: u32, dst: u32) -> Vec<Span> {
    let scale = f64::from(src) / f64::from(dst);
    (0..dst)
        .map(|d| {
            let lo = f64::from(d) * scale;
            let hi = (f64::from(d + 1) * scale).min(f64::from(src));
            let first = lo.floor() as usize;
            let last = (hi.ceil() as usize).min(src as usize);
            let weights = (first..last)
                .map(|s| (hi.min(s as f64 + 1.0) - lo.max(s as f64)).max(0.0))
                .collect();
            Span { start: first, weights }
        })
        .collect()
}

/// Downsample an RGBA buffer with an area-weighted box filter.
///
/// Each destination pixel is the average of every source pixel its
/// footprint overlaps, weighted by the product of the horizontal and
/// vertical coverage fractions.
pub fn downsample_area(src: &[u8], src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Vec<u8> {
    let xs = spans(src_width, dst_width);
    let ys = spans(src_height, dst_height);
    let src_stride = src_width as usize * 4;
    let mut out = vec![0u8; dst_width as usize * dst_height as usize * 4];

    for (dy, y_span) in ys.iter().enumerate() {
        for (dx, x_span) in xs.iter().enumerate() {
            let mut acc = [0f64; 4];
            let mut total = 0f64;
            for (j, wy) in y_span.weights.iter().enumerate() {
                let row = (y_span.start + j) * src_stride;
                for (i, wx) in x_span.weights.iter().enumerate() {
                    let weight = wx * wy;
                    let p = row + (x_span.start + i) * 4;
                    for (c, sum) in acc.iter_mut().enumerate() {
                        *sum += f64::from(src[p + c]) * weight;
                    }
                    total += weight;
                }
            }
            let o = (dy * dst_width as usize + dx) * 4;
            if total > 0.0 {
                for (c, sum) in acc.iter().enumerate() {
                    out[o + c] = (sum / total).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_row(values: &[u8]) -> Vec<u8> {
        values.iter().flat_map(|&v| [v, v, v, 255]).collect()
    }

    #[test]
    fn test_effective_dpi_uses_lower_axis() {
        // 300x150 px on a 100x100 pt page: 216 dpi across, 108 dpi down
        assert_eq!(effective_dpi(300, 150, (100.0, 100.0)), 108.0);
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions(200, 100, 144.0, 72.0), Some((100, 50)));
        // Already under the ceiling
        assert_eq!(target_dimensions(200, 100, 60.0, 72.0), None);
        // Rounding would keep one axis the same size
        assert_eq!(target_dimensions(200, 1, 144.0, 72.0), None);
    }

    #[test]
    fn test_halving_averages_blocks() {
        let src: Vec<u8> = [gray_row(&[0, 100]), gray_row(&[200, 100])].concat();
        let out = downsample_area(&src, 2, 2, 1, 1);
        assert_eq!(out, vec![100, 100, 100, 255]);
    }

    #[test]
    fn test_fractional_coverage_weights() {
        // Three source pixels into two: each destination covers 1.5 sources
        let src = gray_row(&[0, 90, 180]);
        let out = downsample_area(&src, 3, 1, 2, 1);
        assert_eq!(out[0], 30);
        assert_eq!(out[4], 150);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn test_output_size() {
        let src = vec![7u8; 10 * 6 * 4];
        let out = downsample_area(&src, 10, 6, 3, 2);
        assert_eq!(out.len(), 3 * 2 * 4);
        assert!(out.iter().step_by(4).all(|&v| v == 7));
    }
}
