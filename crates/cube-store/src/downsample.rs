//! Downsampling functions for generating pyramid levels.
//!
//! Every level halves both spatial dimensions, rounding up, so odd-sized
//! grids keep their last row and column. Missing values are NaN and never
//! contribute to a reduced cell.

use serde::{Deserialize, Serialize};

/// Method used to downsample grid data.
///
/// - **Mean**: continuous data (temperature, reflectance)
/// - **Max**: peak data (precipitation rate, fire radiative power)
/// - **Nearest**: categorical data, preserves exact values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownsampleMethod {
    #[default]
    Mean,
    Max,
    Nearest,
}

impl DownsampleMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mean" | "avg" | "average" => Some(Self::Mean),
            "max" => Some(Self::Max),
            "nearest" | "first" => Some(Self::Nearest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Max => "max",
            Self::Nearest => "nearest",
        }
    }
}

/// Shape of a level one step coarser: `ceil(h / 2) x ceil(w / 2)`.
pub fn halved_shape(height: usize, width: usize) -> (usize, usize) {
    (height.div_ceil(2), width.div_ceil(2))
}

/// Downsample a 2D grid by a factor of 2.
///
/// Takes a grid of size (width, height) in row-major order and produces a
/// grid of size `(ceil(width/2), ceil(height/2))`.
///
/// # Returns
/// Tuple of (downsampled_data, new_width, new_height)
pub fn downsample_2x(
    data: &[f32],
    width: usize,
    height: usize,
    method: DownsampleMethod,
) -> (Vec<f32>, usize, usize) {
    let (new_height, new_width) = halved_shape(height, width);
    if new_width == 0 || new_height == 0 {
        return (vec![], 0, 0);
    }

    let at = |x: usize, y: usize| -> f32 {
        if x < width && y < height {
            data.get(y * width + x).copied().unwrap_or(f32::NAN)
        } else {
            f32::NAN
        }
    };

    let mut output = vec![f32::NAN; new_width * new_height];
    for out_y in 0..new_height {
        for out_x in 0..new_width {
            let in_x = out_x * 2;
            let in_y = out_y * 2;

            let v00 = at(in_x, in_y);
            let v10 = at(in_x + 1, in_y);
            let v01 = at(in_x, in_y + 1);
            let v11 = at(in_x + 1, in_y + 1);

            output[out_y * new_width + out_x] = match method {
                DownsampleMethod::Mean => mean_of_block(v00, v10, v01, v11),
                DownsampleMethod::Max => max_of_block(v00, v10, v01, v11),
                DownsampleMethod::Nearest => v00,
            };
        }
    }

    (output, new_width, new_height)
}

/// Mean of the non-NaN values of a 2x2 block; NaN if all are NaN.
#[inline]
fn mean_of_block(v00: f32, v10: f32, v01: f32, v11: f32) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0;

    for v in [v00, v10, v01, v11] {
        if !v.is_nan() {
            sum += v as f64;
            count += 1;
        }
    }

    if count == 0 {
        f32::NAN
    } else {
        (sum / count as f64) as f32
    }
}

/// Maximum of the non-NaN values of a 2x2 block; NaN if all are NaN.
#[inline]
fn max_of_block(v00: f32, v10: f32, v01: f32, v11: f32) -> f32 {
    [v00, v10, v01, v11]
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |m| m.max(v))))
        .unwrap_or(f32::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_mean() {
        let data = vec![
            1.0, 2.0, 3.0, 4.0, //
            5.0, 6.0, 7.0, 8.0,
        ];
        let (out, w, h) = downsample_2x(&data, 4, 2, DownsampleMethod::Mean);
        assert_eq!((w, h), (2, 1));
        assert_eq!(out, vec![3.5, 5.5]);
    }

    #[test]
    fn test_downsample_odd_dimensions_round_up() {
        let data: Vec<f32> = (0..15).map(|v| v as f32).collect();
        let (out, w, h) = downsample_2x(&data, 5, 3, DownsampleMethod::Mean);
        assert_eq!((w, h), (3, 2));
        // Last column only has a single source column
        assert_eq!(out[2], (4.0 + 9.0) / 2.0);
        // Last row only has a single source row
        assert_eq!(out[3], (10.0 + 11.0) / 2.0);
        assert_eq!(out[5], 14.0);
    }

    #[test]
    fn test_downsample_nan_aware() {
        let nan = f32::NAN;
        let data = vec![nan, 2.0, nan, nan, nan, 4.0, nan, nan];
        let (out, _, _) = downsample_2x(&data, 4, 2, DownsampleMethod::Mean);
        assert_eq!(out[0], 3.0);
        assert!(out[1].is_nan());

        let (out, _, _) = downsample_2x(&data, 4, 2, DownsampleMethod::Max);
        assert_eq!(out[0], 4.0);
        assert!(out[1].is_nan());
    }

    #[test]
    fn test_downsample_nearest() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let (out, w, h) = downsample_2x(&data, 2, 2, DownsampleMethod::Nearest);
        assert_eq!((w, h), (1, 1));
        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn test_single_cell() {
        let (out, w, h) = downsample_2x(&[7.0], 1, 1, DownsampleMethod::Mean);
        assert_eq!((w, h), (1, 1));
        assert_eq!(out, vec![7.0]);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(DownsampleMethod::parse("MEAN"), Some(DownsampleMethod::Mean));
        assert_eq!(DownsampleMethod::parse("max"), Some(DownsampleMethod::Max));
        assert_eq!(DownsampleMethod::parse("median"), None);
    }
}
