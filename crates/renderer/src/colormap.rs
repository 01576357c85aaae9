//! Named colormaps and their 8-bit palettes.
//!
//! Every colormap is a list of evenly spaced color stops, linearly
//! interpolated. Tiles are rendered through a [`Palette`]: index 0 is fully
//! transparent and indices 1..=255 sample the colormap from its low to its
//! high end, so a rendered tile is a buffer of palette indices that encodes
//! directly as an indexed PNG.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of opaque palette entries.
pub const RAMP_SIZE: usize = 255;

/// Palette index used for missing values.
pub const TRANSPARENT_INDEX: u8 = 0;

/// RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn transparent() -> Self {
        Self { r: 0, g: 0, b: 0, a: 0 }
    }

    pub fn to_tuple(self) -> (u8, u8, u8, u8) {
        (self.r, self.g, self.b, self.a)
    }
}

/// Linear color interpolation, `t` clamped to `[0, 1]`.
pub fn interpolate_color(from: Color, to: Color, t: f32) -> Color {
    let t = t.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
    Color::new(
        mix(from.r, to.r),
        mix(from.g, to.g),
        mix(from.b, to.b),
        mix(from.a, to.a),
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown colormap '{0}'")]
pub struct UnknownColormap(pub String);

/// The colormaps a style may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Colormap {
    #[default]
    Viridis,
    Plasma,
    Inferno,
    Magma,
    Cividis,
    /// Black to white.
    Gray,
    /// White to black.
    Greys,
    Jet,
    Coolwarm,
}

const VIRIDIS: &[Color] = &[
    Color::rgb(68, 1, 84),
    Color::rgb(71, 44, 122),
    Color::rgb(59, 82, 139),
    Color::rgb(44, 113, 142),
    Color::rgb(33, 145, 140),
    Color::rgb(39, 173, 129),
    Color::rgb(92, 200, 99),
    Color::rgb(170, 220, 50),
    Color::rgb(253, 231, 37),
];

const PLASMA: &[Color] = &[
    Color::rgb(13, 8, 135),
    Color::rgb(75, 3, 161),
    Color::rgb(125, 3, 168),
    Color::rgb(168, 34, 150),
    Color::rgb(203, 70, 121),
    Color::rgb(229, 107, 93),
    Color::rgb(248, 148, 65),
    Color::rgb(253, 195, 40),
    Color::rgb(240, 249, 33),
];

const INFERNO: &[Color] = &[
    Color::rgb(0, 0, 4),
    Color::rgb(31, 12, 72),
    Color::rgb(85, 15, 109),
    Color::rgb(136, 34, 106),
    Color::rgb(186, 54, 85),
    Color::rgb(227, 89, 51),
    Color::rgb(249, 140, 10),
    Color::rgb(249, 201, 50),
    Color::rgb(252, 255, 164),
];

const MAGMA: &[Color] = &[
    Color::rgb(0, 0, 4),
    Color::rgb(28, 16, 68),
    Color::rgb(79, 18, 123),
    Color::rgb(129, 37, 129),
    Color::rgb(181, 54, 122),
    Color::rgb(229, 80, 100),
    Color::rgb(251, 135, 97),
    Color::rgb(254, 194, 135),
    Color::rgb(252, 253, 191),
];

const CIVIDIS: &[Color] = &[
    Color::rgb(0, 32, 77),
    Color::rgb(65, 77, 108),
    Color::rgb(124, 123, 120),
    Color::rgb(187, 175, 113),
    Color::rgb(255, 234, 70),
];

const GRAY: &[Color] = &[Color::rgb(0, 0, 0), Color::rgb(255, 255, 255)];

const GREYS: &[Color] = &[Color::rgb(255, 255, 255), Color::rgb(0, 0, 0)];

const JET: &[Color] = &[
    Color::rgb(0, 0, 128),
    Color::rgb(0, 0, 255),
    Color::rgb(0, 128, 255),
    Color::rgb(0, 255, 255),
    Color::rgb(128, 255, 128),
    Color::rgb(255, 255, 0),
    Color::rgb(255, 128, 0),
    Color::rgb(255, 0, 0),
    Color::rgb(128, 0, 0),
];

const COOLWARM: &[Color] = &[
    Color::rgb(59, 76, 192),
    Color::rgb(141, 176, 254),
    Color::rgb(221, 221, 221),
    Color::rgb(244, 154, 123),
    Color::rgb(180, 4, 38),
];

impl Colormap {
    pub const ALL: [Colormap; 9] = [
        Colormap::Viridis,
        Colormap::Plasma,
        Colormap::Inferno,
        Colormap::Magma,
        Colormap::Cividis,
        Colormap::Gray,
        Colormap::Greys,
        Colormap::Jet,
        Colormap::Coolwarm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Colormap::Viridis => "viridis",
            Colormap::Plasma => "plasma",
            Colormap::Inferno => "inferno",
            Colormap::Magma => "magma",
            Colormap::Cividis => "cividis",
            Colormap::Gray => "gray",
            Colormap::Greys => "greys",
            Colormap::Jet => "jet",
            Colormap::Coolwarm => "coolwarm",
        }
    }

    fn stops(&self) -> &'static [Color] {
        match self {
            Colormap::Viridis => VIRIDIS,
            Colormap::Plasma => PLASMA,
            Colormap::Inferno => INFERNO,
            Colormap::Magma => MAGMA,
            Colormap::Cividis => CIVIDIS,
            Colormap::Gray => GRAY,
            Colormap::Greys => GREYS,
            Colormap::Jet => JET,
            Colormap::Coolwarm => COOLWARM,
        }
    }

    /// Color at normalized position `t` in `[0, 1]`.
    pub fn color_at(&self, t: f32) -> Color {
        let stops = self.stops();
        let last = stops.len() - 1;
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let pos = t * last as f32;
        let i = (pos.floor() as usize).min(last - 1);
        interpolate_color(stops[i], stops[i + 1], pos - i as f32)
    }

    /// 256-entry palette: transparent, then the sampled ramp.
    pub fn palette(&self) -> Palette {
        let mut colors = Vec::with_capacity(RAMP_SIZE + 1);
        colors.push(Color::transparent());
        for i in 0..RAMP_SIZE {
            colors.push(self.color_at(i as f32 / (RAMP_SIZE - 1) as f32));
        }
        Palette { colors }
    }
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Colormap {
    type Err = UnknownColormap;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = match lower.as_str() {
            "grey" | "gist_gray" => "gray",
            "gray_r" => "greys",
            other => other,
        };
        Colormap::ALL
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| UnknownColormap(s.to_string()))
    }
}

/// Indexed colors of one colormap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Color>,
}

impl Palette {
    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn to_tuples(&self) -> Vec<(u8, u8, u8, u8)> {
        self.colors.iter().map(|c| c.to_tuple()).collect()
    }

    /// Palette index of `value` scaled over `[vmin, vmax]`.
    ///
    /// NaN maps to the transparent entry; values outside the range clamp to
    /// the ends of the ramp.
    #[inline]
    pub fn index_for(&self, value: f32, vmin: f32, vmax: f32) -> u8 {
        if value.is_nan() {
            return TRANSPARENT_INDEX;
        }
        let range = vmax - vmin;
        let t = if range > 0.0 {
            ((value - vmin) / range).clamp(0.0, 1.0)
        } else {
            0.0
        };
        1 + (t * (RAMP_SIZE - 1) as f32).round() as u8
    }

    /// Palette indices for a buffer of values.
    pub fn map_values(&self, values: &[f32], vmin: f32, vmax: f32) -> Vec<u8> {
        values
            .iter()
            .map(|&v| self.index_for(v, vmin, vmax))
            .collect()
    }

    pub fn color(&self, index: u8) -> Color {
        self.colors
            .get(index as usize)
            .copied()
            .unwrap_or(Color::transparent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("viridis".parse::<Colormap>().unwrap(), Colormap::Viridis);
        assert_eq!("PLASMA".parse::<Colormap>().unwrap(), Colormap::Plasma);
        assert_eq!("grey".parse::<Colormap>().unwrap(), Colormap::Gray);
        assert!("rainbow-unicorn".parse::<Colormap>().is_err());
        for cmap in Colormap::ALL {
            assert_eq!(cmap.name().parse::<Colormap>().unwrap(), cmap);
        }
    }

    #[test]
    fn test_color_at_ends() {
        assert_eq!(Colormap::Viridis.color_at(0.0), VIRIDIS[0]);
        assert_eq!(Colormap::Viridis.color_at(1.0), VIRIDIS[8]);
        assert_eq!(Colormap::Gray.color_at(0.5), Color::rgb(128, 128, 128));
        assert_eq!(Colormap::Gray.color_at(7.0), Color::rgb(255, 255, 255));
    }

    #[test]
    fn test_palette_layout() {
        let palette = Colormap::Gray.palette();
        assert_eq!(palette.colors().len(), 256);
        assert_eq!(palette.color(TRANSPARENT_INDEX).a, 0);
        assert_eq!(palette.color(1), Color::rgb(0, 0, 0));
        assert_eq!(palette.color(255), Color::rgb(255, 255, 255));
    }

    #[test]
    fn test_index_for() {
        let palette = Colormap::Viridis.palette();
        assert_eq!(palette.index_for(f32::NAN, 0.0, 1.0), TRANSPARENT_INDEX);
        assert_eq!(palette.index_for(0.0, 0.0, 1.0), 1);
        assert_eq!(palette.index_for(1.0, 0.0, 1.0), 255);
        assert_eq!(palette.index_for(-5.0, 0.0, 1.0), 1);
        assert_eq!(palette.index_for(5.0, 0.0, 1.0), 255);
        assert_eq!(palette.index_for(0.5, 0.0, 1.0), 128);
    }
}
