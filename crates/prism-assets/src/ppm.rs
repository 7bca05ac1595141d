// SPDX-License-Identifier: CEPL-1.0
use prism_render::ImageData;

use crate::{AssetError, Result};

/// Plain-text `P3` pixmap into RGBA8. Samples are rescaled from the header's
/// maxval to 0..=255; alpha is opaque.
pub fn parse_ppm(src: &str) -> Result<ImageData> {
    let mut tokens = src
        .lines()
        .map(|l| l.split('#').next().unwrap_or(""))
        .flat_map(str::split_whitespace);

    let magic = tokens.next().unwrap_or("");
    if magic != "P3" {
        return Err(AssetError::Ppm(format!("unsupported magic {magic:?}")));
    }

    let mut next_value = |what: &str| -> Result<u32> {
        let token = tokens
            .next()
            .ok_or_else(|| AssetError::Ppm(format!("missing {what}")))?;
        token
            .parse()
            .map_err(|_| AssetError::Ppm(format!("bad {what} {token:?}")))
    };

    let width = next_value("width")?;
    let height = next_value("height")?;
    let maxval = next_value("maxval")?;
    if maxval == 0 || maxval > 65535 {
        return Err(AssetError::Ppm(format!("maxval {maxval} out of range")));
    }
    if width == 0 || height == 0 {
        return Err(AssetError::Ppm(format!("empty image {width}x{height}")));
    }

    let texels = (width as usize)
        .checked_mul(height as usize)
        .filter(|t| t.checked_mul(4).is_some())
        .ok_or_else(|| AssetError::Ppm(format!("image {width}x{height} is too large")))?;
    // Every texel needs at least three samples in the source text.
    let mut pixels = Vec::with_capacity(texels.min(src.len() / 3) * 4);
    for _ in 0..texels {
        for _ in 0..3 {
            let sample = next_value("sample")?;
            if sample > maxval {
                return Err(AssetError::Ppm(format!("sample {sample} exceeds maxval {maxval}")));
            }
            pixels.push(((sample * 255 + maxval / 2) / maxval) as u8);
        }
        pixels.push(255);
    }

    ImageData::from_rgba8(width, height, pixels)
        .ok_or_else(|| AssetError::Ppm(format!("bad dimensions {width}x{height}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_comments_and_pixels() {
        let src = "P3\n# made by hand\n2 2 # size\n255\n255 0 0  0 255 0\n0 0 255  9 9 9\n";
        let img = parse_ppm(src).unwrap();
        assert_eq!((img.width(), img.height()), (2, 2));
        assert_eq!(
            img.pixels(),
            &[255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255, 9, 9, 9, 255]
        );
    }

    #[test]
    fn rescales_small_maxval() {
        let img = parse_ppm("P3 1 1 15 15 0 8").unwrap();
        assert_eq!(img.pixels(), &[255, 0, 136, 255]);
    }

    #[test]
    fn rejects_other_magic_and_short_data() {
        assert!(parse_ppm("P6 1 1 255 0 0 0").is_err());
        assert!(parse_ppm("P3 2 1 255 1 2 3").is_err());
        assert!(parse_ppm("P3 1 1 255 1 2 300").is_err());
        assert!(parse_ppm("P3 1 1 0 0 0 0").is_err());
    }

    #[test]
    fn oversized_header_is_an_error() {
        let err = parse_ppm("P3 4000000000 4000000000 255 1 2 3").unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");
        assert!(parse_ppm("P3 60000 60000 255 1 2 3").is_err());
    }
}
