// SPDX-License-Identifier: CEPL-1.0

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageData {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ImageData {
    /// `None` unless `pixels` holds exactly `width * height` RGBA texels and
    /// both sides are non-zero.
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        (width > 0 && height > 0 && pixels.len() == expected).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let w = width.max(1);
        let h = height.max(1);
        Self {
            width: w,
            height: h,
            pixels: rgba.repeat((w * h) as usize),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn mip_levels(&self) -> u32 {
        mip_level_count(self.width, self.height)
    }
}

/// `floor(log2(max(width, height))) + 1`, the length of a full mip chain.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    u32::BITS - width.max(height).max(1).leading_zeros()
}

/// One downsampling blit: level `level - 1` (`src` sized) into `level`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MipStep {
    pub level: u32,
    pub src: (u32, u32),
    pub dst: (u32, u32),
}

/// Blits needed to fill levels `1..levels` from level 0. Each side halves
/// and stops at 1.
pub fn mip_chain(width: u32, height: u32, levels: u32) -> Vec<MipStep> {
    let mut steps = Vec::with_capacity(levels.saturating_sub(1) as usize);
    let (mut w, mut h) = (width.max(1), height.max(1));
    for level in 1..levels {
        let dst = ((w / 2).max(1), (h / 2).max(1));
        steps.push(MipStep {
            level,
            src: (w, h),
            dst,
        });
        (w, h) = dst;
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_counts() {
        assert_eq!(mip_level_count(512, 256), 10);
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(3, 2), 2);
        assert_eq!(mip_level_count(1024, 1024), 11);
        assert_eq!(mip_level_count(1, 600), 10);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn chain_halves_to_one() {
        let steps = mip_chain(8, 2, mip_level_count(8, 2));
        assert_eq!(
            steps,
            vec![
                MipStep { level: 1, src: (8, 2), dst: (4, 1) },
                MipStep { level: 2, src: (4, 1), dst: (2, 1) },
                MipStep { level: 3, src: (2, 1), dst: (1, 1) },
            ]
        );
    }

    #[test]
    fn single_level_needs_no_blits() {
        assert!(mip_chain(1, 1, 1).is_empty());
    }

    #[test]
    fn rgba_length_is_checked() {
        assert!(ImageData::from_rgba8(2, 2, vec![0; 16]).is_some());
        assert!(ImageData::from_rgba8(2, 2, vec![0; 15]).is_none());
        assert!(ImageData::from_rgba8(0, 2, Vec::new()).is_none());
    }

    #[test]
    fn solid_fills_every_texel() {
        let img = ImageData::solid(3, 2, [1, 2, 3, 4]);
        assert_eq!(img.pixels().len(), 24);
        assert!(img.pixels().chunks(4).all(|p| p == [1, 2, 3, 4]));
    }
}
