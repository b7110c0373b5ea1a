//! CPU texel storage and sampling for the software device

use glam::{Vec2, Vec4};

use crate::assets::{LookupFormat, LookupImage};

/// RGBA image with 8-bit unorm precision, stored as floats.
///
/// Writes are quantized to 8 bits so results match an RGBA8 render target.
#[derive(Clone, Debug, PartialEq)]
pub struct SoftImage {
    width: u32,
    height: u32,
    texels: Vec<Vec4>,
}

fn quantize(v: Vec4) -> Vec4 {
    (v.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0
}

impl SoftImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: vec![Vec4::ZERO; width as usize * height as usize],
        }
    }

    /// Tightly packed RGBA8 rows, top row first
    pub fn from_rgba8(width: u32, height: u32, data: &[u8]) -> Option<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return None;
        }
        let texels = data
            .chunks_exact(4)
            .map(|c| Vec4::new(c[0] as f32, c[1] as f32, c[2] as f32, c[3] as f32) / 255.0)
            .collect();
        Some(Self {
            width,
            height,
            texels,
        })
    }

    /// Depth values in `x`, kept at full float precision
    pub fn from_depth(width: u32, height: u32, depth: &[f32]) -> Option<Self> {
        if depth.len() != width as usize * height as usize {
            return None;
        }
        let texels = depth.iter().map(|&d| Vec4::new(d, d, d, 1.0)).collect();
        Some(Self {
            width,
            height,
            texels,
        })
    }

    /// Single-channel tables replicate into RGB with opaque alpha, like L8.
    pub fn from_lookup(image: &LookupImage) -> Self {
        let texels = match image.format() {
            LookupFormat::Rgba8 => image
                .data()
                .chunks_exact(4)
                .map(|c| Vec4::new(c[0] as f32, c[1] as f32, c[2] as f32, c[3] as f32) / 255.0)
                .collect(),
            LookupFormat::R8 => image
                .data()
                .iter()
                .map(|&l| {
                    let l = l as f32 / 255.0;
                    Vec4::new(l, l, l, 1.0)
                })
                .collect(),
        };
        Self {
            width: image.width(),
            height: image.height(),
            texels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn fill(&mut self, color: Vec4) {
        let color = quantize(color);
        self.texels.iter_mut().for_each(|t| *t = color);
    }

    pub fn texel(&self, x: u32, y: u32) -> Vec4 {
        self.texels[y as usize * self.width as usize + x as usize]
    }

    pub fn write(&mut self, x: u32, y: u32, color: Vec4) {
        let index = y as usize * self.width as usize + x as usize;
        self.texels[index] = quantize(color);
    }

    pub fn to_rgba8(&self) -> Vec<u8> {
        self.texels
            .iter()
            .flat_map(|t| {
                let q = (t.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
                [q.x as u8, q.y as u8, q.z as u8, q.w as u8]
            })
            .collect()
    }

    /// Texel containing `uv`, or `None` outside the image
    pub fn texel_coords(&self, uv: Vec2) -> Option<(u32, u32)> {
        let p = (uv * Vec2::new(self.width as f32, self.height as f32)).floor();
        if p.x < 0.0 || p.y < 0.0 || p.x >= self.width as f32 || p.y >= self.height as f32 {
            return None;
        }
        Some((p.x as u32, p.y as u32))
    }

    /// Nearest texel with clamp-to-edge addressing
    pub fn sample_point(&self, uv: Vec2) -> Vec4 {
        let p = (uv * Vec2::new(self.width as f32, self.height as f32)).floor();
        let x = (p.x.max(0.0) as u32).min(self.width - 1);
        let y = (p.y.max(0.0) as u32).min(self.height - 1);
        self.texel(x, y)
    }

    /// Bilinear filtering with clamp-to-edge addressing
    pub fn sample_linear(&self, uv: Vec2) -> Vec4 {
        let p = uv * Vec2::new(self.width as f32, self.height as f32) - Vec2::splat(0.5);
        let base = p.floor();
        let f = p - base;

        let clamp_x = |x: f32| (x.max(0.0) as u32).min(self.width - 1);
        let clamp_y = |y: f32| (y.max(0.0) as u32).min(self.height - 1);
        let (x0, x1) = (clamp_x(base.x), clamp_x(base.x + 1.0));
        let (y0, y1) = (clamp_y(base.y), clamp_y(base.y + 1.0));

        let top = self.texel(x0, y0).lerp(self.texel(x1, y0), f.x);
        let bottom = self.texel(x0, y1).lerp(self.texel(x1, y1), f.x);
        top.lerp(bottom, f.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba8_round_trips_through_writes() {
        let data: Vec<u8> = (0..16u8).map(|i| i * 17).collect();
        let source = SoftImage::from_rgba8(2, 2, &data).unwrap();
        let mut copy = SoftImage::new(2, 2);
        for y in 0..2 {
            for x in 0..2 {
                copy.write(x, y, source.texel(x, y));
            }
        }
        assert_eq!(copy.to_rgba8(), data);
    }

    #[test]
    fn point_sampling_clamps_to_edge() {
        let mut image = SoftImage::new(2, 1);
        image.write(0, 0, Vec4::ONE);
        assert_eq!(image.sample_point(Vec2::new(-0.3, 0.5)), Vec4::ONE);
        assert_eq!(image.sample_point(Vec2::new(1.7, 0.5)), Vec4::ZERO);
        assert_eq!(image.texel_coords(Vec2::new(1.7, 0.5)), None);
    }

    #[test]
    fn linear_sampling_at_texel_center_is_exact() {
        let mut image = SoftImage::new(2, 1);
        image.write(0, 0, Vec4::ONE);
        assert_eq!(image.sample_linear(Vec2::new(0.25, 0.5)), Vec4::ONE);
        let mid = image.sample_linear(Vec2::new(0.5, 0.5));
        assert!((mid.x - 0.5).abs() < 1e-6);
    }
}
