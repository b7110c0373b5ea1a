//! Full-screen quad shared by all three stages

use bytemuck::{Pod, Zeroable};

use crate::device::{GraphicsDevice, PixelCenter, VertexElement, VertexFormat, VertexUsage};
use crate::error::MlaaResult;
use crate::shader::pixel_size;

/// Position (x, y, z) followed by texcoord (u, v); 20 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
}

/// Vertex stream layout matching [`QuadVertex`]
pub const QUAD_VERTEX_ELEMENTS: [VertexElement; 2] = [
    VertexElement {
        offset: 0,
        format: VertexFormat::Float3,
        usage: VertexUsage::Position,
        usage_index: 0,
    },
    VertexElement {
        offset: 12,
        format: VertexFormat::Float2,
        usage: VertexUsage::TexCoord,
        usage_index: 0,
    },
];

/// Depth of every quad vertex
const QUAD_DEPTH: f32 = 0.5;

/// Two-triangle strip covering the render target, texcoords [0,1]² with a
/// top-left origin.
///
/// For [`PixelCenter::HalfTexel`] devices the positions are shifted by
/// (-1/width, +1/height) in clip space, half a texel, so that every pixel samples
/// its texel center. The shift is computed once per frame size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FullscreenQuad {
    vertices: [QuadVertex; 4],
}

impl FullscreenQuad {
    pub fn new(width: u32, height: u32, center: PixelCenter) -> Self {
        let offset = match center {
            PixelCenter::HalfTexel => pixel_size(width, height),
            PixelCenter::Centered => glam::Vec2::ZERO,
        };
        let (px, py) = (offset.x, offset.y);

        let vertex = |x: f32, y: f32, u: f32, v: f32| QuadVertex {
            position: [x - px, y + py, QUAD_DEPTH],
            texcoord: [u, v],
        };

        Self {
            vertices: [
                vertex(-1.0, 1.0, 0.0, 0.0),
                vertex(1.0, 1.0, 1.0, 0.0),
                vertex(-1.0, -1.0, 0.0, 1.0),
                vertex(1.0, -1.0, 1.0, 1.0),
            ],
        }
    }

    pub fn vertices(&self) -> &[QuadVertex; 4] {
        &self.vertices
    }

    /// Number of triangles the strip produces
    pub fn primitive_count(&self) -> u32 {
        self.vertices.len() as u32 - 2
    }

    /// Submit the strip with the effect's current technique and pass
    pub fn emit<D: GraphicsDevice>(&self, device: &D, effect: &D::Effect) -> MlaaResult<()> {
        device.draw_triangle_strip(effect, &self.vertices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_texel_quad_matches_closed_form() {
        let (w, h) = (640u32, 480u32);
        let quad = FullscreenQuad::new(w, h, PixelCenter::HalfTexel);
        let px = 1.0 / w as f32;
        let py = 1.0 / h as f32;

        let expected = [
            ([-1.0 - px, 1.0 + py, 0.5], [0.0, 0.0]),
            ([1.0 - px, 1.0 + py, 0.5], [1.0, 0.0]),
            ([-1.0 - px, -1.0 + py, 0.5], [0.0, 1.0]),
            ([1.0 - px, -1.0 + py, 0.5], [1.0, 1.0]),
        ];
        assert_eq!(quad.vertices().len(), 4);
        assert_eq!(quad.primitive_count(), 2);
        for (vertex, (position, texcoord)) in quad.vertices().iter().zip(expected) {
            assert_eq!(vertex.position, position);
            assert_eq!(vertex.texcoord, texcoord);
        }
    }

    #[test]
    fn half_texel_offset_is_one_over_extent_in_clip_space() {
        let quad = FullscreenQuad::new(4, 8, PixelCenter::HalfTexel);
        let v = quad.vertices();
        assert_eq!(v[0].position[0], -1.25);
        assert_eq!(v[0].position[1], 1.125);
        assert_eq!(v[3].position[0], 0.75);
        assert_eq!(v[3].position[1], -0.875);
    }

    #[test]
    fn centered_devices_get_unshifted_quad() {
        let quad = FullscreenQuad::new(33, 17, PixelCenter::Centered);
        let corners: Vec<[f32; 2]> = quad
            .vertices()
            .iter()
            .map(|v| [v.position[0], v.position[1]])
            .collect();
        assert_eq!(corners, vec![[-1.0, 1.0], [1.0, 1.0], [-1.0, -1.0], [1.0, -1.0]]);
    }

    #[test]
    fn vertex_layout_matches_struct() {
        assert_eq!(std::mem::size_of::<QuadVertex>(), 20);
        assert_eq!(QUAD_VERTEX_ELEMENTS[1].offset, QUAD_VERTEX_ELEMENTS[0].format.size());
    }
}
