// Scene data - the pyramid, its vertex layout and animation
//
// Everything here is plain data or pure math; the renderer uploads it.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::mem::{offset_of, size_of};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    const fn new(position: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, tex_coord) as u32,
            },
        ]
    }
}

const APEX: [f32; 3] = [0.0, 1.0, 0.0];
const APEX_COLOR: [f32; 3] = [1.0, 1.0, 0.0];

/// Four side faces, each (base corner, apex, next base corner)
pub const PYRAMID_VERTICES: [Vertex; 12] = [
    Vertex::new([0.5, 0.0, -0.5], [0.0, 0.0, 1.0], [0.5, 0.5]),
    Vertex::new(APEX, APEX_COLOR, [1.0, 0.0]),
    Vertex::new([0.5, 0.0, 0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
    Vertex::new([0.5, 0.0, 0.5], [0.0, 1.0, 0.0], [0.5, 0.5]),
    Vertex::new(APEX, APEX_COLOR, [1.0, 0.0]),
    Vertex::new([-0.5, 0.0, 0.5], [0.0, 1.0, 1.0], [0.0, 0.0]),
    Vertex::new([-0.5, 0.0, 0.5], [0.0, 1.0, 1.0], [0.5, 0.5]),
    Vertex::new(APEX, APEX_COLOR, [1.0, 0.0]),
    Vertex::new([-0.5, 0.0, -0.5], [1.0, 0.0, 1.0], [0.0, 0.0]),
    Vertex::new([-0.5, 0.0, -0.5], [1.0, 0.0, 1.0], [0.5, 0.5]),
    Vertex::new(APEX, APEX_COLOR, [1.0, 0.0]),
    Vertex::new([0.5, 0.0, -0.5], [0.0, 0.0, 1.0], [0.0, 0.0]),
];

pub const PYRAMID_INDICES: [u16; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

/// Per-frame uniform data (binding 0)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
}

/// Per-draw push constant, vertex stage only
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PushConstant {
    pub view_proj: Mat4,
}

const FOV_Y_DEGREES: f32 = 70.0;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 20.0;
const EYE: Vec3 = Vec3::new(0.0, 0.25, -1.0);

/// Flips Y and halves Z; w also picks up half of z, so the image shrinks
/// with distance and stored depth stays below 1/3
const CLIP: Mat4 = Mat4::from_cols(
    Vec4::new(1.0, 0.0, 0.0, 0.0),
    Vec4::new(0.0, -1.0, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 0.5, 0.5),
    Vec4::new(0.0, 0.0, 0.0, 1.0),
);

/// Quarter turn per second around Y while bobbing up and down
pub fn model_matrix(seconds: f32) -> Mat4 {
    let angle = (seconds * 90.0).to_radians();
    let bob = (seconds * 5.0).sin() * 0.25 - 0.25;
    Mat4::from_rotation_y(angle) * Mat4::from_translation(Vec3::new(0.0, bob, 0.0))
}

pub fn view_proj(aspect: f32) -> Mat4 {
    let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
    CLIP * proj * view
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(Vertex::binding_description().stride, 32);

        let offsets: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|a| a.offset)
            .collect();
        assert_eq!(offsets, vec![0, 12, 24]);

        let locations: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|a| a.location)
            .collect();
        assert_eq!(locations, vec![0, 1, 2]);
    }

    #[test]
    fn gpu_structs_have_expected_sizes() {
        assert_eq!(size_of::<PushConstant>(), 64);
        assert_eq!(size_of::<UniformBufferObject>(), 64);
    }

    #[test]
    fn pyramid_is_four_faces_sharing_an_apex() {
        assert_eq!(PYRAMID_INDICES.len(), PYRAMID_VERTICES.len());
        for face in PYRAMID_VERTICES.chunks(3) {
            assert_eq!(face[1].position, APEX);
            assert_eq!(face[0].position[1], 0.0);
            assert_eq!(face[2].position[1], 0.0);
        }
        assert!(PYRAMID_INDICES
            .iter()
            .all(|&i| (i as usize) < PYRAMID_VERTICES.len()));
    }

    #[test]
    fn model_at_rest_is_a_downward_offset() {
        let model = model_matrix(0.0);
        let expected = Mat4::from_translation(Vec3::new(0.0, -0.25, 0.0));
        assert!(model.abs_diff_eq(expected, EPS));
    }

    #[test]
    fn rotation_is_a_quarter_turn_per_second() {
        let turned = model_matrix(1.0).transform_vector3(Vec3::X);
        assert!(turned.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), EPS));

        // Full turn after four seconds
        let start = model_matrix(0.0).transform_vector3(Vec3::X);
        let end = model_matrix(4.0).transform_vector3(Vec3::X);
        assert!(start.abs_diff_eq(end, 1e-4));
    }

    #[test]
    fn bob_stays_between_minus_half_and_zero() {
        for step in 0..200 {
            let t = step as f32 * 0.05;
            let y = model_matrix(t).w_axis.y;
            assert!((-0.5 - EPS..=EPS).contains(&y), "t={} y={}", t, y);
        }
    }

    #[test]
    fn origin_projects_to_screen_center() {
        let clip = view_proj(16.0 / 9.0) * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < EPS);
        assert!(ndc.y.abs() < EPS);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn view_proj_pins_the_clip_columns() {
        let aspect = 16.0 / 9.0;
        let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(70f32.to_radians(), aspect, 0.1, 20.0);
        let clip = Mat4::from_cols_array(&[
            1.0, 0.0, 0.0, 0.0, //
            0.0, -1.0, 0.0, 0.0, //
            0.0, 0.0, 0.5, 0.5, //
            0.0, 0.0, 0.0, 1.0,
        ]);
        assert!(view_proj(aspect).abs_diff_eq(clip * proj * view, EPS));

        let p = view_proj(aspect) * Vec4::new(0.5, 0.0, 0.5, 1.0);
        let ndc = p.truncate() / p.w;
        assert!(ndc.abs_diff_eq(Vec3::new(-0.1803, -0.0778, 0.3194), 1e-3), "{ndc}");
    }

    #[test]
    fn depth_grows_with_distance_and_stays_below_a_third() {
        let mut previous = 0.0;
        for z in [-0.5f32, 0.0, 0.5, 2.0, 10.0] {
            let p = view_proj(1.0) * Vec4::new(0.0, 0.0, z, 1.0);
            let depth = p.z / p.w;
            assert!(depth > previous && depth < 1.0 / 3.0, "z={} depth={}", z, depth);
            previous = depth;
        }
    }

    #[test]
    fn apex_is_drawn_above_center() {
        // Vulkan NDC has +Y pointing down the screen
        let clip = view_proj(1.0) * Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }
}
