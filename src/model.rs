// Vertex layout and GPU-resident meshes.
//
// Model file loading is not part of the crate; meshes are described with a
// `ModelBuilder` (see `ModelBuilder::cube`).

use std::mem::offset_of;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::backend::VulkanDevice;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3, color: Vec3, normal: Vec3) -> Self {
        Self {
            position,
            color,
            normal,
            uv: Vec2::ZERO,
        }
    }

    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };

        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
            attribute(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
            attribute(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
        ]
    }
}

/// The single draw command a model records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    Indexed { index_count: u32 },
    Vertices { vertex_count: u32 },
}

impl DrawCall {
    /// Issue exactly one of the two draws, one instance.
    pub fn record(self, draw_indexed: impl FnOnce(u32), draw: impl FnOnce(u32)) {
        match self {
            DrawCall::Indexed { index_count } => draw_indexed(index_count),
            DrawCall::Vertices { vertex_count } => draw(vertex_count),
        }
    }
}

/// CPU-side mesh description. An empty index list means non-indexed drawing.
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl ModelBuilder {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.vertices.len() >= 3,
            "Vertex count must be at least 3, got {}",
            self.vertices.len()
        );
        if !self.indices.is_empty() {
            anyhow::ensure!(
                self.indices.len() >= 3,
                "Index count must be at least 3, got {}",
                self.indices.len()
            );
            let vertex_count = self.vertices.len() as u32;
            if let Some(bad) = self.indices.iter().find(|&&i| i >= vertex_count) {
                anyhow::bail!("Index {} out of range for {} vertices", bad, vertex_count);
            }
        }
        Ok(())
    }

    pub fn draw_call(&self) -> DrawCall {
        if self.indices.is_empty() {
            DrawCall::Vertices {
                vertex_count: self.vertices.len() as u32,
            }
        } else {
            DrawCall::Indexed {
                index_count: self.indices.len() as u32,
            }
        }
    }

    /// Unit cube centred on the origin, one color per face, indexed
    pub fn cube(offset: Vec3) -> Self {
        // (normal, color) per face; corners wound consistently per face
        let faces = [
            (Vec3::NEG_X, Vec3::new(0.9, 0.9, 0.9)),
            (Vec3::X, Vec3::new(0.8, 0.8, 0.1)),
            (Vec3::NEG_Y, Vec3::new(0.9, 0.6, 0.1)),
            (Vec3::Y, Vec3::new(0.8, 0.1, 0.1)),
            (Vec3::Z, Vec3::new(0.1, 0.1, 0.8)),
            (Vec3::NEG_Z, Vec3::new(0.1, 0.8, 0.1)),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        for (normal, color) in faces {
            // Two axes spanning the face
            let u = if normal.x != 0.0 { Vec3::Y } else { Vec3::X };
            let v = normal.cross(u);
            let base = vertices.len() as u32;

            for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
                let position = normal * 0.5 + u * su + v * sv + offset;
                vertices.push(Vertex::new(position, color, normal));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self { vertices, indices }
    }
}

struct GpuBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
}

/// Immutable device-local mesh
pub struct Model {
    vertex_buffer: GpuBuffer,
    index_buffer: Option<GpuBuffer>,
    draw_call: DrawCall,
    device: Arc<VulkanDevice>,
}

impl Model {
    pub fn new(device: Arc<VulkanDevice>, builder: &ModelBuilder) -> Result<Self> {
        builder.validate()?;

        let (buffer, memory) = device
            .create_device_local_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, &builder.vertices)?;
        let vertex_buffer = GpuBuffer { buffer, memory };

        let index_buffer = if builder.indices.is_empty() {
            None
        } else {
            match device
                .create_device_local_buffer(vk::BufferUsageFlags::INDEX_BUFFER, &builder.indices)
            {
                Ok((buffer, memory)) => Some(GpuBuffer { buffer, memory }),
                Err(e) => {
                    unsafe {
                        device.device.destroy_buffer(vertex_buffer.buffer, None);
                        device.device.free_memory(vertex_buffer.memory, None);
                    }
                    return Err(e);
                }
            }
        };

        log::debug!(
            "Created model: {} vertices, {} indices",
            builder.vertices.len(),
            builder.indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            draw_call: builder.draw_call(),
            device,
        })
    }

    pub fn draw_call(&self) -> DrawCall {
        self.draw_call
    }

    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.device.cmd_bind_vertex_buffers(
                command_buffer,
                0,
                &[self.vertex_buffer.buffer],
                &[0],
            );
            if let Some(index_buffer) = &self.index_buffer {
                self.device.device.cmd_bind_index_buffer(
                    command_buffer,
                    index_buffer.buffer,
                    0,
                    vk::IndexType::UINT32,
                );
            }
        }
    }

    pub fn draw(&self, command_buffer: vk::CommandBuffer) {
        let device = &self.device.device;
        self.draw_call.record(
            |index_count| unsafe {
                device.cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0);
            },
            |vertex_count| unsafe {
                device.cmd_draw(command_buffer, vertex_count, 1, 0, 0);
            },
        );
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("draw_call", &self.draw_call)
            .finish_non_exhaustive()
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        unsafe {
            for gpu_buffer in std::iter::once(&self.vertex_buffer).chain(&self.index_buffer) {
                self.device.device.destroy_buffer(gpu_buffer.buffer, None);
                self.device.device.free_memory(gpu_buffer.memory, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Vec<Vertex> {
        vec![
            Vertex::new(Vec3::new(0.0, -0.5, 0.0), Vec3::X, Vec3::Z),
            Vertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::Y, Vec3::Z),
            Vertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec3::Z, Vec3::Z),
        ]
    }

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 44);
        let offsets: Vec<_> = Vertex::attribute_descriptions().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 36]);
        assert_eq!(Vertex::binding_descriptions()[0].stride, 44);
    }

    #[test]
    fn non_indexed_draw_uses_vertex_count() {
        let builder = ModelBuilder::new(triangle(), vec![]);
        builder.validate().unwrap();
        assert_eq!(builder.draw_call(), DrawCall::Vertices { vertex_count: 3 });
    }

    #[test]
    fn indexed_draw_uses_index_count() {
        let mut vertices = triangle();
        vertices.push(Vertex::new(Vec3::ONE, Vec3::ONE, Vec3::Z));
        let builder = ModelBuilder::new(vertices, vec![0, 1, 2, 2, 3, 0]);
        builder.validate().unwrap();
        assert_eq!(builder.draw_call(), DrawCall::Indexed { index_count: 6 });
    }

    #[derive(Debug, PartialEq)]
    enum Recorded {
        Indexed(u32),
        Vertices(u32),
    }

    fn recorded(builder: &ModelBuilder) -> Vec<Recorded> {
        let calls = std::cell::RefCell::new(Vec::new());
        builder.draw_call().record(
            |n| calls.borrow_mut().push(Recorded::Indexed(n)),
            |n| calls.borrow_mut().push(Recorded::Vertices(n)),
        );
        calls.into_inner()
    }

    #[test]
    fn builder_counts_reach_exactly_one_draw() {
        assert_eq!(
            recorded(&ModelBuilder::new(triangle(), vec![])),
            vec![Recorded::Vertices(3)]
        );
        assert_eq!(
            recorded(&ModelBuilder::new(triangle(), vec![0, 1, 2, 2, 1, 0])),
            vec![Recorded::Indexed(6)]
        );
        assert_eq!(
            recorded(&ModelBuilder::cube(Vec3::ZERO)),
            vec![Recorded::Indexed(36)]
        );
    }

    #[test]
    fn fewer_than_three_vertices_rejected() {
        let builder = ModelBuilder::new(triangle()[..2].to_vec(), vec![]);
        assert!(builder.validate().is_err());
    }

    #[test]
    fn out_of_range_index_rejected() {
        let builder = ModelBuilder::new(triangle(), vec![0, 1, 3]);
        assert!(builder.validate().is_err());
    }

    #[test]
    fn cube_is_six_indexed_faces() {
        let cube = ModelBuilder::cube(Vec3::ZERO);
        cube.validate().unwrap();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.draw_call(), DrawCall::Indexed { index_count: 36 });

        for vertex in &cube.vertices {
            // Every corner lies on the unit cube and on its face's plane
            assert!(vertex.position.abs().max_element() <= 0.5 + f32::EPSILON);
            assert!((vertex.position.dot(vertex.normal) - 0.5).abs() < 1e-6);
        }
    }
}
