// Meshes - vertex/index buffer pairs owned by the application
//
// The renderer never owns a mesh. Draw items carry a `MeshBinding`, a copy
// of the handles and counts, so the mesh must outlive every frame it was
// submitted to.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

use crate::backend::buffer::Buffer;
use crate::backend::VulkanDevice;
use crate::error::RenderResult;

/// Fixed vertex layout: 2D position + RGB colour.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub colour: [f32; 3],
}

impl Vertex {
    pub const fn new(position: [f32; 2], colour: [f32; 3]) -> Self {
        Self { position, colour }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // location 0: position
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            // location 1: colour
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, colour) as u32,
            },
        ]
    }
}

pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex::new([0.0, 0.5], [1.0, 0.0, 0.0]),
    Vertex::new([-0.5, -0.5], [0.0, 0.0, 1.0]),
    Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0]),
];

pub const TRIANGLE_INDICES: [u16; 3] = [0, 1, 2];

pub struct Mesh {
    pub vertex_buffer: Buffer,
    pub vertex_count: u32,
    pub index_buffer: Option<Buffer>,
    pub index_count: u32,
    pub topology: vk::PrimitiveTopology,
}

impl Mesh {
    /// Upload vertices (and optional 16-bit indices) into host-visible
    /// buffers. If the index buffer fails the vertex buffer is released.
    /// Empty `vertices` or `Some(&[])` indices fail with `EmptyBuffer`.
    pub fn new(device: &VulkanDevice, vertices: &[Vertex], indices: Option<&[u16]>) -> RenderResult<Self> {
        let mut vertex_buffer = Buffer::with_data(device, vk::BufferUsageFlags::VERTEX_BUFFER, vertices)?;

        let index_buffer = match indices {
            Some(indices) => match Buffer::with_data(device, vk::BufferUsageFlags::INDEX_BUFFER, indices) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    vertex_buffer.destroy(device);
                    return Err(e);
                }
            },
            None => None,
        };

        Ok(Self {
            vertex_buffer,
            vertex_count: vertices.len() as u32,
            index_buffer,
            index_count: indices.map_or(0, |i| i.len() as u32),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        })
    }

    /// The test triangle: red top, blue left, green right.
    pub fn create_triangle(device: &VulkanDevice) -> RenderResult<Self> {
        log::info!("Creating triangle mesh");
        let mesh = Self::new(device, &TRIANGLE_VERTICES, Some(&TRIANGLE_INDICES))?;
        log::info!("Created triangle mesh");
        Ok(mesh)
    }

    pub fn destroy(&mut self, device: &VulkanDevice) {
        self.vertex_buffer.destroy(device);
        if let Some(index_buffer) = self.index_buffer.as_mut() {
            index_buffer.destroy(device);
        }
        self.vertex_count = 0;
        self.index_count = 0;
        log::info!("Mesh destroyed");
    }

    pub fn binding(&self) -> MeshBinding {
        MeshBinding {
            vertex_buffer: self.vertex_buffer.buffer,
            vertex_count: self.vertex_count,
            index_buffer: self
                .index_buffer
                .as_ref()
                .map(|b| b.buffer)
                .filter(|&b| b != vk::Buffer::null()),
            index_count: self.index_count,
        }
    }
}

/// What a draw item needs from a mesh at record time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBinding {
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub index_buffer: Option<vk::Buffer>,
    pub index_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    Indexed { index_count: u32 },
    Vertices { vertex_count: u32 },
    Nothing,
}

impl MeshBinding {
    pub fn draw_call(&self) -> DrawCall {
        if self.vertex_buffer == vk::Buffer::null() {
            return DrawCall::Nothing;
        }
        match self.index_buffer {
            Some(_) if self.index_count > 0 => DrawCall::Indexed {
                index_count: self.index_count,
            },
            Some(_) => DrawCall::Nothing,
            None if self.vertex_count > 0 => DrawCall::Vertices {
                vertex_count: self.vertex_count,
            },
            None => DrawCall::Nothing,
        }
    }

    /// Bind the buffers and issue the draw. Must be inside a render pass.
    pub fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        let draw = self.draw_call();
        if draw == DrawCall::Nothing {
            return;
        }

        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[0]);
            match (draw, self.index_buffer) {
                (DrawCall::Indexed { index_count }, Some(index_buffer)) => {
                    device.cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT16);
                    device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0);
                }
                (DrawCall::Vertices { vertex_count }, _) => {
                    device.cmd_draw(cmd, vertex_count, 1, 0, 0);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn buffer(raw: u64) -> vk::Buffer {
        vk::Buffer::from_raw(raw)
    }

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        assert_eq!(size_of::<Vertex>(), 20);

        let binding = Vertex::binding_description();
        assert_eq!(binding.stride, 20);

        let [position, colour] = Vertex::attribute_descriptions();
        assert_eq!((position.location, position.offset), (0, 0));
        assert_eq!(position.format, vk::Format::R32G32_SFLOAT);
        assert_eq!((colour.location, colour.offset), (1, 8));
        assert_eq!(colour.format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn vertex_bytes_are_tightly_packed() {
        let bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE_VERTICES);
        assert_eq!(bytes.len(), 60);
        assert_eq!(bytemuck::cast_slice::<u16, u8>(&TRIANGLE_INDICES).len(), 6);
    }

    #[test]
    fn indexed_mesh_draws_indices() {
        let binding = MeshBinding {
            vertex_buffer: buffer(1),
            vertex_count: 4,
            index_buffer: Some(buffer(2)),
            index_count: 6,
        };
        assert_eq!(binding.draw_call(), DrawCall::Indexed { index_count: 6 });
    }

    #[test]
    fn vertex_only_mesh_draws_vertices() {
        let binding = MeshBinding {
            vertex_buffer: buffer(1),
            vertex_count: 3,
            index_buffer: None,
            index_count: 0,
        };
        assert_eq!(binding.draw_call(), DrawCall::Vertices { vertex_count: 3 });
    }

    #[test]
    fn destroyed_or_empty_mesh_draws_nothing() {
        let destroyed = MeshBinding {
            vertex_buffer: vk::Buffer::null(),
            vertex_count: 0,
            index_buffer: None,
            index_count: 0,
        };
        assert_eq!(destroyed.draw_call(), DrawCall::Nothing);

        let no_indices = MeshBinding {
            vertex_buffer: buffer(1),
            vertex_count: 3,
            index_buffer: Some(buffer(2)),
            index_count: 0,
        };
        assert_eq!(no_indices.draw_call(), DrawCall::Nothing);
    }

    #[test]
    fn binding_copies_handles_and_counts() {
        let mesh = Mesh {
            vertex_buffer: Buffer {
                buffer: buffer(7),
                memory: vk::DeviceMemory::null(),
                size: 60,
            },
            vertex_count: 3,
            index_buffer: Some(Buffer {
                buffer: buffer(8),
                memory: vk::DeviceMemory::null(),
                size: 6,
            }),
            index_count: 3,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        };

        let binding = mesh.binding();
        assert_eq!(binding.vertex_buffer, buffer(7));
        assert_eq!(binding.index_buffer, Some(buffer(8)));
        assert_eq!(binding.draw_call(), DrawCall::Indexed { index_count: 3 });
    }
}
