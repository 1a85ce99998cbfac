// Buffer allocator for vertex and index data
//
// One buffer, one dedicated allocation. The caller owns the returned
// `Buffer` and must hand it back to `Buffer::destroy`.

use ash::vk;
use bytemuck::Pod;

use super::VulkanDevice;
use crate::error::{RenderError, RenderResult, VkResultExt};

/// A GPU buffer and its backing memory, allocated and freed as a pair.
#[derive(Debug, Default)]
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Buffer {
    /// Create a buffer with the given usage, backed by memory that has at
    /// least `properties`. When `initial_data` is present the allocation is
    /// mapped, filled and unmapped, so `properties` must include
    /// `HOST_VISIBLE`. A zero `size` is rejected before any API call.
    pub fn create(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        initial_data: Option<&[u8]>,
    ) -> RenderResult<Self> {
        check_size(size, usage)?;
        log::debug!("Creating buffer of {} bytes ({:?})", size, usage);

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .stage("vkCreateBuffer")?;

        match Self::back_with_memory(device, buffer, size, properties, initial_data) {
            Ok(memory) => Ok(Self {
                buffer,
                memory,
                size,
            }),
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    /// Create a host-visible, host-coherent buffer holding `data`.
    pub fn with_data<T: Pod>(
        device: &VulkanDevice,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> RenderResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        Self::create(
            device,
            bytes.len() as vk::DeviceSize,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            Some(bytes),
        )
    }

    /// Allocate, bind and optionally fill memory for `buffer`. Frees the
    /// memory again if a later step fails; the buffer itself stays with the
    /// caller.
    fn back_with_memory(
        device: &VulkanDevice,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        properties: vk::MemoryPropertyFlags,
        initial_data: Option<&[u8]>,
    ) -> RenderResult<vk::DeviceMemory> {
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            properties,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.device.allocate_memory(&alloc_info, None) }
            .stage("vkAllocateMemory")?;

        let filled = unsafe { device.device.bind_buffer_memory(buffer, memory, 0) }
            .stage("vkBindBufferMemory")
            .and_then(|()| match initial_data {
                Some(data) => upload(device, memory, size, data),
                None => Ok(()),
            });

        if let Err(e) = filled {
            unsafe { device.device.free_memory(memory, None) };
            return Err(e);
        }

        Ok(memory)
    }

    /// Release the buffer handle, then its memory. Safe to call twice.
    pub fn destroy(&mut self, device: &VulkanDevice) {
        if self.buffer == vk::Buffer::null() && self.memory == vk::DeviceMemory::null() {
            return;
        }

        unsafe {
            if self.buffer != vk::Buffer::null() {
                device.device.destroy_buffer(self.buffer, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                device.device.free_memory(self.memory, None);
            }
        }

        log::debug!("Destroyed buffer of {} bytes", self.size);
        self.buffer = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
        self.size = 0;
    }

    pub fn is_alive(&self) -> bool {
        self.buffer != vk::Buffer::null()
    }
}

fn check_size(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> RenderResult<()> {
    if size == 0 {
        log::error!("Refusing to create an empty {:?} buffer", usage);
        return Err(RenderError::EmptyBuffer { usage });
    }
    Ok(())
}

fn upload(
    device: &VulkanDevice,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    data: &[u8],
) -> RenderResult<()> {
    let len = data.len().min(size as usize);

    unsafe {
        let ptr = device
            .device
            .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
            .stage("vkMapMemory")? as *mut u8;

        ptr.copy_from_nonoverlapping(data.as_ptr(), len);
        device.device.unmap_memory(memory);
    }

    Ok(())
}

/// Lowest memory type index allowed by `type_filter` whose flags contain
/// all of `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    let count = memory_properties
        .memory_type_count
        .min(vk::MAX_MEMORY_TYPES as u32);

    (0..count)
        .find(|&i| {
            let allowed = type_filter & (1 << i) != 0;
            allowed
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or_else(|| {
            log::error!(
                "No memory type for filter {:#b} with {:?}",
                type_filter,
                properties
            );
            RenderError::NoCompatibleMemoryType {
                type_filter,
                properties,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = types.len() as u32;
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn picks_lowest_matching_index() {
        let props = memory_properties(&[DEVICE_LOCAL, HOST, HOST | DEVICE_LOCAL]);
        assert_eq!(find_memory_type(&props, 0b111, HOST).unwrap(), 1);
    }

    #[test]
    fn respects_type_filter() {
        let props = memory_properties(&[DEVICE_LOCAL, HOST, HOST | DEVICE_LOCAL]);
        assert_eq!(find_memory_type(&props, 0b100, HOST).unwrap(), 2);
    }

    #[test]
    fn superset_of_flags_matches() {
        let props = memory_properties(&[HOST | DEVICE_LOCAL]);
        assert_eq!(
            find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            0
        );
    }

    #[test]
    fn no_match_is_an_error() {
        let props = memory_properties(&[DEVICE_LOCAL, DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b11, HOST).unwrap_err();
        assert!(matches!(
            err,
            RenderError::NoCompatibleMemoryType { type_filter: 0b11, .. }
        ));

        let props = memory_properties(&[DEVICE_LOCAL, HOST]);
        assert!(find_memory_type(&props, 0b01, HOST).is_err());
    }

    #[test]
    fn ignores_types_beyond_reported_count() {
        let mut props = memory_properties(&[DEVICE_LOCAL]);
        props.memory_types[1].property_flags = HOST;
        assert!(find_memory_type(&props, 0b11, HOST).is_err());
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = check_size(0, vk::BufferUsageFlags::VERTEX_BUFFER).unwrap_err();
        assert!(matches!(
            err,
            RenderError::EmptyBuffer { usage } if usage == vk::BufferUsageFlags::VERTEX_BUFFER
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);

        assert!(check_size(1, vk::BufferUsageFlags::INDEX_BUFFER).is_ok());
    }

    #[test]
    fn empty_slices_have_zero_size() {
        let no_indices: &[u16] = &[];
        let bytes: &[u8] = bytemuck::cast_slice(no_indices);
        assert!(check_size(bytes.len() as vk::DeviceSize, vk::BufferUsageFlags::INDEX_BUFFER).is_err());
    }

    #[test]
    fn default_buffer_is_not_alive() {
        let buffer = Buffer::default();
        assert!(!buffer.is_alive());
        assert_eq!(buffer.size, 0);
    }
}
