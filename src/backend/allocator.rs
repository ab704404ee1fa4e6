// Allocator - GPU memory arena handing out Buffer/Image handles
//
// Every allocation lives in an arena slot owned by the Allocator; Buffer and
// Image are move-only handles carrying the slot key. The owner of a handle
// gives it back through `destroy_buffer`/`destroy_image`. Anything still
// alive when the Allocator drops is freed there and reported as a leak.
//
// Caller obligations (not checked here):
// - a handle must outlive every command buffer that references it until that
//   submission retires
// - `update` must not race a GPU read of the same buffer

use anyhow::{Context, Result};
use ash::vk;
use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;

use super::gpu::{Gpu, ImageDesc, MemoryLocation};

new_key_type! {
    struct BufferKey;
    struct ImageKey;
}

/// A GPU buffer owned by exactly one higher-level object
#[derive(Debug)]
pub struct Buffer {
    key: BufferKey,
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
}

/// A device-local image plus its default view
#[derive(Debug)]
pub struct Image {
    key: ImageKey,
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

struct BufferEntry<M> {
    name: String,
    handle: vk::Buffer,
    memory: M,
    location: MemoryLocation,
}

struct ImageEntry<M> {
    name: String,
    handle: vk::Image,
    view: vk::ImageView,
    memory: M,
}

pub struct Allocator<G: Gpu> {
    gpu: Arc<G>,
    buffers: SlotMap<BufferKey, BufferEntry<G::Memory>>,
    images: SlotMap<ImageKey, ImageEntry<G::Memory>>,
}

impl<G: Gpu> Allocator<G> {
    pub fn new(gpu: Arc<G>) -> Self {
        Self {
            gpu,
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
        }
    }

    /// Host-visible, coherent buffer the CPU can `update`
    pub fn create_buffer(
        &mut self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Buffer> {
        self.allocate_buffer(name, size, usage, MemoryLocation::CpuToGpu)
    }

    /// Device-local buffer, filled through a transfer
    pub fn create_device_buffer(
        &mut self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Buffer> {
        self.allocate_buffer(name, size, usage, MemoryLocation::GpuOnly)
    }

    fn allocate_buffer(
        &mut self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Buffer> {
        anyhow::ensure!(size > 0, "Buffer '{}' has zero size", name);

        let (handle, memory) = self.gpu.create_buffer(name, size, usage, location)?;
        let key = self.buffers.insert(BufferEntry {
            name: name.to_string(),
            handle,
            memory,
            location,
        });

        log::trace!("Allocated buffer '{}' ({} bytes, {:?})", name, size, location);
        Ok(Buffer { key, handle, size })
    }

    /// Device-local image with a view covering its single mip level
    pub fn create_image(&mut self, name: &str, desc: &ImageDesc) -> Result<Image> {
        anyhow::ensure!(
            desc.extent.width > 0 && desc.extent.height > 0,
            "Image '{}' has zero extent",
            name
        );

        let (handle, memory) = self.gpu.create_image(name, desc)?;
        let view = match self.gpu.create_image_view(handle, desc.format, desc.aspect) {
            Ok(view) => view,
            Err(e) => {
                self.gpu.destroy_image(handle, memory);
                return Err(e).with_context(|| format!("Failed to create view for '{}'", name));
            }
        };

        let key = self.images.insert(ImageEntry {
            name: name.to_string(),
            handle,
            view,
            memory,
        });

        log::trace!(
            "Allocated image '{}' ({}x{} {:?})",
            name,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        Ok(Image {
            key,
            handle,
            view,
            extent: desc.extent,
            format: desc.format,
        })
    }

    /// Copy `data` into a host-visible buffer
    pub fn update(&mut self, buffer: &Buffer, data: &[u8]) -> Result<()> {
        anyhow::ensure!(
            data.len() as vk::DeviceSize <= buffer.size,
            "Update of {} bytes overflows buffer of {} bytes",
            data.len(),
            buffer.size
        );

        let entry = self
            .buffers
            .get_mut(buffer.key)
            .context("Buffer does not belong to this allocator")?;
        anyhow::ensure!(
            entry.location == MemoryLocation::CpuToGpu,
            "Buffer '{}' is device-local and cannot be updated from the CPU",
            entry.name
        );

        self.gpu.write_memory(&mut entry.memory, data)
    }

    pub fn destroy_buffer(&mut self, buffer: Buffer) {
        match self.buffers.remove(buffer.key) {
            Some(entry) => self.gpu.destroy_buffer(entry.handle, entry.memory),
            None => log::error!("Buffer {:?} was not allocated here", buffer.handle),
        }
    }

    pub fn destroy_image(&mut self, image: Image) {
        match self.images.remove(image.key) {
            Some(entry) => {
                self.gpu.destroy_image_view(entry.view);
                self.gpu.destroy_image(entry.handle, entry.memory);
            }
            None => log::error!("Image {:?} was not allocated here", image.handle),
        }
    }

    /// Number of buffers and images not yet destroyed
    pub fn live_allocations(&self) -> usize {
        self.buffers.len() + self.images.len()
    }

    /// Free everything still allocated, reporting each as a leak
    pub fn release_all(&mut self) {
        for (_, entry) in self.buffers.drain() {
            log::warn!("Leaked buffer '{}' freed at allocator teardown", entry.name);
            self.gpu.destroy_buffer(entry.handle, entry.memory);
        }
        for (_, entry) in self.images.drain() {
            log::warn!("Leaked image '{}' freed at allocator teardown", entry.name);
            self.gpu.destroy_image_view(entry.view);
            self.gpu.destroy_image(entry.handle, entry.memory);
        }
    }
}

impl<G: Gpu> Drop for Allocator<G> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Call, MockGpu};

    #[test]
    fn update_writes_host_visible_memory() {
        let gpu = Arc::new(MockGpu::new());
        let mut allocator = Allocator::new(gpu.clone());

        let buffer = allocator
            .create_buffer("uniforms", 16, vk::BufferUsageFlags::UNIFORM_BUFFER)
            .unwrap();
        allocator.update(&buffer, &[1, 2, 3, 4]).unwrap();

        assert!(gpu.calls().contains(&Call::WriteMemory(4)));
        allocator.destroy_buffer(buffer);
        assert_eq!(allocator.live_allocations(), 0);
    }

    #[test]
    fn update_rejects_oversized_data() {
        let gpu = Arc::new(MockGpu::new());
        let mut allocator = Allocator::new(gpu);

        let buffer = allocator
            .create_buffer("small", 4, vk::BufferUsageFlags::VERTEX_BUFFER)
            .unwrap();
        assert!(allocator.update(&buffer, &[0; 8]).is_err());
        allocator.destroy_buffer(buffer);
    }

    #[test]
    fn update_rejects_device_local_buffer() {
        let gpu = Arc::new(MockGpu::new());
        let mut allocator = Allocator::new(gpu);

        let buffer = allocator
            .create_device_buffer("vertices", 64, vk::BufferUsageFlags::VERTEX_BUFFER)
            .unwrap();
        assert!(allocator.update(&buffer, &[0; 8]).is_err());
        allocator.destroy_buffer(buffer);
    }

    #[test]
    fn image_destroys_view_before_memory() {
        let gpu = Arc::new(MockGpu::new());
        let mut allocator = Allocator::new(gpu.clone());

        let image = allocator
            .create_image("depth", &ImageDesc::depth(vk::Extent2D { width: 8, height: 8 }))
            .unwrap();
        let (handle, view) = (image.handle, image.view);
        allocator.destroy_image(image);

        let calls = gpu.calls();
        let view_pos = calls
            .iter()
            .position(|c| *c == Call::DestroyImageView(view))
            .unwrap();
        let image_pos = calls
            .iter()
            .position(|c| *c == Call::DestroyImage(handle))
            .unwrap();
        assert!(view_pos < image_pos);
    }

    #[test]
    fn drop_frees_leaked_allocations_once() {
        let gpu = Arc::new(MockGpu::new());
        let mut allocator = Allocator::new(gpu.clone());

        let kept = allocator
            .create_buffer("kept", 32, vk::BufferUsageFlags::INDEX_BUFFER)
            .unwrap();
        let leaked = allocator
            .create_buffer("leaked", 32, vk::BufferUsageFlags::INDEX_BUFFER)
            .unwrap();
        let leaked_handle = leaked.handle;
        allocator.destroy_buffer(kept);
        drop(allocator);

        let destroyed = gpu
            .calls()
            .iter()
            .filter(|c| **c == Call::DestroyBuffer(leaked_handle))
            .count();
        assert_eq!(destroyed, 1);
        assert!(gpu.double_destroys().is_empty());
    }

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let gpu = Arc::new(MockGpu::new());
        let mut allocator = Allocator::new(gpu);
        assert!(allocator
            .create_buffer("empty", 0, vk::BufferUsageFlags::VERTEX_BUFFER)
            .is_err());
    }
}
