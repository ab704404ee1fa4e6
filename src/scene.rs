// Scene - resource arena plus the objects drawn each frame
//
// Meshes, textures and materials live in slotmaps owned by the scene.
// Objects refer to them by id, so removing a resource can never leave a
// dangling reference: objects that used it are dropped with it.
//
// Removing a mesh or texture frees GPU memory immediately. The device must be
// idle (or no in-flight frame may reference it) when that happens.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use slotmap::{new_key_type, SlotMap};
use std::mem::{offset_of, size_of};

use crate::backend::allocator::{Allocator, Buffer, Image};
use crate::backend::gpu::Gpu;
use crate::backend::upload::UploadContext;
use crate::frame::DrawItem;

new_key_type! {
    pub struct MeshId;
    pub struct TextureId;
    pub struct MaterialId;
    pub struct ObjectId;
}

/// Vertex layout shared by every mesh
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        [
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
            attribute(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
            attribute(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
        ]
    }
}

/// Vertex and index buffers of one mesh
#[derive(Debug)]
pub struct Mesh {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub index_count: u32,
}

impl Mesh {
    /// Upload `vertices`/`indices` into device-local buffers
    pub fn upload<G: Gpu>(
        upload: &UploadContext<G>,
        allocator: &mut Allocator<G>,
        name: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<Self> {
        anyhow::ensure!(!indices.is_empty(), "Mesh '{}' has no indices", name);

        let vertex_buffer = upload.upload_buffer(
            allocator,
            &format!("{} vertices", name),
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = match upload.upload_buffer(
            allocator,
            &format!("{} indices", name),
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                allocator.destroy_buffer(vertex_buffer);
                return Err(e);
            }
        };

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    pub fn destroy<G: Gpu>(self, allocator: &mut Allocator<G>) {
        allocator.destroy_buffer(self.vertex_buffer);
        allocator.destroy_buffer(self.index_buffer);
    }
}

#[derive(Debug)]
pub struct Texture {
    pub image: Image,
}

impl Texture {
    pub fn upload<G: Gpu>(
        upload: &UploadContext<G>,
        allocator: &mut Allocator<G>,
        name: &str,
        pixels: &[u8],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let image = upload.upload_texture(allocator, name, pixels, extent)?;
        Ok(Self { image })
    }
}

/// Pipeline plus the descriptor set binding its resources
#[derive(Debug, Clone, Copy)]
pub struct Material {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub texture: Option<TextureId>,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderObject {
    pub mesh: MeshId,
    pub material: MaterialId,
    pub transform: Mat4,
}

#[derive(Default)]
pub struct Scene {
    meshes: SlotMap<MeshId, Mesh>,
    textures: SlotMap<TextureId, Texture>,
    materials: SlotMap<MaterialId, Material>,
    objects: SlotMap<ObjectId, RenderObject>,
    /// Draw order: insertion order of live objects
    order: Vec<ObjectId>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.insert(mesh)
    }

    pub fn add_texture(&mut self, texture: Texture) -> TextureId {
        self.textures.insert(texture)
    }

    pub fn add_material(&mut self, material: Material) -> Result<MaterialId> {
        if let Some(texture) = material.texture {
            anyhow::ensure!(
                self.textures.contains_key(texture),
                "Material references an unknown texture"
            );
        }
        Ok(self.materials.insert(material))
    }

    /// Append an object to the end of the draw order
    pub fn add_object(
        &mut self,
        mesh: MeshId,
        material: MaterialId,
        transform: Mat4,
    ) -> Result<ObjectId> {
        anyhow::ensure!(self.meshes.contains_key(mesh), "Object references an unknown mesh");
        anyhow::ensure!(
            self.materials.contains_key(material),
            "Object references an unknown material"
        );

        let id = self.objects.insert(RenderObject {
            mesh,
            material,
            transform,
        });
        self.order.push(id);
        Ok(id)
    }

    pub fn remove_object(&mut self, id: ObjectId) -> bool {
        if self.objects.remove(id).is_none() {
            return false;
        }
        self.order.retain(|&o| o != id);
        true
    }

    fn retain_objects(&mut self, mut keep: impl FnMut(&RenderObject) -> bool) {
        self.objects.retain(|_, object| keep(object));
        let objects = &self.objects;
        self.order.retain(|&id| objects.contains_key(id));
    }

    /// Free a mesh's buffers and drop every object drawing it
    pub fn remove_mesh<G: Gpu>(&mut self, id: MeshId, allocator: &mut Allocator<G>) -> bool {
        let Some(mesh) = self.meshes.remove(id) else {
            return false;
        };
        mesh.destroy(allocator);
        self.retain_objects(|o| o.mesh != id);
        true
    }

    /// Drop a material and every object using it
    pub fn remove_material(&mut self, id: MaterialId) -> bool {
        if self.materials.remove(id).is_none() {
            return false;
        }
        self.retain_objects(|o| o.material != id);
        true
    }

    /// Free a texture no material still samples
    pub fn remove_texture<G: Gpu>(
        &mut self,
        id: TextureId,
        allocator: &mut Allocator<G>,
    ) -> Result<bool> {
        anyhow::ensure!(
            !self.materials.values().any(|m| m.texture == Some(id)),
            "Texture is still used by a material"
        );
        Ok(match self.textures.remove(id) {
            Some(texture) => {
                allocator.destroy_image(texture.image);
                true
            }
            None => false,
        })
    }

    pub fn object(&self, id: ObjectId) -> Option<&RenderObject> {
        self.objects.get(id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut RenderObject> {
        self.objects.get_mut(id)
    }

    /// Live objects in draw order
    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &RenderObject)> + '_ {
        self.order
            .iter()
            .filter_map(move |&id| Some((id, self.objects.get(id)?)))
    }

    pub fn object_count(&self) -> usize {
        self.order.len()
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id)
    }

    /// Draw items in object insertion order, each transformed by `view_proj`
    pub fn draw_list(&self, view_proj: Mat4) -> Vec<DrawItem> {
        self.objects()
            .filter_map(|(_, object)| {
                let mesh = self.meshes.get(object.mesh)?;
                let material = self.materials.get(object.material)?;
                Some(DrawItem {
                    pipeline: material.pipeline,
                    layout: material.layout,
                    descriptor_set: material.descriptor_set,
                    vertex_buffer: mesh.vertex_buffer.handle,
                    index_buffer: mesh.index_buffer.handle,
                    index_count: mesh.index_count,
                    transform: view_proj * object.transform,
                })
            })
            .collect()
    }

    /// Free every mesh and texture. The device must be idle.
    pub fn destroy<G: Gpu>(&mut self, allocator: &mut Allocator<G>) {
        self.objects.clear();
        self.order.clear();
        self.materials.clear();
        for (_, mesh) in self.meshes.drain() {
            mesh.destroy(allocator);
        }
        for (_, texture) in self.textures.drain() {
            allocator.destroy_image(texture.image);
        }
    }
}
