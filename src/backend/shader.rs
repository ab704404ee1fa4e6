// Shader module loading
//
// Shaders are SPIR-V blobs read at startup from `<shader_dir>/<name>.spv`.
// A missing or malformed file is a fatal startup error.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// `<dir>/<name>.spv`
pub fn shader_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.spv", name))
}

/// Read SPIR-V words from disk
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).with_context(|| {
        format!(
            "Shader binary not found: {:?} (compile the GLSL sources with glslc)",
            path
        )
    })?;
    // read_spv checks length, magic number and endianness
    ash::util::read_spv(&mut Cursor::new(bytes))
        .with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

/// Load `<dir>/<name>.spv` and create a shader module from it
pub fn load_shader(device: &ash::Device, dir: &Path, name: &str) -> Result<vk::ShaderModule> {
    let path = shader_path(dir, name);
    let code = read_spirv(&path)?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    let module = unsafe { device.create_shader_module(&create_info, None) }
        .with_context(|| format!("Failed to create shader module from {:?}", path))?;
    log::debug!("Loaded shader {:?} ({} words)", path, code.len());
    Ok(module)
}
