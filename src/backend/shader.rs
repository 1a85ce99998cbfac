// Shader module loading
//
// SPIR-V is read from disk when the pipeline is built. Modules only live
// until the pipeline is baked; `ShaderModule` destroys itself on drop so
// every exit path of pipeline creation releases them.

use ash::vk;
use std::io::Cursor;
use std::path::Path;

use crate::error::{RenderError, RenderResult, VkResultExt};

/// Read a SPIR-V binary into 4-byte words.
pub fn read_spirv(path: &Path) -> RenderResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| RenderError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })?;

    log::debug!("Read {} bytes of SPIR-V from {:?}", bytes.len(), path);

    ash::util::read_spv(&mut Cursor::new(&bytes)).map_err(|source| RenderError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })
}

/// A shader module destroyed when dropped.
pub struct ShaderModule<'a> {
    device: &'a ash::Device,
    pub module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a ash::Device, code: &[u32]) -> RenderResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let module = unsafe { device.create_shader_module(&create_info, None) }
            .stage("vkCreateShaderModule")?;

        Ok(Self { device, module })
    }

    pub fn from_file(device: &'a ash::Device, path: &Path) -> RenderResult<Self> {
        let code = read_spirv(path)?;
        Self::new(device, &code)
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reports_path() {
        let path = Path::new("shaders/does-not-exist.spv");
        let err = read_spirv(path).unwrap_err();
        match err {
            RenderError::ShaderRead { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reads_words_from_disk() {
        let path = std::env::temp_dir().join(format!("asimotive-spirv-{}.spv", std::process::id()));
        let words: [u32; 2] = [0x0723_0203, 0x0001_0000];
        std::fs::write(&path, bytemuck::cast_slice::<u32, u8>(&words)).unwrap();

        let code = read_spirv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(code, words);
    }

    #[test]
    fn rejects_truncated_binary() {
        let path = std::env::temp_dir().join(format!("asimotive-short-{}.spv", std::process::id()));
        std::fs::write(&path, [0x03u8, 0x02, 0x23]).unwrap();

        let result = read_spirv(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(RenderError::ShaderRead { .. })));
    }
}
