// Renderer error taxonomy
//
// Every fallible renderer operation returns `RenderError`. The variants carry
// the stage that failed and, for API failures, the raw `vk::Result`, so the
// frame loop can tell a stale swapchain from a lost device.

use ash::prelude::VkResult;
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// How the caller is expected to react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Startup or frame driver cannot continue.
    Fatal,
    /// Swapchain went stale; recreate and drop the current frame.
    Recoverable,
    /// Out of memory or no compatible memory type.
    ResourceExhaustion,
    /// A bounded table is full; the request was dropped.
    CapacityExceeded,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("{stage} failed: {result}")]
    Vulkan {
        stage: &'static str,
        result: vk::Result,
    },

    #[error("no physical device offers both graphics and presentation to the surface")]
    NoSuitableDevice,

    #[error("no memory type matches filter {type_filter:#b} with properties {properties:?}")]
    NoCompatibleMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("refusing to create an empty {usage:?} buffer")]
    EmptyBuffer { usage: vk::BufferUsageFlags },

    #[error("no candidate depth format supports optimal-tiling depth attachments")]
    NoDepthFormat,

    #[error("surface reports no formats")]
    NoSurfaceFormat,

    #[error("swapchain returned {count} images, capacity is {capacity}")]
    TooManyImages { count: usize, capacity: usize },

    #[error("failed to read shader {path:?}: {source}")]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("window extent is zero, swapchain left untouched")]
    Minimized,

    #[error("swapchain is out of date")]
    OutOfDate,

    #[error("{what} is full (capacity {capacity})")]
    CapacityExceeded { what: &'static str, capacity: usize },

    #[error("window: {0}")]
    Window(String),

    #[error("{0} is not initialised")]
    Missing(&'static str),
}

impl RenderError {
    pub fn vulkan(stage: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            _ => Self::Vulkan { stage, result },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfDate | Self::Minimized => ErrorKind::Recoverable,
            Self::NoCompatibleMemoryType { .. } => ErrorKind::ResourceExhaustion,
            Self::Vulkan { result, .. }
                if *result == vk::Result::ERROR_OUT_OF_HOST_MEMORY
                    || *result == vk::Result::ERROR_OUT_OF_DEVICE_MEMORY =>
            {
                ErrorKind::ResourceExhaustion
            }
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Recoverable
    }
}

/// Attach a stage name to a raw Vulkan result.
pub trait VkResultExt<T> {
    fn stage(self, stage: &'static str) -> Result<T, RenderError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn stage(self, stage: &'static str) -> Result<T, RenderError> {
        self.map_err(|result| RenderError::vulkan(stage, result))
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
