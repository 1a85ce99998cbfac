// asimotive - a minimal Vulkan 3D renderer
//
// `Engine` is the entry point. Meshes are created and destroyed by the
// application against `Engine::device()`; the renderer only ever holds
// copies of their handles for the frame they were submitted to.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod mesh;
pub mod render_queue;
pub mod transform;

pub use config::Config;
pub use engine::Engine;
pub use error::{ErrorKind, RenderError, RenderResult};
pub use events::{EngineControl, EngineEvent, EventKind};
pub use mesh::{Mesh, Vertex};
pub use transform::Mvp;
