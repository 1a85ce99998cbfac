// Per-frame draw list
//
// Filled by the application between `begin` and `end`, read by the frame
// driver while it records. Items are plain copies, nothing here borrows.

use crate::error::{RenderError, RenderResult};
use crate::mesh::{Mesh, MeshBinding};
use crate::transform::Mvp;

pub const MAX_DRAW_ITEMS: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct DrawItem {
    pub mesh: MeshBinding,
    pub transform: Mvp,
}

#[derive(Debug)]
pub struct RenderQueue {
    items: Vec<DrawItem>,
    active: bool,
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderQueue {
    pub fn new() -> Self {
        Self {
            items: Vec::with_capacity(MAX_DRAW_ITEMS),
            active: false,
        }
    }

    /// Start a frame: forget last frame's items.
    pub fn begin(&mut self) {
        self.items.clear();
        self.active = true;
    }

    pub fn submit(&mut self, mesh: &Mesh, transform: Mvp) -> RenderResult<()> {
        self.push(DrawItem {
            mesh: mesh.binding(),
            transform,
        })
    }

    pub fn push(&mut self, item: DrawItem) -> RenderResult<()> {
        if !self.active {
            log::warn!("Draw submitted outside an active frame");
        }

        if self.items.len() >= MAX_DRAW_ITEMS {
            log::warn!("Render queue full ({} items), dropping draw", MAX_DRAW_ITEMS);
            return Err(RenderError::CapacityExceeded {
                what: "render queue",
                capacity: MAX_DRAW_ITEMS,
            });
        }

        self.items.push(item);
        Ok(())
    }

    pub fn end(&mut self) {
        self.active = false;
    }

    /// Items submitted since the last `begin`.
    pub fn snapshot(&self) -> &[DrawItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}
