use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::renderpass::Renderpass;
use crate::resource::ImageView;

/// An attachment set for one renderpass instance. The driver-side object is
/// context-local, so the frontend only carries the views plus a stable hash
/// that each context's cache keys on.
#[derive(Debug)]
pub struct Framebuffer {
    pub renderpass: Arc<Renderpass>,
    pub attachments: Vec<Arc<ImageView>>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    hash: u64,
    pub(crate) device_id: u64,
}

impl Framebuffer {
    pub(crate) fn new(
        renderpass: Arc<Renderpass>,
        attachments: Vec<Arc<ImageView>>,
        width: u32,
        height: u32,
        layers: u32,
        device_id: u64,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        for view in &attachments {
            view.gl_name.hash(&mut hasher);
            view.base_mip_level.hash(&mut hasher);
            view.base_array_layer.hash(&mut hasher);
            view.array_layer_count.hash(&mut hasher);
        }
        width.hash(&mut hasher);
        height.hash(&mut hasher);
        layers.hash(&mut hasher);
        Self {
            renderpass,
            attachments,
            width,
            height,
            layers,
            hash: hasher.finish(),
            device_id,
        }
    }

    /// Key for the per-context driver object cache. Equal attachment sets
    /// hash equal across command buffers.
    pub fn cache_hash(&self) -> u64 {
        self.hash
    }
}
