use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::warn;

use crate::types::ShaderStageFlags;

/// One entry point a shader module exposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryPoint {
    pub name: String,
    pub stage: ShaderStageFlags,
}

/// An opaque compiled shader binary plus the entry points it declares.
///
/// The device layer never inspects the words beyond emptiness checks; the
/// entry-point list exists so pipeline batches can be trimmed to what they
/// actually call.
#[derive(Debug)]
pub struct ShaderModule {
    pub spirv: Vec<u32>,
    pub entry_points: Vec<EntryPoint>,
    pub path_hint: String,
}

impl ShaderModule {
    pub fn declares(&self, name: &str, stage: ShaderStageFlags) -> bool {
        self.entry_points
            .iter()
            .any(|ep| ep.name == name && ep.stage == stage)
    }
}

/// Source accepted by [`crate::Device::compile_shader`].
#[derive(Debug, Clone)]
pub enum ShaderSource {
    /// Pre-compiled binary, passed through unchanged.
    Spirv(Vec<u32>),
    Glsl(String),
    Hlsl(String),
}

#[derive(Debug, Clone)]
pub struct ShaderCreateInfo {
    pub source: ShaderSource,
    pub stage: ShaderStageFlags,
    pub entry_point: String,
    pub defines: Vec<(String, String)>,
    pub path_hint: String,
}

/// External compiler collaborator: source text in, SPIR-V words out.
pub trait ShaderCompiler: Send + Sync {
    fn compile_to_spirv(
        &self,
        source: &str,
        stage: ShaderStageFlags,
        defines: &[(String, String)],
        path_hint: &str,
    ) -> crate::Result<Vec<u32>>;
}

/// Produces, per distinct module in a pipeline batch, a module reduced to the
/// entry points the batch actually uses. Deduplicated by module identity so a
/// module referenced by several stages is trimmed once.
pub(crate) struct TrimTask {
    used: HashMap<usize, HashSet<EntryPoint>>,
    trimmed: HashMap<usize, Arc<ShaderModule>>,
}

impl TrimTask {
    pub(crate) fn new() -> Self {
        Self {
            used: HashMap::new(),
            trimmed: HashMap::new(),
        }
    }

    pub(crate) fn insert_entry_point(
        &mut self,
        module: &Arc<ShaderModule>,
        name: &str,
        stage: ShaderStageFlags,
    ) {
        self.used
            .entry(Arc::as_ptr(module) as usize)
            .or_default()
            .insert(EntryPoint {
                name: name.to_string(),
                stage,
            });
    }

    /// Trimmed stand-in for `module`; call only after every entry point of the
    /// batch has been inserted.
    pub(crate) fn trim(&mut self, module: &Arc<ShaderModule>) -> Arc<ShaderModule> {
        let key = Arc::as_ptr(module) as usize;
        if let Some(done) = self.trimmed.get(&key) {
            return done.clone();
        }
        let Some(used) = self.used.get(&key) else {
            warn!("shader module {:?} was never registered for trimming", module.path_hint);
            return module.clone();
        };
        let kept: Vec<EntryPoint> = module
            .entry_points
            .iter()
            .filter(|ep| used.contains(*ep))
            .cloned()
            .collect();
        let trimmed = if kept.len() == module.entry_points.len() {
            // nothing to strip, share the original
            module.clone()
        } else {
            Arc::new(ShaderModule {
                spirv: module.spirv.clone(),
                entry_points: kept,
                path_hint: module.path_hint.clone(),
            })
        };
        self.trimmed.insert(key, trimmed.clone());
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(entry_points: &[(&str, ShaderStageFlags)]) -> Arc<ShaderModule> {
        Arc::new(ShaderModule {
            spirv: vec![0x0723_0203],
            entry_points: entry_points
                .iter()
                .map(|(name, stage)| EntryPoint {
                    name: name.to_string(),
                    stage: *stage,
                })
                .collect(),
            path_hint: "test.spv".to_string(),
        })
    }

    #[test]
    fn trims_unused_entry_points_once_per_module() {
        let shared = module(&[
            ("vs_main", ShaderStageFlags::VERTEX),
            ("fs_main", ShaderStageFlags::FRAGMENT),
            ("fs_alt", ShaderStageFlags::FRAGMENT),
        ]);
        let mut task = TrimTask::new();
        task.insert_entry_point(&shared, "vs_main", ShaderStageFlags::VERTEX);
        task.insert_entry_point(&shared, "fs_main", ShaderStageFlags::FRAGMENT);

        let a = task.trim(&shared);
        let b = task.trim(&shared);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.entry_points.len(), 2);
        assert!(!a.declares("fs_alt", ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn fully_used_module_is_shared_untrimmed() {
        let m = module(&[("main", ShaderStageFlags::COMPUTE)]);
        let mut task = TrimTask::new();
        task.insert_entry_point(&m, "main", ShaderStageFlags::COMPUTE);
        let out = task.trim(&m);
        assert!(Arc::ptr_eq(&out, &m));
    }
}
