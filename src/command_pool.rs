use std::sync::Mutex;

use tethys_core::IndexPool;

use crate::command_buffer::GlCommand;
use crate::gl_context::{FboCache, GlContext};
use crate::{Error, Result};

/// Commands per pooled segment.
pub(crate) const COMMANDS_PER_SEGMENT: usize = 256;
/// Upper bound on live segments per pool; past this, recording fails rather
/// than growing without bound.
pub(crate) const MAX_SEGMENT_COUNT: u32 = 256;

#[derive(Debug)]
struct PoolInner {
    segments: Vec<Vec<GlCommand>>,
    free: IndexPool,
}

/// Backing storage for recorded commands. Command buffers borrow segments
/// from their pool while recording and return them on reset, so a long-lived
/// pool reuses the same allocations across frames. Thread-safe: several
/// command buffers of one pool may record concurrently.
#[derive(Debug)]
pub struct CommandPool {
    pub(crate) queue_family_index: u32,
    inner: Mutex<PoolInner>,
    pub(crate) device_id: u64,
}

impl CommandPool {
    pub(crate) fn new(queue_family_index: u32, device_id: u64) -> Self {
        Self {
            queue_family_index,
            inner: Mutex::new(PoolInner {
                segments: Vec::new(),
                free: IndexPool::with_capacity(MAX_SEGMENT_COUNT),
            }),
            device_id,
        }
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub(crate) fn acquire_segment(&self) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.free.acquire().ok_or(Error::OutOfPoolMemory)?;
        let i = index as usize;
        if i == inner.segments.len() {
            inner.segments.push(Vec::with_capacity(COMMANDS_PER_SEGMENT));
        } else {
            inner.segments[i].clear();
        }
        Ok(index)
    }

    /// Appends to a segment; returns false once the segment is at capacity so
    /// the caller can chain a fresh one.
    pub(crate) fn push(&self, segment: u32, command: GlCommand) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let slot = &mut inner.segments[segment as usize];
        if slot.len() == COMMANDS_PER_SEGMENT {
            return false;
        }
        slot.push(command);
        true
    }

    /// Clears segment contents (dropping the resource references the commands
    /// hold) and makes the slots reusable.
    pub(crate) fn release_segments(&self, segments: &[u32]) {
        let mut inner = self.inner.lock().unwrap();
        for &segment in segments {
            inner.segments[segment as usize].clear();
            inner.free.release(segment);
        }
    }

    /// Executes the recorded commands of `segments` in order against one
    /// context.
    pub(crate) fn replay_segments(
        &self,
        segments: &[u32],
        gl: &mut dyn GlContext,
        fbo_cache: &mut FboCache,
    ) {
        let inner = self.inner.lock().unwrap();
        for &segment in segments {
            for command in &inner.segments[segment as usize] {
                command.execute(gl, fbo_cache);
            }
        }
    }

    /// Clones the command lists of `segments`, keeping every referenced
    /// resource alive for as long as the clone is held.
    pub(crate) fn clone_segments(&self, segments: &[u32]) -> Vec<GlCommand> {
        let inner = self.inner.lock().unwrap();
        let mut commands = Vec::new();
        for &segment in segments {
            commands.extend_from_slice(&inner.segments[segment as usize]);
        }
        commands
    }

    pub(crate) fn live_segments(&self) -> u32 {
        self.inner.lock().unwrap().free.live()
    }
}
