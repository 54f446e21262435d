use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{error, trace};
use slotmap::{new_key_type, SlotMap};

use crate::command_buffer::{CommandBuffer, GlCommand};
use crate::gl_context::{FboCache, GlContext};
use crate::sync::TimelineSemaphore;
use crate::{Error, Result};

new_key_type! {
    pub(crate) struct SubmissionKey;
}

/// Everything a finished submission still pins: the cloned command list
/// (whose commands hold their resource references) and the semaphores it
/// signaled. Dropped by the next resource cull.
struct InFlightSubmission {
    commands: Vec<GlCommand>,
    signals: Vec<(Arc<TimelineSemaphore>, u64)>,
}

struct QueueInner {
    gl: Box<dyn GlContext + Send>,
    fbo_cache: FboCache,
    in_flight: SlotMap<SubmissionKey, InFlightSubmission>,
}

/// One hardware queue. The driver context lives inside and is only ever
/// touched under the queue lock, so submissions from any thread serialize
/// into a single context-affine stream.
pub struct Queue {
    family_index: u32,
    queue_index: u32,
    inner: Mutex<QueueInner>,
    /// Ticks once per submission on this queue.
    progress: Arc<TimelineSemaphore>,
    submit_counter: AtomicU64,
    pub(crate) device_id: u64,
}

impl Queue {
    pub(crate) fn new(
        family_index: u32,
        queue_index: u32,
        gl: Box<dyn GlContext + Send>,
        device_id: u64,
    ) -> Self {
        Self {
            family_index,
            queue_index,
            inner: Mutex::new(QueueInner {
                gl,
                fbo_cache: FboCache::new(),
                in_flight: SlotMap::with_key(),
            }),
            progress: Arc::new(TimelineSemaphore::new(0)),
            submit_counter: AtomicU64::new(0),
            device_id,
        }
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub fn queue_index(&self) -> u32 {
        self.queue_index
    }

    /// Semaphore that reaches N once the Nth submission on this queue has
    /// executed.
    pub fn progress_semaphore(&self) -> &Arc<TimelineSemaphore> {
        &self.progress
    }

    /// Executes the command buffers in order. Waits block before anything
    /// runs, signals fire after everything has. The submission's resource
    /// references stay pinned until [`cull_resources`](Self::cull_resources)
    /// or [`wait_idle`](Self::wait_idle).
    pub fn submit(
        &self,
        command_buffers: &mut [&mut CommandBuffer],
        waits: &[(Arc<TimelineSemaphore>, u64)],
        signals: &[(Arc<TimelineSemaphore>, u64)],
    ) -> Result<u64> {
        for cb in command_buffers.iter() {
            if cb.device_id != self.device_id {
                error!("submitted command buffer belongs to another device");
                return Err(Error::ForeignObject);
            }
            if cb.pool().queue_family_index() != self.family_index {
                error!(
                    "command buffer recorded for family {} submitted to family {}",
                    cb.pool().queue_family_index(),
                    self.family_index
                );
                return Err(Error::InvalidParameters);
            }
        }
        // All-or-nothing transition into pending.
        for (i, cb) in command_buffers.iter_mut().enumerate() {
            if let Err(err) = cb.mark_pending() {
                for cb in &mut command_buffers[..i] {
                    cb.mark_executable();
                }
                return Err(err);
            }
        }

        for (semaphore, value) in waits {
            semaphore.wait(*value);
        }

        let mut retained = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let inner = &mut *inner;
            for cb in command_buffers.iter() {
                cb.pool()
                    .replay_segments(cb.segments(), inner.gl.as_mut(), &mut inner.fbo_cache);
                retained.extend(cb.pool().clone_segments(cb.segments()));
            }
            inner.in_flight.insert(InFlightSubmission {
                commands: retained,
                signals: signals.to_vec(),
            });
        }

        for cb in command_buffers.iter_mut() {
            cb.mark_executable();
        }
        for (semaphore, value) in signals {
            semaphore.signal(*value);
        }
        let tick = self.submit_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.signal(tick);
        trace!(
            "queue {}.{} executed submission {tick}",
            self.family_index,
            self.queue_index
        );
        Ok(tick)
    }

    /// Drops the resource references of submissions whose signals have all
    /// been reached. Call this from time to time; nothing detaches on its
    /// own.
    pub fn cull_resources(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_flight.retain(|_, submission| {
            submission
                .signals
                .iter()
                .any(|(semaphore, value)| semaphore.current_value() < *value)
        });
    }

    /// Blocks until every submission has executed, then releases everything
    /// they pinned. Safe to call repeatedly.
    pub fn wait_idle(&self) {
        self.progress
            .wait(self.submit_counter.load(Ordering::SeqCst));
        let mut inner = self.inner.lock().unwrap();
        for (_, submission) in inner.in_flight.drain() {
            drop(submission.commands);
        }
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.inner.lock().unwrap().in_flight.len()
    }

    /// Number of framebuffer objects this queue's context has materialized.
    pub fn cached_framebuffer_count(&self) -> usize {
        self.inner.lock().unwrap().fbo_cache.len()
    }
}
