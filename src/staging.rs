use std::sync::{Arc, Mutex};

use log::trace;

use tethys_core::RangeAllocator;

use crate::resource::Buffer;
use crate::sync::TimelineSemaphore;

struct DeferredFree {
    offset: u64,
    size: u64,
    semaphore: Arc<TimelineSemaphore>,
    value: u64,
}

struct StreamingState {
    allocator: RangeAllocator,
    deferred: Vec<DeferredFree>,
}

/// Ring of scratch space inside one host-visible buffer. Allocations are
/// freed against a semaphore value, so space only comes back once the
/// transfer that used it has provably executed.
pub struct StreamingBuffer {
    buffer: Arc<Buffer>,
    /// Persistently mapped contents.
    mapping: Mutex<Vec<u8>>,
    state: Mutex<StreamingState>,
}

impl StreamingBuffer {
    pub fn new(buffer: Arc<Buffer>) -> Self {
        let capacity = buffer.size();
        Self {
            buffer,
            mapping: Mutex::new(vec![0; capacity as usize]),
            state: Mutex::new(StreamingState {
                allocator: RangeAllocator::new(capacity),
                deferred: Vec::new(),
            }),
        }
    }

    /// Host write into an allocated range.
    pub fn write(&self, offset: u64, data: &[u8]) {
        let mut mapping = self.mapping.lock().unwrap();
        mapping[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }

    /// Snapshot of a mapped range, mainly for tests.
    pub fn read(&self, offset: u64, size: u64) -> Vec<u8> {
        let mapping = self.mapping.lock().unwrap();
        mapping[offset as usize..(offset + size) as usize].to_vec()
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.buffer.size()
    }

    /// Largest single allocation that could ever succeed, even from an empty
    /// buffer. Callers chunk their requests to this.
    pub fn max_allocatable(&self) -> u64 {
        self.capacity()
    }

    pub fn allocate(&self, size: u64, alignment: u64) -> Option<u64> {
        self.state.lock().unwrap().allocator.allocate(size, alignment)
    }

    /// Queues the range to return to the allocator once `semaphore` reaches
    /// `value`.
    pub fn deferred_free(
        &self,
        offset: u64,
        size: u64,
        semaphore: Arc<TimelineSemaphore>,
        value: u64,
    ) {
        let mut state = self.state.lock().unwrap();
        state.deferred.push(DeferredFree {
            offset,
            size,
            semaphore,
            value,
        });
    }

    /// Returns the range immediately; only valid when nothing submitted ever
    /// saw the allocation.
    pub fn immediate_free(&self, offset: u64, size: u64) {
        self.state.lock().unwrap().allocator.release(offset, size);
    }

    /// Releases every deferred range whose semaphore has caught up. Returns
    /// how many ranges came back.
    pub fn cull_frees(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut released = 0;
        let mut i = 0;
        while i < state.deferred.len() {
            if state.deferred[i].semaphore.current_value() >= state.deferred[i].value {
                let free = state.deferred.swap_remove(i);
                state.allocator.release(free.offset, free.size);
                released += 1;
            } else {
                i += 1;
            }
        }
        if released != 0 {
            trace!("staging cull returned {released} ranges");
        }
        released
    }

    pub fn free_space(&self) -> u64 {
        self.state.lock().unwrap().allocator.free_space()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{BufferCreateInfo, BufferUsage};

    fn staging(size: u64) -> StreamingBuffer {
        StreamingBuffer::new(Arc::new(Buffer {
            info: BufferCreateInfo {
                name: "staging".to_string(),
                size,
                usage: BufferUsage::TRANSFER_SRC,
            },
            gl_name: 1,
            device_id: 1,
        }))
    }

    #[test]
    fn deferred_ranges_return_only_after_signal() {
        let staging = staging(256);
        let semaphore = Arc::new(TimelineSemaphore::new(0));
        let offset = staging.allocate(256, 4).unwrap();
        assert!(staging.allocate(4, 4).is_none());

        staging.deferred_free(offset, 256, semaphore.clone(), 1);
        assert_eq!(staging.cull_frees(), 0);
        assert!(staging.allocate(4, 4).is_none());

        semaphore.signal(1);
        assert_eq!(staging.cull_frees(), 1);
        assert!(staging.allocate(256, 4).is_some());
    }

    #[test]
    fn immediate_free_restores_space() {
        let staging = staging(64);
        let offset = staging.allocate(64, 4).unwrap();
        staging.immediate_free(offset, 64);
        assert_eq!(staging.free_space(), 64);
    }
}
