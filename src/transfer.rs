use std::sync::{Arc, Mutex};

use log::{debug, error};

use crate::command_buffer::CommandBuffer;
use crate::command_pool::CommandPool;
use crate::device::Device;
use crate::gl_context::{BufferCopy, BufferImageCopy};
use crate::queue::Queue;
use crate::resource::{Buffer, Image};
use crate::staging::StreamingBuffer;
use crate::sync::TimelineSemaphore;
use crate::{Error, Result};

/// Scratch allocations are aligned to this unless the operation needs more.
const STAGING_ALIGNMENT: u64 = 64;
/// How many overflow submits an allocation may force before giving up. Space
/// that never comes back after this many full drains will never come back.
const OVERFLOW_RETRY_LIMIT: u32 = 64;

struct TransferState {
    command_buffer: Option<CommandBuffer>,
    /// Value the next flush will signal on the scratch semaphore.
    next_value: u64,
}

/// Streams host data to device resources through a bounded staging buffer.
/// When the staging buffer cannot satisfy an allocation, the pending work is
/// submitted early (an overflow submit), the scratch semaphore is waited on,
/// and the freed ranges are culled before retrying.
pub struct TransferContext {
    device: Arc<Device>,
    queue: Arc<Queue>,
    pool: Arc<CommandPool>,
    staging: Arc<StreamingBuffer>,
    scratch: Arc<TimelineSemaphore>,
    state: Mutex<TransferState>,
}

impl TransferContext {
    pub fn new(
        device: Arc<Device>,
        queue: Arc<Queue>,
        staging: Arc<StreamingBuffer>,
    ) -> Result<Self> {
        let pool = device.create_command_pool(queue.family_index())?;
        Ok(Self {
            device,
            queue,
            pool,
            staging,
            scratch: Arc::new(TimelineSemaphore::new(0)),
            state: Mutex::new(TransferState {
                command_buffer: None,
                next_value: 1,
            }),
        })
    }

    pub fn staging_buffer(&self) -> &Arc<StreamingBuffer> {
        &self.staging
    }

    /// Reaches N once the Nth flush of this context has executed.
    pub fn scratch_semaphore(&self) -> &Arc<TimelineSemaphore> {
        &self.scratch
    }

    fn recording<'a>(&self, state: &'a mut TransferState) -> Result<&'a mut CommandBuffer> {
        if state.command_buffer.is_none() {
            let mut cb = self.device.create_command_buffer(&self.pool)?;
            cb.begin()?;
            state.command_buffer = Some(cb);
        }
        Ok(state.command_buffer.as_mut().unwrap())
    }

    fn submit_pending(&self, state: &mut TransferState) -> Result<u64> {
        let value = state.next_value;
        let mut cb = match state.command_buffer.take() {
            Some(cb) => cb,
            None => {
                // empty submit still ticks the semaphore, unblocking cull
                let mut cb = self.device.create_command_buffer(&self.pool)?;
                cb.begin()?;
                cb
            }
        };
        cb.end()?;
        self.queue
            .submit(&mut [&mut cb], &[], &[(self.scratch.clone(), value)])?;
        state.next_value += 1;
        Ok(value)
    }

    /// Submits whatever has been recorded so far and returns the scratch
    /// semaphore value that marks its completion.
    pub fn flush(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        self.submit_pending(&mut state)
    }

    fn overflow_submit(&self, state: &mut TransferState) -> Result<()> {
        debug!("staging buffer full, overflow submitting");
        let value = self.submit_pending(state)?;
        self.scratch.wait(value);
        self.staging.cull_frees();
        Ok(())
    }

    fn allocate_with_backpressure(
        &self,
        state: &mut TransferState,
        size: u64,
        alignment: u64,
    ) -> Result<u64> {
        for _ in 0..OVERFLOW_RETRY_LIMIT {
            self.staging.cull_frees();
            if let Some(offset) = self.staging.allocate(size, alignment) {
                return Ok(offset);
            }
            self.overflow_submit(state)?;
        }
        error!("staging allocation of {size} bytes failed after repeated drains");
        Err(Error::AllocationFailed)
    }

    /// Uploads `data` to `dst` at `dst_offset`, chunking through the staging
    /// buffer. Makes progress for any data size as long as the staging
    /// buffer is non-trivial; never livelocks on a full buffer.
    pub fn update_buffer_via_staging_buffer(
        &self,
        dst: &Arc<Buffer>,
        dst_offset: u64,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let total = data.len() as u64;
        if dst_offset.checked_add(total).map_or(true, |end| end > dst.size()) {
            error!("upload of {total} bytes at {dst_offset} exceeds {:?}", dst.info.name);
            return Err(Error::InvalidParameters);
        }

        let mut state = self.state.lock().unwrap();
        let mut written = 0u64;
        while written < total {
            let chunk = (total - written).min(self.staging.max_allocatable());
            let src_offset = self.allocate_with_backpressure(&mut state, chunk, STAGING_ALIGNMENT)?;
            self.staging.write(
                src_offset,
                &data[written as usize..(written + chunk) as usize],
            );
            let free_at = state.next_value;
            let cb = self.recording(&mut state)?;
            cb.copy_buffer(
                self.staging.buffer().clone(),
                dst.clone(),
                vec![BufferCopy {
                    src_offset,
                    dst_offset: dst_offset + written,
                    size: chunk,
                }],
            )?;
            self.staging
                .deferred_free(src_offset, chunk, self.scratch.clone(), free_at);
            written += chunk;
        }
        Ok(())
    }

    /// Uploads tightly packed texel rows into one mip level of `dst`,
    /// chunking by whole rows. Row pitches in the staging buffer are padded
    /// to the device's optimal copy alignment.
    pub fn update_image_via_staging_buffer(
        &self,
        dst: &Arc<Image>,
        mip_level: u32,
        base_array_layer: u32,
        layer_count: u32,
        data: &[u8],
    ) -> Result<()> {
        if mip_level >= dst.info.mip_levels
            || base_array_layer
                .checked_add(layer_count)
                .map_or(true, |end| end > dst.info.array_layers)
        {
            error!("image upload subresource out of range for {:?}", dst.info.name);
            return Err(Error::InvalidParameters);
        }
        let extent = dst.mip_extent(mip_level);
        let block_size = dst.info.format.block_byte_size();
        let row_size = extent[0] as u64 * block_size;
        let rows_per_slice = extent[1] as u64;
        let slices = extent[2] as u64;
        let expected = row_size * rows_per_slice * slices * layer_count as u64;
        if data.len() as u64 != expected {
            error!(
                "image upload expects {expected} bytes, got {} for {:?}",
                data.len(),
                dst.info.name
            );
            return Err(Error::InvalidParameters);
        }

        let pitch_alignment = self
            .device
            .physical_device()
            .limits
            .optimal_buffer_copy_row_pitch_alignment;
        let padded_row = row_size.div_ceil(pitch_alignment) * pitch_alignment;
        if padded_row > self.staging.max_allocatable() {
            error!("one row of {:?} does not fit the staging buffer", dst.info.name);
            return Err(Error::AllocationFailed);
        }

        let mut state = self.state.lock().unwrap();
        for layer in 0..layer_count as u64 {
            let mut row = 0u64;
            let layer_rows = rows_per_slice * slices;
            while row < layer_rows {
                let slice = row / rows_per_slice;
                let row_in_slice = row % rows_per_slice;
                let rows_left_in_slice = rows_per_slice - row_in_slice;
                let rows_wanted = rows_left_in_slice;

                let mut rows_now = rows_wanted;
                let src_offset = loop {
                    let fits = (self.staging.max_allocatable() / padded_row).max(1);
                    rows_now = rows_now.min(fits);
                    match self.allocate_with_backpressure(
                        &mut state,
                        rows_now * padded_row,
                        STAGING_ALIGNMENT,
                    ) {
                        Ok(offset) => break offset,
                        Err(Error::AllocationFailed) if rows_now > 1 => {
                            // shrink the request and keep going
                            rows_now = rows_now.div_ceil(2);
                        }
                        Err(err) => return Err(err),
                    }
                };

                // repack rows to the padded pitch while copying them in
                let layer_base = layer * layer_rows * row_size;
                for r in 0..rows_now {
                    let src_row = layer_base + (row + r) * row_size;
                    self.staging.write(
                        src_offset + r * padded_row,
                        &data[src_row as usize..(src_row + row_size) as usize],
                    );
                }

                let free_at = state.next_value;
                let cb = self.recording(&mut state)?;
                cb.copy_buffer_to_image(
                    self.staging.buffer().clone(),
                    dst.clone(),
                    vec![BufferImageCopy {
                        buffer_offset: src_offset,
                        buffer_row_length: (padded_row / block_size) as u32,
                        buffer_image_height: rows_now as u32,
                        mip_level,
                        base_array_layer: base_array_layer + layer as u32,
                        layer_count: 1,
                        image_offset: [0, row_in_slice as i32, slice as i32],
                        image_extent: [extent[0], rows_now as u32, 1],
                    }],
                )?;
                self.staging.deferred_free(
                    src_offset,
                    rows_now * padded_row,
                    self.scratch.clone(),
                    free_at,
                );
                row += rows_now;
            }
        }
        Ok(())
    }
}
