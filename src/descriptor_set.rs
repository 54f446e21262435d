use std::sync::{Arc, Mutex};

use log::error;

use crate::descriptor_layout::{DescriptorCategory, DescriptorSetLayout, DescriptorType};
use crate::resource::{AccelerationStructure, BufferRange, BufferView, ImageView, Sampler};
use crate::{Error, Result};

/// Payload of one descriptor slot.
#[derive(Debug, Clone)]
pub enum DescriptorInfo {
    Buffer(BufferRange),
    Image {
        view: Arc<ImageView>,
        /// Ignored for bindings with immutable samplers.
        sampler: Option<Arc<Sampler>>,
    },
    TexelBuffer(Arc<BufferView>),
    AccelerationStructure(Arc<AccelerationStructure>),
}

impl DescriptorInfo {
    pub(crate) fn category(&self) -> DescriptorCategory {
        match self {
            DescriptorInfo::Buffer(_) => DescriptorCategory::Buffer,
            DescriptorInfo::Image { .. } => DescriptorCategory::Image,
            DescriptorInfo::TexelBuffer(_) => DescriptorCategory::BufferView,
            DescriptorInfo::AccelerationStructure(_) => DescriptorCategory::AccelerationStructure,
        }
    }
}

/// A bound set of descriptors. Slot contents live behind a mutex so updates
/// can run while other threads record command buffers referencing the set.
#[derive(Debug)]
pub struct DescriptorSet {
    layout: Arc<DescriptorSetLayout>,
    slots: Mutex<Vec<Vec<Option<DescriptorInfo>>>>,
    pub(crate) device_id: u64,
}

impl DescriptorSet {
    pub(crate) fn new(layout: Arc<DescriptorSetLayout>, device_id: u64) -> Self {
        let slots = layout
            .bindings()
            .iter()
            .map(|b| vec![None; b.count as usize])
            .collect();
        Self {
            layout,
            slots: Mutex::new(slots),
            device_id,
        }
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    fn binding_index(&self, number: u32) -> Option<usize> {
        self.layout
            .bindings()
            .iter()
            .position(|b| b.binding == number)
    }

    /// Snapshot of one slot, mainly for tests and debug dumps.
    pub fn descriptor(&self, binding: u32, array_element: u32) -> Option<DescriptorInfo> {
        let index = self.binding_index(binding)?;
        let slots = self.slots.lock().unwrap();
        slots[index].get(array_element as usize)?.clone()
    }
}

/// One write of `descriptors.len()` consecutive slots.
#[derive(Debug)]
pub struct WriteDescriptorSet {
    pub set: Arc<DescriptorSet>,
    pub binding: u32,
    pub array_element: u32,
    pub descriptors: Vec<DescriptorInfo>,
}

/// Copy of `count` consecutive slots between two sets (or within one).
#[derive(Debug)]
pub struct CopyDescriptorSet {
    pub src_set: Arc<DescriptorSet>,
    pub src_binding: u32,
    pub src_array_element: u32,
    pub dst_set: Arc<DescriptorSet>,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub count: u32,
}

/// Request to empty `count` consecutive slots.
#[derive(Debug)]
pub struct DropDescriptors {
    pub set: Arc<DescriptorSet>,
    pub binding: u32,
    pub array_element: u32,
    pub count: u32,
}

/// What a validated write resolved to; used to pre-size the backend batch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedWrite {
    pub ty: DescriptorType,
    pub count: u32,
}

fn binding_of<'a>(
    set: &'a DescriptorSet,
    number: u32,
    what: &str,
) -> Result<&'a crate::descriptor_layout::Binding> {
    set.layout.binding(number).ok_or_else(|| {
        error!("{what} names binding {number} which the layout does not declare");
        Error::InvalidParameters
    })
}

fn check_range(binding: &crate::descriptor_layout::Binding, first: u32, count: u32) -> Result<()> {
    if count == 0 || first.checked_add(count).is_none() || first + count > binding.count {
        error!(
            "descriptor range [{first}, {}) exceeds binding {} (count {})",
            first as u64 + count as u64,
            binding.binding,
            binding.count
        );
        return Err(Error::InvalidParameters);
    }
    Ok(())
}

/// Pure validation of one write; no set is touched.
pub(crate) fn validate_write(write: &WriteDescriptorSet, device_id: u64) -> Result<ResolvedWrite> {
    if write.set.device_id != device_id {
        error!("descriptor write targets a set owned by another device");
        return Err(Error::ForeignObject);
    }
    let binding = binding_of(&write.set, write.binding, "descriptor write")?;
    check_range(binding, write.array_element, write.descriptors.len() as u32)?;

    let expected = binding.ty.category();
    for (i, info) in write.descriptors.iter().enumerate() {
        if info.category() != expected {
            error!(
                "descriptors[{i}] does not match binding {} type {:?}",
                binding.binding, binding.ty
            );
            return Err(Error::InvalidParameters);
        }
        match info {
            DescriptorInfo::Buffer(range) if !range.is_valid() => {
                error!("descriptors[{i}] buffer range exceeds the buffer");
                return Err(Error::InvalidParameters);
            }
            DescriptorInfo::AccelerationStructure(accel) if accel.device_id != device_id => {
                error!("descriptors[{i}] acceleration structure belongs to another device");
                return Err(Error::ForeignObject);
            }
            DescriptorInfo::Image { sampler, .. } => {
                let needs_sampler = binding.ty == DescriptorType::CombinedImageSampler
                    && binding.immutable_samplers.is_none();
                if needs_sampler && sampler.is_none() {
                    error!("descriptors[{i}] is missing the sampler the binding requires");
                    return Err(Error::InvalidParameters);
                }
                if binding.immutable_samplers.is_some() && sampler.is_some() {
                    error!("descriptors[{i}] provides a sampler for an immutable-sampler binding");
                    return Err(Error::InvalidParameters);
                }
            }
            _ => {}
        }
    }
    Ok(ResolvedWrite {
        ty: binding.ty,
        count: write.descriptors.len() as u32,
    })
}

/// Pure validation of one copy; both bindings must exist, share a type, and
/// cover the requested ranges.
pub(crate) fn validate_copy(copy: &CopyDescriptorSet, device_id: u64) -> Result<ResolvedWrite> {
    if copy.src_set.device_id != device_id || copy.dst_set.device_id != device_id {
        error!("descriptor copy references a set owned by another device");
        return Err(Error::ForeignObject);
    }
    let src = binding_of(&copy.src_set, copy.src_binding, "descriptor copy source")?;
    let dst = binding_of(&copy.dst_set, copy.dst_binding, "descriptor copy destination")?;
    if src.ty != dst.ty {
        error!(
            "descriptor copy between mismatched types {:?} and {:?}",
            src.ty, dst.ty
        );
        return Err(Error::InvalidParameters);
    }
    check_range(src, copy.src_array_element, copy.count)?;
    check_range(dst, copy.dst_array_element, copy.count)?;
    Ok(ResolvedWrite {
        ty: dst.ty,
        count: copy.count,
    })
}

pub(crate) fn validate_drop(drop: &DropDescriptors, device_id: u64) -> Result<ResolvedWrite> {
    if drop.set.device_id != device_id {
        error!("descriptor drop targets a set owned by another device");
        return Err(Error::ForeignObject);
    }
    let binding = binding_of(&drop.set, drop.binding, "descriptor drop")?;
    check_range(binding, drop.array_element, drop.count)?;
    Ok(ResolvedWrite {
        ty: binding.ty,
        count: drop.count,
    })
}

/// Applies a validated write. Caller guarantees `validate_write` passed.
pub(crate) fn process_write(write: &WriteDescriptorSet) {
    let index = write
        .set
        .binding_index(write.binding)
        .expect("validated write");
    let mut slots = write.set.slots.lock().unwrap();
    let first = write.array_element as usize;
    for (i, info) in write.descriptors.iter().enumerate() {
        slots[index][first + i] = Some(info.clone());
    }
}

/// Applies a validated copy. Source slots are snapshotted first so an
/// overlapping self-copy behaves like memmove.
pub(crate) fn process_copy(copy: &CopyDescriptorSet) {
    let src_index = copy
        .src_set
        .binding_index(copy.src_binding)
        .expect("validated copy");
    let dst_index = copy
        .dst_set
        .binding_index(copy.dst_binding)
        .expect("validated copy");

    let snapshot: Vec<Option<DescriptorInfo>> = {
        let src_slots = copy.src_set.slots.lock().unwrap();
        let first = copy.src_array_element as usize;
        src_slots[src_index][first..first + copy.count as usize].to_vec()
    };
    let mut dst_slots = copy.dst_set.slots.lock().unwrap();
    let first = copy.dst_array_element as usize;
    for (i, info) in snapshot.into_iter().enumerate() {
        dst_slots[dst_index][first + i] = info;
    }
}

/// Applies a validated drop request.
pub(crate) fn process_drop(drop: &DropDescriptors) {
    let index = drop
        .set
        .binding_index(drop.binding)
        .expect("validated drop");
    let mut slots = drop.set.slots.lock().unwrap();
    let first = drop.array_element as usize;
    for slot in &mut slots[index][first..first + drop.count as usize] {
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_layout::{Binding, BindingCreateFlags};
    use crate::resource::{Buffer, BufferCreateInfo, BufferUsage};
    use crate::types::ShaderStageFlags;

    fn buffer(size: u64) -> Arc<Buffer> {
        Arc::new(Buffer {
            info: BufferCreateInfo {
                name: "test".to_string(),
                size,
                usage: BufferUsage::STORAGE,
            },
            gl_name: 1,
            device_id: 7,
        })
    }

    fn set() -> Arc<DescriptorSet> {
        let layout = Arc::new(DescriptorSetLayout::new(
            vec![Binding {
                binding: 0,
                ty: DescriptorType::StorageBuffer,
                count: 4,
                stage_flags: ShaderStageFlags::COMPUTE,
                create_flags: BindingCreateFlags::empty(),
                immutable_samplers: None,
            }],
            0,
            7,
        ));
        Arc::new(DescriptorSet::new(layout, 7))
    }

    #[test]
    fn write_out_of_range_is_rejected() {
        let set = set();
        let write = WriteDescriptorSet {
            set,
            binding: 0,
            array_element: 3,
            descriptors: vec![
                DescriptorInfo::Buffer(BufferRange::whole(buffer(64))),
                DescriptorInfo::Buffer(BufferRange::whole(buffer(64))),
            ],
        };
        assert!(validate_write(&write, 7).is_err());
    }

    #[test]
    fn copy_moves_payloads_between_sets() {
        let src = set();
        let dst = set();
        let write = WriteDescriptorSet {
            set: src.clone(),
            binding: 0,
            array_element: 0,
            descriptors: vec![DescriptorInfo::Buffer(BufferRange::whole(buffer(64)))],
        };
        validate_write(&write, 7).unwrap();
        process_write(&write);

        let copy = CopyDescriptorSet {
            src_set: src,
            src_binding: 0,
            src_array_element: 0,
            dst_set: dst.clone(),
            dst_binding: 0,
            dst_array_element: 2,
            count: 1,
        };
        validate_copy(&copy, 7).unwrap();
        process_copy(&copy);
        assert!(dst.descriptor(0, 2).is_some());
        assert!(dst.descriptor(0, 0).is_none());
    }

    #[test]
    fn drop_empties_slots() {
        let set = set();
        let write = WriteDescriptorSet {
            set: set.clone(),
            binding: 0,
            array_element: 0,
            descriptors: vec![DescriptorInfo::Buffer(BufferRange::whole(buffer(16)))],
        };
        process_write(&write);
        let drop = DropDescriptors {
            set: set.clone(),
            binding: 0,
            array_element: 0,
            count: 1,
        };
        validate_drop(&drop, 7).unwrap();
        process_drop(&drop);
        assert!(set.descriptor(0, 0).is_none());
    }

    #[test]
    fn overflowing_buffer_range_is_invalid() {
        let range = BufferRange {
            buffer: buffer(64),
            offset: u64::MAX - 1,
            size: 4,
        };
        assert!(!range.is_valid());
    }

    #[test]
    fn foreign_acceleration_structure_payload_is_rejected() {
        let layout = Arc::new(DescriptorSetLayout::new(
            vec![Binding {
                binding: 0,
                ty: DescriptorType::AccelerationStructure,
                count: 1,
                stage_flags: ShaderStageFlags::COMPUTE,
                create_flags: BindingCreateFlags::empty(),
                immutable_samplers: None,
            }],
            0,
            7,
        ));
        let set = Arc::new(DescriptorSet::new(layout, 7));
        let accel = Arc::new(crate::resource::AccelerationStructure {
            name: "tlas".to_string(),
            device_id: 9,
        });
        let write = WriteDescriptorSet {
            set,
            binding: 0,
            array_element: 0,
            descriptors: vec![DescriptorInfo::AccelerationStructure(accel)],
        };
        assert!(matches!(validate_write(&write, 7), Err(Error::ForeignObject)));
    }

    #[test]
    fn foreign_set_is_rejected() {
        let set = set();
        let write = WriteDescriptorSet {
            set,
            binding: 0,
            array_element: 0,
            descriptors: vec![DescriptorInfo::Buffer(BufferRange::whole(buffer(16)))],
        };
        assert!(matches!(validate_write(&write, 8), Err(Error::ForeignObject)));
    }
}
