use std::sync::Arc;

use bitflags::bitflags;
use log::error;

use crate::physical_device::DeviceLimits;
use crate::resource::Sampler;
use crate::types::ShaderStageFlags;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
    InputAttachment,
    AccelerationStructure,
}

/// Backend bulk updates are batched by these categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorCategory {
    Buffer,
    Image,
    BufferView,
    AccelerationStructure,
}

impl DescriptorType {
    pub fn category(self) -> DescriptorCategory {
        match self {
            DescriptorType::UniformBuffer
            | DescriptorType::StorageBuffer
            | DescriptorType::UniformBufferDynamic
            | DescriptorType::StorageBufferDynamic => DescriptorCategory::Buffer,
            DescriptorType::Sampler
            | DescriptorType::CombinedImageSampler
            | DescriptorType::SampledImage
            | DescriptorType::StorageImage
            | DescriptorType::InputAttachment => DescriptorCategory::Image,
            DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer => {
                DescriptorCategory::BufferView
            }
            DescriptorType::AccelerationStructure => DescriptorCategory::AccelerationStructure,
        }
    }

    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBufferDynamic | DescriptorType::StorageBufferDynamic
        )
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindingCreateFlags: u32 {
        const UPDATE_AFTER_BIND = 1 << 0;
        const PARTIALLY_BOUND = 1 << 1;
        const VARIABLE_DESCRIPTOR_COUNT = 1 << 2;
    }
}

/// One binding slot of a descriptor set layout.
#[derive(Debug, Clone)]
pub struct Binding {
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
    pub stage_flags: ShaderStageFlags,
    pub create_flags: BindingCreateFlags,
    /// Present only for SAMPLER / COMBINED_IMAGE_SAMPLER bindings whose
    /// samplers are baked into the layout.
    pub immutable_samplers: Option<Vec<Arc<Sampler>>>,
}

/// Accumulated facts about a binding list, gathered in one pass and consumed
/// by the invariant checks below.
#[derive(Debug, Default)]
pub(crate) struct BindingScan {
    pub dynamic_ubo_count: u32,
    pub dynamic_ssbo_count: u32,
    pub update_after_bind: bool,
    /// binding number of the variable-length binding, if any
    pub variable_length_binding: Option<u32>,
    pub highest_binding: u32,
    pub immutable_sampler_count: u32,
}

/// Single pass over the bindings. Fails only for the "two variable-length
/// bindings" case, which cannot be expressed as a post-scan predicate.
pub(crate) fn scan_bindings(bindings: &[Binding]) -> Result<BindingScan> {
    let mut scan = BindingScan::default();
    for (i, binding) in bindings.iter().enumerate() {
        match binding.ty {
            DescriptorType::StorageBufferDynamic => scan.dynamic_ssbo_count += 1,
            DescriptorType::UniformBufferDynamic => scan.dynamic_ubo_count += 1,
            DescriptorType::Sampler | DescriptorType::CombinedImageSampler => {
                if let Some(samplers) = &binding.immutable_samplers {
                    scan.immutable_sampler_count += samplers.len() as u32;
                }
            }
            _ => {}
        }

        if binding
            .create_flags
            .contains(BindingCreateFlags::UPDATE_AFTER_BIND)
        {
            scan.update_after_bind = true;
        }

        if binding
            .create_flags
            .contains(BindingCreateFlags::VARIABLE_DESCRIPTOR_COUNT)
        {
            if scan.variable_length_binding.is_some() {
                error!("only one variable-sized binding is allowed (bindings[{i}])");
                return Err(Error::InvalidParameters);
            }
            scan.variable_length_binding = Some(binding.binding);
        }
        scan.highest_binding = scan.highest_binding.max(binding.binding);
    }
    Ok(scan)
}

/// A variable-length binding must carry the highest binding number.
pub(crate) fn check_variable_length_position(scan: &BindingScan) -> Result<()> {
    match scan.variable_length_binding {
        Some(nr) if nr != scan.highest_binding => {
            error!("only the last binding can be variable-sized");
            Err(Error::InvalidParameters)
        }
        _ => Ok(()),
    }
}

/// Update-after-bind and dynamic-offset bindings are mutually exclusive
/// within one layout.
pub(crate) fn check_update_after_bind_exclusion(scan: &BindingScan) -> Result<()> {
    if scan.update_after_bind && scan.dynamic_ssbo_count + scan.dynamic_ubo_count != 0 {
        error!("UPDATE_AFTER_BIND bindings are mutually exclusive with DYNAMIC bindings");
        return Err(Error::InvalidParameters);
    }
    Ok(())
}

pub(crate) fn check_dynamic_limits(scan: &BindingScan, limits: &DeviceLimits) -> Result<()> {
    if scan.dynamic_ssbo_count > limits.max_descriptor_set_dynamic_offset_ssbos
        || scan.dynamic_ubo_count > limits.max_descriptor_set_dynamic_offset_ubos
    {
        error!("number of dynamic bindings exceeds device limits");
        return Err(Error::LimitExceeded("descriptor set dynamic offsets"));
    }
    Ok(())
}

/// Immutable ordered binding list shared by descriptor sets and pipeline
/// layouts.
#[derive(Debug)]
pub struct DescriptorSetLayout {
    bindings: Vec<Binding>,
    immutable_sampler_count: u32,
    pub(crate) device_id: u64,
}

impl DescriptorSetLayout {
    pub(crate) fn new(mut bindings: Vec<Binding>, immutable_sampler_count: u32, device_id: u64) -> Self {
        bindings.sort_by_key(|b| b.binding);
        Self {
            bindings,
            immutable_sampler_count,
            device_id,
        }
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn binding(&self, number: u32) -> Option<&Binding> {
        self.bindings
            .binary_search_by_key(&number, |b| b.binding)
            .ok()
            .map(|i| &self.bindings[i])
    }

    pub fn immutable_sampler_count(&self) -> u32 {
        self.immutable_sampler_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(nr: u32, ty: DescriptorType, flags: BindingCreateFlags) -> Binding {
        Binding {
            binding: nr,
            ty,
            count: 1,
            stage_flags: ShaderStageFlags::ALL,
            create_flags: flags,
            immutable_samplers: None,
        }
    }

    #[test]
    fn scan_counts_dynamics_and_flags() {
        let bindings = [
            binding(0, DescriptorType::UniformBufferDynamic, BindingCreateFlags::empty()),
            binding(1, DescriptorType::StorageBufferDynamic, BindingCreateFlags::empty()),
            binding(3, DescriptorType::SampledImage, BindingCreateFlags::UPDATE_AFTER_BIND),
        ];
        let scan = scan_bindings(&bindings).unwrap();
        assert_eq!(scan.dynamic_ubo_count, 1);
        assert_eq!(scan.dynamic_ssbo_count, 1);
        assert!(scan.update_after_bind);
        assert_eq!(scan.highest_binding, 3);
        assert!(check_update_after_bind_exclusion(&scan).is_err());
    }

    #[test]
    fn two_variable_length_bindings_rejected() {
        let bindings = [
            binding(0, DescriptorType::SampledImage, BindingCreateFlags::VARIABLE_DESCRIPTOR_COUNT),
            binding(1, DescriptorType::SampledImage, BindingCreateFlags::VARIABLE_DESCRIPTOR_COUNT),
        ];
        assert!(scan_bindings(&bindings).is_err());
    }

    #[test]
    fn variable_length_must_be_highest() {
        let bindings = [
            binding(0, DescriptorType::SampledImage, BindingCreateFlags::VARIABLE_DESCRIPTOR_COUNT),
            binding(1, DescriptorType::UniformBuffer, BindingCreateFlags::empty()),
        ];
        let scan = scan_bindings(&bindings).unwrap();
        assert!(check_variable_length_position(&scan).is_err());
    }
}
