use log::error;

use crate::physical_device::PhysicalDevice;
use crate::types::{find_msb, Format, ResolveMode, SampleCount};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadOp {
    Load,
    Clear,
    #[default]
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOp {
    Store,
    #[default]
    DontCare,
}

#[derive(Debug, Clone, Copy)]
pub struct AttachmentDescription {
    pub format: Format,
    pub samples: SampleCount,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
}

/// Reference to one color attachment slot of a subpass. Slots may be unused
/// (`None` in the subpass array) to keep location numbering stable.
#[derive(Debug, Clone, Copy)]
pub struct ColorAttachmentRef {
    pub attachment: u32,
    pub resolve_attachment: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct DepthStencilResolve {
    pub attachment: u32,
    pub depth_mode: ResolveMode,
    pub stencil_mode: ResolveMode,
}

#[derive(Debug, Clone, Copy)]
pub struct DepthStencilAttachmentRef {
    pub attachment: u32,
    pub resolve: Option<DepthStencilResolve>,
}

#[derive(Debug, Clone, Default)]
pub struct SubpassDescription {
    pub color_attachments: Vec<Option<ColorAttachmentRef>>,
    pub input_attachments: Vec<u32>,
    pub depth_stencil_attachment: Option<DepthStencilAttachmentRef>,
    /// Multiview mask; zero means multiview is off for this subpass.
    pub view_mask: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RenderpassCreateInfo {
    pub attachments: Vec<AttachmentDescription>,
    pub subpasses: Vec<SubpassDescription>,
}

/// Facts the backend wants from a validated create info, so it does not have
/// to walk the subpasses a second time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedRenderpass {
    pub attachment_count: u32,
    pub subpass_count: u32,
    /// Union of every subpass view mask.
    pub view_mask: u32,
}

fn attachment<'a>(
    info: &'a RenderpassCreateInfo,
    index: u32,
    what: &str,
) -> Result<&'a AttachmentDescription> {
    info.attachments.get(index as usize).ok_or_else(|| {
        error!("{what} references attachment {index} out of {}", info.attachments.len());
        Error::InvalidParameters
    })
}

/// Validation shared between the public create call and the backend; pure so
/// the backend can trust a passed result without re-checking.
pub(crate) fn validate_creation_params(
    info: &RenderpassCreateInfo,
    physical: &PhysicalDevice,
) -> Result<ValidatedRenderpass> {
    if info.subpasses.is_empty() {
        error!("a renderpass needs at least one subpass");
        return Err(Error::InvalidParameters);
    }

    for (i, desc) in info.attachments.iter().enumerate() {
        if !physical.optimal_tiling_usage(desc.format).attachment {
            error!(
                "attachments[{i}] format {:?} cannot be used as an attachment with optimal tiling",
                desc.format
            );
            return Err(Error::InvalidParameters);
        }
    }

    let limits = &physical.limits;
    let mut view_mask = 0u32;
    for (s, subpass) in info.subpasses.iter().enumerate() {
        for (slot, color) in subpass.color_attachments.iter().enumerate() {
            let Some(color) = color else { continue };
            if slot as u32 >= limits.max_color_attachments {
                error!(
                    "subpasses[{s}] uses color slot {slot}, device supports {}",
                    limits.max_color_attachments
                );
                return Err(Error::LimitExceeded("color attachments"));
            }
            let desc = attachment(info, color.attachment, "color reference")?;
            if desc.format.has_depth() || desc.format.has_stencil() {
                error!("subpasses[{s}] binds a depth/stencil format as color");
                return Err(Error::InvalidParameters);
            }
            if let Some(resolve) = color.resolve_attachment {
                attachment(info, resolve, "color resolve reference")?;
            }
        }

        for &input in &subpass.input_attachments {
            attachment(info, input, "input reference")?;
        }

        if let Some(ds) = &subpass.depth_stencil_attachment {
            let desc = attachment(info, ds.attachment, "depth/stencil reference")?;
            if !desc.format.has_depth() && !desc.format.has_stencil() {
                error!("subpasses[{s}] binds a color format as depth/stencil");
                return Err(Error::InvalidParameters);
            }
            if let Some(resolve) = &ds.resolve {
                attachment(info, resolve.attachment, "depth/stencil resolve reference")?;
                // Each aspect checks only the modes it actually resolves with.
                if !desc.format.is_stencil_only()
                    && !limits
                        .supported_depth_resolve_modes
                        .contains(resolve.depth_mode.as_flag())
                {
                    error!(
                        "subpasses[{s}] depth resolve mode {:?} is unsupported",
                        resolve.depth_mode
                    );
                    return Err(Error::InvalidParameters);
                }
                if !desc.format.is_depth_only()
                    && !limits
                        .supported_stencil_resolve_modes
                        .contains(resolve.stencil_mode.as_flag())
                {
                    error!(
                        "subpasses[{s}] stencil resolve mode {:?} is unsupported",
                        resolve.stencil_mode
                    );
                    return Err(Error::InvalidParameters);
                }
            }
        }

        if let Some(msb) = find_msb(subpass.view_mask) {
            if msb >= limits.max_multiview_view_count {
                error!(
                    "subpasses[{s}] view mask {:#x} exceeds {} views",
                    subpass.view_mask, limits.max_multiview_view_count
                );
                return Err(Error::LimitExceeded("multiview view count"));
            }
        }
        view_mask |= subpass.view_mask;
    }

    Ok(ValidatedRenderpass {
        attachment_count: info.attachments.len() as u32,
        subpass_count: info.subpasses.len() as u32,
        view_mask,
    })
}

#[derive(Debug)]
pub struct Renderpass {
    pub info: RenderpassCreateInfo,
    /// Union of the subpass view masks, cached at creation.
    pub(crate) view_mask: u32,
    pub(crate) device_id: u64,
}

impl Renderpass {
    pub fn view_mask(&self) -> u32 {
        self.view_mask
    }

    pub fn subpass(&self, index: u32) -> Option<&SubpassDescription> {
        self.info.subpasses.get(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(format: Format, samples: SampleCount) -> AttachmentDescription {
        AttachmentDescription {
            format,
            samples,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            stencil_load_op: LoadOp::DontCare,
            stencil_store_op: StoreOp::DontCare,
        }
    }

    fn single_subpass(attachments: Vec<AttachmentDescription>, subpass: SubpassDescription) -> RenderpassCreateInfo {
        RenderpassCreateInfo {
            attachments,
            subpasses: vec![subpass],
        }
    }

    #[test]
    fn accepts_basic_color_pass() {
        let physical = PhysicalDevice::reference_descriptor();
        let info = single_subpass(
            vec![color(Format::R8G8B8A8Unorm, SampleCount::X1)],
            SubpassDescription {
                color_attachments: vec![Some(ColorAttachmentRef {
                    attachment: 0,
                    resolve_attachment: None,
                })],
                ..Default::default()
            },
        );
        let out = validate_creation_params(&info, &physical).unwrap();
        assert_eq!(out.attachment_count, 1);
        assert_eq!(out.view_mask, 0);
    }

    #[test]
    fn rejects_color_slot_past_device_limit() {
        let physical = PhysicalDevice::reference_descriptor();
        let max = physical.limits.max_color_attachments as usize;
        let mut slots: Vec<Option<ColorAttachmentRef>> = vec![None; max + 1];
        slots[max] = Some(ColorAttachmentRef {
            attachment: 0,
            resolve_attachment: None,
        });
        let info = single_subpass(
            vec![color(Format::R8G8B8A8Unorm, SampleCount::X1)],
            SubpassDescription {
                color_attachments: slots,
                ..Default::default()
            },
        );
        assert!(validate_creation_params(&info, &physical).is_err());

        // unused slots past the limit are fine
        let mut slots: Vec<Option<ColorAttachmentRef>> = vec![None; max + 1];
        slots[0] = Some(ColorAttachmentRef {
            attachment: 0,
            resolve_attachment: None,
        });
        let info = single_subpass(
            vec![color(Format::R8G8B8A8Unorm, SampleCount::X1)],
            SubpassDescription {
                color_attachments: slots,
                ..Default::default()
            },
        );
        assert!(validate_creation_params(&info, &physical).is_ok());
    }

    #[test]
    fn stencil_only_attachment_skips_depth_resolve_check() {
        let physical = PhysicalDevice::reference_descriptor();
        // MIN is not in the reference depth resolve modes, but a stencil-only
        // format never consults them.
        let info = single_subpass(
            vec![
                color(Format::S8Uint, SampleCount::X4),
                color(Format::S8Uint, SampleCount::X1),
            ],
            SubpassDescription {
                depth_stencil_attachment: Some(DepthStencilAttachmentRef {
                    attachment: 0,
                    resolve: Some(DepthStencilResolve {
                        attachment: 1,
                        depth_mode: ResolveMode::Min,
                        stencil_mode: ResolveMode::SampleZero,
                    }),
                }),
                ..Default::default()
            },
        );
        assert!(validate_creation_params(&info, &physical).is_ok());
    }

    #[test]
    fn view_mask_top_bit_at_limit_is_rejected() {
        let physical = PhysicalDevice::reference_descriptor();
        let limit = physical.limits.max_multiview_view_count;
        let info = single_subpass(
            vec![color(Format::R8G8B8A8Unorm, SampleCount::X1)],
            SubpassDescription {
                color_attachments: vec![Some(ColorAttachmentRef {
                    attachment: 0,
                    resolve_attachment: None,
                })],
                view_mask: 1 << limit,
                ..Default::default()
            },
        );
        assert!(validate_creation_params(&info, &physical).is_err());
    }
}
