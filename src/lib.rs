mod backend;
mod command_buffer;
mod command_pool;
mod descriptor_layout;
mod descriptor_set;
mod device;
mod framebuffer;
mod gl_context;
mod physical_device;
mod pipeline;
mod queue;
mod renderpass;
mod resource;
mod shader;
mod staging;
mod sync;
mod transfer;
mod types;

pub use backend::*;
pub use command_buffer::{CommandBuffer, CommandBufferState};
pub use command_pool::CommandPool;
pub use descriptor_layout::*;
pub use descriptor_set::{
    CopyDescriptorSet, DescriptorInfo, DescriptorSet, DropDescriptors, WriteDescriptorSet,
};
pub use device::{Device, DeviceCreateInfo, QueueRequest};
pub use framebuffer::Framebuffer;
pub use gl_context::*;
pub use physical_device::*;
pub use pipeline::*;
pub use queue::Queue;
pub use renderpass::*;
pub use resource::*;
pub use shader::{EntryPoint, ShaderCompiler, ShaderCreateInfo, ShaderModule, ShaderSource};
pub use staging::StreamingBuffer;
pub use sync::TimelineSemaphore;
pub use transfer::TransferContext;
pub use types::*;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid parameters")]
    InvalidParameters,

    #[error("device limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("feature not enabled: {0}")]
    FeatureNotEnabled(&'static str),

    #[error("object belongs to another device")]
    ForeignObject,

    #[error("command pool is out of memory")]
    OutOfPoolMemory,

    #[error("command buffer is in the wrong state")]
    InvalidCommandBufferState,

    #[error("shader compilation failed: {0}")]
    CompilationFailed(String),

    #[error("{failed} pipeline(s) in the batch failed to create")]
    PipelineCreation { failed: usize },

    #[error("allocation failed")]
    AllocationFailed,
}

pub type Result<T> = std::result::Result<T, Error>;
