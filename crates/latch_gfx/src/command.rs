//! Backend-agnostic command stream

use crate::ResourceHandle;
use std::ops::Range;

/// One recorded GPU command.
///
/// Commands within one `record_commands` sequence execute in order. A render
/// pass opened with [`Command::BeginPass`] must be closed by
/// [`Command::EndPass`] in the same sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open a render pass on a framebuffer, or the swapchain when `None`.
    BeginPass {
        target: Option<ResourceHandle>,
        clear: Option<[f32; 4]>,
    },
    EndPass,
    SetPipeline(ResourceHandle),
    SetVertexBuffer {
        slot: u32,
        buffer: ResourceHandle,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    WriteBuffer {
        buffer: ResourceHandle,
        offset: u64,
        data: Vec<u8>,
    },
    CopyBuffer {
        src: ResourceHandle,
        dst: ResourceHandle,
        size: u64,
    },
    /// Orders this sequence after everything recorded before it in the frame.
    Barrier,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::BeginPass { .. } => "begin_pass",
            Command::EndPass => "end_pass",
            Command::SetPipeline(_) => "set_pipeline",
            Command::SetVertexBuffer { .. } => "set_vertex_buffer",
            Command::Draw { .. } => "draw",
            Command::Dispatch { .. } => "dispatch",
            Command::WriteBuffer { .. } => "write_buffer",
            Command::CopyBuffer { .. } => "copy_buffer",
            Command::Barrier => "barrier",
        }
    }

    /// Whether the command is only legal inside a render pass.
    pub fn requires_pass(&self) -> bool {
        matches!(
            self,
            Command::Draw { .. } | Command::SetVertexBuffer { .. } | Command::EndPass
        )
    }

    /// Logical resources the command reads or writes.
    pub fn resources(&self) -> Vec<ResourceHandle> {
        match self {
            Command::BeginPass { target, .. } => target.iter().copied().collect(),
            Command::SetPipeline(pipeline) => vec![*pipeline],
            Command::SetVertexBuffer { buffer, .. } => vec![*buffer],
            Command::WriteBuffer { buffer, .. } => vec![*buffer],
            Command::CopyBuffer { src, dst, .. } => vec![*src, *dst],
            Command::EndPass | Command::Draw { .. } | Command::Dispatch { .. } | Command::Barrier => {
                Vec::new()
            }
        }
    }
}
