// SPDX-License-Identifier: CEPL-1.0
//! Frame-slot ring and the draw-call frontend scene code talks to.
//!
//! Per iteration, on slot `frame_idx`:
//! 1. wait for the slot's completion fence
//! 2. acquire an image (out of date: rebuild, skip the iteration)
//! 3. reset the fence, re-record the command buffer, begin the pass
//! 4. submit (waits "image acquired", signals "render complete" + fence)
//! 5. present (stale/suboptimal: rebuild)
//! 6. `frame_idx = (frame_idx + 1) % slots`
//!
//! Steps 1-3 are [`Frontend::begin_frame`], 4-6 [`Frontend::end_frame`].
//! Staleness from acquire, present or a window resize all land in one
//! pending-rebuild flag that is serviced at most once per call.
use bytemuck::Pod;
use thiserror::Error;
use tracing::{debug, warn};

use crate::chain::RebuildOutcome;

/// Frontend calls made in the wrong phase or with the wrong payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameMisuse {
    #[error("{0} is only valid between begin_frame and end_frame")]
    NotRecording(&'static str),
    #[error("begin_frame called while a frame is already being recorded")]
    AlreadyRecording,
    #[error("{0} cannot run while a frame is being recorded")]
    InsideFrame(&'static str),
    #[error("draw issued with no pipeline bound")]
    NoPipelineBound,
    #[error("payload of {size} bytes exceeds the {capacity} bytes available")]
    PayloadTooLarge { size: usize, capacity: usize },
    #[error("all {0} texture slots are in use")]
    TextureTableFull(usize),
    #[error("unknown {0} handle")]
    UnknownHandle(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface and cannot be presented to.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Done,
    /// Presented, or dropped, against a chain that needs rebuilding.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A command buffer is open; draw calls are accepted until `end_frame`.
    Recording,
    /// Nothing was acquired this iteration. Do not call `end_frame`.
    Skipped,
}

/// GPU-side operations the frontend sequences. Every method receives the
/// active slot index.
pub trait FrameBackend {
    type Error: From<FrameMisuse>;
    type CommandBuffer: Copy;
    type Pipeline: Copy;
    type Mesh: Copy;

    fn slot_count(&self) -> usize;

    /// Blocks until the slot's previous submission has retired.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), Self::Error>;
    fn acquire_image(&mut self, slot: usize) -> Result<Acquire, Self::Error>;
    /// Returns the slot's completion fence to the unsignaled state.
    fn reset_slot(&mut self, slot: usize) -> Result<(), Self::Error>;
    /// Resets and begins the slot's command buffer, opens the pass on the
    /// image's framebuffer with clears applied and sets viewport/scissor.
    fn begin_pass(&mut self, slot: usize, image_index: u32) -> Result<(), Self::Error>;
    fn end_pass(&mut self, slot: usize) -> Result<(), Self::Error>;
    fn submit(&mut self, slot: usize) -> Result<(), Self::Error>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<Present, Self::Error>;
    fn rebuild_surface(&mut self) -> Result<RebuildOutcome, Self::Error>;

    /// The slot's persistently mapped uniform buffer.
    fn uniform_memory(&mut self, slot: usize) -> Result<&mut [u8], Self::Error>;
    fn command_buffer(&self, slot: usize) -> Self::CommandBuffer;
    fn bind_pipeline(&mut self, slot: usize, pipeline: Self::Pipeline) -> Result<(), Self::Error>;
    fn push_constants(
        &mut self,
        slot: usize,
        pipeline: Self::Pipeline,
        bytes: &[u8],
    ) -> Result<(), Self::Error>;
    fn clear_depth(&mut self, slot: usize) -> Result<(), Self::Error>;
    fn draw_mesh(
        &mut self,
        slot: usize,
        pipeline: Self::Pipeline,
        mesh: Self::Mesh,
    ) -> Result<(), Self::Error>;
}

struct Recording<P> {
    image_index: u32,
    pipeline: Option<P>,
}

pub struct Frontend<B: FrameBackend> {
    backend: B,
    frame_idx: usize,
    recording: Option<Recording<B::Pipeline>>,
    rebuild_requested: bool,
}

impl<B: FrameBackend> Frontend<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            frame_idx: 0,
            recording: None,
            rebuild_requested: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Slot the current (or next) frame records into.
    pub fn frame_index(&self) -> usize {
        self.frame_idx
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Marks the surface chain for rebuilding. Idempotent until serviced.
    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_requested
    }

    /// Consumes the pending flag. `false` means the rebuild was deferred and
    /// the chain cannot be rendered to yet.
    fn service_rebuild(&mut self) -> Result<bool, B::Error> {
        if !std::mem::take(&mut self.rebuild_requested) {
            return Ok(true);
        }
        match self.backend.rebuild_surface()? {
            RebuildOutcome::Rebuilt { .. } => Ok(true),
            RebuildOutcome::Deferred => {
                self.rebuild_requested = true;
                Ok(false)
            }
        }
    }

    pub fn begin_frame(&mut self) -> Result<FrameStatus, B::Error> {
        if self.recording.is_some() {
            return Err(FrameMisuse::AlreadyRecording.into());
        }
        if !self.service_rebuild()? {
            return Ok(FrameStatus::Skipped);
        }

        let slot = self.frame_idx;
        self.backend.wait_for_slot(slot)?;

        let image_index = match self.backend.acquire_image(slot)? {
            Acquire::Image { index, suboptimal } => {
                if suboptimal {
                    self.request_rebuild();
                }
                index
            }
            Acquire::OutOfDate => {
                debug!(slot, "surface out of date on acquire, skipping frame");
                self.request_rebuild();
                self.service_rebuild()?;
                return Ok(FrameStatus::Skipped);
            }
        };

        self.backend.reset_slot(slot)?;
        self.backend.begin_pass(slot, image_index)?;
        self.recording = Some(Recording {
            image_index,
            pipeline: None,
        });
        Ok(FrameStatus::Recording)
    }

    pub fn bind_pipeline(&mut self, pipeline: B::Pipeline) -> Result<(), B::Error> {
        let slot = self.frame_idx;
        let rec = self
            .recording
            .as_mut()
            .ok_or(FrameMisuse::NotRecording("bind_pipeline"))?;
        rec.pipeline = Some(pipeline);
        self.backend.bind_pipeline(slot, pipeline)
    }

    /// Copies `data` into the active slot's mapped uniform buffer. The slot's
    /// fence was waited on in `begin_frame`, so nothing on the GPU reads it.
    pub fn set_uniforms<T: Pod>(&mut self, data: &T) -> Result<(), B::Error> {
        self.active("set_uniforms")?;
        let bytes = bytemuck::bytes_of(data);
        let memory = self.backend.uniform_memory(self.frame_idx)?;
        let capacity = memory.len();
        match memory.get_mut(..bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(FrameMisuse::PayloadTooLarge {
                size: bytes.len(),
                capacity,
            }
            .into()),
        }
    }

    pub fn set_push_constants<T: Pod>(&mut self, data: &T) -> Result<(), B::Error> {
        let pipeline = self.bound_pipeline("set_push_constants")?;
        self.backend
            .push_constants(self.frame_idx, pipeline, bytemuck::bytes_of(data))
    }

    /// Re-clears depth inside the open pass so later draws land on top.
    pub fn clear_depth(&mut self) -> Result<(), B::Error> {
        self.active("clear_depth")?;
        self.backend.clear_depth(self.frame_idx)
    }

    pub fn draw_mesh(&mut self, mesh: B::Mesh) -> Result<(), B::Error> {
        let pipeline = self.bound_pipeline("draw_mesh")?;
        self.backend.draw_mesh(self.frame_idx, pipeline, mesh)
    }

    /// The active slot's command buffer, for callers recording their own
    /// commands inside the pass.
    pub fn command_buffer(&self) -> Result<B::CommandBuffer, B::Error> {
        if self.recording.is_none() {
            return Err(FrameMisuse::NotRecording("command_buffer").into());
        }
        Ok(self.backend.command_buffer(self.frame_idx))
    }

    pub fn end_frame(&mut self) -> Result<(), B::Error> {
        let rec = self
            .recording
            .take()
            .ok_or(FrameMisuse::NotRecording("end_frame"))?;
        let slot = self.frame_idx;

        self.backend.end_pass(slot)?;
        self.backend.submit(slot)?;
        if self.backend.present(slot, rec.image_index)? == Present::Stale {
            self.request_rebuild();
        }
        if !self.service_rebuild()? {
            warn!("surface rebuild deferred until the window has a size");
        }

        self.frame_idx = (self.frame_idx + 1) % self.backend.slot_count().max(1);
        Ok(())
    }

    fn active(&self, op: &'static str) -> Result<(), FrameMisuse> {
        self.recording
            .as_ref()
            .map(|_| ())
            .ok_or(FrameMisuse::NotRecording(op))
    }

    fn bound_pipeline(&self, op: &'static str) -> Result<B::Pipeline, FrameMisuse> {
        let rec = self.recording.as_ref().ok_or(FrameMisuse::NotRecording(op))?;
        rec.pipeline.ok_or(FrameMisuse::NoPipelineBound)
    }
}
