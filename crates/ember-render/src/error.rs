// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use ember_core::ArenaError;
use thiserror::Error;

use crate::frame::SlotPhase;

/// A mesh or texture file that could not be read or did not parse.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("scratch memory: {0}")]
    Scratch(#[from] ArenaError),
    #[error("file truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("mesh has no vertices or no indices")]
    EmptyMesh,
    #[error("index data is {0} bytes, not a multiple of 4")]
    MisalignedIndices(usize),
    #[error("missing DDS magic")]
    BadMagic,
    #[error("unexpected DDS header size {header} / pixel format size {pixel_format}")]
    BadHeaderSize { header: u32, pixel_format: u32 },
    #[error("unsupported texture format {four_cc:?}, only DXT1 is accepted")]
    UnsupportedFormat { four_cc: [u8; 4] },
    #[error("texture has zero width or height")]
    ZeroExtent,
}

/// A frame call made out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("frame slot {slot} is {found:?}, expected {expected:?}")]
    UnexpectedPhase {
        slot: usize,
        expected: SlotPhase,
        found: SlotPhase,
    },
    #[error("no rendering pass is open")]
    RenderingNotActive,
    #[error("a rendering pass is already open")]
    RenderingAlreadyActive,
}
