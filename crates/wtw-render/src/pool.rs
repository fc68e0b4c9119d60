#![deny(unsafe_code)]

//! Shared-memory frame buffers and their ownership cycle.
//!
//! Each frame is drawn into a fresh buffer backed by an anonymous memory
//! file, so the display can map the same pages. A buffer moves through
//! three states and never goes back:
//!
//! ```text
//!   acquire ──> Owned ──submit──> Submitted ──release──> (freed)
//!                 │
//!                 └──discard──> (freed)
//! ```
//!
//! - Only `Owned` buffers can be drawn into.
//! - Only `Submitted` buffers can be released by the display.
//! - Releasing an already freed buffer is a no-op.
//!
//! Buffer ids are never reused, so a late or duplicate release can always be
//! told apart from a release of a live buffer.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};

use memmap2::MmapMut;
use wtw_core::Size;

use crate::canvas::Canvas;

/// Bytes per ARGB8888 pixel.
pub const BYTES_PER_PIXEL: u32 = 4;

/// Row stride in bytes for `width` pixels, rounded up to a 4-byte boundary.
///
/// `None` if the stride does not fit in `u32`.
pub fn stride(width: u32) -> Option<u32> {
    width
        .checked_mul(BYTES_PER_PIXEL)?
        .checked_add(3)
        .map(|s| s & !3)
}

/// Identifier of a buffer issued by a [`BufferPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(u64);

impl BufferId {
    /// Raw id, as carried over the display connection.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Rebuild an id received from the display.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Lifecycle state of a live buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Held by the application; may be drawn into.
    Owned,
    /// Handed to the display; read-only until released.
    Submitted,
}

/// Errors from buffer allocation and state transitions.
#[derive(Debug)]
pub enum PoolError {
    /// Width or height is zero.
    EmptySize(Size),
    /// `stride × height` overflows.
    TooLarge(Size),
    /// Creating, sizing, or mapping the memory file failed.
    Alloc(io::Error),
    /// The mapping is not suitably aligned for 32-bit pixels.
    Misaligned,
    /// The id was never issued by this pool.
    Unknown(BufferId),
    /// Drawing into or re-submitting a buffer the display owns.
    AlreadySubmitted(BufferId),
    /// A release notification for a buffer that was never submitted.
    NotSubmitted(BufferId),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySize(size) => {
                write!(f, "cannot allocate an empty {}x{} buffer", size.width, size.height)
            }
            Self::TooLarge(size) => {
                write!(f, "buffer of {}x{} pixels is too large", size.width, size.height)
            }
            Self::Alloc(err) => write!(f, "buffer allocation failed: {err}"),
            Self::Misaligned => write!(f, "buffer mapping is not 4-byte aligned"),
            Self::Unknown(id) => write!(f, "{id} was never allocated by this pool"),
            Self::AlreadySubmitted(id) => write!(f, "{id} is owned by the display"),
            Self::NotSubmitted(id) => write!(f, "{id} was released before being submitted"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Alloc(err) => Some(err),
            _ => None,
        }
    }
}

/// One shared-memory pixel buffer.
#[derive(Debug)]
pub struct FrameBuffer {
    id: BufferId,
    size: Size,
    stride: u32,
    state: BufferState,
    map: MmapMut,
    file: File,
}

impl FrameBuffer {
    fn allocate(id: BufferId, size: Size) -> Result<Self, PoolError> {
        if size.is_empty() {
            return Err(PoolError::EmptySize(size));
        }
        let stride = stride(size.width).ok_or(PoolError::TooLarge(size))?;
        let len = u64::from(stride) * u64::from(size.height);
        let len_usize = usize::try_from(len).map_err(|_| PoolError::TooLarge(size))?;

        let file = shm_file().map_err(PoolError::Alloc)?;
        file.set_len(len).map_err(PoolError::Alloc)?;
        #[allow(unsafe_code)]
        // SAFETY: the file is a private anonymous memory file sized above;
        // nothing else in this process maps or truncates it while `map` lives.
        let map = unsafe { memmap2::MmapOptions::new().len(len_usize).map_mut(&file) }
            .map_err(PoolError::Alloc)?;
        if bytemuck::try_cast_slice::<u8, u32>(&map[..]).is_err() {
            return Err(PoolError::Misaligned);
        }

        Ok(Self {
            id,
            size,
            stride,
            state: BufferState::Owned,
            map,
            file,
        })
    }

    /// The buffer's id.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Size in pixels.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BufferState {
        self.state
    }
}

fn shm_file() -> io::Result<File> {
    use nix::sys::memfd::{MemFdCreateFlag, memfd_create};

    let fd = memfd_create(
        c"wtw-shm-buffer",
        MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_ALLOW_SEALING,
    )
    .map_err(io::Error::from)?;
    Ok(File::from(fd))
}

/// Read-only view of a submitted buffer, for the display to attach.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceBuffer<'a> {
    /// Id to report back on release.
    pub id: BufferId,
    /// Size in pixels.
    pub size: Size,
    /// Row stride in bytes.
    pub stride: u32,
    /// Shareable handle to the pixel memory.
    pub fd: BorrowedFd<'a>,
    /// The pixel bytes as drawn.
    pub pixels: &'a [u8],
}

/// Counters for a pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Buffers allocated.
    pub allocated: u64,
    /// Buffers released by the display.
    pub released: u64,
    /// Owned buffers dropped without being submitted.
    pub discarded: u64,
    /// Releases for buffers already freed.
    pub stale_releases: u64,
}

/// Allocator and state tracker for frame buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    live: BTreeMap<BufferId, FrameBuffer>,
    next_id: u64,
    stats: PoolStats,
}

impl BufferPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an owned buffer of `size` pixels, zero-filled.
    pub fn acquire(&mut self, size: Size) -> Result<BufferId, PoolError> {
        let id = BufferId(self.next_id);
        let buffer = FrameBuffer::allocate(id, size)?;
        self.next_id += 1;
        self.stats.allocated += 1;
        tracing::trace!(%id, width = size.width, height = size.height, "buffer acquired");
        self.live.insert(id, buffer);
        Ok(id)
    }

    /// A drawing surface over an owned buffer.
    pub fn canvas(&mut self, id: BufferId) -> Result<Canvas<'_>, PoolError> {
        let buffer = self.live_mut(id)?;
        if buffer.state != BufferState::Owned {
            return Err(PoolError::AlreadySubmitted(id));
        }
        let (w, h) = (buffer.size.width, buffer.size.height);
        let stride_px = (buffer.stride / BYTES_PER_PIXEL) as usize;
        let pixels: &mut [u32] =
            bytemuck::try_cast_slice_mut(&mut buffer.map[..]).map_err(|_| PoolError::Misaligned)?;
        Canvas::new(pixels, w, h, stride_px).ok_or(PoolError::TooLarge(Size::new(w, h)))
    }

    /// Hand an owned buffer to the display. From now on it is read-only.
    pub fn submit(&mut self, id: BufferId) -> Result<SurfaceBuffer<'_>, PoolError> {
        let buffer = self.live_mut(id)?;
        if buffer.state != BufferState::Owned {
            return Err(PoolError::AlreadySubmitted(id));
        }
        buffer.state = BufferState::Submitted;
        tracing::trace!(%id, "buffer submitted");
        Ok(SurfaceBuffer {
            id,
            size: buffer.size,
            stride: buffer.stride,
            fd: buffer.file.as_fd(),
            pixels: &buffer.map[..],
        })
    }

    /// The display is done with a submitted buffer: unmap and free it.
    ///
    /// Returns `Ok(false)` if the buffer was already freed.
    pub fn release(&mut self, id: BufferId) -> Result<bool, PoolError> {
        match self.live.get(&id).map(FrameBuffer::state) {
            Some(BufferState::Submitted) => {
                self.live.remove(&id);
                self.stats.released += 1;
                tracing::trace!(%id, "buffer released");
                Ok(true)
            }
            Some(BufferState::Owned) => Err(PoolError::NotSubmitted(id)),
            None if id.0 < self.next_id => {
                self.stats.stale_releases += 1;
                tracing::debug!(%id, "ignoring release of a freed buffer");
                Ok(false)
            }
            None => Err(PoolError::Unknown(id)),
        }
    }

    /// Free an owned buffer that will not be submitted (render aborted).
    ///
    /// Returns `Ok(false)` if the buffer was already freed.
    pub fn discard(&mut self, id: BufferId) -> Result<bool, PoolError> {
        match self.live.get(&id).map(FrameBuffer::state) {
            Some(BufferState::Owned) => {
                self.live.remove(&id);
                self.stats.discarded += 1;
                Ok(true)
            }
            Some(BufferState::Submitted) => Err(PoolError::AlreadySubmitted(id)),
            None if id.0 < self.next_id => Ok(false),
            None => Err(PoolError::Unknown(id)),
        }
    }

    /// State of a live buffer, `None` once freed.
    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        self.live.get(&id).map(FrameBuffer::state)
    }

    /// Live buffer by id.
    pub fn get(&self, id: BufferId) -> Option<&FrameBuffer> {
        self.live.get(&id)
    }

    /// Number of live buffers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no buffers are live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Number of buffers currently held by the display.
    pub fn submitted(&self) -> usize {
        self.live
            .values()
            .filter(|b| b.state == BufferState::Submitted)
            .count()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    fn live_mut(&mut self, id: BufferId) -> Result<&mut FrameBuffer, PoolError> {
        self.live.get_mut(&id).ok_or(PoolError::Unknown(id))
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            tracing::debug!(
                live = self.live.len(),
                submitted = self.submitted(),
                "freeing buffers at teardown"
            );
        }
    }
}
