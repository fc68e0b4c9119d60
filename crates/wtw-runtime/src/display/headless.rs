#![forbid(unsafe_code)]

//! In-process display over a Unix socket pair.
//!
//! The "compositor" half lives in the same struct. Committed buffers are
//! copied out, optionally written to a PPM file, and answered with release
//! events sent through the socket, so the event loop sees them through the
//! same readiness path a real display connection would use.
//!
//! Events travel as fixed 16-byte little-endian records:
//!
//! ```text
//!   [opcode: u32][a: u32][b: u64]
//!   1 configure   a = width   b = height
//!   2 closed
//!   3 release     b = buffer id
//! ```

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use nix::sys::stat::fstat;
use wtw_core::{Rect, Size};
use wtw_render::{BufferId, SurfaceBuffer};

use super::{Capabilities, DisplayBackend, DisplayError, DisplayEvent, SurfaceRequest};

const RECORD: usize = 16;

const OP_CONFIGURE: u32 = 1;
const OP_CLOSED: u32 = 2;
const OP_RELEASE: u32 = 3;

fn encode(event: DisplayEvent) -> [u8; RECORD] {
    let (op, a, b) = match event {
        DisplayEvent::Configure { size } => (OP_CONFIGURE, size.width, u64::from(size.height)),
        DisplayEvent::Closed => (OP_CLOSED, 0, 0),
        DisplayEvent::BufferReleased(id) => (OP_RELEASE, 0, id.get()),
    };
    let mut record = [0u8; RECORD];
    record[..4].copy_from_slice(&op.to_le_bytes());
    record[4..8].copy_from_slice(&a.to_le_bytes());
    record[8..].copy_from_slice(&b.to_le_bytes());
    record
}

fn decode(record: &[u8]) -> Result<DisplayEvent, DisplayError> {
    let word = |range: std::ops::Range<usize>| -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(&record[range]);
        out
    };
    let mut wide = [0u8; 8];
    wide.copy_from_slice(&record[8..RECORD]);
    let (op, a, b) = (
        u32::from_le_bytes(word(0..4)),
        u32::from_le_bytes(word(4..8)),
        u64::from_le_bytes(wide),
    );
    match op {
        OP_CONFIGURE => {
            let height = u32::try_from(b)
                .map_err(|_| DisplayError::Protocol(format!("configure height {b} out of range")))?;
            Ok(DisplayEvent::Configure {
                size: Size::new(a, height),
            })
        }
        OP_CLOSED => Ok(DisplayEvent::Closed),
        OP_RELEASE => Ok(DisplayEvent::BufferReleased(BufferId::from_raw(b))),
        other => Err(DisplayError::Protocol(format!("unknown opcode {other}"))),
    }
}

/// A committed frame as the headless compositor saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessFrame {
    /// Buffer the frame arrived in.
    pub buffer: BufferId,
    /// Size in pixels.
    pub size: Size,
    /// Premultiplied ARGB pixels, row-major, no padding.
    pub pixels: Vec<u32>,
}

impl HeadlessFrame {
    /// Pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.size.width as usize + x as usize)
            .copied()
    }

    /// Smallest rectangle holding every pixel equal to `color`.
    pub fn bounds_of(&self, color: u32) -> Option<Rect> {
        self.bounds_where(|p| p == color)
    }

    /// Smallest rectangle holding every non-transparent pixel.
    pub fn painted_bounds(&self) -> Option<Rect> {
        self.bounds_where(|p| p != 0)
    }

    fn bounds_where(&self, hit: impl Fn(u32) -> bool) -> Option<Rect> {
        let w = self.size.width.max(1) as usize;
        let mut found: Option<(u32, u32, u32, u32)> = None;
        for (i, _) in self.pixels.iter().enumerate().filter(|(_, p)| hit(**p)) {
            let (x, y) = ((i % w) as u32, (i / w) as u32);
            found = Some(match found {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        found.map(|(x0, y0, x1, y1)| Rect::new(x0 as i32, y0 as i32, x1 - x0 + 1, y1 - y0 + 1))
    }

    /// Write the frame as binary PPM, composited over black.
    pub fn write_ppm(&self, out: &mut impl Write) -> io::Result<()> {
        write!(out, "P6\n{} {}\n255\n", self.size.width, self.size.height)?;
        for px in &self.pixels {
            let [_, r, g, b] = px.to_be_bytes();
            out.write_all(&[r, g, b])?;
        }
        Ok(())
    }
}

/// Display that shows nothing and records everything.
#[derive(Debug)]
pub struct HeadlessDisplay {
    client: UnixStream,
    server: Option<UnixStream>,
    output: Size,
    capabilities: Capabilities,
    surface: Option<SurfaceRequest>,
    committed: Vec<HeadlessFrame>,
    outgoing: Vec<u8>,
    incoming: Vec<u8>,
    hung_up: bool,
    commits: u64,
    frame_limit: Option<u64>,
    close_sent: bool,
    dump: Option<PathBuf>,
    recording: bool,
    frames: Vec<HeadlessFrame>,
}

impl HeadlessDisplay {
    /// A display with one output of `output` pixels.
    pub fn new(output: Size) -> io::Result<Self> {
        let (client, server) = UnixStream::pair()?;
        client.set_nonblocking(true)?;
        server.set_nonblocking(true)?;
        Ok(Self {
            client,
            server: Some(server),
            output,
            capabilities: Capabilities::REQUIRED,
            surface: None,
            committed: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            hung_up: false,
            commits: 0,
            frame_limit: None,
            close_sent: false,
            dump: None,
            recording: false,
            frames: Vec::new(),
        })
    }

    /// Close the surface after `frames` commits.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Write every committed frame to `path` (overwriting).
    pub fn with_dump(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump = Some(path.into());
        self
    }

    /// Keep every committed frame in memory.
    pub fn with_recording(mut self, recording: bool) -> Self {
        self.recording = recording;
        self
    }

    /// Advertise a different set of interfaces.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Output size.
    pub fn output(&self) -> Size {
        self.output
    }

    /// Number of commits so far.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Recorded frames, oldest first (empty unless recording).
    pub fn frames(&self) -> &[HeadlessFrame] {
        &self.frames
    }

    /// Ask the compositor to close the surface.
    pub fn close(&mut self) {
        self.queue(DisplayEvent::Closed);
        self.close_sent = true;
    }

    /// Drop the compositor side of the connection.
    pub fn hang_up(&mut self) {
        self.server = None;
    }

    fn queue(&mut self, event: DisplayEvent) {
        self.outgoing.extend_from_slice(&encode(event));
    }

    fn configured_size(&self, requested: Size) -> Size {
        let size = requested.or(self.output);
        Size::new(
            size.width.min(self.output.width),
            size.height.min(self.output.height),
        )
    }

    fn present(&mut self, frame: HeadlessFrame) {
        self.commits += 1;
        if let Some(path) = &self.dump {
            if let Err(err) = dump_frame(path, &frame) {
                tracing::warn!(path = %path.display(), %err, "could not write frame dump");
            }
        }
        tracing::debug!(commit = self.commits, buffer = %frame.buffer, "frame presented");
        self.queue(DisplayEvent::BufferReleased(frame.buffer));
        if self.recording {
            self.frames.push(frame);
        }

        if !self.close_sent && self.frame_limit.is_some_and(|limit| self.commits >= limit) {
            tracing::info!(frames = self.commits, "frame limit reached, closing surface");
            self.close();
        }
    }
}

fn dump_frame(path: &Path, frame: &HeadlessFrame) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    frame.write_ppm(&mut out)?;
    out.flush()
}

impl DisplayBackend for HeadlessDisplay {
    fn fd(&self) -> BorrowedFd<'_> {
        self.client.as_fd()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_surface(&mut self, request: &SurfaceRequest) -> Result<(), DisplayError> {
        let size = self.configured_size(request.size);
        tracing::debug!(
            namespace = %request.layer.namespace,
            exclusive_zone = request.layer.exclusive_zone,
            width = size.width,
            height = size.height,
            "surface created"
        );
        self.surface = Some(request.clone());
        self.queue(DisplayEvent::Configure { size });
        Ok(())
    }

    fn attach(&mut self, buffer: SurfaceBuffer<'_>) -> Result<(), DisplayError> {
        if self.surface.is_none() {
            return Err(DisplayError::NoSurface);
        }
        let needed = u64::from(buffer.stride) * u64::from(buffer.size.height);
        let stat = fstat(buffer.fd.as_raw_fd()).map_err(io::Error::from)?;
        if u64::try_from(stat.st_size).unwrap_or(0) < needed || (buffer.pixels.len() as u64) < needed {
            return Err(DisplayError::Protocol(format!(
                "{} is smaller than {needed} bytes",
                buffer.id
            )));
        }

        let width = buffer.size.width as usize;
        let mut pixels = Vec::with_capacity(width * buffer.size.height as usize);
        for row in buffer.pixels.chunks(buffer.stride as usize).take(buffer.size.height as usize) {
            pixels.extend(
                row.chunks_exact(4)
                    .take(width)
                    .map(|px| u32::from_ne_bytes([px[0], px[1], px[2], px[3]])),
            );
        }
        self.committed.push(HeadlessFrame {
            buffer: buffer.id,
            size: buffer.size,
            pixels,
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        for frame in std::mem::take(&mut self.committed) {
            self.present(frame);
        }
        let Some(server) = self.server.as_mut() else {
            self.outgoing.clear();
            return Ok(());
        };
        while !self.outgoing.is_empty() {
            match server.write(&self.outgoing) {
                Ok(0) => return Err(DisplayError::Disconnected),
                Ok(n) => {
                    self.outgoing.drain(..n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self) -> Result<Vec<DisplayEvent>, DisplayError> {
        if self.hung_up {
            return Err(DisplayError::Disconnected);
        }
        let mut chunk = [0u8; RECORD * 16];
        loop {
            match self.client.read(&mut chunk) {
                Ok(0) => {
                    self.hung_up = true;
                    break;
                }
                Ok(n) => self.incoming.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }

        let whole = self.incoming.len() - self.incoming.len() % RECORD;
        let events = self.incoming[..whole]
            .chunks_exact(RECORD)
            .map(decode)
            .collect::<Result<Vec<_>, _>>()?;
        self.incoming.drain(..whole);

        if events.is_empty() && self.hung_up {
            return Err(DisplayError::Disconnected);
        }
        Ok(events)
    }

    fn roundtrip(&mut self) -> Result<Vec<DisplayEvent>, DisplayError> {
        self.flush()?;
        self.dispatch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wtw_core::LayerOptions;
    use wtw_render::{BufferPool, Draw};

    fn request(size: Size) -> SurfaceRequest {
        SurfaceRequest {
            size,
            layer: LayerOptions::default(),
        }
    }

    #[test]
    fn records_survive_the_wire() {
        for event in [
            DisplayEvent::Configure {
                size: Size::new(640, 480),
            },
            DisplayEvent::Closed,
            DisplayEvent::BufferReleased(BufferId::from_raw(u64::MAX)),
        ] {
            assert_eq!(decode(&encode(event)).unwrap(), event);
        }
        let mut bogus = [0u8; RECORD];
        bogus[0] = 9;
        assert!(matches!(decode(&bogus), Err(DisplayError::Protocol(_))));
    }

    #[test]
    fn surface_fills_output_unless_sized() {
        let mut display = HeadlessDisplay::new(Size::new(800, 600)).unwrap();
        display.create_surface(&request(Size::ZERO)).unwrap();
        assert_eq!(
            display.roundtrip().unwrap(),
            vec![DisplayEvent::Configure {
                size: Size::new(800, 600)
            }]
        );

        display.create_surface(&request(Size::new(300, 0))).unwrap();
        assert_eq!(
            display.roundtrip().unwrap(),
            vec![DisplayEvent::Configure {
                size: Size::new(300, 600)
            }]
        );
    }

    #[test]
    fn attach_requires_surface() {
        let mut display = HeadlessDisplay::new(Size::new(4, 4)).unwrap();
        let mut pool = BufferPool::new();
        let id = pool.acquire(Size::new(4, 4)).unwrap();
        let surface = pool.submit(id).unwrap();
        assert!(matches!(display.attach(surface), Err(DisplayError::NoSurface)));
    }

    #[test]
    fn commit_is_released_and_recorded() {
        let mut display = HeadlessDisplay::new(Size::new(4, 2))
            .unwrap()
            .with_recording(true)
            .with_frame_limit(1);
        display.create_surface(&request(Size::ZERO)).unwrap();
        display.roundtrip().unwrap();

        let mut pool = BufferPool::new();
        let id = pool.acquire(Size::new(4, 2)).unwrap();
        pool.canvas(id)
            .unwrap()
            .fill_rect(Rect::new(1, 0, 2, 1), wtw_core::Rgba::WHITE);
        display.attach(pool.submit(id).unwrap()).unwrap();
        assert_eq!(display.commits(), 0);

        let events = display.roundtrip().unwrap();
        assert_eq!(
            events,
            vec![DisplayEvent::BufferReleased(id), DisplayEvent::Closed]
        );
        let frame = &display.frames()[0];
        assert_eq!(frame.pixel(1, 0), Some(0xFFFF_FFFF));
        assert_eq!(frame.pixel(0, 0), Some(0));
        assert_eq!(frame.painted_bounds(), Some(Rect::new(1, 0, 2, 1)));
        assert_eq!(frame.bounds_of(0xFFFF_FFFF), Some(Rect::new(1, 0, 2, 1)));
    }

    #[test]
    fn hang_up_surfaces_as_disconnect() {
        let mut display = HeadlessDisplay::new(Size::new(4, 4)).unwrap();
        display.close();
        display.flush().unwrap();
        display.hang_up();
        assert_eq!(display.dispatch().unwrap(), vec![DisplayEvent::Closed]);
        assert!(matches!(display.dispatch(), Err(DisplayError::Disconnected)));
    }

    #[test]
    fn dump_writes_ppm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.ppm");
        let mut display = HeadlessDisplay::new(Size::new(2, 1)).unwrap().with_dump(&path);
        display.create_surface(&request(Size::ZERO)).unwrap();

        let mut pool = BufferPool::new();
        let id = pool.acquire(Size::new(2, 1)).unwrap();
        pool.canvas(id)
            .unwrap()
            .fill_rect(Rect::new(0, 0, 1, 1), wtw_core::Rgba(0xFF00_00FF));
        display.attach(pool.submit(id).unwrap()).unwrap();
        display.flush().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..11], b"P6\n2 1\n255\n");
        assert_eq!(&bytes[11..], &[0xFF, 0, 0, 0, 0, 0]);
    }
}
