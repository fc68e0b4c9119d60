#![forbid(unsafe_code)]

//! Wayland display over the wlr layer shell.
//!
//! The overlay is one layer surface anchored to every edge of the output,
//! so it covers the whole screen unless the configuration asks for a size.
//! Pool buffers are shared with the compositor as `wl_shm` buffers created
//! straight from their memfd; the compositor's `release` of a buffer comes
//! back as [`DisplayEvent::BufferReleased`].

use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::net::UnixStream;

use smithay_client_toolkit::compositor::{CompositorHandler, CompositorState};
use smithay_client_toolkit::output::{OutputHandler, OutputState};
use smithay_client_toolkit::registry::{ProvidesRegistryState, RegistryState};
use smithay_client_toolkit::shell::WaylandSurface;
use smithay_client_toolkit::shell::wlr_layer::{
    Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
    LayerSurfaceConfigure,
};
use smithay_client_toolkit::{
    delegate_compositor, delegate_layer, delegate_output, delegate_registry, registry_handlers,
};
use wayland_client::backend::{Backend, WaylandError};
use wayland_client::globals::registry_queue_init;
use wayland_client::protocol::{wl_buffer, wl_output, wl_shm, wl_shm_pool, wl_surface};
use wayland_client::{Connection, Dispatch, DispatchError, EventQueue, QueueHandle};
use wtw_core::{ShellLayer, Size};
use wtw_render::{BufferId, SurfaceBuffer};

use super::{Capabilities, DisplayBackend, DisplayError, DisplayEvent, SurfaceRequest};

/// A compositor connection that shows the overlay as a layer surface.
pub struct WaylandDisplay {
    conn: Connection,
    backend: Backend,
    queue: EventQueue<WaylandState>,
    state: WaylandState,
    capabilities: Capabilities,
}

struct WaylandState {
    registry: RegistryState,
    outputs: OutputState,
    compositor: Option<CompositorState>,
    layer_shell: Option<LayerShell>,
    shm: Option<wl_shm::WlShm>,
    surface: Option<LayerSurface>,
    requested: Size,
    events: Vec<DisplayEvent>,
}

impl std::fmt::Debug for WaylandDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaylandDisplay")
            .field("capabilities", &self.capabilities)
            .field("surface", &self.state.surface.is_some())
            .finish_non_exhaustive()
    }
}

impl WaylandDisplay {
    /// Connect to the compositor named by `WAYLAND_DISPLAY` (or
    /// `WAYLAND_SOCKET`).
    pub fn connect() -> Result<Self, DisplayError> {
        let conn = Connection::connect_to_env()
            .map_err(|err| DisplayError::Unavailable(err.to_string()))?;
        Self::from_connection(conn)
    }

    /// Use an already connected socket.
    pub fn from_socket(stream: UnixStream) -> Result<Self, DisplayError> {
        let conn = Connection::from_socket(stream)
            .map_err(|err| DisplayError::Unavailable(err.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DisplayError> {
        let (globals, queue) = registry_queue_init::<WaylandState>(&conn)
            .map_err(|err| DisplayError::Unavailable(err.to_string()))?;
        let qh = queue.handle();

        let compositor = CompositorState::bind(&globals, &qh)
            .inspect_err(|err| tracing::debug!(%err, "wl_compositor unavailable"))
            .ok();
        let layer_shell = LayerShell::bind(&globals, &qh)
            .inspect_err(|err| tracing::debug!(%err, "zwlr_layer_shell_v1 unavailable"))
            .ok();
        let shm = globals
            .bind::<wl_shm::WlShm, _, _>(&qh, 1..=1, ())
            .inspect_err(|err| tracing::debug!(%err, "wl_shm unavailable"))
            .ok();

        let mut capabilities = Capabilities::empty();
        capabilities.set(Capabilities::COMPOSITOR, compositor.is_some());
        capabilities.set(Capabilities::SHM, shm.is_some());
        capabilities.set(Capabilities::LAYER_SHELL, layer_shell.is_some());
        tracing::info!(?capabilities, "connected to compositor");

        let state = WaylandState {
            registry: RegistryState::new(&globals),
            outputs: OutputState::new(&globals, &qh),
            compositor,
            layer_shell,
            shm,
            surface: None,
            requested: Size::ZERO,
            events: Vec::new(),
        };
        Ok(Self {
            backend: conn.backend(),
            conn,
            queue,
            state,
            capabilities,
        })
    }

    fn take_events(&mut self) -> Vec<DisplayEvent> {
        std::mem::take(&mut self.state.events)
    }
}

impl DisplayBackend for WaylandDisplay {
    fn fd(&self) -> BorrowedFd<'_> {
        self.backend.poll_fd()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_surface(&mut self, request: &SurfaceRequest) -> Result<(), DisplayError> {
        let (Some(compositor), Some(shell)) = (&self.state.compositor, &self.state.layer_shell)
        else {
            return Err(DisplayError::Protocol(
                "compositor has no layer shell".to_string(),
            ));
        };
        let qh = self.queue.handle();
        let wl_surface = compositor.create_surface(&qh);
        let layer = shell.create_layer_surface(
            &qh,
            wl_surface,
            shell_layer(request.layer.layer),
            Some(request.layer.namespace.clone()),
            None,
        );
        layer.set_anchor(Anchor::TOP | Anchor::RIGHT | Anchor::BOTTOM | Anchor::LEFT);
        layer.set_exclusive_zone(request.layer.exclusive_zone);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.set_size(request.size.width, request.size.height);
        layer.commit();
        tracing::debug!(
            namespace = %request.layer.namespace,
            layer = ?request.layer.layer,
            exclusive_zone = request.layer.exclusive_zone,
            width = request.size.width,
            height = request.size.height,
            "layer surface created"
        );

        self.state.requested = request.size;
        self.state.surface = Some(layer);
        Ok(())
    }

    fn attach(&mut self, buffer: SurfaceBuffer<'_>) -> Result<(), DisplayError> {
        let Some(surface) = &self.state.surface else {
            return Err(DisplayError::NoSurface);
        };
        let Some(shm) = &self.state.shm else {
            return Err(DisplayError::Protocol("compositor has no wl_shm".to_string()));
        };
        let layout = ShmLayout::of(&buffer)?;
        let qh = self.queue.handle();

        let pool = shm.create_pool(buffer.fd, layout.len, &qh, ());
        let wl_buffer = pool.create_buffer(
            0,
            layout.width,
            layout.height,
            layout.stride,
            wl_shm::Format::Argb8888,
            &qh,
            buffer.id,
        );
        // The buffer keeps the memory alive.
        pool.destroy();

        let wl_surface = surface.wl_surface();
        wl_surface.attach(Some(&wl_buffer), 0, 0);
        wl_surface.damage_buffer(0, 0, layout.width, layout.height);
        wl_surface.commit();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        match self.conn.flush() {
            Ok(()) => Ok(()),
            // Leftovers go out on the next iteration.
            Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(wayland_error(err)),
        }
    }

    fn dispatch(&mut self) -> Result<Vec<DisplayEvent>, DisplayError> {
        if let Some(guard) = self.queue.prepare_read() {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(wayland_error(err)),
            }
        }
        self.queue
            .dispatch_pending(&mut self.state)
            .map_err(dispatch_error)?;
        Ok(self.take_events())
    }

    fn roundtrip(&mut self) -> Result<Vec<DisplayEvent>, DisplayError> {
        self.queue
            .roundtrip(&mut self.state)
            .map_err(dispatch_error)?;
        Ok(self.take_events())
    }
}

/// Protocol layer for a configured stacking layer.
fn shell_layer(layer: ShellLayer) -> Layer {
    match layer {
        ShellLayer::Background => Layer::Background,
        ShellLayer::Bottom => Layer::Bottom,
        ShellLayer::Top => Layer::Top,
        ShellLayer::Overlay => Layer::Overlay,
    }
}

/// `wl_shm` arguments for a pool buffer; the protocol takes `i32`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShmLayout {
    width: i32,
    height: i32,
    stride: i32,
    len: i32,
}

impl ShmLayout {
    fn of(buffer: &SurfaceBuffer<'_>) -> Result<Self, DisplayError> {
        Self::new(buffer.id, buffer.size, buffer.stride)
    }

    fn new(id: BufferId, size: Size, stride: u32) -> Result<Self, DisplayError> {
        let too_large = || DisplayError::Protocol(format!("{id} is too large for wl_shm"));
        let len = u64::from(stride) * u64::from(size.height);
        Ok(Self {
            width: i32::try_from(size.width).map_err(|_| too_large())?,
            height: i32::try_from(size.height).map_err(|_| too_large())?,
            stride: i32::try_from(stride).map_err(|_| too_large())?,
            len: i32::try_from(len).map_err(|_| too_large())?,
        })
    }
}

fn wayland_error(err: WaylandError) -> DisplayError {
    match err {
        WaylandError::Io(err)
            if matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::UnexpectedEof
            ) =>
        {
            DisplayError::Disconnected
        }
        WaylandError::Io(err) => DisplayError::Io(err),
        WaylandError::Protocol(err) => DisplayError::Protocol(err.to_string()),
    }
}

fn dispatch_error(err: DispatchError) -> DisplayError {
    match err {
        DispatchError::Backend(err) => wayland_error(err),
        other => DisplayError::Protocol(other.to_string()),
    }
}

// ── Protocol handlers ──────────────────────────────────────────────────

impl LayerShellHandler for WaylandState {
    fn closed(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &LayerSurface) {
        tracing::debug!("layer surface closed by compositor");
        self.events.push(DisplayEvent::Closed);
    }

    fn configure(
        &mut self,
        _: &Connection,
        _: &QueueHandle<Self>,
        _: &LayerSurface,
        configure: LayerSurfaceConfigure,
        serial: u32,
    ) {
        let (width, height) = configure.new_size;
        // Zero leaves the choice to us: keep what was asked for.
        let size = Size::new(
            if width == 0 { self.requested.width } else { width },
            if height == 0 { self.requested.height } else { height },
        );
        tracing::trace!(serial, width = size.width, height = size.height, "configure");
        self.events.push(DisplayEvent::Configure { size });
    }
}

impl CompositorHandler for WaylandState {
    fn scale_factor_changed(
        &mut self,
        _: &Connection,
        _: &QueueHandle<Self>,
        _: &wl_surface::WlSurface,
        _: i32,
    ) {
    }

    fn transform_changed(
        &mut self,
        _: &Connection,
        _: &QueueHandle<Self>,
        _: &wl_surface::WlSurface,
        _: wl_output::Transform,
    ) {
    }

    fn frame(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &wl_surface::WlSurface, _: u32) {}

    fn surface_enter(
        &mut self,
        _: &Connection,
        _: &QueueHandle<Self>,
        _: &wl_surface::WlSurface,
        _: &wl_output::WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _: &Connection,
        _: &QueueHandle<Self>,
        _: &wl_surface::WlSurface,
        _: &wl_output::WlOutput,
    ) {
    }
}

impl OutputHandler for WaylandState {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.outputs
    }

    fn new_output(&mut self, _: &Connection, _: &QueueHandle<Self>, output: wl_output::WlOutput) {
        if let Some(info) = self.outputs.info(&output) {
            tracing::debug!(name = ?info.name, size = ?info.logical_size, "output");
        }
    }

    fn update_output(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_output::WlOutput) {}

    fn output_destroyed(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_output::WlOutput) {
    }
}

impl ProvidesRegistryState for WaylandState {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry
    }

    registry_handlers![OutputState];
}

impl Dispatch<wl_shm::WlShm, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_shm::WlShm,
        _: wl_shm::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        // ARGB8888 is always supported; format announcements are ignored.
    }
}

impl Dispatch<wl_shm_pool::WlShmPool, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_shm_pool::WlShmPool,
        _: wl_shm_pool::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_buffer::WlBuffer, BufferId> for WaylandState {
    fn event(
        state: &mut Self,
        buffer: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        id: &BufferId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            buffer.destroy();
            state.events.push(DisplayEvent::BufferReleased(*id));
        }
    }
}

delegate_compositor!(WaylandState);
delegate_output!(WaylandState);
delegate_layer!(WaylandState);
delegate_registry!(WaylandState);
