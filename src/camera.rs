// Glyph-grid camera: host video frames become a red, vignetted text block.
// Rule: the device is released and the frame loop cancelled exactly once.
// See DESIGN.md: Simulated camera

use rand::Rng;
use tracing::{debug, info, warn};

use crate::context::{Action, PhaseContext};
use crate::error::DeviceError;
use crate::scheduler::FrameHandle;
use crate::surface::{GlyphGrid, Node, Style, Surface, TextContent};
use crate::types::{CameraSettings, Color, ElementId, HostRequest, PhaseId, ShowEvent, Viewport};

/// Densest glyph first. Bright pixels take the dense end, dark ones fade to blank.
pub const GLYPH_RAMP: &[u8] =
    b"$@B%8&WM#*oahkbdpqwmZO0QLCJUYXzcvunxrjft/\\|()1{}[]?-_+~<>i!lI;:,\"^`'. ";

/// Shown when the capture device cannot be acquired.
pub const FALLBACK: &str = "CAMERA\nACCESS\nDENIED";

const LAYER_NAME: &str = "phase2-ascii-camera";
const LAYER_Z: i32 = 2550;
const FADE_DELAY_MS: u64 = 100;
const VISIBLE_OPACITY: f64 = 0.9;

/// Perceived brightness in `0..=255`.
pub fn luminance(r: u8, g: u8, b: u8) -> f64 {
    0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)
}

pub fn glyph_for(luminance: f64) -> char {
    let last = GLYPH_RAMP.len() - 1;
    let index = ((1.0 - luminance / 255.0) * last as f64).floor();
    char::from(GLYPH_RAMP[(index.max(0.0) as usize).min(last)])
}

/// Five red bands from near-black to hot red.
pub fn band_color(luminance: f64) -> Color {
    match luminance {
        l if l < 50.0 => Color::from_hex(0x330000),
        l if l < 100.0 => Color::from_hex(0x660000),
        l if l < 150.0 => Color::from_hex(0x990000),
        l if l < 200.0 => Color::from_hex(0xcc0000),
        _ => Color::from_hex(0xff3333),
    }
}

/// Chance that the cell at (`col`, `row`) is drawn at frame `t`. Cells near the grid
/// edge thin out; the edge itself wobbles with two slow waves.
pub fn edge_keep_probability(col: u32, row: u32, cols: u32, rows: u32, t: u64, depth: f64) -> f64 {
    let edge = col
        .min(row)
        .min(cols.saturating_sub(1).saturating_sub(col))
        .min(rows.saturating_sub(1).saturating_sub(row)) as f64;
    let t = t as f64;
    let wave_x = (t * 0.002 + f64::from(row) * 0.15).sin() * 4.0;
    let wave_y = (t * 0.0015 + f64::from(col) * 0.12).cos() * 4.0;
    let distance = edge + wave_x + wave_y;
    if distance >= depth {
        return 1.0;
    }
    (distance.max(0.0) / depth).powf(0.5).min(1.0)
}

/// Text grid dimensions for a viewport: one glyph per cell, rounded up.
pub fn grid_size(viewport: Viewport, settings: &CameraSettings) -> (u32, u32) {
    let cols = (viewport.width / settings.glyph_width).ceil().max(1.0) as u32;
    let rows = (viewport.height / settings.glyph_height).ceil().max(1.0) as u32;
    (cols, rows)
}

/// One RGBA video frame from the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Frame {
    /// Returns `None` when the buffer does not hold `width * height` pixels.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(4));
        if width == 0 || height == 0 || expected != Some(rgba.len()) {
            return None;
        }
        Some(Frame {
            width,
            height,
            rgba,
        })
    }

    /// Nearest-neighbour sample for grid cell (`col`, `row`), mirrored horizontally.
    fn sample(&self, col: u32, row: u32, cols: u32, rows: u32) -> (u8, u8, u8) {
        let sx = (u64::from(col) * u64::from(self.width) / u64::from(cols.max(1))) as u32;
        let sy = (u64::from(row) * u64::from(self.height) / u64::from(rows.max(1))) as u32;
        let x = self.width - 1 - sx.min(self.width - 1);
        let y = sy.min(self.height - 1);
        let i = ((y as usize) * (self.width as usize) + x as usize) * 4;
        (self.rgba[i], self.rgba[i + 1], self.rgba[i + 2])
    }
}

/// Renders `frame` into a `cols x rows` glyph grid. Dropped cells are blank.
pub fn render_grid<R: Rng + ?Sized>(
    frame: &Frame,
    cols: u32,
    rows: u32,
    t: u64,
    depth: f64,
    rng: &mut R,
) -> GlyphGrid {
    let mut lines = Vec::with_capacity(rows as usize);
    let mut colors = Vec::with_capacity(rows as usize);
    for row in 0..rows {
        let mut line = String::with_capacity(cols as usize);
        let mut line_colors = Vec::with_capacity(cols as usize);
        for col in 0..cols {
            let keep = edge_keep_probability(col, row, cols, rows, t, depth);
            if keep < 1.0 && rng.random::<f64>() >= keep {
                line.push(' ');
                line_colors.push(Color::BLACK);
                continue;
            }
            let (r, g, b) = frame.sample(col, row, cols, rows);
            let l = luminance(r, g, b);
            line.push(glyph_for(l));
            line_colors.push(band_color(l));
        }
        lines.push(line);
        colors.push(line_colors);
    }
    GlyphGrid { lines, colors }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    /// Waiting for the host to grant or deny the device.
    Requested,
    Live,
    Failed,
    Released,
}

/// Camera state held in the phase context.
#[derive(Debug)]
pub struct AsciiCamera {
    state: CaptureState,
    owner: Option<PhaseId>,
    element: Option<ElementId>,
    frame: Option<Frame>,
    grid: (u32, u32),
    t: u64,
    frame_handle: Option<FrameHandle>,
}

impl Default for AsciiCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl AsciiCamera {
    pub fn new() -> Self {
        AsciiCamera {
            state: CaptureState::Idle,
            owner: None,
            element: None,
            frame: None,
            grid: (0, 0),
            t: 0,
            frame_handle: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn element(&self) -> Option<ElementId> {
        self.element
    }

    pub fn grid(&self) -> (u32, u32) {
        self.grid
    }

    pub fn has_frame_request(&self) -> bool {
        self.frame_handle.is_some()
    }
}

/// Mounts the hidden text block and asks the host for the capture device.
pub fn start<S: Surface>(ctx: &mut PhaseContext<S>, owner: PhaseId) {
    if matches!(
        ctx.camera.state,
        CaptureState::Requested | CaptureState::Live
    ) {
        debug!(phase = %owner, "camera already running");
        return;
    }
    let settings = ctx.config.camera.clone();
    let Some(element) = ctx.mount_layer(
        owner,
        Node::TextBlock {
            name: LAYER_NAME.to_string(),
            z_index: LAYER_Z,
            font_px: settings.font_px,
        },
    ) else {
        return;
    };
    if let Err(err) = ctx.surface.apply_style(element, Style::opacity(0.0)) {
        warn!(error = %err, "camera block not hidden");
    }
    ctx.camera = AsciiCamera {
        state: CaptureState::Requested,
        owner: Some(owner),
        element: Some(element),
        frame: None,
        grid: grid_size(ctx.surface.viewport(), &settings),
        t: 0,
        frame_handle: None,
    };
    info!(phase = %owner, cols = ctx.camera.grid.0, rows = ctx.camera.grid.1, "camera requested");
    ctx.request(HostRequest::AcquireCamera {
        width: settings.capture_width,
        height: settings.capture_height,
    });
}

/// Host granted the device: schedule the fade and enter the frame loop.
pub fn granted<S: Surface>(ctx: &mut PhaseContext<S>) {
    match ctx.camera.state {
        CaptureState::Requested => {}
        CaptureState::Released => {
            // Grant arrived after stop; hand the device straight back.
            debug!("late camera grant released");
            ctx.request(HostRequest::ReleaseCamera);
            return;
        }
        state => {
            debug!(?state, "camera grant ignored");
            return;
        }
    }
    ctx.camera.state = CaptureState::Live;
    let owner = ctx.camera.owner;
    ctx.scheduler
        .after(FADE_DELAY_MS, owner, Action::CameraFadeIn);
    ctx.camera.frame_handle = Some(ctx.scheduler.request_frame(owner, Action::CameraFrame));
}

/// Host could not acquire the device: show the fallback block, no frame loop.
pub fn denied<S: Surface>(ctx: &mut PhaseContext<S>, err: DeviceError) {
    if ctx.camera.state != CaptureState::Requested {
        debug!(error = %err, "camera denial ignored");
        return;
    }
    warn!(error = %err, "camera unavailable");
    ctx.camera.state = CaptureState::Failed;
    if let Some(element) = ctx.camera.element {
        let text = TextContent::Plain {
            text: FALLBACK.to_string(),
        };
        if let Err(e) = ctx.surface.set_text(element, text) {
            warn!(error = %e, "fallback block not drawn");
        }
        if let Err(e) = ctx.surface.apply_style(element, Style::opacity(VISIBLE_OPACITY)) {
            warn!(error = %e, "fallback block not shown");
        }
    }
    ctx.emit(ShowEvent::CameraFailed {
        error: err.to_string(),
    });
}

/// Latest video frame. Only kept while the loop is live.
pub fn push_frame<S: Surface>(ctx: &mut PhaseContext<S>, frame: Frame) {
    if ctx.camera.state == CaptureState::Live {
        ctx.camera.frame = Some(frame);
    }
}

pub fn fade_in<S: Surface>(ctx: &mut PhaseContext<S>) {
    if let Some(element) = ctx.camera.element {
        if let Err(err) = ctx.surface.apply_style(element, Style::opacity(VISIBLE_OPACITY)) {
            warn!(error = %err, "camera fade skipped");
        }
    }
}

/// One animation frame: redraw from the latest host frame and ask for the next.
pub fn frame_tick<S: Surface>(ctx: &mut PhaseContext<S>) {
    ctx.camera.frame_handle = None;
    if ctx.camera.state != CaptureState::Live {
        return;
    }
    let Some(element) = ctx.camera.element.filter(|e| ctx.surface.is_attached(*e)) else {
        debug!("camera block detached");
        return;
    };
    ctx.camera.t += 1;
    if let Some(frame) = &ctx.camera.frame {
        let (cols, rows) = ctx.camera.grid;
        let grid = render_grid(
            frame,
            cols,
            rows,
            ctx.camera.t,
            ctx.config.camera.edge_distance,
            &mut ctx.rng,
        );
        if let Err(err) = ctx.surface.set_text(element, TextContent::Glyphs(grid)) {
            warn!(error = %err, "camera frame not drawn");
        }
    }
    let owner = ctx.camera.owner;
    ctx.camera.frame_handle = Some(ctx.scheduler.request_frame(owner, Action::CameraFrame));
}

/// Cancels the frame loop and releases the device. Returns false if there was
/// nothing left to stop.
pub fn stop<S: Surface>(ctx: &mut PhaseContext<S>) -> bool {
    let state = ctx.camera.state;
    match state {
        CaptureState::Requested | CaptureState::Live => {
            if let Some(handle) = ctx.camera.frame_handle.take() {
                ctx.scheduler.cancel_frame(handle);
            }
            ctx.camera.frame = None;
            ctx.camera.element = None;
            ctx.camera.state = CaptureState::Released;
            ctx.request(HostRequest::ReleaseCamera);
            info!("camera released");
            true
        }
        CaptureState::Failed => {
            ctx.camera.element = None;
            ctx.camera.state = CaptureState::Released;
            false
        }
        CaptureState::Idle | CaptureState::Released => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{context, run_for};
    use crate::surface::SceneSurface;

    fn started() -> PhaseContext<SceneSurface> {
        let mut ctx = context();
        ctx.activate(PhaseId::Phase2);
        start(&mut ctx, PhaseId::Phase2);
        ctx
    }

    fn grey_frame(width: u32, height: u32, value: u8) -> Frame {
        let rgba = (0..width * height)
            .flat_map(|_| [value, value, value, 255])
            .collect();
        Frame::new(width, height, rgba).unwrap()
    }

    #[test]
    fn ramp_ends_are_dense_and_blank() {
        assert_eq!(glyph_for(255.0), '$');
        assert_eq!(glyph_for(0.0), ' ');
        assert_eq!(band_color(luminance(0, 0, 0)), Color::from_hex(0x330000));
        assert_eq!(band_color(luminance(255, 255, 255)), Color::from_hex(0xff3333));
    }

    #[test]
    fn interior_cells_are_always_kept() {
        for t in [0, 100, 5000] {
            assert_eq!(edge_keep_probability(60, 27, 122, 55, t, 30.0), 1.0);
        }
        assert!(edge_keep_probability(0, 0, 122, 55, 0, 30.0) < 1.0);
    }

    #[test]
    fn grid_covers_viewport() {
        let (cols, rows) = grid_size(Viewport::new(1024.0, 768.0), &CameraSettings::default());
        assert_eq!((cols, rows), (122, 55));
    }

    #[test]
    fn frames_are_mirrored() {
        let mut rgba = vec![0u8; 8];
        rgba[0..4].copy_from_slice(&[255, 255, 255, 255]);
        let frame = Frame::new(2, 1, rgba).unwrap();
        assert_eq!(frame.sample(1, 0, 2, 1), (255, 255, 255));
        assert_eq!(frame.sample(0, 0, 2, 1), (0, 0, 0));
        assert!(Frame::new(2, 2, vec![0; 3]).is_none());
        assert!(Frame::new(u32::MAX, u32::MAX, vec![0; 16]).is_none());
    }

    #[test]
    fn ramp_is_ascii_and_ordered() {
        assert!(GLYPH_RAMP.is_ascii());
        assert_eq!(glyph_for(128.0), char::from(GLYPH_RAMP[(GLYPH_RAMP.len() - 1) / 2]));
        let mut previous = 0;
        for value in (0..=255).rev() {
            let index = GLYPH_RAMP
                .iter()
                .position(|b| char::from(*b) == glyph_for(f64::from(value)))
                .unwrap();
            assert!(index >= previous);
            previous = index;
        }
    }

    #[test]
    fn detached_block_is_logged_and_loop_ends() {
        let mut ctx = started();
        granted(&mut ctx);
        push_frame(&mut ctx, grey_frame(80, 55, 200));
        let element = ctx.camera.element().unwrap();
        ctx.surface.remove(element);

        // Fade-in and the next frame both hit the detached block.
        run_for(&mut ctx, 200);
        assert_eq!(ctx.camera.state(), CaptureState::Live);
        assert_eq!(ctx.scheduler.pending_frames(), 0);
        assert_eq!(ctx.scheduler.pending_timers(), 0);
        assert!(stop(&mut ctx));
    }

    #[test]
    fn denial_leaves_fallback_and_no_frame_loop() {
        let mut ctx = started();
        assert_eq!(
            ctx.take_requests(),
            vec![HostRequest::AcquireCamera {
                width: 800,
                height: 550
            }]
        );
        denied(&mut ctx, DeviceError::Denied("NotAllowedError".to_string()));

        let element = ctx.camera.element().unwrap();
        assert_eq!(ctx.surface.text_of(element).unwrap().line_count(), 3);
        assert_eq!(ctx.scheduler.pending_frames(), 0);
        assert!(matches!(
            ctx.take_events().as_slice(),
            [ShowEvent::CameraFailed { .. }]
        ));
        run_for(&mut ctx, 200);
        assert_eq!(ctx.scheduler.pending_frames(), 0);
    }

    #[test]
    fn live_loop_renders_each_frame() {
        let mut ctx = started();
        granted(&mut ctx);
        push_frame(&mut ctx, grey_frame(80, 55, 200));
        run_for(&mut ctx, 160);

        let element = ctx.camera.element().unwrap();
        match ctx.surface.text_of(element) {
            Some(TextContent::Glyphs(grid)) => {
                assert_eq!(grid.lines.len(), 55);
                assert!(grid.lines.iter().all(|l| l.chars().count() == 122));
            }
            other => panic!("unexpected text {:?}", other),
        }
        assert_eq!(ctx.surface.style_of(element).unwrap().opacity, Some(0.9));
        assert_eq!(ctx.scheduler.pending_frames(), 1);
    }

    #[test]
    fn stop_is_effective_once() {
        let mut ctx = started();
        granted(&mut ctx);
        ctx.take_requests();

        assert!(stop(&mut ctx));
        assert!(!stop(&mut ctx));
        assert_eq!(ctx.take_requests(), vec![HostRequest::ReleaseCamera]);
        assert_eq!(ctx.scheduler.pending_frames(), 0);
    }

    #[test]
    fn late_grant_is_handed_back() {
        let mut ctx = started();
        stop(&mut ctx);
        ctx.take_requests();
        granted(&mut ctx);
        assert_eq!(ctx.take_requests(), vec![HostRequest::ReleaseCamera]);
        assert_eq!(ctx.camera.state(), CaptureState::Released);
    }
}
