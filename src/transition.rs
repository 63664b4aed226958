// Pixelated screen transitions and the static noise that follows them.
// One parametrized reveal, three presets. Every cell is painted exactly once.
// See DESIGN.md: Transition effects

use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::context::{Action, Cue, PhaseContext};
use crate::surface::{Node, Surface};
use crate::types::{Color, ElementId, PhaseId, Rect};

/// Frame budget the reveal speed is tuned against (60 fps).
const FRAME_MS: f64 = 16.0;
/// Share of cells painted with a randomized size.
const SIZE_JITTER_PROBABILITY: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scanline {
    pub probability: f64,
    pub colors: [Color; 2],
    pub height_cells: u32,
}

/// Small patches flashed back to the base colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResetPatches {
    pub probability: f64,
    pub min_count: u32,
    pub count_span: u32,
    pub width_cells: u32,
    pub height_cells: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadPixel {
    pub probability: f64,
    pub color: Color,
}

/// Static noise painted over a finished transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseStyle {
    pub palette: &'static [Color],
    pub min_count: u32,
    pub count_span: u32,
    pub max_width_cells: u32,
    pub max_height_cells: u32,
    pub scanline: Option<Scanline>,
    pub reset: Option<ResetPatches>,
    pub dead_pixel: Option<DeadPixel>,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionStyle {
    /// Canvas layer name.
    pub name: &'static str,
    pub z_index: i32,
    /// Colour the screen settles on.
    pub target: Color,
    pub pixel_size: f64,
    pub duration_ms: u64,
    /// Per-frame batch is scaled by a factor drawn from `spread_min..spread_max`.
    pub spread_min: f64,
    pub spread_max: f64,
    /// Occasional cells painted in another colour.
    pub speckle: Option<(Color, f64)>,
    pub noise: NoiseStyle,
}

pub static BLUE_SCREEN: TransitionStyle = TransitionStyle {
    name: "blue-screen-canvas",
    z_index: 1,
    target: Color::from_hex(0x000a5d),
    pixel_size: 12.0,
    duration_ms: 2000,
    spread_min: 0.5,
    spread_max: 2.5,
    speckle: None,
    noise: NoiseStyle {
        palette: &[
            Color::from_hex(0x000a5d),
            Color::from_hex(0x0015a3),
            Color::from_hex(0x001177),
            Color::from_hex(0x000833),
            Color::from_hex(0x0000ff),
            Color::from_hex(0x000044),
        ],
        min_count: 5,
        count_span: 15,
        max_width_cells: 8,
        max_height_cells: 3,
        scanline: Some(Scanline {
            probability: 0.3,
            colors: [Color::from_hex(0x0022aa), Color::from_hex(0x000033)],
            height_cells: 2,
        }),
        reset: Some(ResetPatches {
            probability: 0.4,
            min_count: 2,
            count_span: 5,
            width_cells: 3,
            height_cells: 2,
        }),
        dead_pixel: None,
        min_interval_ms: 50,
        max_interval_ms: 200,
    },
};

pub static BLACK_VOID: TransitionStyle = TransitionStyle {
    name: "black-glitch-canvas",
    z_index: 1999,
    target: Color::BLACK,
    pixel_size: 16.0,
    duration_ms: 1200,
    spread_min: 0.5,
    spread_max: 2.0,
    speckle: None,
    noise: NoiseStyle {
        palette: &[
            Color::from_hex(0x080808),
            Color::from_hex(0x111111),
            Color::from_hex(0x000000),
            Color::from_hex(0x050505),
        ],
        min_count: 5,
        count_span: 10,
        max_width_cells: 4,
        max_height_cells: 2,
        scanline: None,
        reset: None,
        dead_pixel: Some(DeadPixel {
            probability: 0.05,
            color: Color::from_hex(0x1a1a1a),
        }),
        min_interval_ms: 50,
        max_interval_ms: 200,
    },
};

pub static RED_SCREEN: TransitionStyle = TransitionStyle {
    name: "red-screen-overlay",
    z_index: 3000,
    target: Color::from_hex(0x400000),
    pixel_size: 12.0,
    duration_ms: 1000,
    spread_min: 0.5,
    spread_max: 2.5,
    speckle: Some((Color::BLACK, 0.15)),
    noise: NoiseStyle {
        palette: &[
            Color::from_hex(0x400000),
            Color::from_hex(0x500000),
            Color::from_hex(0x300000),
            Color::from_hex(0x600000),
            Color::from_hex(0x000000),
            Color::from_hex(0x200000),
        ],
        min_count: 5,
        count_span: 15,
        max_width_cells: 8,
        max_height_cells: 3,
        scanline: Some(Scanline {
            probability: 0.3,
            colors: [Color::from_hex(0x500000), Color::BLACK],
            height_cells: 2,
        }),
        reset: None,
        dead_pixel: None,
        min_interval_ms: 50,
        max_interval_ms: 200,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionId(u32);

impl TransitionId {
    pub fn new(raw: u32) -> Self {
        TransitionId(raw)
    }
}

/// One painted cell: grid position, painted size and colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellPaint {
    pub col: u32,
    pub row: u32,
    pub size: f64,
    pub color: Color,
}

/// A reveal in progress: a shuffled visiting order walked a batch per frame.
#[derive(Debug)]
pub struct TileReveal {
    owner: PhaseId,
    canvas: Option<ElementId>,
    style: &'static TransitionStyle,
    cols: u32,
    order: Vec<u32>,
    cursor: usize,
    per_frame: usize,
    on_done: Option<Cue>,
}

impl TileReveal {
    /// Lays out a `ceil(w/p) x ceil(h/p)` grid and shuffles its visiting order.
    pub fn new<R: Rng + ?Sized>(
        owner: PhaseId,
        style: &'static TransitionStyle,
        width: f64,
        height: f64,
        rng: &mut R,
    ) -> Self {
        let pixel = style.pixel_size.max(1.0);
        let cols = (width / pixel).ceil().max(0.0) as u32;
        let rows = (height / pixel).ceil().max(0.0) as u32;
        let mut order: Vec<u32> = (0..cols * rows).collect();
        order.shuffle(rng);
        let frames = (style.duration_ms as f64 / FRAME_MS).max(1.0);
        let per_frame = (order.len() as f64 / frames).ceil() as usize;
        TileReveal {
            owner,
            canvas: None,
            style,
            cols,
            order,
            cursor: 0,
            per_frame,
            on_done: None,
        }
    }

    pub fn owner(&self) -> PhaseId {
        self.owner
    }

    pub fn cell_count(&self) -> usize {
        self.order.len()
    }

    pub fn per_frame(&self) -> usize {
        self.per_frame
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.order.len()
    }

    /// Cells to paint this frame: `max(1, floor(per_frame * spread))`, capped by what is left.
    pub fn next_batch<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<CellPaint> {
        let style = self.style;
        let spread = style.spread_min + rng.random::<f64>() * (style.spread_max - style.spread_min);
        let batch = ((self.per_frame as f64 * spread).floor() as usize).max(1);
        let end = (self.cursor + batch).min(self.order.len());
        let mut cells = Vec::with_capacity(end - self.cursor);
        for &cell in &self.order[self.cursor..end] {
            let color = match style.speckle {
                Some((speckle, p)) if rng.random_bool(p) => speckle,
                _ => style.target,
            };
            let size = if rng.random_bool(SIZE_JITTER_PROBABILITY) {
                style.pixel_size * (0.5 + rng.random::<f64>())
            } else {
                style.pixel_size
            };
            cells.push(CellPaint {
                col: cell % self.cols.max(1),
                row: cell / self.cols.max(1),
                size,
                color,
            });
        }
        self.cursor = end;
        cells
    }
}

/// Starts a reveal on a fresh canvas owned by `owner`. When every cell is painted the
/// backdrop solidifies to the target colour, the noise loop starts, and `on_done` is
/// scheduled as the completion signal.
pub fn tile_reveal<S: Surface>(
    ctx: &mut PhaseContext<S>,
    owner: PhaseId,
    style: &'static TransitionStyle,
    on_done: Option<Cue>,
) -> Option<TransitionId> {
    let viewport = ctx.surface.viewport();
    let mut reveal = TileReveal::new(owner, style, viewport.width, viewport.height, &mut ctx.rng);
    let canvas = ctx.mount_layer(
        owner,
        Node::Canvas {
            name: style.name.to_string(),
            z_index: style.z_index,
            width: viewport.width.ceil() as u32,
            height: viewport.height.ceil() as u32,
        },
    );
    info!(phase = %owner, transition = style.name, cells = reveal.cell_count(), "tile reveal started");
    reveal.on_done = on_done;
    reveal.canvas = canvas;
    // Without a canvas (or cells) settle immediately so the script keeps its beat.
    if canvas.is_none() || reveal.is_complete() {
        complete(ctx, reveal);
        return None;
    }
    let id = ctx.next_transition_id();
    ctx.reveals.insert(id, reveal);
    ctx.scheduler.request_frame(Some(owner), Action::RevealFrame(id));
    Some(id)
}

/// Paints one frame of a reveal and requests the next one until the grid is covered.
pub fn reveal_frame<S: Surface>(ctx: &mut PhaseContext<S>, id: TransitionId) {
    let Some(mut reveal) = ctx.reveals.remove(&id) else {
        return;
    };
    // A reveal that cannot paint settles at once.
    let Some(canvas) = reveal.canvas.filter(|c| ctx.surface.is_attached(*c)) else {
        debug!(phase = %reveal.owner, "reveal canvas detached");
        complete(ctx, reveal);
        return;
    };
    let pixel = reveal.style.pixel_size;
    let mut failed = false;
    for cell in reveal.next_batch(&mut ctx.rng) {
        let rect = Rect::new(
            f64::from(cell.col) * pixel,
            f64::from(cell.row) * pixel,
            cell.size,
            cell.size,
        );
        if let Err(err) = ctx.surface.fill_rect(canvas, rect, cell.color) {
            warn!(error = %err, "reveal paint skipped");
            failed = true;
            break;
        }
    }
    if failed || reveal.is_complete() {
        complete(ctx, reveal);
    } else {
        let owner = reveal.owner;
        ctx.reveals.insert(id, reveal);
        ctx.scheduler.request_frame(Some(owner), Action::RevealFrame(id));
    }
}

fn complete<S: Surface>(ctx: &mut PhaseContext<S>, reveal: TileReveal) {
    info!(phase = %reveal.owner, transition = reveal.style.name, "tile reveal complete");
    ctx.surface.set_backdrop(Some(reveal.style.target));
    if let Some(canvas) = reveal.canvas {
        let pixel = reveal.style.pixel_size.max(1.0);
        let viewport = ctx.surface.viewport();
        let noise = NoiseLoop {
            canvas,
            style: reveal.style,
            cols: (viewport.width / pixel).ceil() as u32,
            rows: (viewport.height / pixel).ceil() as u32,
        };
        ctx.scheduler
            .after(0, Some(reveal.owner), Action::Noise(noise));
    }
    if let Some(cue) = reveal.on_done {
        ctx.scheduler
            .after(0, Some(reveal.owner), Action::Script(cue));
    }
}

/// Self-rescheduling static over a finished transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseLoop {
    pub canvas: ElementId,
    pub style: &'static TransitionStyle,
    pub cols: u32,
    pub rows: u32,
}

/// Paints one burst of noise and schedules the next, unless the canvas is gone.
pub fn noise_tick<S: Surface>(ctx: &mut PhaseContext<S>, owner: Option<PhaseId>, noise: NoiseLoop) {
    if !ctx.surface.is_attached(noise.canvas) {
        debug!(transition = noise.style.name, "noise canvas detached, loop stopped");
        return;
    }
    let rects = noise_burst(&mut ctx.rng, &noise);
    for (rect, color) in rects {
        if let Err(err) = ctx.surface.fill_rect(noise.canvas, rect, color) {
            warn!(error = %err, "noise paint skipped");
            return;
        }
    }
    let style = &noise.style.noise;
    let delay = ctx
        .rng
        .random_range(style.min_interval_ms..style.max_interval_ms.max(style.min_interval_ms + 1));
    ctx.scheduler.after(delay, owner, Action::Noise(noise));
}

fn random_cell<R: Rng + ?Sized>(rng: &mut R, cols: u32, rows: u32, pixel: f64) -> (f64, f64) {
    (
        f64::from(rng.random_range(0..cols)) * pixel,
        f64::from(rng.random_range(0..rows)) * pixel,
    )
}

fn noise_burst<R: Rng + ?Sized>(rng: &mut R, noise: &NoiseLoop) -> Vec<(Rect, Color)> {
    let style = &noise.style.noise;
    let pixel = noise.style.pixel_size;
    let cols = noise.cols.max(1);
    let rows = noise.rows.max(1);
    let mut rects = Vec::new();

    let count = style.min_count + rng.random_range(0..style.count_span.max(1));
    for _ in 0..count {
        let (x, y) = random_cell(rng, cols, rows, pixel);
        let w = f64::from(1 + rng.random_range(0..style.max_width_cells.max(1))) * pixel;
        let h = f64::from(1 + rng.random_range(0..style.max_height_cells.max(1))) * pixel;
        let color = style
            .palette
            .choose(rng)
            .copied()
            .unwrap_or(noise.style.target);
        rects.push((Rect::new(x, y, w, h), color));
    }
    if let Some(scan) = style.scanline {
        if rng.random_bool(scan.probability) {
            let y = f64::from(rng.random_range(0..rows)) * pixel;
            let color = if rng.random_bool(0.5) {
                scan.colors[0]
            } else {
                scan.colors[1]
            };
            let width = f64::from(cols) * pixel;
            rects.push((
                Rect::new(0.0, y, width, pixel * f64::from(scan.height_cells)),
                color,
            ));
        }
    }
    if let Some(reset) = style.reset {
        if rng.random_bool(reset.probability) {
            let count = reset.min_count + rng.random_range(0..reset.count_span.max(1));
            for _ in 0..count {
                let (x, y) = random_cell(rng, cols, rows, pixel);
                rects.push((
                    Rect::new(
                        x,
                        y,
                        pixel * f64::from(reset.width_cells),
                        pixel * f64::from(reset.height_cells),
                    ),
                    noise.style.target,
                ));
            }
        }
    }
    if let Some(dead) = style.dead_pixel {
        if rng.random_bool(dead.probability) {
            let (x, y) = random_cell(rng, cols, rows, pixel);
            rects.push((Rect::new(x, y, pixel, pixel), dead.color));
        }
    }
    rects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{context, run_for};
    use crate::phases::phase2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn per_frame_follows_duration() {
        let mut rng = StdRng::seed_from_u64(3);
        let reveal = TileReveal::new(PhaseId::Phase1, &BLUE_SCREEN, 1024.0, 768.0, &mut rng);
        // 86 x 64 cells over 2000 / 16 frames.
        assert_eq!(reveal.cell_count(), 86 * 64);
        assert_eq!(reveal.per_frame(), 45);
    }

    #[test]
    fn red_reveal_speckles_black() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut reveal = TileReveal::new(PhaseId::Phase2, &RED_SCREEN, 600.0, 600.0, &mut rng);
        let mut colors = Vec::new();
        while !reveal.is_complete() {
            colors.extend(reveal.next_batch(&mut rng).into_iter().map(|c| c.color));
        }
        let black = colors.iter().filter(|c| **c == Color::BLACK).count();
        assert!(black > 0 && black < colors.len() / 3);
    }

    #[test]
    fn reveal_settles_backdrop_and_signals_done() {
        let mut ctx = context();
        ctx.activate(PhaseId::Phase2);
        let done = Cue::Two(phase2::Step::RedSettled);
        tile_reveal(&mut ctx, PhaseId::Phase2, &RED_SCREEN, Some(done)).unwrap();
        let canvas = ctx.surface.find("red-screen-overlay").unwrap();

        let mut cues = Vec::new();
        for step in 1..=200u64 {
            ctx.advance(crate::types::Timestamp::from_micros(step * 16_000), |_, cue| cues.push(cue));
        }
        assert_eq!(ctx.surface.backdrop(), Some(RED_SCREEN.target));
        assert_eq!(cues, vec![done]);
        assert!(ctx.reveals.is_empty());
        // Reveal cells plus at least one noise burst.
        assert!(ctx.surface.paint_count(canvas) > 86 * 64);
    }

    #[test]
    fn detached_canvas_still_signals_done() {
        let mut ctx = context();
        ctx.activate(PhaseId::Phase2);
        let done = Cue::Two(phase2::Step::RedSettled);
        tile_reveal(&mut ctx, PhaseId::Phase2, &RED_SCREEN, Some(done)).unwrap();
        let mut cues = Vec::new();
        ctx.advance(crate::types::Timestamp::from_micros(16_000), |_, cue| cues.push(cue));
        assert!(!ctx.reveals.is_empty());

        let canvas = ctx.surface.find("red-screen-overlay").unwrap();
        ctx.surface.remove(canvas);
        for step in 2..=10u64 {
            ctx.advance(crate::types::Timestamp::from_micros(step * 16_000), |_, cue| cues.push(cue));
        }
        assert_eq!(cues, vec![done]);
        assert_eq!(ctx.surface.backdrop(), Some(RED_SCREEN.target));
        assert!(ctx.reveals.is_empty());
        assert_eq!(ctx.scheduler.pending_timers(), 0);
    }

    #[test]
    fn noise_loop_stops_when_canvas_detaches() {
        let mut ctx = context();
        ctx.activate(PhaseId::Phase1);
        tile_reveal(&mut ctx, PhaseId::Phase1, &BLACK_VOID, None).unwrap();
        run_for(&mut ctx, 3000);
        assert_eq!(ctx.surface.backdrop(), Some(Color::BLACK));
        assert_eq!(ctx.scheduler.pending_for(PhaseId::Phase1), 1);

        let canvas = ctx.surface.find("black-glitch-canvas").unwrap();
        ctx.surface.remove(canvas);
        run_for(&mut ctx, 300);
        assert_eq!(ctx.scheduler.pending_timers(), 0);
    }

    #[test]
    fn noise_bursts_stay_on_palette() {
        let mut rng = StdRng::seed_from_u64(5);
        let noise = NoiseLoop {
            canvas: ElementId::new(1),
            style: &BLACK_VOID,
            cols: 64,
            rows: 48,
        };
        for _ in 0..50 {
            let burst = noise_burst(&mut rng, &noise);
            assert!(burst.len() >= 5);
            for (rect, color) in burst {
                assert!(rect.width >= 16.0 && rect.width <= 64.0);
                assert!(BLACK_VOID.noise.palette.contains(&color) || color == Color::from_hex(0x1a1a1a));
            }
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        proptest! {
            /// Every cell of the grid is visited exactly once, whatever the batch sizes.
            #[test]
            fn reveal_visits_each_cell_once(
                width in 0.0f64..1600.0,
                height in 0.0f64..1200.0,
                preset in 0usize..3,
                seed in any::<u64>(),
            ) {
                let style = [&BLUE_SCREEN, &BLACK_VOID, &RED_SCREEN][preset];
                let mut rng = StdRng::seed_from_u64(seed);
                let mut reveal = TileReveal::new(PhaseId::Phase1, style, width, height, &mut rng);
                let cols = (width / style.pixel_size).ceil() as u32;
                let rows = (height / style.pixel_size).ceil() as u32;

                let mut visited = HashSet::new();
                let mut frames = 0;
                while !reveal.is_complete() {
                    for cell in reveal.next_batch(&mut rng) {
                        prop_assert!(cell.col < cols && cell.row < rows);
                        prop_assert!(visited.insert((cell.col, cell.row)), "cell painted twice");
                    }
                    frames += 1;
                    prop_assert!(frames <= 100_000);
                }
                prop_assert_eq!(visited.len(), (cols * rows) as usize);
            }
        }
    }
}
