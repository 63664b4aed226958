// Timed spawner: layout records become positioned elements, one per stagger step.
// Rule: record i appears at i * stagger; the batch lasts exactly count * stagger.
// See DESIGN.md: Timed spawner

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::context::{Action, PhaseContext};
use crate::effects::{self, GlitchProfile};
use crate::surface::{BlendMode, Node, Style, Surface};
use crate::types::{ElementId, PhaseId, PlacementRecord, Rect, Viewport};

/// Layout y (bottom-up) to screen top (top-down).
pub fn flip_y(y: f64, viewport_height: f64) -> f64 {
    viewport_height - y
}

/// Screen top back to layout y.
pub fn unflip_y(top: f64, viewport_height: f64) -> f64 {
    viewport_height - top
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOrder {
    AsGiven,
    AscendingY,
    DescendingY,
    Shuffled,
}

/// Reorders records before a spawn. Sorting is stable.
pub fn arrange<R: Rng + ?Sized>(records: &mut [PlacementRecord], order: SpawnOrder, rng: &mut R) {
    match order {
        SpawnOrder::AsGiven => {}
        SpawnOrder::AscendingY => records.sort_by(|a, b| a.y.total_cmp(&b.y)),
        SpawnOrder::DescendingY => records.sort_by(|a, b| b.y.total_cmp(&a.y)),
        SpawnOrder::Shuffled => records.shuffle(rng),
    }
}

/// Which point of the element the flipped layout position names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Center,
    TopLeft,
}

/// Layout-space shift plus anchor, shared by every item of a phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub dx: f64,
    pub dy: f64,
    pub anchor: Anchor,
}

impl Placement {
    pub const fn centered() -> Self {
        Placement {
            dx: 0.0,
            dy: 0.0,
            anchor: Anchor::Center,
        }
    }

    pub const fn corner() -> Self {
        Placement {
            dx: 0.0,
            dy: 0.0,
            anchor: Anchor::TopLeft,
        }
    }

    /// Adds a layout-space shift on top of the current one.
    pub const fn shifted(self, dx: f64, dy: f64) -> Self {
        Placement {
            dx: self.dx + dx,
            dy: self.dy + dy,
            anchor: self.anchor,
        }
    }

    /// Screen rect of item `index` of a batch.
    pub fn locate(
        &self,
        record: &PlacementRecord,
        index: usize,
        item_shift: ItemShift,
        viewport: Viewport,
    ) -> Rect {
        let (fx, fy) = item_shift.offset(index);
        let x = record.x + self.dx + fx;
        let top = flip_y(record.y + self.dy + fy, viewport.height);
        match self.anchor {
            Anchor::Center => Rect::new(
                x - record.width / 2.0,
                top - record.height / 2.0,
                record.width,
                record.height,
            ),
            Anchor::TopLeft => Rect::new(x, top, record.width, record.height),
        }
    }
}

/// Per-item shift inside one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemShift {
    None,
    /// Item `i` moves by `i * (dx, dy)` in layout space.
    Fan { dx: f64, dy: f64 },
}

impl ItemShift {
    fn offset(&self, index: usize) -> (f64, f64) {
        match self {
            ItemShift::None => (0.0, 0.0),
            ItemShift::Fan { dx, dy } => (dx * index as f64, dy * index as f64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnKind {
    Image,
    /// Armed in the reactive grid.
    Tile,
}

/// What happens to an element right after it appears.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostSpawn {
    None,
    Glitch(GlitchProfile),
    Stutter,
    Blend { opacity: f64, mode: BlendMode },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnSpec {
    pub container: ElementId,
    pub stagger_ms: u64,
    pub placement: Placement,
    pub item_shift: ItemShift,
    pub kind: SpawnKind,
    pub post: PostSpawn,
}

impl SpawnSpec {
    pub fn new(container: ElementId, stagger_ms: u64) -> Self {
        SpawnSpec {
            container,
            stagger_ms,
            placement: Placement::centered(),
            item_shift: ItemShift::None,
            kind: SpawnKind::Image,
            post: PostSpawn::None,
        }
    }

    pub fn placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn fan(mut self, dx: f64, dy: f64) -> Self {
        self.item_shift = ItemShift::Fan { dx, dy };
        self
    }

    pub fn kind(mut self, kind: SpawnKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn post(mut self, post: PostSpawn) -> Self {
        self.post = post;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(u32);

/// Records waiting to be spawned. Each slot is taken exactly once.
#[derive(Debug)]
pub struct SpawnBatch {
    owner: PhaseId,
    spec: SpawnSpec,
    records: Vec<Option<PlacementRecord>>,
}

impl SpawnBatch {
    fn remaining(&self) -> usize {
        self.records.iter().filter(|r| r.is_some()).count()
    }
}

#[derive(Debug, Default)]
pub struct SpawnBatches {
    next: u32,
    batches: HashMap<BatchId, SpawnBatch>,
}

impl SpawnBatches {
    fn insert(&mut self, batch: SpawnBatch) -> BatchId {
        self.next += 1;
        let id = BatchId(self.next);
        self.batches.insert(id, batch);
        id
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn forget_owned(&mut self, owner: PhaseId) -> usize {
        let before = self.batches.len();
        self.batches.retain(|_, b| b.owner != owner);
        before - self.batches.len()
    }
}

/// Schedules one spawn per record at `i * stagger_ms` and returns the batch duration,
/// `count * stagger_ms`. Callers chain their next step on that duration.
pub fn spawn_sequence<S: Surface>(
    ctx: &mut PhaseContext<S>,
    owner: PhaseId,
    records: Vec<PlacementRecord>,
    spec: SpawnSpec,
) -> u64 {
    let count = records.len() as u64;
    let duration = count * spec.stagger_ms;
    if records.is_empty() {
        debug!(phase = %owner, "nothing to spawn");
        return duration;
    }
    let batch = ctx.batches.insert(SpawnBatch {
        owner,
        spec,
        records: records.into_iter().map(Some).collect(),
    });
    for index in 0..count {
        ctx.scheduler.after(
            index * spec.stagger_ms,
            Some(owner),
            Action::SpawnItem {
                batch,
                index: index as usize,
            },
        );
    }
    duration
}

/// Spawns record `index` of a batch. Returns the new element, or `None` when the record was
/// already taken, the batch is gone, or the container is detached.
pub fn spawn_item<S: Surface>(
    ctx: &mut PhaseContext<S>,
    batch_id: BatchId,
    index: usize,
) -> Option<ElementId> {
    let viewport = ctx.surface.viewport();
    let batch = ctx.batches.batches.get_mut(&batch_id)?;
    let record = batch.records.get_mut(index)?.take()?;
    let (owner, spec) = (batch.owner, batch.spec);
    if batch.remaining() == 0 {
        ctx.batches.batches.remove(&batch_id);
    }

    if !ctx.surface.is_attached(spec.container) {
        warn!(phase = %owner, attachment = %record.attachment_name, "container detached, spawn skipped");
        return None;
    }
    let rect = spec
        .placement
        .locate(&record, index, spec.item_shift, viewport);
    let node = match spec.kind {
        SpawnKind::Image => Node::Image {
            src: record.asset_path.clone(),
            rect,
        },
        SpawnKind::Tile => Node::Tile {
            src: record.asset_path.clone(),
            rect,
        },
    };
    let element = match ctx.surface.mount(Some(spec.container), node) {
        Ok(id) => id,
        Err(err) => {
            warn!(phase = %owner, error = %err, "spawn skipped");
            return None;
        }
    };
    if spec.kind == SpawnKind::Tile {
        ctx.tiles
            .arm(&mut ctx.surface, owner, element, &record.origin_tag, rect);
    }
    match spec.post {
        PostSpawn::None => {}
        PostSpawn::Glitch(profile) => effects::start_glitch(ctx, owner, element, profile),
        PostSpawn::Stutter => effects::start_stutter(ctx, owner, element),
        PostSpawn::Blend { opacity, mode } => {
            let style = Style {
                opacity: Some(opacity),
                blend: Some(mode),
                ..Default::default()
            };
            if let Err(err) = ctx.surface.apply_style(element, style) {
                warn!(error = %err, "blend style skipped");
            }
        }
    }
    Some(element)
}
