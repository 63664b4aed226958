// Glitch envelopes, settle-to-jitter and pixel stutter for spawned elements.
// Rule: every loop checks its element is still attached before touching it.
// See DESIGN.md: Glitch effects

use rand::Rng;
use tracing::{debug, warn};

use crate::context::{Action, PhaseContext};
use crate::surface::{Filter, Style, Surface, Transform};
use crate::types::{ElementId, PhaseId};

/// Where an element ends up once its envelope runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    Clean,
    /// Keep snapping by a pixel or so until detached.
    Jitter,
}

/// Randomized perturbation parameters for one family of spawned icons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlitchProfile {
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub tick_ms: u64,
    /// Span of the horizontal shift paired with skew and vertical stretch.
    pub shift: f64,
    /// Span of the horizontal shift paired with horizontal stretch.
    pub wide_shift: f64,
    pub skew_deg: f64,
    pub stretch_min: f64,
    pub stretch_span: f64,
    /// Probability of dimming to half opacity on a tick.
    pub dim_probability: f64,
    pub filter: Filter,
    pub filter_probability: f64,
    pub settle: Settle,
}

impl GlitchProfile {
    /// Desktop-style icons: fast and snappy.
    pub const EXTRAS: GlitchProfile = GlitchProfile {
        min_duration_ms: 150,
        max_duration_ms: 150,
        tick_ms: 20,
        shift: 10.0,
        wide_shift: 15.0,
        skew_deg: 30.0,
        stretch_min: 0.7,
        stretch_span: 0.6,
        dim_probability: 0.3,
        filter: Filter::InvertHue,
        filter_probability: 0.5,
        settle: Settle::Clean,
    };

    /// Smaller, more controlled movements.
    ///
    /// The envelope always ticks every 50 ms. What follows it depends on
    /// `ShowConfig::settle_with_jitter`: on, the icon keeps snapping until detached;
    /// off, it settles clean like the other profiles.
    pub const JUSTICE: GlitchProfile = GlitchProfile {
        min_duration_ms: 150,
        max_duration_ms: 250,
        tick_ms: 50,
        shift: 8.0,
        wide_shift: 12.0,
        skew_deg: 20.0,
        stretch_min: 0.8,
        stretch_span: 0.4,
        dim_probability: 0.3,
        filter: Filter::Contrast,
        filter_probability: 0.4,
        settle: Settle::Jitter,
    };

    /// Number of perturbation ticks for an envelope of `duration_ms`.
    pub fn ticks_for(&self, duration_ms: u64) -> u32 {
        let tick = self.tick_ms.max(1);
        duration_ms.div_ceil(tick) as u32
    }

    fn perturb<R: Rng + ?Sized>(&self, rng: &mut R) -> Style {
        let transform = match rng.random_range(0..4) {
            0 => Transform::SkewX {
                dx: centered(rng, self.shift),
                deg: centered(rng, self.skew_deg),
            },
            1 => Transform::StretchX {
                dy: centered(rng, self.shift),
                scale: self.stretch_min + rng.random::<f64>() * self.stretch_span,
            },
            2 => Transform::StretchY {
                dx: centered(rng, self.wide_shift),
                scale: self.stretch_min + rng.random::<f64>() * self.stretch_span,
            },
            _ => Transform::Identity,
        };
        let opacity = if rng.random_bool(self.dim_probability) {
            0.5
        } else {
            1.0
        };
        let filter = if rng.random_bool(self.filter_probability) {
            self.filter
        } else {
            Filter::None
        };
        Style {
            transform: Some(transform),
            opacity: Some(opacity),
            filter: Some(filter),
            ..Default::default()
        }
    }
}

fn centered<R: Rng + ?Sized>(rng: &mut R, span: f64) -> f64 {
    (rng.random::<f64>() - 0.5) * span
}

/// A running glitch on one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlitchEnvelope {
    pub element: ElementId,
    pub remaining: u32,
    pub profile: GlitchProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterKind {
    /// Whole-pixel snaps in [-2, 1], every 60 ms.
    Snap,
    /// Sub-pixel shake within ±2 px, every 50 ms.
    Stutter,
}

impl JitterKind {
    pub fn tick_ms(&self) -> u64 {
        match self {
            JitterKind::Snap => 60,
            JitterKind::Stutter => 50,
        }
    }

    fn offset<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            JitterKind::Snap => ((rng.random::<f64>() - 0.5) * 3.0).floor(),
            JitterKind::Stutter => centered(rng, 4.0),
        }
    }
}

/// Perpetual small shake. No countdown: it stops when the element detaches
/// or its phase is torn down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    pub element: ElementId,
    pub kind: JitterKind,
}

/// Starts a glitch envelope on a freshly spawned element.
pub fn start_glitch<S: Surface>(
    ctx: &mut PhaseContext<S>,
    owner: PhaseId,
    element: ElementId,
    profile: GlitchProfile,
) {
    let duration = if profile.max_duration_ms > profile.min_duration_ms {
        ctx.rng
            .random_range(profile.min_duration_ms..=profile.max_duration_ms)
    } else {
        profile.min_duration_ms
    };
    let envelope = GlitchEnvelope {
        element,
        remaining: profile.ticks_for(duration),
        profile,
    };
    ctx.scheduler
        .after(profile.tick_ms, Some(owner), Action::Glitch(envelope));
}

pub fn start_stutter<S: Surface>(ctx: &mut PhaseContext<S>, owner: PhaseId, element: ElementId) {
    start_jitter(ctx, Some(owner), element, JitterKind::Stutter);
}

fn start_jitter<S: Surface>(
    ctx: &mut PhaseContext<S>,
    owner: Option<PhaseId>,
    element: ElementId,
    kind: JitterKind,
) {
    ctx.scheduler
        .after(kind.tick_ms(), owner, Action::Jitter(Jitter { element, kind }));
}

/// One envelope tick: perturb and reschedule, or settle once the count runs out.
pub fn glitch_tick<S: Surface>(
    ctx: &mut PhaseContext<S>,
    owner: Option<PhaseId>,
    envelope: GlitchEnvelope,
) {
    if !ctx.surface.is_attached(envelope.element) {
        debug!(element = envelope.element.as_u32(), "glitch target detached");
        return;
    }
    if envelope.remaining == 0 {
        settle(ctx, owner, envelope);
        return;
    }
    let style = envelope.profile.perturb(&mut ctx.rng);
    if let Err(err) = ctx.surface.apply_style(envelope.element, style) {
        warn!(error = %err, "glitch style skipped");
        return;
    }
    let next = GlitchEnvelope {
        remaining: envelope.remaining - 1,
        ..envelope
    };
    ctx.scheduler
        .after(envelope.profile.tick_ms, owner, Action::Glitch(next));
}

fn settle<S: Surface>(ctx: &mut PhaseContext<S>, owner: Option<PhaseId>, envelope: GlitchEnvelope) {
    let jitter = envelope.profile.settle == Settle::Jitter && ctx.config.settle_with_jitter;
    let style = Style {
        transform: if jitter { None } else { Some(Transform::Identity) },
        opacity: Some(1.0),
        filter: Some(Filter::None),
        ..Default::default()
    };
    if let Err(err) = ctx.surface.apply_style(envelope.element, style) {
        warn!(error = %err, "glitch settle skipped");
        return;
    }
    if jitter {
        start_jitter(ctx, owner, envelope.element, JitterKind::Snap);
    }
}

pub fn jitter_tick<S: Surface>(ctx: &mut PhaseContext<S>, owner: Option<PhaseId>, jitter: Jitter) {
    if !ctx.surface.is_attached(jitter.element) {
        debug!(element = jitter.element.as_u32(), "jitter target detached");
        return;
    }
    let dx = jitter.kind.offset(&mut ctx.rng);
    let dy = jitter.kind.offset(&mut ctx.rng);
    if let Err(err) = ctx
        .surface
        .apply_style(jitter.element, Style::transform(Transform::Shift { dx, dy }))
    {
        warn!(error = %err, "jitter stopped");
        return;
    }
    start_jitter(ctx, owner, jitter.element, jitter.kind);
}
