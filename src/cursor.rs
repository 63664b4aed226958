// Scripted pointer drift: glitchy jumps to random points while Phase1 runs.
// Host mode: the real pointer position is tracked and each jump starts from it.
// See DESIGN.md: Cursor drift

use rand::Rng;
use tracing::debug;

use crate::context::{Action, PhaseContext};
use crate::surface::Surface;
use crate::types::PhaseId;

/// Moves per jump.
pub const STEPS: u32 = 8;
const MIN_INTERVAL_MS: u64 = 2000;
const MAX_INTERVAL_MS: u64 = 4000;
const MIN_JUMP_MS: u64 = 200;
const MAX_JUMP_MS: u64 = 500;

/// Crawls for the first 70% of a jump, then snaps the rest of the way.
pub fn glitch_ease(progress: f64) -> f64 {
    if progress < 0.7 {
        progress * 0.3
    } else {
        0.3 + (progress - 0.7) * 2.33
    }
}

/// One intermediate pointer move of a jump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorStep {
    pub from: (f64, f64),
    pub to: (f64, f64),
    pub step: u32,
}

impl CursorStep {
    pub fn position(&self) -> (f64, f64) {
        let t = glitch_ease(f64::from(self.step) / f64::from(STEPS));
        (
            self.from.0 + (self.to.0 - self.from.0) * t,
            self.from.1 + (self.to.1 - self.from.1) * t,
        )
    }
}

#[derive(Debug, Default)]
pub struct CursorDrift {
    running: bool,
    interval_ms: u64,
    last_position: Option<(f64, f64)>,
    jumps: u64,
}

impl CursorDrift {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn jumps(&self) -> u64 {
        self.jumps
    }

    /// Records where the real pointer is; the next jump starts there.
    pub fn track(&mut self, x: f64, y: f64) {
        self.last_position = Some((x, y));
    }

    pub fn last_position(&self) -> Option<(f64, f64)> {
        self.last_position
    }
}

/// Starts the jump loop for `owner`. Returns false when disabled or already running.
pub fn start_drift<S: Surface>(ctx: &mut PhaseContext<S>, owner: PhaseId) -> bool {
    if !ctx.config.cursor_drift || ctx.cursor.running {
        return false;
    }
    let interval = ctx.rng.random_range(MIN_INTERVAL_MS..=MAX_INTERVAL_MS);
    ctx.cursor.running = true;
    ctx.cursor.interval_ms = interval;
    ctx.scheduler
        .after(interval, Some(owner), Action::CursorDrift);
    debug!(phase = %owner, interval_ms = interval, "cursor drift started");
    true
}

pub fn stop_drift<S: Surface>(ctx: &mut PhaseContext<S>) {
    ctx.cursor.running = false;
}

/// Picks a random target, schedules the eight moves towards it, then re-arms.
pub fn drift_tick<S: Surface>(ctx: &mut PhaseContext<S>, owner: Option<PhaseId>) {
    if !ctx.cursor.running {
        return;
    }
    let viewport = ctx.surface.viewport();
    let to = (
        ctx.rng.random::<f64>() * viewport.width,
        ctx.rng.random::<f64>() * viewport.height,
    );
    let from = ctx
        .cursor
        .last_position
        .unwrap_or((viewport.width / 2.0, viewport.height / 2.0));
    let duration = ctx.rng.random_range(MIN_JUMP_MS..=MAX_JUMP_MS);
    let interval = duration / u64::from(STEPS);
    for step in 1..=STEPS {
        ctx.scheduler.after(
            interval * u64::from(step),
            owner,
            Action::CursorStep(CursorStep { from, to, step }),
        );
    }
    ctx.cursor.jumps += 1;
    ctx.scheduler
        .after(ctx.cursor.interval_ms, owner, Action::CursorDrift);
}

pub fn step_tick<S: Surface>(ctx: &mut PhaseContext<S>, step: CursorStep) {
    if !ctx.cursor.running {
        return;
    }
    let (x, y) = step.position();
    ctx.surface.move_pointer(x, y);
    ctx.cursor.last_position = Some((x, y));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{context, run_for};

    #[test]
    fn ease_crawls_then_snaps() {
        assert_eq!(glitch_ease(0.0), 0.0);
        assert!((glitch_ease(0.5) - 0.15).abs() < 1e-9);
        assert!((glitch_ease(1.0) - 1.0).abs() < 0.01);
    }

    #[test]
    fn disabled_drift_schedules_nothing() {
        let mut ctx = context();
        ctx.config.cursor_drift = false;
        ctx.activate(PhaseId::Phase1);
        assert!(!start_drift(&mut ctx, PhaseId::Phase1));
        assert_eq!(ctx.scheduler.pending_timers(), 0);
    }

    #[test]
    fn jump_moves_pointer_from_tracked_position() {
        let mut ctx = context();
        ctx.activate(PhaseId::Phase1);
        ctx.cursor.track(10.0, 20.0);
        assert!(start_drift(&mut ctx, PhaseId::Phase1));
        assert!(!start_drift(&mut ctx, PhaseId::Phase1));

        run_for(&mut ctx, 4600);
        assert!(ctx.cursor.jumps() >= 1);
        let (x, y) = ctx.surface.pointer();
        assert_ne!((x, y), (10.0, 20.0));
        assert!((0.0..=1024.0).contains(&x) && (0.0..=768.0).contains(&y));
    }

    #[test]
    fn stopped_drift_goes_quiet() {
        let mut ctx = context();
        ctx.activate(PhaseId::Phase1);
        start_drift(&mut ctx, PhaseId::Phase1);
        stop_drift(&mut ctx);
        run_for(&mut ctx, 5000);
        assert_eq!(ctx.cursor.jumps(), 0);
        assert_eq!(ctx.scheduler.pending_timers(), 0);
    }
}
