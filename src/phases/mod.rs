// Phase scripts and their shared lifecycle: start, route steps, clean up.
// Rule: start and cleanup are idempotent. Cleanup never touches the backdrop.
// See DESIGN.md: Phase state machine

pub mod phase1;
pub mod phase2;
pub mod phase3;

use std::fmt;

use tracing::{debug, info};

use crate::context::{Action, Cue, PhaseContext};
use crate::layout::LoadedLayouts;
use crate::scheduler::Timeline;
use crate::surface::Surface;
use crate::types::{Color, PhaseId, ShowEvent};

pub use phase1::BlueToBlack;
pub use phase2::BlackToRed;
pub use phase3::RedToEnd;

/// One scripted stage of the show.
pub trait Phase {
    /// Private sub-steps, carried through the scheduler as data.
    type Step: Copy + fmt::Debug;

    const ID: PhaseId;

    fn cue(step: Self::Step) -> Cue;

    /// Steps fired relative to the phase start.
    fn script() -> Timeline<Self::Step>;

    /// Backdrop a standalone run starts on, standing in for the predecessor's.
    fn entry_backdrop() -> Option<Color> {
        None
    }

    fn on_step<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, step: Self::Step);

    /// Called once every document of a grouped load `step` started is in.
    fn on_layouts<S: Surface>(
        &mut self,
        ctx: &mut PhaseContext<S>,
        step: Self::Step,
        layouts: LoadedLayouts,
    );

    /// Phase-private state and side channels (camera, cursor). Layers and timers are
    /// released by the caller.
    fn teardown<S: Surface>(&mut self, ctx: &mut PhaseContext<S>);
}

/// Activates `P` and schedules its script. Returns false if `P` is already running.
pub fn start<P: Phase, S: Surface>(ctx: &mut PhaseContext<S>) -> bool {
    if !ctx.activate(P::ID) {
        debug!(phase = %P::ID, "phase already active");
        return false;
    }
    info!(phase = %P::ID, "phase started");
    ctx.emit(ShowEvent::PhaseStarted { phase: P::ID });
    let script = P::script().map(|step| Action::Script(P::cue(step)));
    ctx.scheduler.schedule_timeline(script, Some(P::ID));
    true
}

/// Stops `P` and releases everything it owns. Safe to call at any time, any number of times.
pub fn cleanup<P: Phase, S: Surface>(phase: &mut P, ctx: &mut PhaseContext<S>) -> bool {
    let was_active = ctx.deactivate(P::ID);
    phase.teardown(ctx);
    let released = ctx.release_owned(P::ID);
    if was_active || released > 0 {
        info!(phase = %P::ID, released, "phase cleaned up");
        ctx.emit(ShowEvent::PhaseCleanedUp { phase: P::ID });
    }
    was_active
}

/// Schedules a follow-up step of `P` after `delay_ms`.
pub(crate) fn after<P: Phase, S: Surface>(ctx: &mut PhaseContext<S>, delay_ms: u64, step: P::Step) {
    ctx.scheduler
        .after(delay_ms, Some(P::ID), Action::Script(P::cue(step)));
}

/// The three phases, owned by the orchestrator.
#[derive(Debug, Default)]
pub struct Phases {
    pub one: BlueToBlack,
    pub two: BlackToRed,
    pub three: RedToEnd,
}

impl Phases {
    pub fn start<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, id: PhaseId) -> bool {
        match id {
            PhaseId::Phase1 => start::<BlueToBlack, S>(ctx),
            PhaseId::Phase2 => start::<BlackToRed, S>(ctx),
            PhaseId::Phase3 => start::<RedToEnd, S>(ctx),
        }
    }

    pub fn cleanup<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, id: PhaseId) -> bool {
        match id {
            PhaseId::Phase1 => cleanup(&mut self.one, ctx),
            PhaseId::Phase2 => cleanup(&mut self.two, ctx),
            PhaseId::Phase3 => cleanup(&mut self.three, ctx),
        }
    }

    pub fn entry_backdrop(id: PhaseId) -> Option<Color> {
        match id {
            PhaseId::Phase1 => BlueToBlack::entry_backdrop(),
            PhaseId::Phase2 => BlackToRed::entry_backdrop(),
            PhaseId::Phase3 => RedToEnd::entry_backdrop(),
        }
    }

    /// Script delays of one phase, for diagnostics.
    pub fn script_delays(id: PhaseId) -> Vec<u64> {
        fn delays<P: Phase>() -> Vec<u64> {
            P::script().events().iter().map(|e| e.delay_ms).collect()
        }
        match id {
            PhaseId::Phase1 => delays::<BlueToBlack>(),
            PhaseId::Phase2 => delays::<BlackToRed>(),
            PhaseId::Phase3 => delays::<RedToEnd>(),
        }
    }

    pub fn on_cue<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, cue: Cue) {
        match cue {
            Cue::One(step) => self.one.on_step(ctx, step),
            Cue::Two(step) => self.two.on_step(ctx, step),
            Cue::Three(step) => self.three.on_step(ctx, step),
        }
    }

    pub fn on_layouts<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, cue: Cue, layouts: LoadedLayouts) {
        match cue {
            Cue::One(step) => self.one.on_layouts(ctx, step, layouts),
            Cue::Two(step) => self.two.on_layouts(ctx, step, layouts),
            Cue::Three(step) => self.three.on_layouts(ctx, step, layouts),
        }
    }
}
