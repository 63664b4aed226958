// Show orchestrator: chains the phases, settles completions, routes host callbacks.
// Rule: one chain at a time. A finished sequence holds the guard until stop_sequence.
// See DESIGN.md: Phase state machine

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::camera::{self, Frame};
use crate::context::{Completion, PhaseContext};
use crate::error::{DeviceError, ShowError};
use crate::layout::FetchTicket;
use crate::overlay::{PointerKind, PointerOutcome, RevealSource};
use crate::phases::Phases;
use crate::surface::{SceneSurface, Surface, SurfaceCommand};
use crate::types::{ElementId, HostRequest, PhaseId, ShowConfig, ShowEvent, Timestamp, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShowState {
    Idle,
    /// A `start_sequence` chain is running.
    Sequence,
    /// Diagnostic phases started one by one.
    Standalone,
    /// The chain ran to its end; nothing restarts until `stop_sequence`.
    Finished,
}

pub struct Show<S: Surface = SceneSurface> {
    ctx: PhaseContext<S>,
    phases: Phases,
    state: ShowState,
}

impl<S: Surface> Show<S> {
    pub fn new(surface: S, config: ShowConfig) -> Result<Self, ShowError> {
        config.validate()?;
        Ok(Show {
            ctx: PhaseContext::new(surface, config),
            phases: Phases::default(),
            state: ShowState::Idle,
        })
    }

    /// Replaces the seeded tile values, e.g. with a `FixedReveal` for diagnostics.
    pub fn with_reveal_source(mut self, source: Box<dyn RevealSource>) -> Self {
        self.ctx.reveal = source;
        self
    }

    pub fn state(&self) -> ShowState {
        self.state
    }

    pub fn now(&self) -> Timestamp {
        self.ctx.now()
    }

    pub fn is_active(&self, phase: PhaseId) -> bool {
        self.ctx.is_active(phase)
    }

    pub fn surface(&self) -> &S {
        &self.ctx.surface
    }

    pub fn context(&self) -> &PhaseContext<S> {
        &self.ctx
    }

    /// Starts the configured chain. Returns false while anything is running or a
    /// finished sequence has not been stopped.
    pub fn start_sequence(&mut self) -> bool {
        if self.state != ShowState::Idle || self.ctx.any_active() {
            debug!(state = ?self.state, "sequence already running");
            return false;
        }
        let Some(&first) = self.ctx.config.phase_order.first() else {
            return false;
        };
        info!(first = %first, "sequence started");
        self.state = ShowState::Sequence;
        let completion = chain_completion(&self.ctx.config.phase_order, first);
        self.ctx.set_completion(first, completion);
        self.phases.start(&mut self.ctx, first)
    }

    pub fn stop_sequence(&mut self) {
        info!("sequence stopped");
        self.cleanup_all();
    }

    /// Cleans every phase, clears the backdrop and resets the guard.
    pub fn cleanup_all(&mut self) {
        for id in PhaseId::ALL {
            self.phases.cleanup(&mut self.ctx, id);
            self.ctx.take_completion(id);
        }
        self.ctx.take_finished();
        self.ctx.surface.set_backdrop(None);
        self.state = ShowState::Idle;
    }

    /// Runs one phase on its own, on the backdrop its predecessor would have left.
    pub fn start_phase(&mut self, id: PhaseId) -> bool {
        if self.ctx.is_active(id) {
            debug!(phase = %id, "phase already active");
            return false;
        }
        if let Some(color) = Phases::entry_backdrop(id) {
            self.ctx.surface.set_backdrop(Some(color));
        }
        if self.state == ShowState::Idle {
            self.state = ShowState::Standalone;
        }
        self.ctx.set_completion(id, Completion::Standalone);
        self.phases.start(&mut self.ctx, id)
    }

    pub fn stop_phase(&mut self, id: PhaseId) -> bool {
        let was_active = self.phases.cleanup(&mut self.ctx, id);
        self.ctx.take_completion(id);
        if !self.ctx.any_active() && self.state != ShowState::Finished {
            self.state = ShowState::Idle;
        }
        was_active
    }

    /// Advances the show clock to `now`: due timers, then this frame's callbacks.
    pub fn tick(&mut self, now: Timestamp) {
        let phases = &mut self.phases;
        let state = &mut self.state;
        self.ctx.advance(now, |ctx, cue| {
            phases.on_cue(ctx, cue);
            settle(ctx, phases, state);
        });
        settle(&mut self.ctx, &mut self.phases, &mut self.state);
    }

    /// Answers one fetch. Returns whether a phase continuation ran.
    pub fn deliver_layout(&mut self, ticket: FetchTicket, outcome: Result<String, String>) -> bool {
        let Some((owner, cue, layouts)) = self.ctx.loads.resolve(ticket, outcome) else {
            return false;
        };
        let failures: Vec<ShowEvent> = layouts
            .errors()
            .map(|err| ShowEvent::LayoutFailed {
                path: err.path().to_string(),
                error: err.to_string(),
            })
            .collect();
        for event in failures {
            self.ctx.emit(event);
        }
        if !self.ctx.is_active(owner) {
            debug!(phase = %owner, ticket = ticket.as_u32(), "late layout ignored");
            return false;
        }
        self.phases.on_layouts(&mut self.ctx, cue, layouts);
        settle(&mut self.ctx, &mut self.phases, &mut self.state);
        true
    }

    pub fn camera_granted(&mut self) {
        camera::granted(&mut self.ctx);
    }

    pub fn camera_denied(&mut self, err: DeviceError) {
        camera::denied(&mut self.ctx, err);
    }

    pub fn camera_frame(&mut self, frame: Frame) {
        camera::push_frame(&mut self.ctx, frame);
    }

    /// Routes a pointer event from the host to the reactive tiles.
    pub fn pointer(&mut self, element: ElementId, kind: PointerKind) -> PointerOutcome {
        let ctx = &mut self.ctx;
        let outcome = ctx
            .tiles
            .handle(&mut ctx.surface, ctx.reveal.as_mut(), element, kind);
        if let PointerOutcome::Revealed(value) = outcome {
            ctx.emit(ShowEvent::TileRevealed { element, value });
        }
        outcome
    }

    pub fn pointer_moved(&mut self, x: f64, y: f64) {
        self.ctx.cursor.track(x, y);
    }

    pub fn take_requests(&mut self) -> Vec<HostRequest> {
        self.ctx.take_requests()
    }

    pub fn take_events(&mut self) -> Vec<ShowEvent> {
        self.ctx.take_events()
    }
}

impl Show<SceneSurface> {
    pub fn resize(&mut self, viewport: Viewport) {
        self.ctx.surface.set_viewport(viewport);
    }

    pub fn take_commands(&mut self) -> Vec<SurfaceCommand> {
        self.ctx.surface.take_commands()
    }
}

/// What follows `id` in `order`.
fn chain_completion(order: &[PhaseId], id: PhaseId) -> Completion {
    match order.iter().position(|p| *p == id) {
        Some(i) => order
            .get(i + 1)
            .map_or(Completion::EndOfSequence, |next| Completion::Next(*next)),
        None => Completion::Standalone,
    }
}

/// Hands every finished phase its single-shot completion.
fn settle<S: Surface>(ctx: &mut PhaseContext<S>, phases: &mut Phases, state: &mut ShowState) {
    for phase in ctx.take_finished() {
        let completion = ctx.take_completion(phase).unwrap_or(Completion::Standalone);
        info!(phase = %phase, ?completion, "phase completed");
        ctx.emit(ShowEvent::PhaseCompleted { phase });
        match completion {
            Completion::Next(next) => {
                phases.cleanup(ctx, phase);
                let completion = chain_completion(&ctx.config.phase_order, next);
                ctx.set_completion(next, completion);
                if !phases.start(ctx, next) {
                    warn!(phase = %next, "next phase already running");
                }
            }
            Completion::EndOfSequence => {
                phases.cleanup(ctx, phase);
                info!("sequence complete");
                ctx.emit(ShowEvent::SequenceComplete);
                *state = ShowState::Finished;
            }
            Completion::Standalone => {}
        }
    }
}
