// Phase context: every registry the show needs, owned by the orchestrator and passed down.
// Rule: nothing lives in globals. A phase's layers, timers and loads are tagged with its id.
// See DESIGN.md: Phase context

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::camera::{self, AsciiCamera};
use crate::cursor::{self, CursorDrift, CursorStep};
use crate::effects::{self, GlitchEnvelope, Jitter};
use crate::layout::{LayoutLoads, LayoutRequest};
use crate::overlay::{ReactiveGrid, RevealSource, SeededReveal};
use crate::phases::{phase1, phase2, phase3};
use crate::scheduler::Scheduler;
use crate::spawner::{self, BatchId, SpawnBatches};
use crate::surface::{Node, Surface};
use crate::transition::{self, NoiseLoop, TileReveal, TransitionId};
use crate::types::{ElementId, HostRequest, PhaseId, ShowConfig, ShowEvent, Timestamp};

/// A phase script step as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    One(phase1::Step),
    Two(phase2::Step),
    Three(phase3::Step),
}

impl Cue {
    pub fn phase(&self) -> PhaseId {
        match self {
            Cue::One(_) => PhaseId::Phase1,
            Cue::Two(_) => PhaseId::Phase2,
            Cue::Three(_) => PhaseId::Phase3,
        }
    }
}

/// Everything the scheduler can run.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Script(Cue),
    SpawnItem { batch: BatchId, index: usize },
    Glitch(GlitchEnvelope),
    Jitter(Jitter),
    RevealFrame(TransitionId),
    Noise(NoiseLoop),
    CameraFadeIn,
    CameraFrame,
    CursorDrift,
    CursorStep(CursorStep),
}

/// What happens when a phase reports it is done. Single-shot; reassigned before each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Clean up and start the given phase.
    Next(PhaseId),
    /// Clean up and report the end of the sequence.
    EndOfSequence,
    /// Diagnostic run: report only.
    Standalone,
}

#[derive(Debug, Default)]
struct PhaseSlot {
    active: bool,
    on_complete: Option<Completion>,
    layers: Vec<(String, ElementId)>,
}

pub struct PhaseContext<S: Surface> {
    pub surface: S,
    pub scheduler: Scheduler<Action>,
    pub rng: StdRng,
    pub reveal: Box<dyn RevealSource>,
    pub config: ShowConfig,
    pub loads: LayoutLoads<Cue>,
    pub batches: SpawnBatches,
    pub reveals: HashMap<TransitionId, TileReveal>,
    pub tiles: ReactiveGrid,
    pub camera: AsciiCamera,
    pub cursor: CursorDrift,
    next_transition: u32,
    slots: [PhaseSlot; 3],
    requests: Vec<HostRequest>,
    events: Vec<ShowEvent>,
    finished: Vec<PhaseId>,
}

impl<S: Surface> PhaseContext<S> {
    pub fn new(surface: S, config: ShowConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        // Reveal values get their own stream so script randomness does not shift them.
        let reveal = Box::new(SeededReveal::new(config.seed.wrapping_add(0x5eed)));
        PhaseContext {
            surface,
            scheduler: Scheduler::new(),
            rng,
            reveal,
            config,
            loads: LayoutLoads::new(),
            batches: SpawnBatches::default(),
            reveals: HashMap::new(),
            tiles: ReactiveGrid::new(),
            camera: AsciiCamera::new(),
            cursor: CursorDrift::default(),
            next_transition: 0,
            slots: Default::default(),
            requests: Vec::new(),
            events: Vec::new(),
            finished: Vec::new(),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.scheduler.now()
    }

    pub fn is_active(&self, phase: PhaseId) -> bool {
        self.slots[phase.index()].active
    }

    pub fn any_active(&self) -> bool {
        self.slots.iter().any(|s| s.active)
    }

    /// Marks a phase running. Returns false if it already was.
    pub fn activate(&mut self, phase: PhaseId) -> bool {
        let slot = &mut self.slots[phase.index()];
        if slot.active {
            return false;
        }
        slot.active = true;
        true
    }

    /// Returns whether the phase was running.
    pub fn deactivate(&mut self, phase: PhaseId) -> bool {
        std::mem::replace(&mut self.slots[phase.index()].active, false)
    }

    /// Registers the completion for the next run, replacing any previous one.
    pub fn set_completion(&mut self, phase: PhaseId, completion: Completion) {
        self.slots[phase.index()].on_complete = Some(completion);
    }

    pub fn take_completion(&mut self, phase: PhaseId) -> Option<Completion> {
        self.slots[phase.index()].on_complete.take()
    }

    /// Called by a phase when its script is done. Ignored unless the phase is running.
    pub fn finish(&mut self, phase: PhaseId) {
        if self.is_active(phase) && !self.finished.contains(&phase) {
            self.finished.push(phase);
        }
    }

    pub fn take_finished(&mut self) -> Vec<PhaseId> {
        std::mem::take(&mut self.finished)
    }

    /// Full-viewport layer named `name`, owned by `owner`. Reuses the phase's layer of
    /// the same name if it is still attached; otherwise mounts a fresh one.
    pub fn container(&mut self, owner: PhaseId, name: &str, z_index: i32) -> Option<ElementId> {
        let existing = self.slots[owner.index()]
            .layers
            .iter()
            .find(|(n, id)| n == name && self.surface.is_attached(*id))
            .map(|(_, id)| *id);
        if existing.is_some() {
            return existing;
        }
        self.mount_layer(owner, Node::container(name, z_index))
    }

    /// Mounts a root-level node and registers it for the owner's cleanup.
    pub fn mount_layer(&mut self, owner: PhaseId, node: Node) -> Option<ElementId> {
        let name = node.name().unwrap_or_default().to_string();
        match self.surface.mount(None, node) {
            Ok(id) => {
                self.slots[owner.index()].layers.push((name, id));
                Some(id)
            }
            Err(err) => {
                warn!(phase = %owner, layer = %name, error = %err, "layer not mounted");
                None
            }
        }
    }

    /// Layers currently registered for `owner`.
    pub fn layers(&self, owner: PhaseId) -> impl Iterator<Item = (&str, ElementId)> {
        self.slots[owner.index()]
            .layers
            .iter()
            .map(|(n, id)| (n.as_str(), *id))
    }

    /// Starts a grouped layout load; `cue` comes back once every document is in.
    pub fn load(&mut self, owner: PhaseId, requests: Vec<LayoutRequest>, cue: Cue) {
        let requests: Vec<LayoutRequest> = requests
            .into_iter()
            .map(|mut r| {
                r.path = self.config.resolve_path(&r.path);
                r
            })
            .collect();
        for (ticket, path) in self.loads.begin(owner, requests, cue) {
            self.requests.push(HostRequest::FetchLayout { ticket, path });
        }
    }

    pub fn next_transition_id(&mut self) -> TransitionId {
        self.next_transition += 1;
        TransitionId::new(self.next_transition)
    }

    pub fn emit(&mut self, event: ShowEvent) {
        self.events.push(event);
    }

    pub fn request(&mut self, request: HostRequest) {
        self.requests.push(request);
    }

    pub fn take_requests(&mut self) -> Vec<HostRequest> {
        std::mem::take(&mut self.requests)
    }

    pub fn take_events(&mut self) -> Vec<ShowEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drops everything `owner` holds: layers, timers, frame requests, loads, batches,
    /// reveals and armed tiles. Safe to call any number of times. Returns how much was released.
    pub fn release_owned(&mut self, owner: PhaseId) -> usize {
        let layers = std::mem::take(&mut self.slots[owner.index()].layers);
        let mut released = 0;
        for (_, id) in layers {
            if self.surface.remove(id) {
                released += 1;
            }
        }
        released += self.scheduler.cancel_owned(owner);
        released += self.loads.abandon(owner);
        released += self.batches.forget_owned(owner);
        let before = self.reveals.len();
        self.reveals.retain(|_, r| r.owner() != owner);
        released += before - self.reveals.len();
        released += self.tiles.forget_owned(owner);
        released
    }

    /// Runs one non-script action. Script cues are handed back for the phase to handle.
    pub fn perform(&mut self, owner: Option<PhaseId>, action: Action) -> Option<Cue> {
        if let Some(phase) = owner {
            if !self.is_active(phase) {
                debug!(phase = %phase, ?action, "stale action dropped");
                return None;
            }
        }
        match action {
            Action::Script(cue) => return Some(cue),
            Action::SpawnItem { batch, index } => {
                spawner::spawn_item(self, batch, index);
            }
            Action::Glitch(envelope) => effects::glitch_tick(self, owner, envelope),
            Action::Jitter(jitter) => effects::jitter_tick(self, owner, jitter),
            Action::RevealFrame(id) => transition::reveal_frame(self, id),
            Action::Noise(noise) => transition::noise_tick(self, owner, noise),
            Action::CameraFadeIn => camera::fade_in(self),
            Action::CameraFrame => camera::frame_tick(self),
            Action::CursorDrift => cursor::drift_tick(self, owner),
            Action::CursorStep(step) => cursor::step_tick(self, step),
        }
        None
    }

    /// Fires due timers up to `now`, then the frame requests made before this frame.
    /// Script cues are passed to `on_cue` in firing order.
    pub fn advance(&mut self, now: Timestamp, mut on_cue: impl FnMut(&mut Self, Cue)) {
        while let Some(fired) = self.scheduler.pop_due(now) {
            if let Some(cue) = self.perform(fired.owner, fired.action) {
                on_cue(self, cue);
            }
        }
        self.scheduler.advance_to(now);
        for (owner, action) in self.scheduler.take_frames() {
            if let Some(cue) = self.perform(owner, action) {
                on_cue(self, cue);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::surface::SceneSurface;
    use crate::types::Viewport;

    pub fn context() -> PhaseContext<SceneSurface> {
        PhaseContext::new(SceneSurface::new(Viewport::default()), ShowConfig::default())
    }

    /// Runs timers and one frame per 16 ms step until `ms` past the current clock; cues are dropped.
    pub fn run_for(ctx: &mut PhaseContext<SceneSurface>, ms: u64) {
        let end = ctx.now().after_millis(ms);
        let mut t = ctx.now();
        while t < end {
            t = t.after_millis(16).min(end);
            ctx.advance(t, |_, _| {});
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn container_is_reused_while_attached() {
        let mut ctx = context();
        let a = ctx.container(PhaseId::Phase3, "windows", 3666).unwrap();
        let b = ctx.container(PhaseId::Phase3, "windows", 3666).unwrap();
        assert_eq!(a, b);

        ctx.surface.remove(a);
        let c = ctx.container(PhaseId::Phase3, "windows", 3666).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn release_owned_is_idempotent() {
        let mut ctx = context();
        ctx.activate(PhaseId::Phase2);
        let layer = ctx.container(PhaseId::Phase2, "minefield", 2700).unwrap();
        ctx.scheduler
            .after(100, Some(PhaseId::Phase2), Action::CursorDrift);

        assert_eq!(ctx.release_owned(PhaseId::Phase2), 2);
        assert!(!ctx.surface.is_attached(layer));
        assert_eq!(ctx.release_owned(PhaseId::Phase2), 0);
    }

    #[test]
    fn finish_requires_active_phase() {
        let mut ctx = context();
        ctx.finish(PhaseId::Phase1);
        assert!(ctx.take_finished().is_empty());

        ctx.activate(PhaseId::Phase1);
        ctx.finish(PhaseId::Phase1);
        ctx.finish(PhaseId::Phase1);
        assert_eq!(ctx.take_finished(), vec![PhaseId::Phase1]);
    }

    #[test]
    fn completion_is_single_shot() {
        let mut ctx = context();
        ctx.set_completion(PhaseId::Phase1, Completion::Standalone);
        ctx.set_completion(PhaseId::Phase1, Completion::Next(PhaseId::Phase2));
        assert_eq!(
            ctx.take_completion(PhaseId::Phase1),
            Some(Completion::Next(PhaseId::Phase2))
        );
        assert_eq!(ctx.take_completion(PhaseId::Phase1), None);
    }

    #[test]
    fn stale_actions_are_dropped() {
        let mut ctx = context();
        let cue = Cue::One(phase1::Step::Extras);
        assert_eq!(ctx.perform(Some(PhaseId::Phase1), Action::Script(cue)), None);
        ctx.activate(PhaseId::Phase1);
        assert_eq!(
            ctx.perform(Some(PhaseId::Phase1), Action::Script(cue)),
            Some(cue)
        );
    }

    #[test]
    fn loads_resolve_paths_against_root() {
        let mut config = ShowConfig::default();
        config.asset_root = "/chaos".to_string();
        let mut ctx = PhaseContext::new(
            crate::surface::SceneSurface::new(crate::types::Viewport::default()),
            config,
        );
        ctx.load(
            PhaseId::Phase3,
            vec![LayoutRequest::new("dvd spine/Spine.json", "dvd")],
            Cue::Three(phase3::Step::Windows),
        );
        match ctx.take_requests().as_slice() {
            [HostRequest::FetchLayout { path, .. }] => assert_eq!(path, "/chaos/dvd spine/Spine.json"),
            other => panic!("unexpected requests: {:?}", other),
        }
    }
}
