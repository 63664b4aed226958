// Phase2: black screen, glyph camera, justice icons, a reactive minefield, then red.
// Rule: the dagger swap runs until both queues are empty; only then is red scheduled.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use tracing::{debug, info};

use super::{after, Phase};
use crate::camera;
use crate::context::{Cue, PhaseContext};
use crate::effects::GlitchProfile;
use crate::layout::{LayoutRequest, LoadedLayouts};
use crate::scheduler::Timeline;
use crate::spawner::{self, arrange, PostSpawn, SpawnKind, SpawnOrder, SpawnSpec};
use crate::surface::Surface;
use crate::transition::{self, RED_SCREEN};
use crate::types::{Color, ElementId, PhaseId, PlacementRecord};

const JUSTICE_PATH: &str = "justice spine/Spine.json";
const MINE_PATH: &str = "mine spine 2/Spine.json";
const OTHER_MINE_PATH: &str = "other mine/Spine.json";
const DRAWING_PATH: &str = "drawing spine/Spine.json";
const DAGGERS_PATH: &str = "daggers spine 2/Spine.json";

/// Origin tag of the mines the daggers replace.
pub const OTHER_MINE: &str = "other-mine";

const JUSTICE_STAGGER_MS: u64 = 150;
const MINEFIELD_DELAY_MS: u64 = 100;
const MINE_STAGGER_MS: u64 = 20;
const SWAP_INTERVAL_MS: u64 = 10;
const MINES_PER_SWAP: usize = 6;
const DAGGERS_PER_SWAP: usize = 3;
const RED_DELAY_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Camera,
    Justice,
    Minefield,
    Drawing,
    Swap,
    RedReveal,
    RedSettled,
}

#[derive(Debug)]
struct DaggerSwap {
    container: ElementId,
    mines: VecDeque<ElementId>,
    daggers: VecDeque<PlacementRecord>,
}

#[derive(Debug, Default)]
pub struct BlackToRed {
    swap: Option<DaggerSwap>,
}

impl Phase for BlackToRed {
    type Step = Step;

    const ID: PhaseId = PhaseId::Phase2;

    fn cue(step: Step) -> Cue {
        Cue::Two(step)
    }

    fn script() -> Timeline<Step> {
        Timeline::new()
            .at(0, Step::Camera)
            .at(1000, Step::Justice)
    }

    fn entry_backdrop() -> Option<Color> {
        Some(Color::BLACK)
    }

    fn on_step<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, step: Step) {
        match step {
            Step::Camera => camera::start(ctx, Self::ID),
            Step::Justice => ctx.load(
                Self::ID,
                vec![LayoutRequest::new(JUSTICE_PATH, "justice")],
                Cue::Two(step),
            ),
            Step::Minefield => ctx.load(
                Self::ID,
                vec![
                    LayoutRequest::new(MINE_PATH, "mine-spine-2"),
                    LayoutRequest::new(OTHER_MINE_PATH, OTHER_MINE),
                ],
                Cue::Two(step),
            ),
            Step::Drawing => ctx.load(
                Self::ID,
                vec![
                    LayoutRequest::new(DRAWING_PATH, "drawing"),
                    LayoutRequest::new(DAGGERS_PATH, "daggers"),
                ],
                Cue::Two(step),
            ),
            Step::Swap => self.swap_tick(ctx),
            Step::RedReveal => {
                transition::tile_reveal(ctx, Self::ID, &RED_SCREEN, Some(Cue::Two(Step::RedSettled)));
            }
            Step::RedSettled => ctx.finish(Self::ID),
        }
    }

    fn on_layouts<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, step: Step, layouts: LoadedLayouts) {
        match step {
            Step::Justice => {
                let mut records = layouts.into_concat();
                arrange(&mut records, SpawnOrder::DescendingY, &mut ctx.rng);
                if let Some(container) = ctx.container(Self::ID, "justice-spine-container", 2600) {
                    let spec = SpawnSpec::new(container, JUSTICE_STAGGER_MS)
                        .post(PostSpawn::Glitch(GlitchProfile::JUSTICE));
                    spawner::spawn_sequence(ctx, Self::ID, records, spec);
                }
                // The minefield follows whether or not justice loaded.
                after::<Self, S>(ctx, MINEFIELD_DELAY_MS, Step::Minefield);
            }
            Step::Minefield => {
                let mut records = layouts.into_concat();
                arrange(&mut records, SpawnOrder::Shuffled, &mut ctx.rng);
                let mut duration = 0;
                if let Some(container) = ctx.container(Self::ID, "minefield-container", 2700) {
                    let spec = SpawnSpec::new(container, MINE_STAGGER_MS).kind(SpawnKind::Tile);
                    duration = spawner::spawn_sequence(ctx, Self::ID, records, spec);
                }
                info!(phase = %Self::ID, duration_ms = duration, "minefield spawning");
                after::<Self, S>(ctx, duration, Step::Drawing);
            }
            Step::Drawing => {
                if let Some(first) = layouts.records(0).first().cloned() {
                    if let Some(container) = ctx.container(Self::ID, "drawing-container", 2650) {
                        spawner::spawn_sequence(ctx, Self::ID, vec![first], SpawnSpec::new(container, 0));
                    }
                }
                let mut daggers = layouts.records(1).to_vec();
                daggers.shuffle(&mut ctx.rng);
                let mut mines: Vec<ElementId> = ctx
                    .tiles
                    .ids_with_origin(OTHER_MINE)
                    .into_iter()
                    .filter(|id| ctx.surface.is_attached(*id))
                    .collect();
                mines.shuffle(&mut ctx.rng);
                let Some(container) = ctx.container(Self::ID, "daggers-container", 2800) else {
                    after::<Self, S>(ctx, RED_DELAY_MS, Step::RedReveal);
                    return;
                };
                debug!(mines = mines.len(), daggers = daggers.len(), "dagger swap armed");
                self.swap = Some(DaggerSwap {
                    container,
                    mines: mines.into(),
                    daggers: daggers.into(),
                });
                after::<Self, S>(ctx, SWAP_INTERVAL_MS, Step::Swap);
            }
            _ => {}
        }
    }

    fn teardown<S: Surface>(&mut self, ctx: &mut PhaseContext<S>) {
        self.swap = None;
        camera::stop(ctx);
    }
}

impl BlackToRed {
    /// Removes a handful of mines and drops in a few daggers; re-arms until both run out.
    fn swap_tick<S: Surface>(&mut self, ctx: &mut PhaseContext<S>) {
        let Some(swap) = self.swap.as_mut() else {
            return;
        };
        if swap.mines.is_empty() && swap.daggers.is_empty() {
            self.swap = None;
            info!(phase = %Self::ID, "daggers in place");
            after::<Self, S>(ctx, RED_DELAY_MS, Step::RedReveal);
            return;
        }
        let take = MINES_PER_SWAP.min(swap.mines.len());
        for mine in swap.mines.drain(..take) {
            ctx.surface.remove(mine);
            ctx.tiles.forget(mine);
        }
        let take = DAGGERS_PER_SWAP.min(swap.daggers.len());
        let batch: Vec<PlacementRecord> = swap.daggers.drain(..take).collect();
        let container = swap.container;
        spawner::spawn_sequence(ctx, Self::ID, batch, SpawnSpec::new(container, 0));
        after::<Self, S>(ctx, SWAP_INTERVAL_MS, Step::Swap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::phases::testing::drive;
    use crate::phases::{start, Phases};
    use crate::surface::SceneSurface;

    fn layout(prefix: &str, count: usize) -> String {
        let attachments: Vec<String> = (0..count)
            .map(|i| {
                format!(
                    r#""{p}{i}": {{"{p}{i}": {{"x": {x}, "y": {y}, "width": 40, "height": 40}}}}"#,
                    p = prefix,
                    i = i,
                    x = 50 + i * 30,
                    y = 100 + i * 20
                )
            })
            .collect();
        let slots: Vec<String> = (0..count)
            .map(|i| format!(r#"{{"attachment": "{}{}"}}"#, prefix, i))
            .collect();
        format!(
            r#"{{"skins": {{"default": {{{}}}}}, "slots": [{}]}}"#,
            attachments.join(","),
            slots.join(",")
        )
    }

    fn answer(path: &str) -> Result<String, String> {
        match path {
            JUSTICE_PATH => Ok(layout("justice", 4)),
            MINE_PATH => Ok(layout("mine", 5)),
            OTHER_MINE_PATH => Ok(layout("other", 10)),
            DRAWING_PATH => Ok(layout("drawing", 2)),
            DAGGERS_PATH => Ok(layout("dagger", 7)),
            _ => Err("404".to_string()),
        }
    }

    fn children_of(ctx: &PhaseContext<SceneSurface>, name: &str) -> usize {
        ctx.surface
            .find(name)
            .map_or(0, |id| ctx.surface.children(id).len())
    }

    #[test]
    fn daggers_replace_other_mines() {
        let mut ctx = context();
        let mut phases = Phases::default();
        start::<BlackToRed, _>(&mut ctx);
        drive(&mut ctx, &mut phases, 3000, answer);

        assert_eq!(children_of(&ctx, "justice-spine-container"), 4);
        assert_eq!(children_of(&ctx, "drawing-container"), 1);
        assert_eq!(children_of(&ctx, "daggers-container"), 7);
        assert_eq!(children_of(&ctx, "minefield-container"), 5);
        assert!(ctx.tiles.ids_with_origin(OTHER_MINE).is_empty());
        assert_eq!(ctx.tiles.ids_with_origin("mine-spine-2").len(), 5);
    }

    #[test]
    fn justice_descends_from_the_top() {
        let mut ctx = context();
        let mut phases = Phases::default();
        start::<BlackToRed, _>(&mut ctx);
        drive(&mut ctx, &mut phases, 1100, answer);

        let container = ctx.surface.find("justice-spine-container").unwrap();
        let first = ctx.surface.children(container)[0];
        // Highest y (160) spawns first: top = 768 - 160 - 20.
        assert_eq!(ctx.surface.node(first).unwrap().rect().unwrap().top, 588.0);
    }

    #[test]
    fn ends_on_red() {
        let mut ctx = context();
        let mut phases = Phases::default();
        start::<BlackToRed, _>(&mut ctx);
        drive(&mut ctx, &mut phases, 10_000, answer);

        assert_eq!(ctx.take_finished(), vec![PhaseId::Phase2]);
        assert_eq!(ctx.surface.backdrop(), Some(RED_SCREEN.target));
    }

    #[test]
    fn failed_loads_still_reach_red() {
        let mut ctx = context();
        let mut phases = Phases::default();
        start::<BlackToRed, _>(&mut ctx);
        drive(&mut ctx, &mut phases, 10_000, |_| Err("offline".to_string()));

        assert_eq!(ctx.take_finished(), vec![PhaseId::Phase2]);
    }

    #[test]
    fn cleanup_releases_camera() {
        let mut ctx = context();
        let mut phases = Phases::default();
        start::<BlackToRed, _>(&mut ctx);
        drive(&mut ctx, &mut phases, 50, answer);
        camera::granted(&mut ctx);

        phases.cleanup(&mut ctx, PhaseId::Phase2);
        assert_eq!(ctx.camera.state(), camera::CaptureState::Released);
        assert!(ctx
            .take_requests()
            .contains(&crate::types::HostRequest::ReleaseCamera));
        assert_eq!(ctx.scheduler.pending_frames(), 0);
    }
}
