// Phase3: on the red screen, windows, weapons and words stack up until "the end" and black.
// Layouts live on a larger canvas: every placement is shifted by (-1730, -60) in layout space.

use tracing::info;

use super::{after, Phase};
use crate::context::{Cue, PhaseContext};
use crate::layout::{LayoutRequest, LoadedLayouts};
use crate::scheduler::Timeline;
use crate::spawner::{self, arrange, Placement, PostSpawn, SpawnOrder, SpawnSpec};
use crate::surface::{BlendMode, Node, Surface};
use crate::types::{Color, PhaseId, PlacementRecord};

const CANVAS_SHIFT: (f64, f64) = (-1730.0, -60.0);
const PLACEMENT: Placement = Placement::centered().shifted(CANVAS_SHIFT.0, CANVAS_SHIFT.1);

const ECHO_SHIFT: (f64, f64) = (60.0, 0.0);
const QUESTION_ECHO_SHIFT: (f64, f64) = (50.0, 50.0);
const QUESTION_ECHO_DELAY_MS: u64 = 800;
const BLEND_COPIES: usize = 6;
const BLACKOUT_DELAY_MS: u64 = 4000;

/// A spawn stage: where its layout lives, how it is ordered and paced, and its layer.
struct Stage {
    path: &'static str,
    origin: &'static str,
    container: &'static str,
    z_index: i32,
    order: SpawnOrder,
    stagger_ms: u64,
}

static WINDOWS: Stage = Stage {
    path: "windows spine/Spine.json",
    origin: "windows",
    container: "windows-container",
    z_index: 3666,
    order: SpawnOrder::DescendingY,
    stagger_ms: 200,
};
static WEAPONS: Stage = Stage {
    path: "weapons spine/Spine.json",
    origin: "weapons",
    container: "weapons-container",
    z_index: 3700,
    order: SpawnOrder::Shuffled,
    stagger_ms: 150,
};
static LAST_WORDS: Stage = Stage {
    path: "last words spine/Spine.json",
    origin: "last-words",
    container: "last-words-container",
    z_index: 3800,
    order: SpawnOrder::DescendingY,
    stagger_ms: 300,
};
static BLEND_IMAGE: Stage = Stage {
    path: "image - color blending spine/Spine.json",
    origin: "blending-image",
    container: "blending-image-container",
    z_index: 3699,
    order: SpawnOrder::AsGiven,
    stagger_ms: 150,
};
static GLITCHY_ICONS: Stage = Stage {
    path: "last mine spine/Spine.json",
    origin: "last-mine",
    container: "glitchy-icons-container",
    z_index: 3500,
    order: SpawnOrder::Shuffled,
    stagger_ms: 100,
};
const DVD_PATH: &str = "dvd spine/Spine.json";
static QUESTIONS: Stage = Stage {
    path: "question spine/Spine.json",
    origin: "question",
    container: "question-container",
    z_index: 3100,
    order: SpawnOrder::AsGiven,
    stagger_ms: 200,
};
static CHECKERBOARD: Stage = Stage {
    path: "checkerbord spine/Spine.json",
    origin: "checkerboard",
    container: "checkerboard-container",
    z_index: 3650,
    order: SpawnOrder::AsGiven,
    stagger_ms: 100,
};
static THE_END: Stage = Stage {
    path: "spine the end/Spine.json",
    origin: "spine the end",
    container: "the-end-container",
    z_index: 4000,
    order: SpawnOrder::Shuffled,
    stagger_ms: 150,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Windows,
    Weapons,
    LastWords,
    EchoWave,
    BlendImage,
    GlitchyIcons,
    Questions,
    QuestionEcho,
    Checkerboard,
    TheEnd,
    Blackout,
}

#[derive(Debug, Default)]
pub struct RedToEnd {
    last_words: Vec<PlacementRecord>,
    questions: Vec<PlacementRecord>,
}

impl Phase for RedToEnd {
    type Step = Step;

    const ID: PhaseId = PhaseId::Phase3;

    fn cue(step: Step) -> Cue {
        Cue::Three(step)
    }

    fn script() -> Timeline<Step> {
        Timeline::new().at(2000, Step::Windows)
    }

    fn entry_backdrop() -> Option<Color> {
        Some(Color::from_hex(0x400000))
    }

    fn on_step<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, step: Step) {
        let stage = match step {
            Step::Windows => &WINDOWS,
            Step::Weapons => &WEAPONS,
            Step::LastWords => &LAST_WORDS,
            Step::BlendImage => &BLEND_IMAGE,
            Step::Questions => &QUESTIONS,
            Step::Checkerboard => &CHECKERBOARD,
            Step::TheEnd => &THE_END,
            Step::GlitchyIcons => {
                let requests = vec![
                    LayoutRequest::new(GLITCHY_ICONS.path, GLITCHY_ICONS.origin),
                    LayoutRequest::new(DVD_PATH, "dvd"),
                ];
                ctx.load(Self::ID, requests, Cue::Three(step));
                return;
            }
            Step::EchoWave => {
                let records = self.last_words.clone();
                spawn_stage(ctx, &LAST_WORDS, records, PLACEMENT.shifted(ECHO_SHIFT.0, ECHO_SHIFT.1));
                return;
            }
            Step::QuestionEcho => {
                let records = self.questions.clone();
                let placement = PLACEMENT.shifted(QUESTION_ECHO_SHIFT.0, QUESTION_ECHO_SHIFT.1);
                spawn_stage(ctx, &QUESTIONS, records, placement);
                return;
            }
            Step::Blackout => {
                ctx.surface.set_backdrop(Some(Color::BLACK));
                ctx.mount_layer(
                    Self::ID,
                    Node::Fill {
                        name: "black-screen-overlay".to_string(),
                        z_index: 4100,
                        color: Color::BLACK,
                    },
                );
                info!(phase = %Self::ID, "screen black");
                ctx.finish(Self::ID);
                return;
            }
        };
        ctx.load(
            Self::ID,
            vec![LayoutRequest::new(stage.path, stage.origin)],
            Cue::Three(step),
        );
    }

    fn on_layouts<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, step: Step, layouts: LoadedLayouts) {
        let mut records = layouts.into_concat();
        match step {
            Step::Windows => {
                arrange(&mut records, WINDOWS.order, &mut ctx.rng);
                let duration = spawn_stage(ctx, &WINDOWS, records, PLACEMENT);
                after::<Self, S>(ctx, 2000, Step::Weapons);
                after::<Self, S>(ctx, duration, Step::LastWords);
            }
            Step::Weapons => {
                arrange(&mut records, WEAPONS.order, &mut ctx.rng);
                spawn_stage(ctx, &WEAPONS, records, PLACEMENT);
            }
            Step::LastWords => {
                arrange(&mut records, LAST_WORDS.order, &mut ctx.rng);
                self.last_words = records.clone();
                let duration = spawn_stage(ctx, &LAST_WORDS, records, PLACEMENT);
                after::<Self, S>(ctx, 2000, Step::EchoWave);
                after::<Self, S>(ctx, 2000, Step::BlendImage);
                after::<Self, S>(ctx, 3000, Step::GlitchyIcons);
                after::<Self, S>(ctx, duration, Step::Questions);
            }
            Step::BlendImage => {
                let Some(image) = records.first().cloned() else {
                    return;
                };
                if let Some(container) = ctx.container(Self::ID, BLEND_IMAGE.container, BLEND_IMAGE.z_index) {
                    let spec = SpawnSpec::new(container, BLEND_IMAGE.stagger_ms)
                        .placement(PLACEMENT)
                        .fan(200.0, 360.0)
                        .post(PostSpawn::Blend {
                            opacity: 0.9,
                            mode: BlendMode::Color,
                        });
                    spawner::spawn_sequence(ctx, Self::ID, vec![image; BLEND_COPIES], spec);
                }
            }
            Step::GlitchyIcons => {
                arrange(&mut records, GLITCHY_ICONS.order, &mut ctx.rng);
                if let Some(container) = ctx.container(Self::ID, GLITCHY_ICONS.container, GLITCHY_ICONS.z_index) {
                    let spec = SpawnSpec::new(container, GLITCHY_ICONS.stagger_ms)
                        .placement(PLACEMENT)
                        .post(PostSpawn::Stutter);
                    spawner::spawn_sequence(ctx, Self::ID, records, spec);
                }
            }
            Step::Questions => {
                self.questions = records.clone();
                let duration = spawn_stage(ctx, &QUESTIONS, records, PLACEMENT);
                after::<Self, S>(ctx, QUESTION_ECHO_DELAY_MS, Step::QuestionEcho);
                after::<Self, S>(ctx, duration + QUESTION_ECHO_DELAY_MS, Step::Checkerboard);
            }
            Step::Checkerboard => {
                let duration = spawn_stage(ctx, &CHECKERBOARD, records, PLACEMENT);
                after::<Self, S>(ctx, duration, Step::TheEnd);
            }
            Step::TheEnd => {
                arrange(&mut records, THE_END.order, &mut ctx.rng);
                // Cancels the canvas shift: these sit at their layout coordinates.
                let placement = PLACEMENT.shifted(-CANVAS_SHIFT.0, -CANVAS_SHIFT.1);
                let duration = spawn_stage(ctx, &THE_END, records, placement);
                after::<Self, S>(ctx, duration + BLACKOUT_DELAY_MS, Step::Blackout);
            }
            Step::EchoWave | Step::QuestionEcho | Step::Blackout => {}
        }
    }

    fn teardown<S: Surface>(&mut self, _ctx: &mut PhaseContext<S>) {
        self.last_words.clear();
        self.questions.clear();
    }
}

/// Spawns `records` into the stage's layer and returns the batch duration.
fn spawn_stage<S: Surface>(
    ctx: &mut PhaseContext<S>,
    stage: &Stage,
    records: Vec<PlacementRecord>,
    placement: Placement,
) -> u64 {
    let count = records.len() as u64;
    match ctx.container(RedToEnd::ID, stage.container, stage.z_index) {
        Some(container) => {
            let spec = SpawnSpec::new(container, stage.stagger_ms).placement(placement);
            spawner::spawn_sequence(ctx, RedToEnd::ID, records, spec)
        }
        None => count * stage.stagger_ms,
    }
}
