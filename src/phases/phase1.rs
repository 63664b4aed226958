// Phase1: desktop dissolves into a glitchy blue screen, extras icons pile up, then black.
// Rule: the black reveal is timed from the extras spawn, loaded or not.

use tracing::info;

use super::{after, Phase};
use crate::context::{Cue, PhaseContext};
use crate::cursor;
use crate::effects::GlitchProfile;
use crate::layout::{AssetNaming, LayoutRequest, LoadedLayouts, ParseMode};
use crate::scheduler::Timeline;
use crate::spawner::{self, Placement, PostSpawn, SpawnSpec};
use crate::surface::Surface;
use crate::transition::{self, BLACK_VOID, BLUE_SCREEN};
use crate::types::PhaseId;

const EXTRAS_PATH: &str = "extras spine/Spine.json";
const EXTRAS_Z: i32 = 1900;
const EXTRAS_STAGGER_MS: u64 = 90;
const BLACK_AFTER_EXTRAS_MS: u64 = 10_000;
const HOLD_BLACK_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    BlueReveal,
    Extras,
    BlackReveal,
    BlackSettled,
    Finish,
}

#[derive(Debug, Default)]
pub struct BlueToBlack;

impl Phase for BlueToBlack {
    type Step = Step;

    const ID: PhaseId = PhaseId::Phase1;

    fn cue(step: Step) -> Cue {
        Cue::One(step)
    }

    fn script() -> Timeline<Step> {
        Timeline::new()
            .at(0, Step::BlueReveal)
            .at(2500, Step::Extras)
    }

    fn on_step<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, step: Step) {
        match step {
            Step::BlueReveal => {
                transition::tile_reveal(ctx, Self::ID, &BLUE_SCREEN, None);
                cursor::start_drift(ctx, Self::ID);
            }
            Step::Extras => {
                let request = LayoutRequest::new(EXTRAS_PATH, "extras")
                    .mode(ParseMode::Tolerant)
                    .naming(AssetNaming::TrimSuffix('_'));
                ctx.load(Self::ID, vec![request], Cue::One(Step::Extras));
            }
            Step::BlackReveal => {
                transition::tile_reveal(
                    ctx,
                    Self::ID,
                    &BLACK_VOID,
                    Some(Cue::One(Step::BlackSettled)),
                );
            }
            Step::BlackSettled => after::<Self, S>(ctx, HOLD_BLACK_MS, Step::Finish),
            Step::Finish => ctx.finish(Self::ID),
        }
    }

    fn on_layouts<S: Surface>(&mut self, ctx: &mut PhaseContext<S>, step: Step, layouts: LoadedLayouts) {
        if step != Step::Extras {
            return;
        }
        let records = layouts.into_concat();
        info!(phase = %Self::ID, icons = records.len(), "extras loaded");
        if let Some(container) = ctx.container(Self::ID, "extras-spine-container", EXTRAS_Z) {
            let spec = SpawnSpec::new(container, EXTRAS_STAGGER_MS)
                .placement(Placement::corner())
                .post(PostSpawn::Glitch(GlitchProfile::EXTRAS));
            spawner::spawn_sequence(ctx, Self::ID, records, spec);
        }
        after::<Self, S>(ctx, BLACK_AFTER_EXTRAS_MS, Step::BlackReveal);
    }

    fn teardown<S: Surface>(&mut self, ctx: &mut PhaseContext<S>) {
        cursor::stop_drift(ctx);
    }
}
