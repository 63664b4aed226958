// Reactive minefield: hover feedback and one-shot reveal per tile.
// Rule: a revealed tile loses its handlers. Nothing checks a "revealed" flag.
// See DESIGN.md: Interactive overlay

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::error::{ShowError, SurfaceError};
use crate::surface::{Style, Surface, TextContent, Transform};
use crate::types::{Color, ElementId, PhaseId, Rect};

/// Digit colours for values 1, 2 and 3.
pub const DIGIT_COLORS: [Color; 3] = [
    Color::from_hex(0x0000ff),
    Color::from_hex(0x008000),
    Color::from_hex(0xff0000),
];
pub const REVEALED_FILL: Color = Color::from_hex(0xd0d0d0);
pub const REVEALED_BORDER: Color = Color::from_hex(0x808080);
const HOVER_SCALE: f64 = 1.1;
const DIGIT_SCALE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Enter,
    Leave,
    Click,
}

impl PointerKind {
    /// Accepts DOM event names (`mouseenter`, `mouseleave`, `click`) and their short forms.
    pub fn parse(name: &str) -> Result<Self, ShowError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "enter" | "mouseenter" | "pointerenter" => Ok(PointerKind::Enter),
            "leave" | "mouseleave" | "pointerleave" => Ok(PointerKind::Leave),
            "click" => Ok(PointerKind::Click),
            _ => Err(ShowError::UnknownPointer(name.to_string())),
        }
    }
}

/// Supplies the value a tile reveals, in `0..=3` (0 renders blank).
pub trait RevealSource {
    fn next_value(&mut self) -> u8;
}

/// Uniform values from a seeded generator.
pub struct SeededReveal(StdRng);

impl SeededReveal {
    pub fn new(seed: u64) -> Self {
        SeededReveal(StdRng::seed_from_u64(seed))
    }
}

impl RevealSource for SeededReveal {
    fn next_value(&mut self) -> u8 {
        self.0.random_range(0..=3)
    }
}

/// Always the same value. Values above 3 are clamped.
pub struct FixedReveal(pub u8);

impl RevealSource for FixedReveal {
    fn next_value(&mut self) -> u8 {
        self.0.min(3)
    }
}

/// What a pointer event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerOutcome {
    /// No handler for this element and event.
    Ignored,
    Hovered,
    Revealed(u8),
}

#[derive(Debug)]
struct ArmedTile {
    owner: PhaseId,
    origin: String,
    rect: Rect,
    handlers: Vec<PointerKind>,
}

/// Tiles that react to pointer input, keyed by element.
#[derive(Debug, Default)]
pub struct ReactiveGrid {
    tiles: HashMap<ElementId, ArmedTile>,
}

impl ReactiveGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the enter, leave and click handlers on a spawned tile.
    pub fn arm<S: Surface>(
        &mut self,
        surface: &mut S,
        owner: PhaseId,
        element: ElementId,
        origin: &str,
        rect: Rect,
    ) {
        if let Err(err) = surface.listen(element) {
            warn!(error = %err, "tile not armed");
            return;
        }
        self.tiles.insert(
            element,
            ArmedTile {
                owner,
                origin: origin.to_string(),
                rect,
                handlers: vec![PointerKind::Enter, PointerKind::Leave, PointerKind::Click],
            },
        );
    }

    /// Runs the handler for `kind` on `element`, if it still has one.
    pub fn handle<S: Surface>(
        &mut self,
        surface: &mut S,
        reveal: &mut dyn RevealSource,
        element: ElementId,
        kind: PointerKind,
    ) -> PointerOutcome {
        let Some(tile) = self.tiles.get_mut(&element) else {
            return PointerOutcome::Ignored;
        };
        if !tile.handlers.contains(&kind) {
            debug!(element = element.as_u32(), ?kind, "no handler");
            return PointerOutcome::Ignored;
        }
        match kind {
            PointerKind::Enter | PointerKind::Leave => {
                let factor = if kind == PointerKind::Enter {
                    HOVER_SCALE
                } else {
                    1.0
                };
                match surface.apply_style(element, Style::transform(Transform::Scale { factor })) {
                    Ok(()) => PointerOutcome::Hovered,
                    Err(err) => {
                        warn!(error = %err, "hover skipped");
                        PointerOutcome::Ignored
                    }
                }
            }
            PointerKind::Click => {
                tile.handlers.clear();
                let rect = tile.rect;
                match reveal_tile(surface, reveal, element, rect) {
                    Ok(value) => PointerOutcome::Revealed(value),
                    Err(err) => {
                        warn!(error = %err, "reveal skipped");
                        PointerOutcome::Ignored
                    }
                }
            }
        }
    }

    /// Armed tiles spawned from layouts tagged `origin`, in spawn order.
    pub fn ids_with_origin(&self, origin: &str) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self
            .tiles
            .iter()
            .filter(|(_, t)| t.origin == origin)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn has_handlers(&self, element: ElementId) -> bool {
        self.tiles
            .get(&element)
            .is_some_and(|t| !t.handlers.is_empty())
    }

    pub fn forget(&mut self, element: ElementId) {
        self.tiles.remove(&element);
    }

    pub fn forget_owned(&mut self, owner: PhaseId) -> usize {
        let before = self.tiles.len();
        self.tiles.retain(|_, t| t.owner != owner);
        before - self.tiles.len()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

fn reveal_tile<S: Surface>(
    surface: &mut S,
    reveal: &mut dyn RevealSource,
    element: ElementId,
    rect: Rect,
) -> Result<u8, SurfaceError> {
    surface.unlisten(element)?;
    surface.apply_style(
        element,
        Style {
            transform: Some(Transform::Identity),
            fill: Some(REVEALED_FILL),
            border: Some(REVEALED_BORDER),
            image_visible: Some(false),
            interactive: Some(false),
            ..Default::default()
        },
    )?;
    let value = reveal.next_value();
    let content = match value {
        1..=3 => TextContent::Digit {
            value,
            color: DIGIT_COLORS[usize::from(value - 1)],
            font_px: rect.width.min(rect.height) * DIGIT_SCALE,
        },
        _ => TextContent::Plain {
            text: String::new(),
        },
    };
    surface.set_text(element, content)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Node, SceneSurface};
    use crate::types::Viewport;

    fn armed_tile(grid: &mut ReactiveGrid, surface: &mut SceneSurface) -> ElementId {
        let layer = surface.mount(None, Node::container("minefield", 2700)).unwrap();
        let rect = Rect::new(10.0, 10.0, 40.0, 30.0);
        let tile = surface
            .mount(
                Some(layer),
                Node::Tile {
                    src: "mine spine 2/mine.png".to_string(),
                    rect,
                },
            )
            .unwrap();
        grid.arm(surface, PhaseId::Phase2, tile, "other-mine", rect);
        tile
    }

    #[test]
    fn pointer_names_parse() {
        assert_eq!(PointerKind::parse("mouseenter").unwrap(), PointerKind::Enter);
        assert_eq!(PointerKind::parse("Click").unwrap(), PointerKind::Click);
        assert!(PointerKind::parse("dblclick").is_err());
    }

    #[test]
    fn hover_toggles_scale() {
        let mut surface = SceneSurface::new(Viewport::default());
        let mut grid = ReactiveGrid::new();
        let tile = armed_tile(&mut grid, &mut surface);
        let mut reveal = FixedReveal(1);

        assert_eq!(
            grid.handle(&mut surface, &mut reveal, tile, PointerKind::Enter),
            PointerOutcome::Hovered
        );
        assert_eq!(
            surface.style_of(tile).unwrap().transform,
            Some(Transform::Scale { factor: 1.1 })
        );
        grid.handle(&mut surface, &mut reveal, tile, PointerKind::Leave);
        assert_eq!(
            surface.style_of(tile).unwrap().transform,
            Some(Transform::Scale { factor: 1.0 })
        );
    }

    #[test]
    fn second_click_changes_nothing() {
        let mut surface = SceneSurface::new(Viewport::default());
        let mut grid = ReactiveGrid::new();
        let tile = armed_tile(&mut grid, &mut surface);
        let mut reveal = FixedReveal(2);

        assert_eq!(
            grid.handle(&mut surface, &mut reveal, tile, PointerKind::Click),
            PointerOutcome::Revealed(2)
        );
        assert_eq!(
            surface.text_of(tile),
            Some(&TextContent::Digit {
                value: 2,
                color: Color::from_hex(0x008000),
                font_px: 24.0,
            })
        );
        let style = surface.style_of(tile).unwrap();
        assert_eq!(style.fill, Some(REVEALED_FILL));
        assert_eq!(style.image_visible, Some(false));
        assert!(!surface.is_listening(tile));
        assert!(!grid.has_handlers(tile));

        let mutations = surface.mutation_count();
        for kind in [PointerKind::Click, PointerKind::Enter, PointerKind::Leave] {
            assert_eq!(
                grid.handle(&mut surface, &mut reveal, tile, kind),
                PointerOutcome::Ignored
            );
        }
        assert_eq!(surface.mutation_count(), mutations);
    }

    #[test]
    fn one_reveals_blue_and_zero_blank() {
        let mut surface = SceneSurface::new(Viewport::default());
        let mut grid = ReactiveGrid::new();
        let blue = armed_tile(&mut grid, &mut surface);
        let blank = armed_tile(&mut grid, &mut surface);

        grid.handle(&mut surface, &mut FixedReveal(1), blue, PointerKind::Click);
        assert!(matches!(
            surface.text_of(blue),
            Some(TextContent::Digit { color, .. }) if *color == Color::from_hex(0x0000ff)
        ));

        assert_eq!(
            grid.handle(&mut surface, &mut FixedReveal(0), blank, PointerKind::Click),
            PointerOutcome::Revealed(0)
        );
        assert_eq!(surface.text_of(blank).map(|t| t.line_count()), Some(0));
    }

    #[test]
    fn seeded_values_stay_in_range() {
        let mut reveal = SeededReveal::new(9);
        let mut seen = [false; 4];
        for _ in 0..200 {
            let v = reveal.next_value();
            assert!(v <= 3);
            seen[usize::from(v)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn forget_owned_drops_tiles() {
        let mut surface = SceneSurface::new(Viewport::default());
        let mut grid = ReactiveGrid::new();
        armed_tile(&mut grid, &mut surface);
        assert_eq!(grid.ids_with_origin("other-mine").len(), 1);
        assert_eq!(grid.forget_owned(PhaseId::Phase2), 1);
        assert!(grid.is_empty());
    }
}
