// Rendering surface: the only way the core touches pixels.
// The host replays the command journal; the core never holds host objects.
// See DESIGN.md: Rendering surface

use std::collections::HashMap;

use serde::Serialize;

use crate::error::SurfaceError;
use crate::types::{Color, ElementId, Rect, Viewport};

/// Something that can be mounted on the surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum Node {
    /// Full-viewport layer that holds spawned items.
    Container { name: String, z_index: i32 },
    /// Full-viewport paint target for transition cells.
    Canvas {
        name: String,
        z_index: i32,
        width: u32,
        height: u32,
    },
    /// Positioned image (rect is already anchored, screen-space).
    Image { src: String, rect: Rect },
    /// Positioned image that accepts pointer input.
    Tile { src: String, rect: Rect },
    /// Pre-formatted monospace text.
    TextBlock {
        name: String,
        z_index: i32,
        font_px: f64,
    },
    /// Full-viewport flat colour.
    Fill {
        name: String,
        z_index: i32,
        color: Color,
    },
}

impl Node {
    pub fn container(name: &str, z_index: i32) -> Self {
        Node::Container {
            name: name.to_string(),
            z_index,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Node::Container { name, .. }
            | Node::Canvas { name, .. }
            | Node::TextBlock { name, .. }
            | Node::Fill { name, .. } => Some(name),
            Node::Image { .. } | Node::Tile { .. } => None,
        }
    }

    /// Screen rect of positioned nodes.
    pub fn rect(&self) -> Option<Rect> {
        match self {
            Node::Image { rect, .. } | Node::Tile { rect, .. } => Some(*rect),
            _ => None,
        }
    }
}

/// Element transform. Offsets are CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "fn")]
pub enum Transform {
    Identity,
    Shift { dx: f64, dy: f64 },
    SkewX { dx: f64, deg: f64 },
    StretchX { dy: f64, scale: f64 },
    StretchY { dx: f64, scale: f64 },
    Scale { factor: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Filter {
    None,
    InvertHue,
    Contrast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlendMode {
    Normal,
    Color,
}

/// Partial style update. Unset fields are left as they are.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Style {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blend: Option<BlendMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_visible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
}

impl Style {
    pub fn transform(transform: Transform) -> Self {
        Style {
            transform: Some(transform),
            ..Default::default()
        }
    }

    pub fn opacity(opacity: f64) -> Self {
        Style {
            opacity: Some(opacity),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Style::default()
    }

    /// Overlay `update` on top of `self`.
    pub fn merge(&mut self, update: &Style) {
        self.transform = update.transform.or(self.transform);
        self.opacity = update.opacity.or(self.opacity);
        self.filter = update.filter.or(self.filter);
        self.blend = update.blend.or(self.blend);
        self.fill = update.fill.or(self.fill);
        self.border = update.border.or(self.border);
        self.image_visible = update.image_visible.or(self.image_visible);
        self.interactive = update.interactive.or(self.interactive);
    }
}

/// A grid of glyphs, one string per row, with a colour per glyph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlyphGrid {
    pub lines: Vec<String>,
    pub colors: Vec<Vec<Color>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum TextContent {
    Plain { text: String },
    Digit { value: u8, color: Color, font_px: f64 },
    Glyphs(GlyphGrid),
}

impl TextContent {
    pub fn line_count(&self) -> usize {
        match self {
            TextContent::Plain { text } => text.lines().count(),
            TextContent::Digit { .. } => 1,
            TextContent::Glyphs(grid) => grid.lines.len(),
        }
    }
}

/// Journal entry replayed by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op")]
pub enum SurfaceCommand {
    Mount {
        id: ElementId,
        parent: Option<ElementId>,
        node: Node,
    },
    Remove { id: ElementId },
    Style { id: ElementId, style: Style },
    FillRect { id: ElementId, rect: Rect, color: Color },
    SetText { id: ElementId, content: TextContent },
    Listen { id: ElementId },
    Unlisten { id: ElementId },
    Backdrop { color: Option<Color> },
    PointerMove { x: f64, y: f64 },
}

/// Opaque rendering surface. Implemented by the host-facing journal and by test doubles.
pub trait Surface {
    fn viewport(&self) -> Viewport;

    /// Mounts `node` under `parent` (or at the root). Fails if the parent is gone.
    fn mount(&mut self, parent: Option<ElementId>, node: Node) -> Result<ElementId, SurfaceError>;

    /// Removes an element and its subtree. Returns false if it was not attached.
    fn remove(&mut self, id: ElementId) -> bool;

    fn is_attached(&self, id: ElementId) -> bool;

    fn apply_style(&mut self, id: ElementId, style: Style) -> Result<(), SurfaceError>;

    /// Paints one rectangle onto a canvas.
    fn fill_rect(&mut self, id: ElementId, rect: Rect, color: Color) -> Result<(), SurfaceError>;

    fn set_text(&mut self, id: ElementId, content: TextContent) -> Result<(), SurfaceError>;

    /// Asks the host to forward pointer events of `id`.
    fn listen(&mut self, id: ElementId) -> Result<(), SurfaceError>;

    fn unlisten(&mut self, id: ElementId) -> Result<(), SurfaceError>;

    fn set_backdrop(&mut self, color: Option<Color>);

    fn backdrop(&self) -> Option<Color>;

    fn move_pointer(&mut self, x: f64, y: f64);
}

#[derive(Debug, Clone)]
struct SceneNode {
    node: Node,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    style: Style,
    text: Option<TextContent>,
    listening: bool,
    paints: usize,
}

/// Retained scene tree that journals every mutation for the host.
#[derive(Debug)]
pub struct SceneSurface {
    viewport: Viewport,
    next_id: u32,
    nodes: HashMap<ElementId, SceneNode>,
    roots: Vec<ElementId>,
    backdrop: Option<Color>,
    pointer: (f64, f64),
    journal: Vec<SurfaceCommand>,
    mutations: u64,
}

impl SceneSurface {
    pub fn new(viewport: Viewport) -> Self {
        SceneSurface {
            viewport,
            next_id: 0,
            nodes: HashMap::new(),
            roots: Vec::new(),
            backdrop: None,
            pointer: (0.0, 0.0),
            journal: Vec::new(),
            mutations: 0,
        }
    }

    /// Resizing only affects layouts computed afterwards.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Drains the journal accumulated since the last call.
    pub fn take_commands(&mut self) -> Vec<SurfaceCommand> {
        std::mem::take(&mut self.journal)
    }

    /// Number of journaled mutations since creation, pointer moves included.
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    pub fn node(&self, id: ElementId) -> Option<&Node> {
        self.nodes.get(&id).map(|n| &n.node)
    }

    /// Accumulated style of an element.
    pub fn style_of(&self, id: ElementId) -> Option<Style> {
        self.nodes.get(&id).map(|n| n.style)
    }

    pub fn text_of(&self, id: ElementId) -> Option<&TextContent> {
        self.nodes.get(&id).and_then(|n| n.text.as_ref())
    }

    /// Children in mount order.
    pub fn children(&self, id: ElementId) -> &[ElementId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// First attached node with the given name.
    pub fn find(&self, name: &str) -> Option<ElementId> {
        let mut ids: Vec<&ElementId> = self.nodes.keys().collect();
        ids.sort();
        ids.into_iter()
            .find(|id| self.nodes[*id].node.name() == Some(name))
            .copied()
    }

    pub fn is_listening(&self, id: ElementId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.listening)
    }

    /// Rectangles painted onto a canvas so far.
    pub fn paint_count(&self, id: ElementId) -> usize {
        self.nodes.get(&id).map_or(0, |n| n.paints)
    }

    pub fn pointer(&self) -> (f64, f64) {
        self.pointer
    }

    pub fn attached_count(&self) -> usize {
        self.nodes.len()
    }

    fn record(&mut self, command: SurfaceCommand) {
        self.mutations += 1;
        self.journal.push(command);
    }

    fn get_mut(&mut self, id: ElementId) -> Result<&mut SceneNode, SurfaceError> {
        self.nodes.get_mut(&id).ok_or(SurfaceError::Detached(id))
    }

    fn detach_subtree(&mut self, id: ElementId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.detach_subtree(child);
            }
        }
    }
}

impl Surface for SceneSurface {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn mount(&mut self, parent: Option<ElementId>, node: Node) -> Result<ElementId, SurfaceError> {
        if let Some(parent_id) = parent {
            if !self.nodes.contains_key(&parent_id) {
                return Err(SurfaceError::Detached(parent_id));
            }
        }
        self.next_id += 1;
        let id = ElementId::new(self.next_id);
        match parent {
            Some(parent_id) => self.get_mut(parent_id)?.children.push(id),
            None => self.roots.push(id),
        }
        self.nodes.insert(
            id,
            SceneNode {
                node: node.clone(),
                parent,
                children: Vec::new(),
                style: Style::default(),
                text: None,
                listening: false,
                paints: 0,
            },
        );
        self.record(SurfaceCommand::Mount { id, parent, node });
        Ok(id)
    }

    fn remove(&mut self, id: ElementId) -> bool {
        let Some(parent) = self.nodes.get(&id).map(|n| n.parent) else {
            return false;
        };
        match parent {
            Some(parent_id) => {
                if let Some(p) = self.nodes.get_mut(&parent_id) {
                    p.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
        self.detach_subtree(id);
        self.record(SurfaceCommand::Remove { id });
        true
    }

    fn is_attached(&self, id: ElementId) -> bool {
        self.nodes.contains_key(&id)
    }

    fn apply_style(&mut self, id: ElementId, style: Style) -> Result<(), SurfaceError> {
        self.get_mut(id)?.style.merge(&style);
        self.record(SurfaceCommand::Style { id, style });
        Ok(())
    }

    fn fill_rect(&mut self, id: ElementId, rect: Rect, color: Color) -> Result<(), SurfaceError> {
        let node = self.get_mut(id)?;
        if !matches!(node.node, Node::Canvas { .. }) {
            return Err(SurfaceError::NotPaintable(id));
        }
        node.paints += 1;
        self.record(SurfaceCommand::FillRect { id, rect, color });
        Ok(())
    }

    fn set_text(&mut self, id: ElementId, content: TextContent) -> Result<(), SurfaceError> {
        let node = self.get_mut(id)?;
        if !matches!(node.node, Node::TextBlock { .. } | Node::Tile { .. }) {
            return Err(SurfaceError::NotPaintable(id));
        }
        node.text = Some(content.clone());
        self.record(SurfaceCommand::SetText { id, content });
        Ok(())
    }

    fn listen(&mut self, id: ElementId) -> Result<(), SurfaceError> {
        self.get_mut(id)?.listening = true;
        self.record(SurfaceCommand::Listen { id });
        Ok(())
    }

    fn unlisten(&mut self, id: ElementId) -> Result<(), SurfaceError> {
        self.get_mut(id)?.listening = false;
        self.record(SurfaceCommand::Unlisten { id });
        Ok(())
    }

    fn set_backdrop(&mut self, color: Option<Color>) {
        if self.backdrop == color {
            return;
        }
        self.backdrop = color;
        self.record(SurfaceCommand::Backdrop { color });
    }

    fn backdrop(&self) -> Option<Color> {
        self.backdrop
    }

    fn move_pointer(&mut self, x: f64, y: f64) {
        self.pointer = (x, y);
        self.record(SurfaceCommand::PointerMove { x, y });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(left: f64) -> Node {
        Node::Image {
            src: "a/b.png".to_string(),
            rect: Rect::new(left, 0.0, 10.0, 10.0),
        }
    }

    #[test]
    fn removal_detaches_subtree() {
        let mut surface = SceneSurface::new(Viewport::default());
        let layer = surface.mount(None, Node::container("layer", 10)).unwrap();
        let a = surface.mount(Some(layer), image(0.0)).unwrap();
        let b = surface.mount(Some(layer), image(5.0)).unwrap();
        assert_eq!(surface.children(layer), &[a, b]);

        assert!(surface.remove(layer));
        assert!(!surface.is_attached(a));
        assert!(!surface.is_attached(b));
        assert!(!surface.remove(layer));
        assert_eq!(surface.attached_count(), 0);
    }

    #[test]
    fn pointer_moves_count_as_mutations() {
        let mut surface = SceneSurface::new(Viewport::default());
        let before = surface.mutation_count();
        surface.move_pointer(12.0, 34.0);
        assert_eq!(surface.mutation_count(), before + 1);
        assert_eq!(surface.pointer(), (12.0, 34.0));
        assert_eq!(
            surface.take_commands(),
            vec![SurfaceCommand::PointerMove { x: 12.0, y: 34.0 }]
        );
    }

    #[test]
    fn mount_into_detached_parent_fails() {
        let mut surface = SceneSurface::new(Viewport::default());
        let layer = surface.mount(None, Node::container("layer", 1)).unwrap();
        surface.remove(layer);
        assert_eq!(
            surface.mount(Some(layer), image(0.0)),
            Err(SurfaceError::Detached(layer))
        );
    }

    #[test]
    fn only_canvases_take_paint() {
        let mut surface = SceneSurface::new(Viewport::default());
        let layer = surface.mount(None, Node::container("layer", 1)).unwrap();
        let rect = Rect::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(
            surface.fill_rect(layer, rect, Color::BLACK),
            Err(SurfaceError::NotPaintable(layer))
        );
    }

    #[test]
    fn styles_merge_and_journal() {
        let mut surface = SceneSurface::new(Viewport::default());
        let layer = surface.mount(None, Node::container("layer", 1)).unwrap();
        surface.apply_style(layer, Style::opacity(0.5)).unwrap();
        surface
            .apply_style(layer, Style::transform(Transform::Scale { factor: 1.1 }))
            .unwrap();

        let style = surface.style_of(layer).unwrap();
        assert_eq!(style.opacity, Some(0.5));
        assert_eq!(style.transform, Some(Transform::Scale { factor: 1.1 }));
        assert_eq!(surface.take_commands().len(), 3);
        assert!(surface.take_commands().is_empty());
    }

    #[test]
    fn backdrop_is_journaled_once_per_change() {
        let mut surface = SceneSurface::new(Viewport::default());
        surface.set_backdrop(Some(Color::BLACK));
        surface.set_backdrop(Some(Color::BLACK));
        assert_eq!(surface.take_commands().len(), 1);
        assert_eq!(surface.backdrop(), Some(Color::BLACK));
    }

    #[test]
    fn commands_serialize_with_op_tag() {
        let command = SurfaceCommand::Remove { id: ElementId::new(4) };
        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(json, r#"{"op":"Remove","id":4}"#);
    }
}
