// Strong typing over strings. Newtypes for timestamps, element handles, colors and layout geometry.
// See DESIGN.md: Core types

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ShowError;
use crate::layout::FetchTicket;

/// Timestamp in microseconds on the show clock. Newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_micros(us: u64) -> Self {
        Timestamp(us)
    }

    /// Host clocks report fractional milliseconds; negative values clamp to zero.
    pub fn from_millis(ms: f64) -> Self {
        if ms.is_finite() && ms > 0.0 {
            Timestamp((ms * 1000.0).round() as u64)
        } else {
            Timestamp(0)
        }
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_millis(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// The timestamp `ms` milliseconds later.
    pub fn after_millis(&self, ms: u64) -> Self {
        Timestamp(self.0.saturating_add(ms.saturating_mul(1000)))
    }

    /// Whole milliseconds elapsed since `earlier` (zero if `earlier` is later).
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0) / 1000
    }
}

/// Handle to a node mounted on the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(u32);

impl ElementId {
    pub fn new(raw: u32) -> Self {
        ElementId(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Opaque RGB color. Serializes as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::from_hex(0x000000);

    pub const fn from_hex(rgb: u32) -> Self {
        Color {
            r: ((rgb >> 16) & 0xff) as u8,
            g: ((rgb >> 8) & 0xff) as u8,
            b: (rgb & 0xff) as u8,
        }
    }

    /// Parse `#rrggbb` (the leading `#` is optional).
    pub fn parse(text: &str) -> Option<Self> {
        let hex = text.trim().trim_start_matches('#');
        if hex.len() != 6 {
            return None;
        }
        u32::from_str_radix(hex, 16).ok().map(Color::from_hex)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Color::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid color: {}", text)))
    }
}

/// Viewport size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Viewport {
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            width: 1024.0,
            height: 768.0,
        }
    }
}

/// Screen-space rectangle (top-down, CSS pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Rect {
            left,
            top,
            width,
            height,
        }
    }
}

/// Identifier of a scripted phase. The names are identifiers, not an ordering:
/// the chain order comes from `ShowConfig::phase_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PhaseId {
    Phase1,
    Phase2,
    Phase3,
}

impl PhaseId {
    pub const ALL: [PhaseId; 3] = [PhaseId::Phase1, PhaseId::Phase2, PhaseId::Phase3];

    pub fn name(&self) -> &'static str {
        match self {
            PhaseId::Phase1 => "phase1",
            PhaseId::Phase2 => "phase2",
            PhaseId::Phase3 => "phase3",
        }
    }

    /// Accepts `phase1`, `Phase1` or a bare `1`.
    pub fn parse(name: &str) -> Result<Self, ShowError> {
        let lowered = name.trim().to_ascii_lowercase();
        match lowered.trim_start_matches("phase") {
            "1" => Ok(PhaseId::Phase1),
            "2" => Ok(PhaseId::Phase2),
            "3" => Ok(PhaseId::Phase3),
            _ => Err(ShowError::UnknownPhase(name.to_string())),
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            PhaseId::Phase1 => 0,
            PhaseId::Phase2 => 1,
            PhaseId::Phase3 => 2,
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded sprite instance (asset + geometry) from a layout document.
/// Coordinates are bottom-up, as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub origin_tag: String,
    pub attachment_name: String,
    pub asset_path: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Show configuration passed from JS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowConfig {
    /// Chain order for `start_sequence`.
    #[serde(default = "default_phase_order")]
    pub phase_order: Vec<PhaseId>,
    /// Seed for every random decision in the show.
    #[serde(default)]
    pub seed: u64,
    /// Prefix joined in front of every layout path.
    #[serde(default)]
    pub asset_root: String,
    /// Scripted pointer jumps during Phase1.
    #[serde(default = "default_true")]
    pub cursor_drift: bool,
    /// Whether glitch envelopes that ask for it settle into perpetual jitter.
    #[serde(default = "default_true")]
    pub settle_with_jitter: bool,
    #[serde(default)]
    pub camera: CameraSettings,
}

impl ShowConfig {
    pub fn from_json(json: &str) -> Result<Self, ShowError> {
        let config: ShowConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ShowError> {
        if self.phase_order.is_empty() {
            return Err(ShowError::InvalidConfig("phase_order is empty".to_string()));
        }
        for (i, phase) in self.phase_order.iter().enumerate() {
            if self.phase_order[..i].contains(phase) {
                return Err(ShowError::InvalidConfig(format!(
                    "phase_order lists {} twice",
                    phase
                )));
            }
        }
        if self.camera.glyph_width <= 0.0 || self.camera.glyph_height <= 0.0 {
            return Err(ShowError::InvalidConfig(
                "camera glyph size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Joins `asset_root` in front of a relative layout path.
    pub fn resolve_path(&self, path: &str) -> String {
        let root = self.asset_root.trim_end_matches('/');
        if root.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", root, path)
        }
    }
}

impl Default for ShowConfig {
    fn default() -> Self {
        ShowConfig {
            phase_order: default_phase_order(),
            seed: 0,
            asset_root: String::new(),
            cursor_drift: true,
            settle_with_jitter: true,
            camera: CameraSettings::default(),
        }
    }
}

fn default_phase_order() -> Vec<PhaseId> {
    PhaseId::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

/// Glyph camera settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Width of one monospace glyph cell (px).
    #[serde(default = "default_glyph_width")]
    pub glyph_width: f64,
    /// Height of one glyph row (px).
    #[serde(default = "default_glyph_height")]
    pub glyph_height: f64,
    #[serde(default = "default_font_px")]
    pub font_px: f64,
    /// Nominal capture resolution requested from the device.
    #[serde(default = "default_capture_width")]
    pub capture_width: u32,
    #[serde(default = "default_capture_height")]
    pub capture_height: u32,
    /// Vignette depth in cells.
    #[serde(default = "default_edge_distance")]
    pub edge_distance: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        CameraSettings {
            glyph_width: default_glyph_width(),
            glyph_height: default_glyph_height(),
            font_px: default_font_px(),
            capture_width: default_capture_width(),
            capture_height: default_capture_height(),
            edge_distance: default_edge_distance(),
        }
    }
}

fn default_glyph_width() -> f64 {
    8.4 // Courier New at 14px
}

fn default_glyph_height() -> f64 {
    14.0
}

fn default_font_px() -> f64 {
    14.0
}

fn default_capture_width() -> u32 {
    800
}

fn default_capture_height() -> u32 {
    550
}

fn default_edge_distance() -> f64 {
    30.0
}

/// Work the host must perform on the core's behalf.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum HostRequest {
    /// Fetch a layout document and answer with `deliver_layout` / `fail_layout`.
    FetchLayout { ticket: FetchTicket, path: String },
    /// Acquire the capture device at a nominal resolution.
    AcquireCamera { width: u32, height: u32 },
    /// Stop every track of the capture device.
    ReleaseCamera,
}

/// Lifecycle and failure notifications for the host (and tests).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ShowEvent {
    PhaseStarted { phase: PhaseId },
    PhaseCompleted { phase: PhaseId },
    PhaseCleanedUp { phase: PhaseId },
    SequenceComplete,
    LayoutFailed { path: String, error: String },
    CameraFailed { error: String },
    TileRevealed { element: ElementId, value: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_conversions() {
        let ts = Timestamp::from_millis(1500.0);
        assert_eq!(ts.as_micros(), 1_500_000);
        assert_eq!(ts.after_millis(250).millis_since(ts), 250);
        assert_eq!(Timestamp::from_millis(-3.0), Timestamp::default());
    }

    #[test]
    fn color_round_trips_through_hex() {
        let color = Color::from_hex(0x000a5d);
        assert_eq!(color.to_string(), "#000a5d");
        assert_eq!(Color::parse("#000A5D"), Some(color));
        assert_eq!(Color::parse("blue"), None);
    }

    #[test]
    fn phase_names_parse() {
        assert_eq!(PhaseId::parse("Phase2").unwrap(), PhaseId::Phase2);
        assert_eq!(PhaseId::parse("3").unwrap(), PhaseId::Phase3);
        assert!(PhaseId::parse("phase9").is_err());
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config = ShowConfig::from_json(r#"{"seed": 7}"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.phase_order, PhaseId::ALL.to_vec());
        assert_eq!(config.camera.capture_width, 800);
        assert!(config.cursor_drift);
    }

    #[test]
    fn config_rejects_duplicate_phases() {
        let err = ShowConfig::from_json(r#"{"phase_order":["Phase1","Phase1"]}"#).unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn resolve_path_joins_root() {
        let config = ShowConfig {
            asset_root: "assets/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.resolve_path("dvd spine/Spine.json"), "assets/dvd spine/Spine.json");
        assert_eq!(ShowConfig::default().resolve_path("a/b.json"), "a/b.json");
    }
}
