// chaos_core: Rust/WASM core of the chaos sequence.
// All the logic lives here; JS drives the clock, replays commands and answers requests.

pub mod camera;
pub mod context;
pub mod cursor;
pub mod effects;
pub mod error;
pub mod layout;
pub mod overlay;
pub mod phases;
pub mod scheduler;
pub mod show;
pub mod spawner;
pub mod surface;
pub mod transition;
pub mod types;

use serde::Serialize;
use wasm_bindgen::prelude::*;

pub use camera::Frame;
pub use error::{DataError, DeviceError, ShowError, SurfaceError};
pub use layout::FetchTicket;
pub use overlay::{FixedReveal, PointerKind, PointerOutcome, RevealSource, SeededReveal};
pub use show::{Show, ShowState};
pub use surface::{SceneSurface, Surface, SurfaceCommand};
pub use types::*;

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Everything the host has to act on after one frame.
#[derive(Debug, Serialize)]
struct TickBatch {
    commands: Vec<SurfaceCommand>,
    requests: Vec<HostRequest>,
    events: Vec<ShowEvent>,
}

fn js_error(err: ShowError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn frame_size_message(width: u32, height: u32) -> String {
    let bytes = u128::from(width) * u128::from(height) * 4;
    format!("Frame of {}x{} needs {} bytes", width, height, bytes)
}

/// Show interface exposed to JavaScript.
/// Batch interface to minimize JS↔WASM crossings: every mutation made between two
/// ticks is handed over by the next `tick`.
#[wasm_bindgen]
pub struct ShowEngine {
    show: Show<SceneSurface>,
}

#[wasm_bindgen]
impl ShowEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str, width: f64, height: f64) -> Result<ShowEngine, JsValue> {
        let config = ShowConfig::from_json(config_json).map_err(js_error)?;
        let surface = SceneSurface::new(Viewport::new(width, height));
        let show = Show::new(surface, config).map_err(js_error)?;
        Ok(ShowEngine { show })
    }

    /// Advances the show to `now_ms` (host animation-frame time) and returns
    /// `{ commands, requests, events }` as JSON.
    pub fn tick(&mut self, now_ms: f64) -> Result<String, JsValue> {
        self.show.tick(Timestamp::from_millis(now_ms));
        let batch = TickBatch {
            commands: self.show.take_commands(),
            requests: self.show.take_requests(),
            events: self.show.take_events(),
        };
        serde_json::to_string(&batch).map_err(|e| js_error(e.into()))
    }

    pub fn start_sequence(&mut self) -> bool {
        self.show.start_sequence()
    }

    pub fn stop_sequence(&mut self) {
        self.show.stop_sequence();
    }

    pub fn cleanup_all(&mut self) {
        self.show.cleanup_all();
    }

    /// Console entry point: runs one phase on its own.
    pub fn start_phase(&mut self, name: &str) -> Result<bool, JsValue> {
        let id = PhaseId::parse(name).map_err(js_error)?;
        Ok(self.show.start_phase(id))
    }

    pub fn stop_phase(&mut self, name: &str) -> Result<bool, JsValue> {
        let id = PhaseId::parse(name).map_err(js_error)?;
        Ok(self.show.stop_phase(id))
    }

    pub fn deliver_layout(&mut self, ticket: u32, text: String) -> bool {
        self.show.deliver_layout(FetchTicket::from_raw(ticket), Ok(text))
    }

    pub fn fail_layout(&mut self, ticket: u32, message: String) -> bool {
        self.show
            .deliver_layout(FetchTicket::from_raw(ticket), Err(message))
    }

    pub fn camera_ready(&mut self) {
        self.show.camera_granted();
    }

    /// `message` is the host's error name; `NotAllowedError` counts as a denial.
    pub fn camera_failed(&mut self, message: String) {
        let err = if message.contains("NotAllowed") || message.contains("Permission") {
            DeviceError::Denied(message)
        } else {
            DeviceError::Unavailable(message)
        };
        self.show.camera_denied(err);
    }

    /// One RGBA frame of the capture device.
    pub fn camera_frame(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<(), JsValue> {
        let frame = Frame::new(width, height, rgba.to_vec()).ok_or_else(|| {
            JsValue::from_str(&frame_size_message(width, height))
        })?;
        self.show.camera_frame(frame);
        Ok(())
    }

    /// Pointer event on an element the core asked to listen on.
    pub fn pointer(&mut self, element: u32, kind: &str) -> Result<(), JsValue> {
        let kind = PointerKind::parse(kind).map_err(js_error)?;
        self.show.pointer(ElementId::new(element), kind);
        Ok(())
    }

    pub fn pointer_moved(&mut self, x: f64, y: f64) {
        self.show.pointer_moved(x, y);
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.show.resize(Viewport::new(width, height));
    }

    /// Names accepted by `start_phase` / `stop_phase`.
    pub fn phase_names() -> js_sys::Array {
        PhaseId::ALL
            .iter()
            .map(|id| JsValue::from_str(id.name()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{"seed": 7, "asset_root": "/assets"}"#;

    fn batch(engine: &mut ShowEngine, now_ms: f64) -> serde_json::Value {
        let json = engine.tick(now_ms).expect("tick serializes");
        serde_json::from_str(&json).expect("valid json")
    }

    #[test]
    fn engine_creation_works() {
        assert!(ShowEngine::new(CONFIG, 1024.0, 768.0).is_ok());
        assert!(ShowEngine::new("{}", 800.0, 600.0).is_ok());
    }

    #[test]
    fn tick_hands_over_commands_and_events() {
        let mut engine = ShowEngine::new(CONFIG, 1024.0, 768.0).unwrap();
        assert!(engine.start_sequence());
        assert!(!engine.start_sequence());

        let out = batch(&mut engine, 16.0);
        assert_eq!(out["events"][0]["type"], "PhaseStarted");
        assert_eq!(out["events"][0]["phase"], "Phase1");
        assert!(!out["commands"].as_array().unwrap().is_empty());

        let out = batch(&mut engine, 2600.0);
        let fetch = &out["requests"][0];
        assert_eq!(fetch["type"], "FetchLayout");
        assert_eq!(fetch["path"], "/assets/extras spine/Spine.json");

        let ticket = fetch["ticket"].as_u64().unwrap() as u32;
        assert!(engine.fail_layout(ticket, "404".to_string()));
        assert!(!engine.fail_layout(ticket, "404".to_string()));
        let out = batch(&mut engine, 2616.0);
        assert_eq!(out["events"][0]["type"], "LayoutFailed");
    }

    #[test]
    fn frame_size_message_does_not_overflow() {
        assert_eq!(frame_size_message(2, 2), "Frame of 2x2 needs 16 bytes");
        assert_eq!(
            frame_size_message(u32::MAX, u32::MAX),
            format!("Frame of {0}x{0} needs {1} bytes", u32::MAX, 73786976260478468100u128)
        );
    }

    #[test]
    fn phases_can_be_driven_by_name() {
        let mut engine = ShowEngine::new(CONFIG, 1024.0, 768.0).unwrap();
        assert_eq!(engine.start_phase("phase2").ok(), Some(true));
        assert_eq!(engine.start_phase("2").ok(), Some(false));

        let out = batch(&mut engine, 16.0);
        assert!(out["requests"]
            .as_array()
            .unwrap()
            .iter()
            .any(|r| r["type"] == "AcquireCamera"));
        engine.camera_failed("NotAllowedError".to_string());
        let out = batch(&mut engine, 32.0);
        assert_eq!(out["events"][0]["type"], "CameraFailed");

        assert_eq!(engine.stop_phase("Phase2").ok(), Some(true));
        let out = batch(&mut engine, 48.0);
        assert_eq!(out["events"][0]["type"], "PhaseCleanedUp");
        assert_eq!(engine.stop_phase("phase2").ok(), Some(false));
    }
}
