//! The shared demo state record broadcast to every display.

use serde::{Deserialize, Serialize};

/// Display status of the demo site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemoStatus {
    #[default]
    Idle,
    Playing,
    Paused,
    Sorting,
    Home,
}

impl DemoStatus {
    /// Status after a slide navigation: holding states wake up.
    pub fn after_navigation(self) -> Self {
        match self {
            DemoStatus::Sorting => DemoStatus::Playing,
            DemoStatus::Home => DemoStatus::Idle,
            other => other,
        }
    }
}

/// Echo of a navigation command, consumed by the display to animate carousels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationEcho {
    pub action: String,
    pub payload: serde_json::Value,
    pub timestamp: Option<i64>,
}

/// Last input received from the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControllerInput {
    Navigation(NavigationEcho),
    /// Opaque key/value payload (e.g. logic gate toggles). Empty when cleared.
    Raw(serde_json::Map<String, serde_json::Value>),
}

impl Default for ControllerInput {
    fn default() -> Self {
        ControllerInput::Raw(serde_json::Map::new())
    }
}

impl ControllerInput {
    pub fn is_empty(&self) -> bool {
        matches!(self, ControllerInput::Raw(map) if map.is_empty())
    }
}

/// The single shared state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoState {
    pub status: DemoStatus,
    pub current_demo: Option<String>,
    pub current_slide: u32,
    pub speed: f64,
    pub controller_input: ControllerInput,
}

impl Default for DemoState {
    fn default() -> Self {
        Self {
            status: DemoStatus::Idle,
            current_demo: None,
            current_slide: 0,
            speed: 1.0,
            controller_input: ControllerInput::default(),
        }
    }
}

impl DemoState {
    /// Full reset: no demo, first slide, idle, input cleared. Speed is kept.
    pub fn reset(&mut self) {
        self.current_slide = 0;
        self.status = DemoStatus::Idle;
        self.controller_input = ControllerInput::default();
        self.current_demo = None;
    }

    /// True when the record equals the full-reset value.
    pub fn is_reset(&self) -> bool {
        self.current_slide == 0
            && self.status == DemoStatus::Idle
            && self.controller_input.is_empty()
            && self.current_demo.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_serializes_like_display_expects() {
        let value = serde_json::to_value(DemoState::default()).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "idle",
                "current_demo": null,
                "current_slide": 0,
                "speed": 1.0,
                "controller_input": {}
            })
        );
    }

    #[test]
    fn test_navigation_echo_shape() {
        let input = ControllerInput::Navigation(NavigationEcho {
            action: "navigate".into(),
            payload: json!({"direction": "next"}),
            timestamp: Some(1_700_000_000_000),
        });
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["action"], "navigate");
        assert_eq!(value["payload"]["direction"], "next");
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_reset_keeps_speed() {
        let mut state = DemoState {
            status: DemoStatus::Sorting,
            current_demo: Some("searching-sorting".into()),
            current_slide: 12,
            speed: 2.5,
            controller_input: ControllerInput::Raw(
                json!({"inputA": true}).as_object().cloned().unwrap(),
            ),
        };
        state.reset();
        assert!(state.is_reset());
        assert_eq!(state.speed, 2.5);
    }

    #[test]
    fn test_status_after_navigation() {
        assert_eq!(DemoStatus::Sorting.after_navigation(), DemoStatus::Playing);
        assert_eq!(DemoStatus::Home.after_navigation(), DemoStatus::Idle);
        assert_eq!(DemoStatus::Paused.after_navigation(), DemoStatus::Paused);
        assert_eq!(DemoStatus::Playing.after_navigation(), DemoStatus::Playing);
    }
}
