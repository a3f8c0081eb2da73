//! Demo state machine: turns a controller command into the next state.
//!
//! [`apply`] never mutates its input. It works on a copy and returns the
//! candidate state together with the side effects the caller must carry out
//! (subscription group changes and one-off display signals). The caller
//! commits the copy only when `apply` succeeds, so a failing command leaves
//! no partial mutation behind.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::DemoCatalog;
use crate::demo::{ControllerInput, DemoState, DemoStatus, NavigationEcho};

/// Prefix for per-demo subscription groups.
pub const DEMO_GROUP_PREFIX: &str = "demo_controller_";

/// Signal sent to displays when the controller returns to the home screen.
pub const NAVIGATE_TO_HOME_SIGNAL: &str = "navigate_to_home";

pub fn demo_group(demo: &str) -> String {
    format!("{DEMO_GROUP_PREFIX}{demo}")
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("Missing action")]
    MissingAction,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Payload for '{0}' must be an object")]
    InvalidPayload(String),

    #[error("Demo '{0}' has no slides")]
    EmptyDemo(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
    /// Carousel selection on the home screen; echoed, never moves the slide.
    Select,
}

impl Direction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "next" => Some(Direction::Next),
            "prev" => Some(Direction::Prev),
            "select" => Some(Direction::Select),
            _ => None,
        }
    }
}

/// A decoded controller command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `direction` is `None` when the client sent an unrecognised or missing direction.
    Navigate {
        direction: Option<Direction>,
        payload: Value,
    },
    ResetAnimation,
    StartSorting,
    Play,
    Pause,
    SetDemo {
        demo: String,
    },
    LogicGatesInput(Map<String, Value>),
    NavigateToHome,
    Reset,
}

impl Command {
    /// Decode a wire `{action, payload}` pair. A missing payload is an empty object.
    pub fn parse(action: Option<&str>, payload: Option<Value>) -> Result<Self, CommandError> {
        let action = action.ok_or(CommandError::MissingAction)?;
        let payload = match payload {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(p) => p,
        };

        let command = match action {
            "navigate" => {
                let direction = payload
                    .get("direction")
                    .and_then(Value::as_str)
                    .and_then(Direction::parse);
                Command::Navigate { direction, payload }
            }
            "reset_animation" => Command::ResetAnimation,
            "start_sorting" => Command::StartSorting,
            "play" => Command::Play,
            "pause" => Command::Pause,
            "set_demo" => Command::SetDemo {
                demo: payload
                    .get("demo")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "logic_gates_input" => match payload {
                Value::Object(map) => Command::LogicGatesInput(map),
                _ => return Err(CommandError::InvalidPayload(action.to_string())),
            },
            "navigate_to_home" => Command::NavigateToHome,
            "reset" => Command::Reset,
            other => return Err(CommandError::UnknownAction(other.to_string())),
        };
        Ok(command)
    }

    /// Wire name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Navigate { .. } => "navigate",
            Command::ResetAnimation => "reset_animation",
            Command::StartSorting => "start_sorting",
            Command::Play => "play",
            Command::Pause => "pause",
            Command::SetDemo { .. } => "set_demo",
            Command::LogicGatesInput(_) => "logic_gates_input",
            Command::NavigateToHome => "navigate_to_home",
            Command::Reset => "reset",
        }
    }
}

/// Side effect requested by a transition, executed by the caller after commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    JoinGroup(String),
    LeaveGroup(String),
    Signal { name: String, payload: Value },
}

/// Result of applying a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: DemoState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(state: &DemoState) -> Self {
        Self {
            state: state.clone(),
            effects: Vec::new(),
        }
    }
}

/// Compute the state that follows `command`.
pub fn apply(
    current: &DemoState,
    catalog: &DemoCatalog,
    command: Command,
    client_timestamp: Option<i64>,
) -> Result<Transition, CommandError> {
    let mut next = current.clone();
    let mut effects = Vec::new();

    match command {
        Command::Navigate { direction, payload } => {
            let Some(direction) = direction else {
                warn!(payload = %payload, "Ignoring navigate with unknown direction");
                return Ok(Transition::unchanged(current));
            };

            next.controller_input = ControllerInput::Navigation(NavigationEcho {
                action: "navigate".into(),
                payload,
                timestamp: client_timestamp,
            });

            if direction != Direction::Select {
                next.current_slide = step_slide(current, catalog, direction)?;
                next.status = current.status.after_navigation();
            }
        }
        Command::ResetAnimation | Command::Play => next.status = DemoStatus::Playing,
        Command::StartSorting => next.status = DemoStatus::Sorting,
        Command::Pause => next.status = DemoStatus::Paused,
        Command::SetDemo { demo } => {
            let Some(demo) = catalog.resolve(&demo) else {
                warn!(demo = %demo, "Ignoring set_demo for unknown demo");
                return Ok(Transition::unchanged(current));
            };
            if let Some(previous) = &current.current_demo {
                effects.push(Effect::LeaveGroup(demo_group(previous)));
            }
            effects.push(Effect::JoinGroup(demo_group(demo)));

            next.current_demo = Some(demo.to_string());
            next.current_slide = 0;
            next.status = DemoStatus::Playing;
        }
        Command::LogicGatesInput(map) => {
            next.controller_input = ControllerInput::Raw(map);
        }
        Command::NavigateToHome => {
            if let Some(previous) = &current.current_demo {
                effects.push(Effect::LeaveGroup(demo_group(previous)));
            }
            next.current_demo = None;
            next.current_slide = 0;
            next.status = DemoStatus::Home;
            next.controller_input = ControllerInput::default();
            effects.push(Effect::Signal {
                name: NAVIGATE_TO_HOME_SIGNAL.into(),
                payload: Value::Object(Map::new()),
            });
        }
        Command::Reset => {
            if let Some(previous) = &current.current_demo {
                effects.push(Effect::LeaveGroup(demo_group(previous)));
            }
            next.reset();
        }
    }

    Ok(Transition {
        state: next,
        effects,
    })
}

/// Move one slide with wraparound inside the active demo.
///
/// Without an active demo (or with one missing from the catalog) the slide
/// stays at 0.
fn step_slide(
    state: &DemoState,
    catalog: &DemoCatalog,
    direction: Direction,
) -> Result<u32, CommandError> {
    let Some(demo) = state.current_demo.as_deref() else {
        return Ok(0);
    };
    let Some(count) = catalog.slide_count(demo) else {
        debug!(demo, "Active demo not in catalog, slide pinned to 0");
        return Ok(0);
    };
    if count == 0 {
        return Err(CommandError::EmptyDemo(demo.to_string()));
    }

    let last = count - 1;
    // Clamp first so a slide left out of range by a catalog change still wraps sanely.
    let slide = state.current_slide.min(last);
    let moved = match direction {
        Direction::Next if slide == last => 0,
        Direction::Next => slide + 1,
        Direction::Prev if slide == 0 => last,
        Direction::Prev => slide - 1,
        Direction::Select => slide,
    };
    Ok(moved)
}
