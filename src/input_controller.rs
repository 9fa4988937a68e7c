use std::collections::HashMap;

use anyhow::{anyhow, Result};
use gilrs::{Axis, Button, EventType, Gilrs};
use queues::{IsQueue, Queue};

use crate::common::InputEvent;

/**
 * Raw axis readings span this many counts on either side of centre.
 */
const AXIS_SCALE: f32 = 32768.0;

/**
 * Something that can be polled for joystick notifications.
 */
pub(crate) trait InputSource {
    /**
     * Appends every pending event to `events` without blocking.
     */
    fn poll(&mut self, events: &mut Queue<InputEvent>) -> Result<()>;
}

/**
 * Gamepads seen through gilrs, renumbered the way the joydev driver numbers
 * them.
 */
pub(crate) struct GamepadInput {
    gilrs: Gilrs,
    translator: EventTranslator,
}

/**
 * The parts of a gilrs event the rig reacts to.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum GamepadChange {
    Pressed(Button),
    Released(Button),
    Axis(Axis, f32),
}

/**
 * Turns gamepad changes into joydev-style events. D-pad buttons and axes are
 * folded into one hat per stick, so holding two directions reads as a
 * diagonal and releasing one keeps the other.
 */
#[derive(Debug, Default)]
pub(crate) struct EventTranslator {
    hats: HashMap<usize, (i8, i8)>,
}

///////////////////
// Implementations
///////////////////
impl GamepadInput {
    pub(crate) fn new() -> Result<Self> {
        // gilrs errors are not Send + Sync.
        let gilrs = Gilrs::new().map_err(|err| anyhow!("Could not start gamepad input: {}", err))?;
        for (id, gamepad) in gilrs.gamepads() {
            log::info!("Joystick {} connected: {}", usize::from(id), gamepad.name());
        }
        Ok(Self {
            gilrs,
            translator: EventTranslator::default(),
        })
    }
}

impl InputSource for GamepadInput {
    fn poll(&mut self, events: &mut Queue<InputEvent>) -> Result<()> {
        while let Some(event) = self.gilrs.next_event() {
            let stick = usize::from(event.id);
            match event.event {
                EventType::Connected => log::info!("Joystick {} connected", stick),
                EventType::Disconnected => {
                    log::warn!("Joystick {} disconnected", stick);
                    self.translator.forget(stick);
                }
                other => {
                    let translated = gamepad_change(other)
                        .and_then(|change| self.translator.translate(stick, change));
                    if let Some(translated) = translated {
                        events
                            .add(translated)
                            .map_err(|err| anyhow!("Could not queue input event: {}", err))?;
                    }
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn gamepad_change(event: EventType) -> Option<GamepadChange> {
    match event {
        EventType::ButtonPressed(button, _) => Some(GamepadChange::Pressed(button)),
        EventType::ButtonReleased(button, _) => Some(GamepadChange::Released(button)),
        EventType::AxisChanged(axis, value, _) => Some(GamepadChange::Axis(axis, value)),
        _ => None,
    }
}

impl EventTranslator {
    pub(crate) fn translate(&mut self, stick: usize, change: GamepadChange) -> Option<InputEvent> {
        match change {
            GamepadChange::Pressed(button) => match dpad_direction(button) {
                Some((x, y)) => {
                    let hat = self.hats.entry(stick).or_insert((0, 0));
                    if x != 0 {
                        hat.0 = x;
                    }
                    if y != 0 {
                        hat.1 = y;
                    }
                    Some(self._hat_event(stick))
                }
                None => button_index(button).map(|button| InputEvent::ButtonDown { stick, button }),
            },
            GamepadChange::Released(button) => {
                let (x, y) = dpad_direction(button)?;
                let hat = self.hats.entry(stick).or_insert((0, 0));
                // Only the component this button set; the opposite one may
                // already have taken over.
                if x != 0 && hat.0 == x {
                    hat.0 = 0;
                }
                if y != 0 && hat.1 == y {
                    hat.1 = 0;
                }
                Some(self._hat_event(stick))
            }
            GamepadChange::Axis(Axis::DPadX, value) => {
                self.hats.entry(stick).or_insert((0, 0)).0 = _sign(value);
                Some(self._hat_event(stick))
            }
            GamepadChange::Axis(Axis::DPadY, value) => {
                self.hats.entry(stick).or_insert((0, 0)).1 = _sign(value);
                Some(self._hat_event(stick))
            }
            GamepadChange::Axis(axis, value) => {
                let index = axis_index(axis)?;
                Some(InputEvent::AxisMoved {
                    stick,
                    axis: index,
                    value: raw_axis_value(axis, value),
                })
            }
        }
    }

    pub(crate) fn forget(&mut self, stick: usize) {
        self.hats.remove(&stick);
    }

    fn _hat_event(&self, stick: usize) -> InputEvent {
        InputEvent::HatMoved {
            stick,
            hat: 0,
            value: self.hats.get(&stick).copied().unwrap_or((0, 0)),
        }
    }
}

/**
 * Joydev axis numbering for a standard pad.
 */
pub(crate) fn axis_index(axis: Axis) -> Option<u8> {
    match axis {
        Axis::LeftStickX => Some(0),
        Axis::LeftStickY => Some(1),
        Axis::LeftZ => Some(2),
        Axis::RightStickX => Some(3),
        Axis::RightStickY => Some(4),
        Axis::RightZ => Some(5),
        _ => None,
    }
}

/**
 * Scales gilrs' [-1.0, 1.0] to joydev counts. Joydev reports "up" as negative,
 * gilrs as positive.
 */
pub(crate) fn raw_axis_value(axis: Axis, value: f32) -> i32 {
    let value = match axis {
        Axis::LeftStickY | Axis::RightStickY => -value,
        _ => value,
    };
    (value.clamp(-1.0, 1.0) * AXIS_SCALE).round() as i32
}

pub(crate) fn button_index(button: Button) -> Option<u32> {
    let index = match button {
        Button::South => 0,
        Button::East => 1,
        Button::West => 2,
        Button::North => 3,
        Button::LeftTrigger => 4,
        Button::RightTrigger => 5,
        Button::Select => 6,
        Button::Start => 7,
        Button::Mode => 8,
        Button::LeftThumb => 9,
        Button::RightThumb => 10,
        _ => return None,
    };
    Some(index)
}

/**
 * Hat value for a D-pad button, x right and y up.
 */
fn dpad_direction(button: Button) -> Option<(i8, i8)> {
    match button {
        Button::DPadUp => Some((0, 1)),
        Button::DPadDown => Some((0, -1)),
        Button::DPadLeft => Some((-1, 0)),
        Button::DPadRight => Some((1, 0)),
        _ => None,
    }
}

fn _sign(value: f32) -> i8 {
    if value > 0.5 {
        1
    } else if value < -0.5 {
        -1
    } else {
        0
    }
}
