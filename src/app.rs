use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use queues::{IsQueue, Queue};

use crate::{
    axis_mapper::AxisCalibration,
    camera_controller::FrameSource,
    common::InputEvent,
    display::FrameSink,
    frame_relay::relay_frame,
    input_controller::InputSource,
    servo_controller::ServoDriver,
    user_config::AxisBinding,
};

/**
 * Routes each joystick notification to its handler. Axis moves are mapped to
 * angles and sent to whichever servo channels the axis is bound to.
 */
pub(crate) struct InputDispatcher {
    calibration: AxisCalibration,
    bindings: Vec<AxisBinding>,
}

/**
 * Fixed-rate pacing for the loop. A late tick restarts the schedule from now
 * rather than bursting to catch up.
 */
pub(crate) struct Ticker {
    interval: Duration,
    next: Option<Instant>,
}

/**
 * Owns every hardware handle for the lifetime of the run. Dropping the rig
 * releases them.
 */
pub(crate) struct CameraRig {
    camera: Box<dyn FrameSource>,
    display: Box<dyn FrameSink>,
    servos: Box<dyn ServoDriver>,
    input: Option<Box<dyn InputSource>>,
    dispatcher: InputDispatcher,
    events: Queue<InputEvent>,
    ticker: Ticker,
    flip_vertical: bool,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
}

pub(crate) struct RigSettings {
    pub(crate) fps: u32,
    pub(crate) flip_vertical: bool,
    pub(crate) max_consecutive_failures: u32,
}

///////////////////
// Implementations
///////////////////
impl InputDispatcher {
    pub(crate) fn new(calibration: AxisCalibration, bindings: Vec<AxisBinding>) -> Self {
        Self {
            calibration,
            bindings,
        }
    }

    pub(crate) fn dispatch(&self, event: InputEvent, servos: &mut dyn ServoDriver) -> Result<()> {
        match event {
            InputEvent::ButtonDown { stick, button } => {
                self._on_button_down(stick, button);
                Ok(())
            }
            InputEvent::AxisMoved { stick, axis, value } => {
                self._on_axis_moved(stick, axis, value, servos)
            }
            InputEvent::HatMoved { stick, hat, value } => {
                self._on_hat_moved(stick, hat, value);
                Ok(())
            }
        }
    }

    fn _on_button_down(&self, stick: usize, button: u32) {
        log::info!("Joystick {} button {} pressed", stick, button);
    }

    fn _on_axis_moved(
        &self,
        stick: usize,
        axis: u8,
        value: i32,
        servos: &mut dyn ServoDriver,
    ) -> Result<()> {
        let mut bound = false;
        for binding in self.bindings.iter().filter(|b| b.axis == axis) {
            bound = true;
            let angle = self.calibration.map(value);
            log::debug!(
                "Joystick {} axis {} at {} -> servo {} at {} degrees",
                stick,
                axis,
                value,
                binding.channel,
                angle
            );
            servos.set_angle(binding.channel, angle)?;
        }
        if !bound {
            log::debug!("Joystick {} axis {} moved to {} (unbound)", stick, axis, value);
        }
        Ok(())
    }

    fn _on_hat_moved(&self, stick: usize, hat: u8, value: (i8, i8)) {
        log::info!("Joystick {} hat {} at {:?}", stick, hat, value);
    }
}

impl Ticker {
    pub(crate) fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            next: None,
        }
    }

    /**
     * How long to sleep at `now` before the next tick is due. Advances the
     * schedule.
     */
    pub(crate) fn delay_until_next(&mut self, now: Instant) -> Duration {
        let due = self.next.unwrap_or(now);
        if due <= now {
            self.next = Some(now + self.interval);
            Duration::ZERO
        } else {
            self.next = Some(due + self.interval);
            due - now
        }
    }

    pub(crate) fn wait(&mut self) {
        let delay = self.delay_until_next(Instant::now());
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

impl CameraRig {
    pub(crate) fn new(
        camera: Box<dyn FrameSource>,
        display: Box<dyn FrameSink>,
        servos: Box<dyn ServoDriver>,
        input: Option<Box<dyn InputSource>>,
        dispatcher: InputDispatcher,
        settings: RigSettings,
    ) -> Self {
        Self {
            camera,
            display,
            servos,
            input,
            dispatcher,
            events: Queue::new(),
            ticker: Ticker::new(settings.fps),
            flip_vertical: settings.flip_vertical,
            max_consecutive_failures: settings.max_consecutive_failures,
            consecutive_failures: 0,
        }
    }

    /**
     * Brings the camera up and runs until the window is closed.
     */
    pub(crate) fn run(&mut self) -> Result<()> {
        let geometry = self.camera.configure()?;
        self.camera.start()?;
        log::info!(
            "Camera rig running with {}x{} frames",
            geometry.width,
            geometry.height
        );

        while self.display.is_open() {
            self.tick()?;
            self.ticker.wait();
        }

        log::info!("Window closed, shutting down");
        Ok(())
    }

    /**
     * Handles pending input, then relays one frame.
     */
    pub(crate) fn tick(&mut self) -> Result<()> {
        if let Some(input) = self.input.as_mut() {
            if let Err(err) = input.poll(&mut self.events) {
                log::warn!("Input poll failed: {:#}", err);
            }
        }

        while let Ok(event) = self.events.remove() {
            if let Err(err) = self.dispatcher.dispatch(event, self.servos.as_mut()) {
                log::warn!("Dropped {:?}: {:#}", event, err);
            }
        }

        match relay_frame(
            self.camera.as_mut(),
            self.display.as_mut(),
            self.flip_vertical,
        ) {
            Ok(()) => {
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(err) => {
                if let Err(idle_err) = self.display.idle() {
                    log::warn!("Display idle failed: {:#}", idle_err);
                }
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.max_consecutive_failures {
                    log::error!(
                        "Giving up after {} failed frames in a row",
                        self.consecutive_failures
                    );
                    return Err(err.context("frame relay kept failing"));
                }
                log::warn!("Frame dropped: {:#}", err);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
    };

    use anyhow::{anyhow, bail};

    use super::*;
    use crate::common::{Frame, FrameGeometry, PixelOrder};

    #[derive(Default)]
    struct RecordingServos {
        commands: Vec<(u8, i32)>,
    }

    impl ServoDriver for RecordingServos {
        fn channels(&self) -> usize {
            2
        }

        fn set_angle(&mut self, channel: u8, angle: i32) -> Result<()> {
            if channel >= 2 {
                bail!("no channel {}", channel);
            }
            self.commands.push((channel, angle));
            Ok(())
        }
    }

    fn pan_tilt() -> InputDispatcher {
        InputDispatcher::new(
            AxisCalibration::default(),
            vec![
                AxisBinding {
                    axis: 0,
                    channel: 0,
                },
                AxisBinding {
                    axis: 1,
                    channel: 1,
                },
            ],
        )
    }

    fn axis(axis: u8, value: i32) -> InputEvent {
        InputEvent::AxisMoved {
            stick: 0,
            axis,
            value,
        }
    }

    #[test]
    fn axis_scenarios_reach_their_servo() {
        let dispatcher = pan_tilt();
        let mut servos = RecordingServos::default();

        dispatcher.dispatch(axis(0, -32768), &mut servos).unwrap();
        dispatcher.dispatch(axis(0, 32768), &mut servos).unwrap();
        dispatcher.dispatch(axis(1, 0), &mut servos).unwrap();

        assert_eq!(servos.commands, vec![(0, 0), (0, 180), (1, 90)]);
    }

    #[test]
    fn unbound_axes_buttons_and_hats_touch_no_servo() {
        let dispatcher = pan_tilt();
        let mut servos = RecordingServos::default();

        dispatcher.dispatch(axis(4, 1000), &mut servos).unwrap();
        dispatcher
            .dispatch(InputEvent::ButtonDown { stick: 0, button: 3 }, &mut servos)
            .unwrap();
        dispatcher
            .dispatch(
                InputEvent::HatMoved {
                    stick: 0,
                    hat: 0,
                    value: (1, 0),
                },
                &mut servos,
            )
            .unwrap();

        assert!(servos.commands.is_empty());
    }

    #[test]
    fn one_axis_can_drive_several_servos() {
        let dispatcher = InputDispatcher::new(
            AxisCalibration::default(),
            vec![
                AxisBinding {
                    axis: 0,
                    channel: 0,
                },
                AxisBinding {
                    axis: 0,
                    channel: 1,
                },
            ],
        );
        let mut servos = RecordingServos::default();
        dispatcher.dispatch(axis(0, 0), &mut servos).unwrap();
        assert_eq!(servos.commands, vec![(0, 90), (1, 90)]);
    }

    #[test]
    fn servo_errors_surface_from_dispatch() {
        let dispatcher = InputDispatcher::new(
            AxisCalibration::default(),
            vec![AxisBinding {
                axis: 0,
                channel: 5,
            }],
        );
        let mut servos = RecordingServos::default();
        assert!(dispatcher.dispatch(axis(0, 0), &mut servos).is_err());
    }

    #[test]
    fn ticker_paces_at_interval() {
        let mut ticker = Ticker::new(30);
        let start = Instant::now();
        let interval = Duration::from_secs(1) / 30;

        assert_eq!(ticker.delay_until_next(start), Duration::ZERO);
        // Work took 10ms, sleep out the rest of the interval.
        let delay = ticker.delay_until_next(start + Duration::from_millis(10));
        assert_eq!(delay, interval - Duration::from_millis(10));
    }

    #[test]
    fn ticker_does_not_burst_after_a_stall() {
        let mut ticker = Ticker::new(30);
        let start = Instant::now();
        ticker.delay_until_next(start);

        let late = start + Duration::from_secs(1);
        assert_eq!(ticker.delay_until_next(late), Duration::ZERO);
        let delay = ticker.delay_until_next(late + Duration::from_millis(1));
        assert_eq!(delay, Duration::from_secs(1) / 30 - Duration::from_millis(1));
    }

    struct ScriptedCamera {
        frames: Vec<Result<Frame>>,
    }

    impl FrameSource for ScriptedCamera {
        fn configure(&mut self) -> Result<FrameGeometry> {
            Ok(FrameGeometry {
                width: 1,
                height: 2,
            })
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn capture_frame(&mut self) -> Result<Frame> {
            if self.frames.is_empty() {
                bail!("camera unplugged");
            }
            self.frames.remove(0)
        }
    }

    struct SharedSink(Rc<RefCell<Vec<Frame>>>);

    impl FrameSink for SharedSink {
        fn present(&mut self, frame: &Frame) -> Result<()> {
            self.0.borrow_mut().push(frame.clone());
            Ok(())
        }
    }

    struct ScriptedInput(Vec<InputEvent>);

    impl InputSource for ScriptedInput {
        fn poll(&mut self, events: &mut Queue<InputEvent>) -> Result<()> {
            for event in self.0.drain(..) {
                events.add(event).map_err(|err| anyhow!(err.to_string()))?;
            }
            Ok(())
        }
    }

    struct SharedServos(Rc<RefCell<Vec<(u8, i32)>>>);

    impl ServoDriver for SharedServos {
        fn channels(&self) -> usize {
            2
        }

        fn set_angle(&mut self, channel: u8, angle: i32) -> Result<()> {
            self.0.borrow_mut().push((channel, angle));
            Ok(())
        }
    }

    fn bgr_frame() -> Result<Frame> {
        Frame::new(
            FrameGeometry {
                width: 1,
                height: 2,
            },
            PixelOrder::Bgr,
            vec![1, 2, 3, 4, 5, 6],
        )
    }

    #[test]
    fn tick_dispatches_input_then_relays_frame() {
        let shown = Rc::new(RefCell::new(Vec::new()));
        let commands = Rc::new(RefCell::new(Vec::new()));

        let mut rig = CameraRig::new(
            Box::new(ScriptedCamera {
                frames: vec![bgr_frame()],
            }),
            Box::new(SharedSink(shown.clone())),
            Box::new(SharedServos(commands.clone())),
            Some(Box::new(ScriptedInput(vec![axis(0, 32768), axis(1, -32768)]))),
            pan_tilt(),
            RigSettings {
                fps: 30,
                flip_vertical: true,
                max_consecutive_failures: 3,
            },
        );

        rig.tick().unwrap();

        assert_eq!(*commands.borrow(), vec![(0, 180), (1, 0)]);
        let shown = shown.borrow();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].order, PixelOrder::Rgb);
        assert_eq!(shown[0].pixels, vec![6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn tick_gives_up_after_repeated_capture_failures() {
        let shown = Rc::new(RefCell::new(Vec::new()));
        let mut rig = CameraRig::new(
            Box::new(ScriptedCamera {
                frames: vec![bgr_frame()],
            }),
            Box::new(SharedSink(shown.clone())),
            Box::new(RecordingServos::default()),
            None,
            pan_tilt(),
            RigSettings {
                fps: 30,
                flip_vertical: false,
                max_consecutive_failures: 2,
            },
        );

        assert!(rig.tick().is_ok());
        assert!(rig.tick().is_ok());
        assert!(rig.tick().is_err());
        assert_eq!(shown.borrow().len(), 1);
    }

    struct IdleCounter(Rc<Cell<usize>>);

    impl FrameSink for IdleCounter {
        fn present(&mut self, _frame: &Frame) -> Result<()> {
            Ok(())
        }

        fn idle(&mut self) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn display_keeps_servicing_events_while_frames_fail() {
        let idles = Rc::new(Cell::new(0));
        let mut rig = CameraRig::new(
            Box::new(ScriptedCamera {
                frames: vec![bgr_frame()],
            }),
            Box::new(IdleCounter(idles.clone())),
            Box::new(RecordingServos::default()),
            None,
            pan_tilt(),
            RigSettings {
                fps: 30,
                flip_vertical: false,
                max_consecutive_failures: 5,
            },
        );

        rig.tick().unwrap();
        assert_eq!(idles.get(), 0);
        rig.tick().unwrap();
        rig.tick().unwrap();
        assert_eq!(idles.get(), 2);
    }
}
