mod app;
mod axis_mapper;
mod camera_controller;
mod common;
mod display;
mod frame_relay;
mod input_controller;
mod servo_controller;
mod user_config;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::{
    app::{CameraRig, InputDispatcher, RigSettings},
    camera_controller::open_camera,
    display::WindowDisplay,
    input_controller::{GamepadInput, InputSource},
    servo_controller::open_servo_driver,
    user_config::{RigConfig, ServoBackend, CONFIG_PATH},
};

/// Live camera feed with joystick-driven pan/tilt servos.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding camera.json, display.json, servo.json and joystick.json
    #[arg(long, default_value = CONFIG_PATH)]
    config_dir: PathBuf,

    /// Camera device, overrides camera.json (`stub://` for a test pattern)
    #[arg(long)]
    device: Option<String>,

    /// Servo backend: none, pca9685 or pwm. Overrides servo.json
    #[arg(long)]
    backend: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = RigConfig::read(&args.config_dir)?;
    if let Some(device) = args.device {
        config.camera.device_path = device;
    }
    if let Some(backend) = args.backend.as_deref() {
        config.servo.backend = ServoBackend::from_str(backend)?;
    }
    log::debug!("{:?}", config);

    let camera = open_camera(&config.camera)?;
    let servos = open_servo_driver(&config.servo)?;
    let display = WindowDisplay::new(&config.display)?;

    // The feed is still useful without a joystick.
    let input = match GamepadInput::new() {
        Ok(input) => Some(Box::new(input) as Box<dyn InputSource>),
        Err(err) => {
            log::warn!("Running without joystick input: {:#}", err);
            None
        }
    };

    let mut rig = CameraRig::new(
        camera,
        Box::new(display),
        servos,
        input,
        InputDispatcher::new(config.joystick.calibration, config.joystick.bindings),
        RigSettings {
            fps: config.camera.fps,
            flip_vertical: config.camera.flip_vertical,
            max_consecutive_failures: config.camera.max_consecutive_failures,
        },
    );
    rig.run()
}
