use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use json::JsonValue;

use crate::{
    axis_mapper::{AxisCalibration, JOY_MAX, JOY_MIN, SERVO_MAX, SERVO_MIN},
    common::PixelOrder,
};

pub(crate) const CONFIG_PATH: &str = "./config";
const CAMERA_FILE: &str = "camera.json";
const DISPLAY_FILE: &str = "display.json";
const SERVO_FILE: &str = "servo.json";
const JOYSTICK_FILE: &str = "joystick.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureFormat {
    Mjpg,
    Rgb3,
    Bgr3,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CameraConfig {
    pub(crate) device_path: String,
    pub(crate) resolution: (usize, usize), // (width, height)
    pub(crate) format: CaptureFormat,
    /**
     * Channel order the sensor hands frames over in.
     */
    pub(crate) pixel_order: PixelOrder,
    pub(crate) fps: u32,
    /**
     * The camera is mounted upside down on the rig.
     */
    pub(crate) flip_vertical: bool,
    pub(crate) controls: Vec<(String, i32)>,
    pub(crate) max_consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DisplayConfig {
    pub(crate) title: String,
    pub(crate) width: usize,
    pub(crate) height: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServoBackend {
    None,
    Pca9685,
    Pwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PulseConfig {
    pub(crate) min_us: u32,
    pub(crate) max_us: u32,
    pub(crate) actuation_range: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServoConfig {
    pub(crate) backend: ServoBackend,
    pub(crate) i2c_bus: u8,
    pub(crate) address: u16,
    pub(crate) frequency: u32,
    pub(crate) channels: u8,
    pub(crate) pulse: PulseConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AxisBinding {
    pub(crate) axis: u8,
    pub(crate) channel: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JoystickConfig {
    pub(crate) calibration: AxisCalibration,
    pub(crate) bindings: Vec<AxisBinding>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RigConfig {
    pub(crate) camera: CameraConfig,
    pub(crate) display: DisplayConfig,
    pub(crate) servo: ServoConfig,
    pub(crate) joystick: JoystickConfig,
}

///////////////////
// Implementations
///////////////////
impl RigConfig {
    /**
     * Reads every config file from `config_dir`. Missing files fall back to
     * defaults; malformed ones are an error.
     */
    pub(crate) fn read(config_dir: &Path) -> Result<Self> {
        Ok(Self {
            camera: CameraConfig::from_json(&_read_json(config_dir, CAMERA_FILE)?)?,
            display: DisplayConfig::from_json(&_read_json(config_dir, DISPLAY_FILE)?)?,
            servo: ServoConfig::from_json(&_read_json(config_dir, SERVO_FILE)?)?,
            joystick: JoystickConfig::from_json(&_read_json(config_dir, JOYSTICK_FILE)?)?,
        })
    }
}

impl CaptureFormat {
    pub(crate) fn fourcc(&self) -> &'static [u8; 4] {
        match self {
            CaptureFormat::Mjpg => b"MJPG",
            CaptureFormat::Rgb3 => b"RGB3",
            CaptureFormat::Bgr3 => b"BGR3",
        }
    }

    fn from_str(format: &str) -> Result<Self> {
        match format.to_ascii_uppercase().as_str() {
            "MJPG" => Ok(Self::Mjpg),
            "RGB3" => Ok(Self::Rgb3),
            "BGR3" => Ok(Self::Bgr3),
            _ => bail!("Unsupported capture format '{}'", format),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_path: String::from("/dev/video0"),
            resolution: (640, 480),
            format: CaptureFormat::Mjpg,
            pixel_order: PixelOrder::Bgr,
            fps: 30,
            flip_vertical: true,
            controls: Vec::new(),
            max_consecutive_failures: 30,
        }
    }
}

impl CameraConfig {
    fn from_json(json: &JsonValue) -> Result<Self> {
        let default = Self::default();

        let resolution = if json["resolution"].is_null() {
            default.resolution
        } else {
            let parts: Vec<&JsonValue> = json["resolution"].members().collect();
            if parts.len() != 2 {
                bail!("'resolution' must be [width, height], got {}", json["resolution"]);
            }
            let width = parts[0]
                .as_usize()
                .ok_or_else(|| anyhow!("invalid resolution width {}", parts[0]))?;
            let height = parts[1]
                .as_usize()
                .ok_or_else(|| anyhow!("invalid resolution height {}", parts[1]))?;
            (width, height)
        };
        if resolution.0 == 0 || resolution.1 == 0 {
            bail!("resolution {:?} has a zero dimension", resolution);
        }

        let format = match json["format"].as_str() {
            Some(format) => CaptureFormat::from_str(format)?,
            None if json["format"].is_null() => default.format,
            None => bail!("'format' must be a string"),
        };

        // Raw formats fix the order; only MJPG decoding can target either.
        let pixel_order = match format {
            CaptureFormat::Rgb3 => PixelOrder::Rgb,
            CaptureFormat::Bgr3 => PixelOrder::Bgr,
            CaptureFormat::Mjpg => match json["pixel_order"].as_str() {
                Some(order) => PixelOrder::from_str(order)?,
                None if json["pixel_order"].is_null() => default.pixel_order,
                None => bail!("'pixel_order' must be a string"),
            },
        };

        let fps = _field(json, "fps", default.fps, JsonValue::as_u32)?;
        if fps == 0 {
            bail!("'fps' must be greater than zero");
        }

        let mut controls = Vec::new();
        for (name, value) in _object(json, "controls")?.entries() {
            let value = value
                .as_i32()
                .ok_or_else(|| anyhow!("control '{}' must be an integer", name))?;
            controls.push((name.to_string(), value));
        }

        Ok(Self {
            device_path: _field(json, "device", default.device_path, |v| {
                v.as_str().map(String::from)
            })?,
            resolution,
            format,
            pixel_order,
            fps,
            flip_vertical: _field(json, "flip_vertical", default.flip_vertical, JsonValue::as_bool)?,
            controls,
            max_consecutive_failures: _field(
                json,
                "max_consecutive_failures",
                default.max_consecutive_failures,
                JsonValue::as_u32,
            )?,
        })
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: String::from("Camera Rig"),
            width: 800,
            height: 600,
        }
    }
}

impl DisplayConfig {
    fn from_json(json: &JsonValue) -> Result<Self> {
        let default = Self::default();
        Ok(Self {
            title: _field(json, "title", default.title, |v| v.as_str().map(String::from))?,
            width: _field(json, "width", default.width, JsonValue::as_usize)?,
            height: _field(json, "height", default.height, JsonValue::as_usize)?,
        })
    }
}

impl ServoBackend {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            ServoBackend::None => "none",
            ServoBackend::Pca9685 => "pca9685",
            ServoBackend::Pwm => "pwm",
        }
    }

    pub(crate) fn from_str(backend: &str) -> Result<Self> {
        match backend.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "pca9685" => Ok(Self::Pca9685),
            "pwm" => Ok(Self::Pwm),
            _ => bail!(
                "Invalid servo backend '{}', expected one of none, pca9685, pwm",
                backend
            ),
        }
    }
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            min_us: 750,
            max_us: 2250,
            actuation_range: 180,
        }
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            backend: ServoBackend::Pca9685,
            i2c_bus: 1,
            address: 0x40,
            frequency: 50,
            channels: 2,
            pulse: PulseConfig::default(),
        }
    }
}

impl ServoConfig {
    fn from_json(json: &JsonValue) -> Result<Self> {
        let default = Self::default();

        let backend = match json["backend"].as_str() {
            Some(backend) => ServoBackend::from_str(backend)?,
            None if json["backend"].is_null() => default.backend,
            None => bail!("'backend' must be a string"),
        };

        let pulse_json = _object(json, "pulse")?;
        let pulse = PulseConfig {
            min_us: _field(pulse_json, "min_us", default.pulse.min_us, JsonValue::as_u32)?,
            max_us: _field(pulse_json, "max_us", default.pulse.max_us, JsonValue::as_u32)?,
            actuation_range: _field(
                pulse_json,
                "actuation_range",
                default.pulse.actuation_range,
                JsonValue::as_u32,
            )?,
        };
        if pulse.max_us <= pulse.min_us || pulse.actuation_range == 0 {
            bail!("invalid servo pulse configuration {:?}", pulse);
        }

        let frequency = _field(json, "frequency", default.frequency, JsonValue::as_u32)?;
        if frequency == 0 {
            bail!("'frequency' must be greater than zero");
        }

        Ok(Self {
            backend,
            i2c_bus: _field(json, "i2c_bus", default.i2c_bus, JsonValue::as_u8)?,
            address: _field(json, "address", default.address, JsonValue::as_u16)?,
            frequency,
            channels: _field(json, "channels", default.channels, JsonValue::as_u8)?,
            pulse,
        })
    }
}

impl Default for JoystickConfig {
    fn default() -> Self {
        Self {
            calibration: AxisCalibration::default(),
            bindings: vec![
                AxisBinding {
                    axis: 0,
                    channel: 0,
                },
                AxisBinding {
                    axis: 1,
                    channel: 1,
                },
            ],
        }
    }
}

impl JoystickConfig {
    fn from_json(json: &JsonValue) -> Result<Self> {
        let calibration_json = _object(json, "calibration")?;
        let calibration = AxisCalibration::new(
            _field(calibration_json, "joy_min", JOY_MIN, JsonValue::as_i32)?,
            _field(calibration_json, "joy_max", JOY_MAX, JsonValue::as_i32)?,
            _field(calibration_json, "servo_min", SERVO_MIN, JsonValue::as_i32)?,
            _field(calibration_json, "servo_max", SERVO_MAX, JsonValue::as_i32)?,
            _field(calibration_json, "clamp", true, JsonValue::as_bool)?,
        )?;

        let bindings_json = _array(json, "bindings")?;
        let bindings = if bindings_json.is_null() {
            Self::default().bindings
        } else {
            let mut bindings = Vec::new();
            for binding in bindings_json.members() {
                bindings.push(AxisBinding {
                    axis: binding["axis"]
                        .as_u8()
                        .ok_or_else(|| anyhow!("binding {} has no valid 'axis'", binding))?,
                    channel: binding["channel"]
                        .as_u8()
                        .ok_or_else(|| anyhow!("binding {} has no valid 'channel'", binding))?,
                });
            }
            bindings
        };

        Ok(Self {
            calibration,
            bindings,
        })
    }
}

/**
 * Reads and parses one config file. A missing file yields JSON null so every
 * field takes its default.
 */
fn _read_json(config_dir: &Path, file_name: &str) -> Result<JsonValue> {
    let path: PathBuf = config_dir.join(file_name);
    let raw = match read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            log::info!("{} not found, using defaults", path.display());
            return Ok(JsonValue::Null);
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Could not read {}", path.display()));
        }
    };

    json::parse(&raw).with_context(|| format!("Could not parse {} as JSON", path.display()))
}

/**
 * Looks up `key`, falling back to `default` when it is absent. A key that is
 * present but of the wrong type is an error.
 */
fn _field<T>(
    json: &JsonValue,
    key: &str,
    default: T,
    getter: impl Fn(&JsonValue) -> Option<T>,
) -> Result<T> {
    let value = &json[key];
    if value.is_null() {
        return Ok(default);
    }
    getter(value).ok_or_else(|| anyhow!("invalid value for '{}': {}", key, value))
}

/**
 * `key` must be absent or a JSON object. Absent yields null, whose lookups all
 * fall back to defaults.
 */
fn _object<'a>(json: &'a JsonValue, key: &str) -> Result<&'a JsonValue> {
    let value = &json[key];
    if !value.is_null() && !value.is_object() {
        bail!("'{}' must be an object, got {}", key, value);
    }
    Ok(value)
}

fn _array<'a>(json: &'a JsonValue, key: &str) -> Result<&'a JsonValue> {
    let value = &json[key];
    if !value.is_null() && !value.is_array() {
        bail!("'{}' must be an array, got {}", key, value);
    }
    Ok(value)
}
