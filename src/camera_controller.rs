use anyhow::{anyhow, bail, Context, Result};
use rscam::{
    Camera, Config, CID_AUTO_WHITE_BALANCE, CID_BRIGHTNESS, CID_CONTRAST, CID_EXPOSURE_ABSOLUTE,
    CID_EXPOSURE_AUTO, CID_GAIN, CID_GAMMA, CID_HUE, CID_SATURATION, CID_SHARPNESS,
    CID_WHITE_BALANCE_TEMPERATURE, FIELD_NONE,
};
use turbojpeg::{Decompressor, Image, PixelFormat};

use crate::{
    common::{Frame, FrameGeometry, PixelOrder, BYTES_PER_PIXEL},
    user_config::{CameraConfig, CaptureFormat},
};

const SYNTHETIC_PREFIX: &str = "stub://";

/**
 * A camera that hands out one frame per call, in its own channel order.
 */
pub(crate) trait FrameSource {
    /**
     * Applies the device configuration and reports the frame geometry it will
     * produce.
     */
    fn configure(&mut self) -> Result<FrameGeometry>;

    fn start(&mut self) -> Result<()>;

    /**
     * Blocks until the next frame is available.
     */
    fn capture_frame(&mut self) -> Result<Frame>;
}

/**
 * Entry point for getting a camera. `stub://` device paths give a synthetic
 * test pattern so the rig can run without a sensor attached.
 */
pub(crate) fn open_camera(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    if config.device_path.starts_with(SYNTHETIC_PREFIX) {
        log::info!("Using synthetic camera {}", config.device_path);
        Ok(Box::new(SyntheticCamera::new(config)))
    } else {
        Ok(Box::new(V4l2Camera::new(config.clone())?))
    }
}

//////////////////////////// V4L2 Camera Start ////////////////////////////
pub(crate) struct V4l2Camera {
    config: CameraConfig,
    camera: Option<Camera>,
    decompressor: Decompressor,
    streaming: bool,
}

impl V4l2Camera {
    pub(crate) fn new(config: CameraConfig) -> Result<Self> {
        let decompressor = Decompressor::new().context("Could not create JPEG decompressor")?;
        Ok(Self {
            config,
            camera: None,
            decompressor,
            streaming: false,
        })
    }

    fn _geometry(&self) -> FrameGeometry {
        FrameGeometry {
            width: self.config.resolution.0,
            height: self.config.resolution.1,
        }
    }
}

impl FrameSource for V4l2Camera {
    fn configure(&mut self) -> Result<FrameGeometry> {
        let mut camera = Camera::new(&self.config.device_path)
            .with_context(|| format!("Could not open camera {}", self.config.device_path))?;

        _set_v4l2_camera_controls(&mut camera, &self.config.controls)?;

        log::info!(
            "Opened camera {} at {}x{}",
            self.config.device_path,
            self.config.resolution.0,
            self.config.resolution.1
        );
        self.camera = Some(camera);
        Ok(self._geometry())
    }

    fn start(&mut self) -> Result<()> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| anyhow!("Camera started before it was configured"))?;

        let config = Config {
            interval: (1, self.config.fps),
            resolution: (
                self.config.resolution.0 as u32,
                self.config.resolution.1 as u32,
            ),
            format: self.config.format.fourcc(),
            field: FIELD_NONE,
            nbuffers: 4,
        };
        camera
            .start(&config)
            .with_context(|| format!("Could not start streaming from {}", self.config.device_path))?;
        self.streaming = true;

        log::info!(
            "Streaming {} at {}fps",
            String::from_utf8_lossy(self.config.format.fourcc()),
            self.config.fps
        );
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        if !self.streaming {
            bail!("Camera captured before it was started");
        }
        let geometry = self._geometry();
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| anyhow!("Camera captured before it was configured"))?;
        let raw = camera.capture().context("Could not capture frame")?;

        match self.config.format {
            CaptureFormat::Mjpg => _decode_mjpg(
                &raw[..],
                &mut self.decompressor,
                geometry,
                self.config.pixel_order,
            ),
            CaptureFormat::Rgb3 => Frame::new(geometry, PixelOrder::Rgb, raw[..].to_vec()),
            CaptureFormat::Bgr3 => Frame::new(geometry, PixelOrder::Bgr, raw[..].to_vec()),
        }
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        if let (Some(camera), true) = (self.camera.as_mut(), self.streaming) {
            match camera.stop() {
                Ok(_) => log::info!("Camera {} stopped", self.config.device_path),
                Err(err) => log::warn!("Could not stop camera {}: {}", self.config.device_path, err),
            }
        }
    }
}

/**
 * Decodes a MJPEG frame straight into the requested channel order.
 */
fn _decode_mjpg(
    mjpg: &[u8],
    decompressor: &mut Decompressor,
    geometry: FrameGeometry,
    order: PixelOrder,
) -> Result<Frame> {
    let header = decompressor
        .read_header(mjpg)
        .context("Malformed JPEG frame")?;
    if header.width != geometry.width || header.height != geometry.height {
        bail!(
            "Camera sent {}x{} frame, expected {}x{}",
            header.width,
            header.height,
            geometry.width,
            geometry.height
        );
    }

    let format = match order {
        PixelOrder::Rgb => PixelFormat::RGB,
        PixelOrder::Bgr => PixelFormat::BGR,
    };
    let mut pixels = vec![0u8; geometry.buffer_len()];
    let image = Image {
        pixels: &mut pixels[..],
        width: geometry.width,
        pitch: geometry.stride(),
        height: geometry.height,
        format,
    };
    decompressor
        .decompress(mjpg, image)
        .context("JPEG decompression failed")?;

    Frame::new(geometry, order, pixels)
}

/**
 * Applies the user's V4L2 controls by name. Unknown names are an error so a
 * typo in camera.json does not go unnoticed.
 */
fn _set_v4l2_camera_controls(camera: &mut Camera, controls: &[(String, i32)]) -> Result<()> {
    for (name, value) in controls {
        let id = _control_id(name).ok_or_else(|| anyhow!("Unknown camera control '{}'", name))?;
        camera
            .set_control(id, value)
            .with_context(|| format!("Could not set camera control {} to {}", name, value))?;
        log::debug!("Camera control {} = {}", name, value);
    }
    Ok(())
}

fn _control_id(name: &str) -> Option<u32> {
    let id = match name {
        "brightness" => CID_BRIGHTNESS,
        "contrast" => CID_CONTRAST,
        "saturation" => CID_SATURATION,
        "hue" => CID_HUE,
        "gamma" => CID_GAMMA,
        "gain" => CID_GAIN,
        "sharpness" => CID_SHARPNESS,
        "auto_white_balance" => CID_AUTO_WHITE_BALANCE,
        "white_balance_temperature" => CID_WHITE_BALANCE_TEMPERATURE,
        "exposure_auto" => CID_EXPOSURE_AUTO,
        "exposure_absolute" => CID_EXPOSURE_ABSOLUTE,
        _ => return None,
    };
    Some(id)
}
//////////////////////////// V4L2 Camera End ////////////////////////////

//////////////////////////// Synthetic Camera Start ////////////////////////////
/**
 * Scrolling color bars in BGR order, like the sensor on the rig.
 */
pub(crate) struct SyntheticCamera {
    geometry: FrameGeometry,
    started: bool,
    frame_index: usize,
}

impl SyntheticCamera {
    pub(crate) fn new(config: &CameraConfig) -> Self {
        Self {
            geometry: FrameGeometry {
                width: config.resolution.0,
                height: config.resolution.1,
            },
            started: false,
            frame_index: 0,
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn configure(&mut self) -> Result<FrameGeometry> {
        Ok(self.geometry)
    }

    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        if !self.started {
            bail!("Camera captured before it was started");
        }
        let FrameGeometry { width, height } = self.geometry;
        let mut pixels = vec![0u8; self.geometry.buffer_len()];
        for y in 0..height {
            // Brightness ramps down the frame so the flip is visible.
            let shade = (255 * (height - y) / height) as u8;
            for x in 0..width {
                let bar = ((x + self.frame_index) * 8 / width.max(1)) % 8;
                let idx = (y * width + x) * BYTES_PER_PIXEL;
                pixels[idx] = if bar & 1 != 0 { shade } else { 0 }; // blue
                pixels[idx + 1] = if bar & 2 != 0 { shade } else { 0 }; // green
                pixels[idx + 2] = if bar & 4 != 0 { shade } else { 0 }; // red
            }
        }
        self.frame_index = (self.frame_index + 1) % width.max(1);
        Frame::new(self.geometry, PixelOrder::Bgr, pixels)
    }
}
//////////////////////////// Synthetic Camera End ////////////////////////////
