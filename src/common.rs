use anyhow::{bail, Result};

/**
 * Byte order of the three color channels in a packed frame.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PixelOrder {
    Rgb,
    Bgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameGeometry {
    pub(crate) width: usize,
    pub(crate) height: usize,
}

/**
 * One camera frame. Pixels are packed 8-bit triplets, row-major, top row first,
 * with no padding between rows.
 */
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) geometry: FrameGeometry,
    pub(crate) order: PixelOrder,
    pub(crate) pixels: Vec<u8>,
}

/**
 * Joystick notifications, numbered the way the Linux joydev driver numbers them.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputEvent {
    ButtonDown { stick: usize, button: u32 },
    AxisMoved { stick: usize, axis: u8, value: i32 },
    HatMoved { stick: usize, hat: u8, value: (i8, i8) },
}

pub(crate) const BYTES_PER_PIXEL: usize = 3;

///////////////////
// Implementations
///////////////////
impl PixelOrder {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            PixelOrder::Rgb => "rgb",
            PixelOrder::Bgr => "bgr",
        }
    }

    pub(crate) fn from_str(order: &str) -> Result<Self> {
        match order.to_ascii_lowercase().as_str() {
            "rgb" => Ok(Self::Rgb),
            "bgr" => Ok(Self::Bgr),
            _ => bail!("invalid pixel order '{}', expected 'rgb' or 'bgr'", order),
        }
    }
}

impl FrameGeometry {
    pub(crate) fn stride(&self) -> usize {
        self.width * BYTES_PER_PIXEL
    }

    pub(crate) fn buffer_len(&self) -> usize {
        self.stride() * self.height
    }
}

impl Frame {
    pub(crate) fn new(geometry: FrameGeometry, order: PixelOrder, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != geometry.buffer_len() {
            bail!(
                "frame buffer holds {} bytes but {}x{} needs {}",
                pixels.len(),
                geometry.width,
                geometry.height,
                geometry.buffer_len()
            );
        }
        Ok(Self {
            geometry,
            order,
            pixels,
        })
    }
}
