use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use pwm_pca9685::{Channel as Pca9685Channel, Pca9685};
use rppal::{
    i2c::I2c,
    pwm::{Channel, Polarity, Pwm},
};

use crate::user_config::{PulseConfig, ServoBackend, ServoConfig};

/**
 * Anything that can hold a set of hobby servos at a commanded angle.
 * Channels are numbered from zero.
 */
pub(crate) trait ServoDriver {
    fn channels(&self) -> usize;

    fn set_angle(&mut self, channel: u8, angle: i32) -> Result<()>;
}

/**
 * Converts an angle to the pulse width the servo expects.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ServoPulse {
    min_us: u32,
    max_us: u32,
    actuation_range: u32,
}

/**
 * Picks the driver for the configured backend and brings it up.
 */
pub(crate) fn open_servo_driver(config: &ServoConfig) -> Result<Box<dyn ServoDriver>> {
    let pulse = ServoPulse::from(config.pulse);
    let driver: Box<dyn ServoDriver> = match config.backend {
        ServoBackend::None => Box::new(NullDriver::new(config.channels as usize, pulse)),
        ServoBackend::Pca9685 => Box::new(Pca9685Driver::new(config, pulse)?),
        ServoBackend::Pwm => Box::new(PwmDriver::new(config, pulse)?),
    };
    log::info!(
        "Servo backend '{}' ready with {} channel(s)",
        config.backend.as_str(),
        driver.channels()
    );
    Ok(driver)
}

impl From<PulseConfig> for ServoPulse {
    fn from(config: PulseConfig) -> Self {
        Self {
            min_us: config.min_us,
            max_us: config.max_us,
            actuation_range: config.actuation_range,
        }
    }
}

impl ServoPulse {
    pub(crate) fn pulse_width(&self, angle: i32) -> Result<Duration> {
        ensure!(
            angle >= 0 && angle as u32 <= self.actuation_range,
            "Angle {} must be between 0 and {} degrees",
            angle,
            self.actuation_range
        );
        let span = (self.max_us - self.min_us) as u64;
        let micros = self.min_us as u64 + span * angle as u64 / self.actuation_range as u64;
        Ok(Duration::from_micros(micros))
    }
}

fn _check_channel(channel: u8, channels: usize) -> Result<()> {
    if channel as usize >= channels {
        bail!(
            "Servo channel {} out of range, driver has {} channel(s)",
            channel,
            channels
        );
    }
    Ok(())
}

//////////////////////////// Null Driver Start ////////////////////////////
/**
 * No actuator attached. Validates and logs the commanded angles.
 */
pub(crate) struct NullDriver {
    channels: usize,
    pulse: ServoPulse,
}

impl NullDriver {
    pub(crate) fn new(channels: usize, pulse: ServoPulse) -> Self {
        Self { channels, pulse }
    }
}

impl ServoDriver for NullDriver {
    fn channels(&self) -> usize {
        self.channels
    }

    fn set_angle(&mut self, channel: u8, angle: i32) -> Result<()> {
        _check_channel(channel, self.channels)?;
        let pulse = self.pulse.pulse_width(angle)?;
        log::debug!(
            "Servo {} -> {} degrees ({}us, no actuator)",
            channel,
            angle,
            pulse.as_micros()
        );
        Ok(())
    }
}
//////////////////////////// Null Driver End ////////////////////////////

//////////////////////////// PCA9685 Driver Start ////////////////////////////
const PCA9685_OSCILLATOR_HZ: f64 = 25_000_000.0;
const PCA9685_STEPS: u32 = 4096;

/**
 * Discrete 16-channel PWM chip on the Pi I2C bus.
 */
pub(crate) struct Pca9685Driver {
    pca: Pca9685<I2c>,
    channels: usize,
    period_us: f64,
    pulse: ServoPulse,
}

impl Pca9685Driver {
    pub(crate) fn new(config: &ServoConfig, pulse: ServoPulse) -> Result<Self> {
        let channels = config.channels as usize;
        ensure!(
            channels <= PCA9685_CHANNELS.len(),
            "PCA9685 has {} channels, {} requested",
            PCA9685_CHANNELS.len(),
            channels
        );
        let prescale = pca9685_prescale(config.frequency)?;
        let address = u8::try_from(config.address)
            .with_context(|| format!("I2C address {:#x} is not a 7-bit address", config.address))?;

        let i2c = I2c::with_bus(config.i2c_bus)
            .with_context(|| format!("Could not open I2C bus {}", config.i2c_bus))?;
        let mut pca = Pca9685::new(i2c, address)
            .map_err(|err| anyhow!("Could not address PCA9685 at {:#04x}: {:?}", address, err))?;
        pca.set_prescale(prescale)
            .map_err(|err| anyhow!("Could not set PCA9685 prescale {}: {:?}", prescale, err))?;
        pca.enable()
            .map_err(|err| anyhow!("Could not wake PCA9685: {:?}", err))?;

        log::info!(
            "PCA9685 at {:#04x} on bus {} running at {}Hz (prescale {})",
            address,
            config.i2c_bus,
            config.frequency,
            prescale
        );

        Ok(Self {
            pca,
            channels,
            period_us: pca9685_period_us(prescale),
            pulse,
        })
    }
}

const PCA9685_CHANNELS: [Pca9685Channel; 16] = [
    Pca9685Channel::C0,
    Pca9685Channel::C1,
    Pca9685Channel::C2,
    Pca9685Channel::C3,
    Pca9685Channel::C4,
    Pca9685Channel::C5,
    Pca9685Channel::C6,
    Pca9685Channel::C7,
    Pca9685Channel::C8,
    Pca9685Channel::C9,
    Pca9685Channel::C10,
    Pca9685Channel::C11,
    Pca9685Channel::C12,
    Pca9685Channel::C13,
    Pca9685Channel::C14,
    Pca9685Channel::C15,
];

/**
 * round(osc / (4096 * f)) - 1, the prescale the chip needs for frequency `f`.
 */
pub(crate) fn pca9685_prescale(frequency: u32) -> Result<u8> {
    ensure!(frequency > 0, "PWM frequency must be greater than zero");
    let prescale = (PCA9685_OSCILLATOR_HZ / (PCA9685_STEPS as f64 * frequency as f64)).round() - 1.0;
    if !(3.0..=255.0).contains(&prescale) {
        bail!("PWM frequency {}Hz is outside what the PCA9685 can produce", frequency);
    }
    Ok(prescale as u8)
}

fn pca9685_period_us(prescale: u8) -> f64 {
    (prescale as f64 + 1.0) * PCA9685_STEPS as f64 / PCA9685_OSCILLATOR_HZ * 1_000_000.0
}

/**
 * Number of 4096ths of the period the output stays high.
 */
pub(crate) fn pca9685_off_ticks(pulse: Duration, period_us: f64) -> u16 {
    let ticks = (pulse.as_micros() as f64 * PCA9685_STEPS as f64 / period_us).round();
    ticks.clamp(0.0, (PCA9685_STEPS - 1) as f64) as u16
}

impl ServoDriver for Pca9685Driver {
    fn channels(&self) -> usize {
        self.channels
    }

    fn set_angle(&mut self, channel: u8, angle: i32) -> Result<()> {
        _check_channel(channel, self.channels)?;
        let pulse = self.pulse.pulse_width(angle)?;
        let off = pca9685_off_ticks(pulse, self.period_us);

        self.pca
            .set_channel_on_off(PCA9685_CHANNELS[channel as usize], 0, off)
            .map_err(|err| anyhow!("Could not set PCA9685 channel {}: {:?}", channel, err))?;

        log::debug!("Servo {} -> {} degrees ({} ticks)", channel, angle, off);
        Ok(())
    }
}

impl Drop for Pca9685Driver {
    fn drop(&mut self) {
        let release = self
            .pca
            .set_channel_full_off(Pca9685Channel::All)
            .and_then(|_| self.pca.disable());
        match release {
            Ok(_) => log::info!("PCA9685 outputs released"),
            Err(err) => log::warn!("Could not release PCA9685 outputs: {:?}", err),
        }
    }
}
//////////////////////////// PCA9685 Driver End ////////////////////////////

//////////////////////////// Hardware PWM Driver Start ////////////////////////////
/**
 * The Pi's own PWM peripheral: channel 0 is PWM0, channel 1 is PWM1.
 * Channels are disabled when the driver is dropped.
 */
pub(crate) struct PwmDriver {
    outputs: Vec<Pwm>,
    pulse: ServoPulse,
}

impl PwmDriver {
    pub(crate) fn new(config: &ServoConfig, pulse: ServoPulse) -> Result<Self> {
        let hardware = [Channel::Pwm0, Channel::Pwm1];
        ensure!(
            config.channels as usize <= hardware.len(),
            "Hardware PWM has {} channels, {} requested",
            hardware.len(),
            config.channels
        );

        let period = Duration::from_nanos(1_000_000_000 / config.frequency as u64);
        // Start every servo centred.
        let neutral = pulse.pulse_width((pulse.actuation_range / 2) as i32)?;

        let mut outputs = Vec::with_capacity(config.channels as usize);
        for channel in hardware.into_iter().take(config.channels as usize) {
            let pwm = Pwm::with_period(channel, period, neutral, Polarity::Normal, true)
                .with_context(|| format!("Could not enable hardware {:?}", channel))?;
            outputs.push(pwm);
        }

        Ok(Self { outputs, pulse })
    }
}

impl ServoDriver for PwmDriver {
    fn channels(&self) -> usize {
        self.outputs.len()
    }

    fn set_angle(&mut self, channel: u8, angle: i32) -> Result<()> {
        _check_channel(channel, self.outputs.len())?;
        let pulse = self.pulse.pulse_width(angle)?;
        self.outputs[channel as usize]
            .set_pulse_width(pulse)
            .with_context(|| format!("Could not set PWM channel {}", channel))?;

        log::debug!(
            "Servo {} -> {} degrees ({}us)",
            channel,
            angle,
            pulse.as_micros()
        );
        Ok(())
    }
}
//////////////////////////// Hardware PWM Driver End ////////////////////////////
