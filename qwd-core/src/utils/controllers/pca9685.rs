//! PCA9685 servo outputs for the Quad-Wheel Drive.
//!
//! One PCA9685 chip on the I2C bus drives all four servos. Each wheel gets a
//! [`Pca9685Line`] that borrows the shared driver and owns one of its sixteen
//! channels.

use core::cell::RefCell;

use embedded_hal::i2c::I2c;
use pwm_pca9685::{Channel, Error as PwmError, Pca9685};

use super::servo::{PulseOutput, PulseWidth, ServoCalibration};

/// Default I2C address of a PCA9685 servo board.
pub const DEFAULT_ADDRESS: u8 = 0x40;

/// Internal oscillator frequency of the PCA9685.
const OSC_HZ: f32 = 25_000_000.0;

/// Counter steps in one PWM period.
const STEPS: u32 = 4096;

/// Map a channel number (0–15) to its driver channel.
pub fn channel_from_index(index: u8) -> Option<Channel> {
    let ch = match index {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        _ => return None,
    };
    Some(ch)
}

/// Prescale value that makes the chip run at the servo frame rate.
pub fn prescale_for(calibration: &ServoCalibration) -> u8 {
    let raw = libm::roundf(OSC_HZ / (STEPS as f32 * calibration.frame_hz())) - 1.0;
    raw.clamp(3.0, 255.0) as u8
}

/// Enable the PWM driver and set its prescale for the servo frame rate.
pub fn configure<I2C, E>(
    pca: &mut Pca9685<I2C>,
    calibration: &ServoCalibration,
) -> Result<(), PwmError<E>>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    pca.enable()?;
    tracing::info!("PWM enabled");
    let prescale = prescale_for(calibration);
    pca.set_prescale(prescale)?;
    tracing::info!(prescale, hz = calibration.frame_hz(), "PWM prescale set");
    Ok(())
}

/// A single PCA9685 channel used as a servo output.
pub struct Pca9685Line<'a, I2C> {
    driver: &'a RefCell<Pca9685<I2C>>,
    channel: Channel,
}

impl<'a, I2C, E> Pca9685Line<'a, I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    pub fn new(
        driver: &'a RefCell<Pca9685<I2C>>,
        channel: Channel,
    ) -> Self {
        Self { driver, channel }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Off-count for a pulse, assuming the chip period equals `period_us`.
    fn off_count(pulse: PulseWidth) -> u16 {
        let counts = (pulse.high_us as u64 * STEPS as u64) / pulse.period_us.max(1) as u64;
        counts.min(STEPS as u64 - 1) as u16
    }
}

impl<I2C, E> PulseOutput for Pca9685Line<'_, I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    type Error = PwmError<E>;

    fn set_pulse(
        &mut self,
        pulse: PulseWidth,
    ) -> Result<(), Self::Error> {
        let off = Self::off_count(pulse);
        self.driver
            .borrow_mut()
            .set_channel_on_off(self.channel, 0, off)
    }

    fn detach(&mut self) -> Result<(), Self::Error> {
        self.driver.borrow_mut().set_channel_full_off(self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prescale_for_servo_frame() {
        assert_eq!(prescale_for(&ServoCalibration::default()), 121);
        let fast = ServoCalibration {
            frame_us: 10_000,
            ..ServoCalibration::default()
        };
        assert_eq!(prescale_for(&fast), 60);
    }

    #[test]
    fn test_channel_from_index() {
        assert_eq!(channel_from_index(0), Some(Channel::C0));
        assert_eq!(channel_from_index(15), Some(Channel::C15));
        assert_eq!(channel_from_index(16), None);
    }
}
