//! Servo outputs available to the node.
//!
//! - `GpioServo`: software PWM on a Raspberry Pi BCM pin (feature `rpi`).
//! - `SimServo`: logs pulses instead of driving hardware.
//!
//! PCA9685 lines come straight from `qwd_core::utils::controllers::pca9685`.

use std::convert::Infallible;

use qwd_core::utils::controllers::{Position, PulseOutput, PulseWidth};

#[cfg(feature = "rpi")]
pub use gpio::GpioServo;

#[cfg(feature = "rpi")]
mod gpio {
    use std::time::Duration;

    use qwd_core::utils::controllers::{PulseOutput, PulseWidth};
    use rppal::gpio::{Error, OutputPin};

    /// A BCM pin producing servo pulses through rppal's software PWM.
    pub struct GpioServo {
        pin: OutputPin,
    }

    impl GpioServo {
        /// Claim `pin` as a low output. Fails if another process holds it.
        pub fn acquire(
            gpio: &rppal::gpio::Gpio,
            bcm: u8,
        ) -> Result<Self, Error> {
            let pin = gpio.get(bcm)?.into_output_low();
            tracing::debug!(bcm, "gpio pin claimed");
            Ok(Self { pin })
        }
    }

    impl PulseOutput for GpioServo {
        type Error = Error;

        fn set_pulse(
            &mut self,
            pulse: PulseWidth,
        ) -> Result<(), Error> {
            self.pin.set_pwm(
                Duration::from_micros(pulse.period_us as u64),
                Duration::from_micros(pulse.high_us as u64),
            )
        }

        fn detach(&mut self) -> Result<(), Error> {
            self.pin.clear_pwm()?;
            self.pin.set_low();
            Ok(())
        }
    }
}

/// Stand-in output that only logs, for running away from the robot.
pub struct SimServo {
    position: Position,
    pulse: Option<PulseWidth>,
}

impl SimServo {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            pulse: None,
        }
    }

    #[cfg(test)]
    pub fn pulse(&self) -> Option<PulseWidth> {
        self.pulse
    }
}

impl PulseOutput for SimServo {
    type Error = Infallible;

    fn set_pulse(
        &mut self,
        pulse: PulseWidth,
    ) -> Result<(), Infallible> {
        tracing::info!(position = %self.position, high_us = pulse.high_us, "sim pulse");
        self.pulse = Some(pulse);
        Ok(())
    }

    fn detach(&mut self) -> Result<(), Infallible> {
        if self.pulse.take().is_some() {
            tracing::info!(position = %self.position, "sim detach");
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), Infallible> {
        tracing::debug!(position = %self.position, "sim release");
        Ok(())
    }
}
