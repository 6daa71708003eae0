use std::{convert::Infallible, path::PathBuf};

use anyhow::{anyhow, bail};
use clap::{Parser, ValueEnum};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use qwd_core::utils::{
    controllers::{ControlLoop, LoopOutcome, PulseOutput, ServoCalibration, CANCEL},
    Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod outputs;
mod sink;
mod source;

use outputs::SimServo;
use sink::{StatusMode, StatusOutput};
use source::FileCommandSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Software PWM on Raspberry Pi GPIO pins
    Gpio,
    /// PCA9685 servo board on the I2C bus
    Pca9685,
    /// Log pulses only
    Sim,
}

#[derive(Parser, Debug)]
#[clap(version, about = "Drive four wheel servos from a command file")]
struct Opts {
    /// File holding the current command word
    #[clap(long, default_value = "/home/pi/node_red_output/control_data.json")]
    control_file: PathBuf,
    /// Pause between cycles in milliseconds
    #[clap(long, default_value_t = 500)]
    period_ms: u64,
    /// Output hardware
    #[clap(long, value_enum, default_value_t = Backend::Gpio)]
    backend: Backend,
    /// BCM pins for FL,FR,RL,RR
    #[clap(long, value_delimiter = ',', default_values_t = [27u8, 17, 22, 23])]
    pins: Vec<u8>,
    /// PCA9685 channels for FL,FR,RL,RR
    #[clap(long, value_delimiter = ',', default_values_t = [0u8, 1, 2, 3])]
    pca_channels: Vec<u8>,
    /// PCA9685 I2C address
    #[clap(long, value_parser = parse_address, default_value = "0x40")]
    pca_address: u8,
    /// I2C bus number of the PCA9685
    #[clap(long, default_value_t = 1)]
    i2c_bus: u8,
    /// Servo pulse width for full reverse, in microseconds
    #[clap(long, default_value_t = 1000)]
    min_pulse_us: u32,
    /// Servo pulse width for full forward, in microseconds
    #[clap(long, default_value_t = 2000)]
    max_pulse_us: u32,
    /// Servo frame length, in microseconds
    #[clap(long, default_value_t = 20000)]
    frame_us: u32,
    /// Status output
    #[clap(long, value_enum, default_value_t = StatusMode::Console)]
    status: StatusMode,
    /// Log filter used when RUST_LOG is not set
    #[clap(long, default_value = "info")]
    log: String,
}

impl Opts {
    fn calibration(&self) -> anyhow::Result<ServoCalibration> {
        if self.min_pulse_us >= self.max_pulse_us || self.max_pulse_us > self.frame_us {
            bail!(
                "pulse range {}..{} us does not fit a {} us frame",
                self.min_pulse_us,
                self.max_pulse_us,
                self.frame_us
            );
        }
        Ok(ServoCalibration {
            min_pulse_us: self.min_pulse_us,
            max_pulse_us: self.max_pulse_us,
            frame_us: self.frame_us,
        })
    }
}

fn parse_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid I2C address {:?}: {}", s, e))
}

/// Exactly one value per wheel, in FL,FR,RL,RR order.
fn per_wheel(
    name: &str,
    values: &[u8],
) -> anyhow::Result<[u8; 4]> {
    values
        .try_into()
        .map_err(|_| anyhow!("--{} needs 4 values (FL,FR,RL,RR), got {}", name, values.len()))
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves on Ctrl-C or SIGTERM.
#[cfg(unix)]
async fn stop_requested() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

/// Resolves on Ctrl-C.
#[cfg(not(unix))]
async fn stop_requested() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Raise `cancel` every time a stop is requested. Never finishes.
async fn forward_stop_requests(cancel: &Signal<CriticalSectionRawMutex, ()>) -> Infallible {
    loop {
        match stop_requested().await {
            Ok(()) => {
                info!("stop requested");
                cancel.signal(());
            }
            Err(e) => {
                warn!(?e, "cannot listen for stop signals, run until killed");
                return core::future::pending().await;
            }
        }
    }
}

/// Run an initialized loop until cancelled, then report how it ended.
async fn drive<O>(
    mut ctl: ControlLoop<O>,
    source: &mut FileCommandSource,
    status: &mut StatusOutput,
) -> anyhow::Result<()>
where
    O: PulseOutput,
{
    let result = tokio::select! {
        res = ctl.run(source, status, &CANCEL) => res,
        never = forward_stop_requests(&CANCEL) => match never {},
    };

    match result {
        Ok(LoopOutcome {
            cycles,
            read_failures,
            state,
            shutdown,
        }) => {
            for (position, e) in shutdown.failures.iter() {
                warn!(%position, "channel did not release cleanly: {}", e);
            }
            info!(cycles, read_failures, ?state, "control loop finished");
            status.notice("Cleanup complete. Script finished.");
            Ok(())
        }
        Err(e) => {
            error!(
                position = %e.position,
                release_failures = e.shutdown.failures.len(),
                "control loop aborted"
            );
            Err(anyhow!("{}", e))
        }
    }
}

#[cfg(feature = "rpi")]
async fn run_gpio(
    opts: &Opts,
    calibration: ServoCalibration,
    period: Duration,
    source: &mut FileCommandSource,
    status: &mut StatusOutput,
) -> anyhow::Result<()> {
    use anyhow::Context;
    use outputs::GpioServo;

    let pins = per_wheel("pins", &opts.pins)?;
    let gpio = rppal::gpio::Gpio::new().context("GPIO peripheral unavailable")?;
    let ctl = ControlLoop::initialize(
        |p| GpioServo::acquire(&gpio, pins[p.index()]),
        calibration,
        period,
    )
    .map_err(|e| anyhow!("{}", e))?;
    drive(ctl, source, status).await
}

#[cfg(feature = "rpi")]
async fn run_pca9685(
    opts: &Opts,
    calibration: ServoCalibration,
    period: Duration,
    source: &mut FileCommandSource,
    status: &mut StatusOutput,
) -> anyhow::Result<()> {
    use anyhow::Context;
    use core::cell::RefCell;
    use pwm_pca9685::{Address, Pca9685};
    use qwd_core::utils::controllers::pca9685::{self, Pca9685Line};

    let indices = per_wheel("pca-channels", &opts.pca_channels)?;
    let mut channels = Vec::with_capacity(4);
    for index in indices {
        channels.push(
            pca9685::channel_from_index(index)
                .ok_or_else(|| anyhow!("PCA9685 channel {} out of range 0-15", index))?,
        );
    }

    let i2c = rppal::i2c::I2c::with_bus(opts.i2c_bus).context("I2C bus unavailable")?;
    let mut pca = Pca9685::new(i2c, Address::from(opts.pca_address))
        .map_err(|e| anyhow!("PCA9685 init failed: {:?}", e))?;
    pca9685::configure(&mut pca, &calibration)
        .map_err(|e| anyhow!("PCA9685 configuration failed: {:?}", e))?;
    let driver = RefCell::new(pca);

    let ctl = ControlLoop::initialize(
        |p| Ok(Pca9685Line::new(&driver, channels[p.index()])),
        calibration,
        period,
    )
    .map_err(|e| anyhow!("{}", e))?;
    drive(ctl, source, status).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_tracing(&opts.log);

    let calibration = opts.calibration()?;
    let period = Duration::from_millis(opts.period_ms);
    let mut source = FileCommandSource::new(&opts.control_file);
    let mut status = StatusOutput::new(opts.status);
    let backend = opts
        .backend
        .to_possible_value()
        .map_or_else(|| format!("{:?}", opts.backend), |v| v.get_name().to_owned());

    status.banner(source.path(), &backend);
    info!(control_file = %source.path().display(), %backend, "starting control node");

    match opts.backend {
        Backend::Sim => {
            let ctl = ControlLoop::initialize(
                |p| Ok::<_, Infallible>(SimServo::new(p)),
                calibration,
                period,
            )
            .map_err(|e| anyhow!("{}", e))?;
            drive(ctl, &mut source, &mut status).await
        }
        #[cfg(feature = "rpi")]
        Backend::Gpio => run_gpio(&opts, calibration, period, &mut source, &mut status).await,
        #[cfg(feature = "rpi")]
        Backend::Pca9685 => {
            run_pca9685(&opts, calibration, period, &mut source, &mut status).await
        }
        #[cfg(not(feature = "rpi"))]
        Backend::Gpio | Backend::Pca9685 => {
            bail!("built without the `rpi` feature; only --backend sim is available")
        }
    }
}
