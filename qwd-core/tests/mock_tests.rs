use core::cell::RefCell;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::Duration;
use embedded_hal_bus::i2c::RefCellDevice;
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};
use pwm_pca9685::{Address as PwmAddress, Channel, Pca9685};
use qwd_core::utils::controllers::{
    pca9685::{configure, Pca9685Line},
    ChannelState, CommandSource, ControlLoop, CycleReport, LoopState, Position, PulseOutput,
    PulseWidth, ServoCalibration, StatusSink,
};
use qwd_core::utils::math::drive::{CommandCode, Maneuver};

/// I2C address used for the PWM driver in these tests.
pub const PWM_ADDRESS: u8 = 0x40;

/// Create a write transaction for the given I2C address and data payload.
pub fn write(
    addr: u8,
    data: Vec<u8>,
) -> I2cTrans {
    I2cTrans::write(addr, data)
}

#[test]
fn test_configure_pwm_for_servo_frame() {
    // Enable, then sleep / prescale / wake for a 50 Hz frame
    let expectations = [
        write(PWM_ADDRESS, vec![0x00, 0x01]),
        write(PWM_ADDRESS, vec![0x00, 0x11]),
        write(PWM_ADDRESS, vec![0xFE, 121]),
        write(PWM_ADDRESS, vec![0x00, 0x01]),
    ];

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut pwm = Pca9685::new(RefCellDevice::new(&i2c_bus), PwmAddress::from(PWM_ADDRESS)).unwrap();
    configure(&mut pwm, &ServoCalibration::default()).unwrap();
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_line_pulse_register_writes() {
    // One auto-increment enable, then one ON/OFF write per channel
    let expectations = [
        write(PWM_ADDRESS, vec![0x00, 0x31]),
        write(PWM_ADDRESS, vec![0x06, 0x00, 0x00, 0x33, 0x01]),
        write(PWM_ADDRESS, vec![0x0A, 0x00, 0x00, 0x7D, 0x01]),
    ];

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let pwm = Pca9685::new(RefCellDevice::new(&i2c_bus), PwmAddress::from(PWM_ADDRESS)).unwrap();
    let driver = RefCell::new(pwm);

    let mut fl = Pca9685Line::new(&driver, Channel::C0);
    let mut fr = Pca9685Line::new(&driver, Channel::C1);
    fl.set_pulse(PulseWidth {
        period_us: 20_000,
        high_us: 1_500,
    })
    .unwrap();
    fr.set_pulse(PulseWidth {
        period_us: 20_000,
        high_us: 1_863,
    })
    .unwrap();
    i2c_bus.borrow_mut().done();
}

/// Output that only remembers whether it is currently pulsing.
struct Flag<'a>(&'a RefCell<[bool; 4]>, usize);

impl PulseOutput for Flag<'_> {
    type Error = ();

    fn set_pulse(
        &mut self,
        _pulse: PulseWidth,
    ) -> Result<(), ()> {
        self.0.borrow_mut()[self.1] = true;
        Ok(())
    }

    fn detach(&mut self) -> Result<(), ()> {
        self.0.borrow_mut()[self.1] = false;
        Ok(())
    }
}

/// Plays back a list of codes, then raises the cancel signal.
struct Playback<'a> {
    codes: Vec<Option<u32>>,
    cancel: &'a Signal<CriticalSectionRawMutex, ()>,
}

impl CommandSource for Playback<'_> {
    type Error = &'static str;

    fn read_latest(&mut self) -> Result<CommandCode, Self::Error> {
        let next = self.codes.remove(0);
        if self.codes.is_empty() {
            self.cancel.signal(());
        }
        next.map(CommandCode).ok_or("malformed")
    }
}

#[derive(Default)]
struct Collect(Vec<CycleReport>);

impl StatusSink for Collect {
    fn report(
        &mut self,
        report: &CycleReport,
    ) {
        self.0.push(*report);
    }
}

#[test]
fn run_until_cancelled_then_detach_everything() {
    let pulsing = RefCell::new([false; 4]);
    let cancel = Signal::<CriticalSectionRawMutex, ()>::new();
    let mut ctl = ControlLoop::initialize(
        |p: Position| Ok(Flag(&pulsing, p.index())),
        ServoCalibration::default(),
        Duration::from_millis(5),
    )
    .unwrap();

    let mut source = Playback {
        codes: vec![Some(1), None, Some(4)],
        cancel: &cancel,
    };
    let mut sink = Collect::default();

    let outcome = futures_lite::future::block_on(ctl.run(&mut source, &mut sink, &cancel)).unwrap();

    assert_eq!(outcome.cycles, 3);
    assert_eq!(outcome.read_failures, 1);
    assert_eq!(outcome.state, LoopState::Interrupted);
    assert!(outcome.shutdown.is_clean());
    assert_eq!(ctl.state(), LoopState::Terminated);

    let labels: Vec<_> = sink.0.iter().map(|r| r.maneuver).collect();
    assert_eq!(labels, [Maneuver::Forward, Maneuver::Stop, Maneuver::Right]);
    assert_eq!(*pulsing.borrow(), [false; 4]);
    assert!(ctl
        .channel_states()
        .iter()
        .all(|s| *s == ChannelState::Detached));
}

#[test]
fn run_already_cancelled_never_drives() {
    let pulsing = RefCell::new([false; 4]);
    let cancel = Signal::<CriticalSectionRawMutex, ()>::new();
    cancel.signal(());
    let mut ctl = ControlLoop::initialize(
        |p: Position| Ok(Flag(&pulsing, p.index())),
        ServoCalibration::default(),
        Duration::from_millis(5),
    )
    .unwrap();
    let mut source = Playback {
        codes: vec![Some(6)],
        cancel: &cancel,
    };
    let mut sink = Collect::default();

    let outcome = futures_lite::future::block_on(ctl.run(&mut source, &mut sink, &cancel)).unwrap();
    assert_eq!(outcome.cycles, 0);
    assert_eq!(outcome.state, LoopState::Interrupted);
    assert!(sink.0.is_empty());
    assert_eq!(ctl.state(), LoopState::Terminated);
}

#[test]
fn cancel_cuts_a_long_pause_short() {
    let pulsing = RefCell::new([false; 4]);
    let cancel = Signal::<CriticalSectionRawMutex, ()>::new();
    let mut ctl = ControlLoop::initialize(
        |p: Position| Ok(Flag(&pulsing, p.index())),
        ServoCalibration::default(),
        Duration::from_secs(60),
    )
    .unwrap();
    let mut source = Playback {
        codes: vec![Some(3)],
        cancel: &cancel,
    };
    let mut sink = Collect::default();

    let started = std::time::Instant::now();
    let outcome = futures_lite::future::block_on(ctl.run(&mut source, &mut sink, &cancel)).unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(outcome.cycles, 1);
    assert_eq!(outcome.state, LoopState::Interrupted);
    assert_eq!(*pulsing.borrow(), [false; 4]);
}
