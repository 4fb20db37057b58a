use std::sync::Arc;

use bcm_gpiomem::board::regs;
use bcm_gpiomem::gpio::{Function, Pull, SimulatedPeripheral};
use bcm_gpiomem::{board::Soc, Error, Gpio, Level, Mode};

fn simulated() -> (Gpio, Arc<SimulatedPeripheral>) {
    let sim = Arc::new(SimulatedPeripheral::default());
    (Gpio::simulated(sim.clone()), sim)
}

#[test]
fn reopening_an_open_port_fails_in_any_mode() {
    let (gpio, _sim) = simulated();
    let _pin = gpio.open_pin(17, Mode::Output).unwrap();
    assert!(matches!(
        gpio.open_pin(17, Mode::Output),
        Err(Error::AlreadyOpen(17))
    ));
    assert!(matches!(
        gpio.open_pin(17, Mode::Input),
        Err(Error::AlreadyOpen(17))
    ));
    assert_eq!(gpio.open_count(), 1);
}

#[test]
fn output_round_trip_then_reopen_as_input() {
    let (gpio, _sim) = simulated();
    let mut pin = gpio.open_pin(23, Mode::Output).unwrap();
    assert_eq!(gpio.function(23).unwrap(), Function::Output);
    pin.set().unwrap();
    pin.clear().unwrap();
    pin.close().unwrap();
    assert_eq!(gpio.function(23).unwrap(), Function::Input);

    let pin = gpio.open_pin(23, Mode::Input).unwrap();
    assert_eq!(pin.mode(), Mode::Input);
    assert_eq!(gpio.function(23).unwrap(), Function::Input);
}

#[test]
fn set_and_clear_drive_the_level() {
    let (gpio, sim) = simulated();
    let mut pin = gpio.open_pin(22, Mode::Output).unwrap();
    pin.set().unwrap();
    assert_eq!(sim.level(22), Level::High);
    assert_eq!(sim.word(regs::GPLEV0), 1 << 22);
    pin.clear().unwrap();
    assert_eq!(sim.level(22), Level::Low);
    pin.set_level(Level::High).unwrap();
    assert_eq!(sim.level(22), Level::High);
}

#[test]
fn neighbouring_outputs_are_independent() {
    let (gpio, sim) = simulated();
    let mut a = gpio.open_pin(31, Mode::Output).unwrap();
    let mut b = gpio.open_pin(32, Mode::Output).unwrap();
    let mut c = gpio.open_pin(30, Mode::Output).unwrap();
    a.set().unwrap();
    b.set().unwrap();
    c.set().unwrap();
    a.clear().unwrap();
    assert_eq!(sim.level(31), Level::Low);
    assert_eq!(sim.level(32), Level::High);
    assert_eq!(sim.level(30), Level::High);
    // Closing one pin leaves the function of its word neighbours alone
    drop(c);
    assert_eq!(gpio.function(30).unwrap(), Function::Input);
    assert_eq!(gpio.function(31).unwrap(), Function::Output);
}

#[test]
fn wrong_mode_operations_are_rejected() {
    let (gpio, _sim) = simulated();
    let mut input = gpio.open_pin(5, Mode::Input).unwrap();
    let mut output = gpio.open_pin(6, Mode::Output).unwrap();

    assert!(matches!(
        input.set(),
        Err(Error::InvalidOperation { port: 5, mode: Mode::Input, op: "set" })
    ));
    assert!(matches!(input.clear(), Err(Error::InvalidOperation { .. })));
    assert!(matches!(
        output.read(),
        Err(Error::InvalidOperation { port: 6, mode: Mode::Output, op: "read" })
    ));
    assert!(matches!(
        output.set_pull(Pull::Up),
        Err(Error::InvalidOperation { .. })
    ));
    assert!(matches!(
        output.begin_watch(bcm_gpiomem::Edge::Falling, |_| {}),
        Err(Error::InvalidOperation { .. })
    ));
    assert!(input.set_pull(Pull::Up).is_ok());
}

#[test]
fn input_reads_external_level() {
    let (gpio, sim) = simulated();
    let pin = gpio.open_pin(40, Mode::Input).unwrap();
    assert_eq!(pin.read().unwrap(), Level::Low);
    sim.drive(40, Level::High);
    assert_eq!(pin.read().unwrap(), Level::High);
}

#[test]
fn out_of_range_port() {
    let (gpio, _sim) = simulated();
    assert!(matches!(
        gpio.open_pin(54, Mode::Output),
        Err(Error::OutOfRange(_))
    ));
    assert!(matches!(gpio.function(200), Err(Error::OutOfRange(_))));
}

#[test]
fn teardown_waits_for_open_pins() {
    let (gpio, _sim) = simulated();
    let pin = gpio.open_pin(12, Mode::Output).unwrap();
    assert!(matches!(gpio.close(), Err(Error::PinsOpen(1))));
    pin.close().unwrap();
    gpio.close().unwrap();
    // The next open maps the block again
    let pin = gpio.open_pin(12, Mode::Input).unwrap();
    assert_eq!(pin.read().unwrap(), Level::Low);
}

#[test]
fn concurrent_opens_of_one_port_yield_one_handle() {
    let (gpio, _sim) = simulated();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gpio = gpio.clone();
            std::thread::spawn(move || gpio.open_pin(26, Mode::Output))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let opened = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(Error::AlreadyOpen(26))))
        .count();
    assert_eq!((opened, refused), (1, 7));
}

#[test]
fn pull_on_bcm2711_board() {
    let sim = Arc::new(SimulatedPeripheral::new(Soc::Bcm2711));
    let gpio = Gpio::simulated(sim.clone());
    let mut pin = gpio.open_pin(0, Mode::Input).unwrap();
    pin.set_pull(Pull::Down).unwrap();
    assert_eq!(sim.word(regs::GPIO_PUP_PDN_CNTRL_REG0) & 0b11, 0b10);
}

#[test]
fn missing_device_fails_at_first_open() {
    let dir = tempfile::tempdir().unwrap();
    let gpio = Gpio::with_config(bcm_gpiomem::GpioConfig {
        device: dir.path().join("gpiomem"),
        fallback_device: None,
        ..Default::default()
    });
    assert!(matches!(
        gpio.open_pin(4, Mode::Output),
        Err(Error::UnsupportedPlatform(_))
    ));
    assert_eq!(gpio.open_count(), 0);
}

#[test]
fn unreadable_device_is_permission_denied() {
    use std::os::unix::fs::PermissionsExt;

    // Root ignores file permissions, nothing to check then
    if unsafe { libc::geteuid() } == 0 {
        return;
    }
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(4096).unwrap();
    std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o200)).unwrap();
    let gpio = Gpio::with_config(bcm_gpiomem::GpioConfig {
        device: file.path().to_path_buf(),
        fallback_device: None,
        soc: Some(Soc::Bcm2711),
        ..Default::default()
    });
    assert!(matches!(
        gpio.open_pin(4, Mode::Output),
        Err(Error::PermissionDenied { .. })
    ));
}

#[test]
fn controllers_for_one_device_share_reservations() {
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(4096).unwrap();
    let config = bcm_gpiomem::GpioConfig {
        device: file.path().to_path_buf(),
        fallback_device: None,
        soc: Some(Soc::Bcm2711),
        ..Default::default()
    };
    let a = Gpio::with_config(config.clone());
    let b = Gpio::with_config(config);
    let _pin = a.open_pin(17, Mode::Output).unwrap();
    assert!(matches!(
        b.open_pin(17, Mode::Input),
        Err(Error::AlreadyOpen(17))
    ));
    assert_eq!(b.open_count(), 1);
}

#[test]
fn controllers_for_one_simulated_block_share_reservations() {
    let sim = Arc::new(SimulatedPeripheral::default());
    let a = Gpio::simulated(sim.clone());
    let b = Gpio::simulated(sim.clone());
    let mut out = a.open_pin(5, Mode::Output).unwrap();
    assert!(matches!(
        b.open_pin(5, Mode::Input),
        Err(Error::AlreadyOpen(5))
    ));
    out.set().unwrap();
    assert_eq!(a.function(5).unwrap(), Function::Output);
    assert_eq!(sim.level(5), Level::High);

    // A different block gets its own controller
    let other = Gpio::simulated(Arc::new(SimulatedPeripheral::default()));
    other.open_pin(5, Mode::Input).unwrap();
}

#[test]
fn device_controller_is_released_with_its_last_handle() {
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(4096).unwrap();
    let config = bcm_gpiomem::GpioConfig {
        device: file.path().to_path_buf(),
        fallback_device: None,
        soc: Some(Soc::Bcm2711),
        poll_interval_us: 250,
    };
    let gpio = Gpio::with_config(config.clone());
    gpio.open_pin(3, Mode::Output).unwrap().close().unwrap();
    drop(gpio);
    // Nothing holds the old controller, so the next one starts without reservations
    let gpio = Gpio::with_config(config);
    assert_eq!(gpio.open_count(), 0);
    gpio.open_pin(3, Mode::Input).unwrap();
}
