use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use sysgpio::{
    Attribute, Direction, EdgeWaiter, GpioError, PinController, PinValue, SysfsConfig, SysfsFs,
    Wakeup,
};
use tempfile::TempDir;

/// Lays out a directory the way sysfs looks after `pins` have been exported.
fn fake_tree(pins: &[u32]) -> TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    fs::write(dir.path().join("export"), "").unwrap();
    fs::write(dir.path().join("unexport"), "").unwrap();
    for pin in pins {
        let pin_dir = dir.path().join(format!("gpio{pin}"));
        fs::create_dir(&pin_dir).unwrap();
        for attr in ["direction", "edge", "value"] {
            fs::write(pin_dir.join(attr), "").unwrap();
        }
    }
    dir
}

fn controller(root: &Path) -> Arc<PinController<SysfsFs>> {
    Arc::new(PinController::new(
        Arc::new(SysfsConfig::with_root(root)),
        Arc::new(SysfsFs::new()),
    ))
}

fn contents(path: impl AsRef<Path>) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn control_files_receive_decimal_pin() {
    let tree = fake_tree(&[]);
    let gpio = controller(tree.path());

    gpio.export(60).unwrap();
    assert_eq!(contents(tree.path().join("export")), "60");
    gpio.try_unexport(60).unwrap();
    assert_eq!(contents(tree.path().join("unexport")), "60");
}

#[test]
fn attributes_receive_literals() {
    let tree = fake_tree(&[60, 61]);
    let gpio = controller(tree.path());

    gpio.set_direction(60, Direction::Out).unwrap();
    assert_eq!(contents(gpio.attr_path(60, Attribute::Direction)), "out");
    gpio.set_direction(61, Direction::In).unwrap();
    assert_eq!(contents(gpio.attr_path(61, Attribute::Direction)), "in");

    gpio.set_edge(60, false, false).unwrap();
    assert_eq!(contents(gpio.attr_path(60, Attribute::Edge)), "");
    gpio.set_edge(60, true, true).unwrap();
    assert_eq!(contents(gpio.attr_path(60, Attribute::Edge)), "both");
}

#[test]
fn value_round_trip() {
    let tree = fake_tree(&[60]);
    let gpio = controller(tree.path());

    gpio.write_value(60, PinValue::High).unwrap();
    assert_eq!(contents(gpio.attr_path(60, Attribute::Value)), "1\n");
    assert_eq!(gpio.read_value(60).unwrap(), PinValue::High);

    gpio.write_value(60, PinValue::Low).unwrap();
    assert_eq!(gpio.read_value(60).unwrap(), PinValue::Low);
}

#[test]
fn empty_value_file_exhausts_retries() {
    let tree = fake_tree(&[60]);
    let gpio = controller(tree.path());

    let err = gpio.read_value(60).unwrap_err();
    assert!(matches!(err, GpioError::ReadFailed { .. }), "{err}");
}

#[test]
fn garbage_value_is_a_read_failure() {
    let tree = fake_tree(&[60]);
    let gpio = controller(tree.path());
    fs::write(gpio.attr_path(60, Attribute::Value), "x\n").unwrap();

    let err = gpio.read_value(60).unwrap_err();
    assert!(matches!(err, GpioError::ReadFailed { .. }), "{err}");
}

#[test]
fn missing_pin_directory() {
    let tree = fake_tree(&[]);
    let gpio = controller(tree.path());

    assert!(matches!(
        gpio.set_direction(60, Direction::Out),
        Err(GpioError::ResourceUnavailable { .. })
    ));
    assert!(matches!(
        gpio.read_value(60),
        Err(GpioError::ResourceUnavailable { .. })
    ));
    assert!(matches!(
        gpio.write_value(60, PinValue::High),
        Err(GpioError::InvalidState { .. })
    ));
}

#[test]
fn unexport_without_control_file_is_quiet() {
    let tree = fake_tree(&[]);
    fs::remove_file(tree.path().join("unexport")).unwrap();
    let gpio = controller(tree.path());

    assert!(matches!(
        gpio.try_unexport(60),
        Err(GpioError::ResourceUnavailable { .. })
    ));
    gpio.unexport(60);
}

#[test]
fn blocked_wait_can_be_cancelled() {
    let tree = fake_tree(&[60]);
    let gpio = controller(tree.path());
    fs::write(gpio.attr_path(60, Attribute::Value), "0\n").unwrap();

    // regular files never raise POLLPRI, so only the stop signal ends this wait
    let waiter = EdgeWaiter::spawn(gpio.clone(), 60).unwrap();
    sleep(Duration::from_millis(50));
    assert!(!waiter.is_finished());

    waiter.cancel();
    assert_eq!(waiter.join().unwrap(), Wakeup::Cancelled);
}
