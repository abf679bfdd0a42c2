//! Device API against the simulated instrument.

use std::fs;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use evi_core::EviError;
use evi_hardware::simulator::serve;
use evi_hardware::{
    DefaultConnector, Dispatcher, EviFluor, SimulatedConnector, Simulator, TransportSettings,
    SIMULATION,
};
use parking_lot::Mutex;
use tempfile::tempdir;

fn simulated(checksum: bool) -> (EviFluor, Arc<Mutex<Simulator>>) {
    let connector = SimulatedConnector::new(Simulator::new());
    let device = connector.device();
    let dispatcher = Dispatcher::new(connector)
        .with_port(SIMULATION)
        .with_checksum(checksum);
    (EviFluor::new(dispatcher), device)
}

#[test]
fn identity_values() {
    let (evi, _) = simulated(false);
    assert_eq!(evi.serial_number().unwrap(), "1000");
    assert_eq!(evi.firmware_version().unwrap(), "1.4.2");
}

#[test]
fn every_call_opens_and_closes_one_transport() {
    let (evi, device) = simulated(true);
    evi.baseline().unwrap();
    evi.measure().unwrap();
    let _ = evi.logging_line();

    let device = device.lock();
    assert_eq!(device.connections(), 3);
    assert_eq!(device.open_transports(), 0);
}

#[test]
fn measure_and_last_measurements() {
    let (evi, _) = simulated(true);
    evi.set(15, "40").unwrap();
    let first = evi.measure().unwrap();
    evi.set(15, "200").unwrap();
    let second = evi.measure().unwrap();

    assert_eq!(first.led_power(), 40);
    assert_eq!(second.value(), 112.0);
    assert_eq!(evi.last_measurement_count().unwrap(), 2);
    assert_eq!(evi.last_measurement(0).unwrap(), second);
    assert_eq!(evi.last_measurement(1).unwrap(), first);
}

#[test]
fn autogain_and_first_sample() {
    let (evi, device) = simulated(false);
    device.lock().set_response(10.0);

    let first = evi.measure_first_sample(2000).unwrap();
    assert!(first.autogain.found);
    assert_eq!(first.autogain.led_power, 200);
    assert_eq!(first.measurement.value(), 2012.0);
}

#[test]
fn first_air_uses_led_limits() {
    let (evi, _) = simulated(false);
    let first_air = evi.measure_first_air().unwrap();
    assert_eq!(first_air.min.led_power(), 32);
    assert_eq!(first_air.max.led_power(), 222);
    assert_eq!(first_air.max.value(), 12.0 + 111.0);
}

#[test]
fn logging_drains_until_device_error() {
    let (evi, device) = simulated(false);
    device.lock().push_logging("boot ok");
    evi.measure().unwrap();

    let lines = evi.drain_logging();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "boot ok");
    assert!(evi.logging_line().unwrap_err().is_device_code(11));
}

#[test]
fn device_errors_surface_with_code() {
    let (evi, device) = simulated(false);
    assert!(matches!(
        evi.command("Z"),
        Err(EviError::Device { code: 1 })
    ));

    device.lock().inject_error(3);
    let err = evi.measure().unwrap_err();
    assert_eq!(err.code(), 3);
}

#[test]
fn raw_command_returns_tokens() {
    let (evi, device) = simulated(true);
    device.lock().set_cuvette_holder_empty(false);
    assert_eq!(evi.command("X").unwrap(), vec!["X".to_string(), "0".to_string()]);
    assert!(!evi.is_cuvette_holder_empty().unwrap());
}

#[test]
fn selftest_result() {
    let (evi, device) = simulated(false);
    device.lock().set_selftest_result(0x14);
    assert_eq!(evi.selftest().unwrap(), 0x14);
}

#[test]
fn firmware_update_holds_one_session() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("fw.srec");
    fs::write(&image, "S00600004844521B\r\n\nS1130000285F245F2212226A000424290008237C2A\r\nS9030000FC\n").unwrap();

    let (evi, device) = simulated(true);
    let sent = evi.update_firmware(&image, Duration::ZERO).unwrap();

    let device = device.lock();
    assert_eq!(sent, 3);
    assert_eq!(device.firmware_records(), 3);
    assert!(!device.in_firmware_mode());
    assert_eq!(device.connections(), 1);
    assert_eq!(device.open_transports(), 0);
}

#[test]
fn firmware_update_missing_image() {
    let dir = tempdir().unwrap();
    let (evi, device) = simulated(false);
    let err = evi
        .update_firmware(&dir.path().join("missing.srec"), Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, EviError::FileNotFound(_)));
    assert_eq!(device.lock().connections(), 0);
}

#[test]
fn firmware_update_releases_transport_on_failure() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("fw.srec");
    fs::write(&image, "S00600004844521B\n").unwrap();

    let (evi, device) = simulated(false);
    device.lock().inject_error(4);
    assert!(evi.update_firmware(&image, Duration::ZERO).is_err());
    assert_eq!(device.lock().open_transports(), 0);
}

#[test]
fn loopback_tcp_simulator() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let device = Arc::new(Mutex::new(Simulator::new().with_serial_number("4711")));
    let served = Arc::clone(&device);
    thread::spawn(move || serve(&listener, &served));

    let connector = DefaultConnector::new(TransportSettings {
        simulation_address: address,
        ..TransportSettings::default()
    });
    let evi = EviFluor::new(
        Dispatcher::new(connector)
            .with_port(SIMULATION)
            .with_checksum(true),
    );

    assert_eq!(evi.serial_number().unwrap(), "4711");
    evi.baseline().unwrap();
    assert!(device.lock().pending_logging() >= 1);
}
