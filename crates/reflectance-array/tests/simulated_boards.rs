use can_transport::{CanBus, CanFrame, CanId, MockBus};
use reflectance_array::sim::{SimulatedArray, SimulatedBoard};
use reflectance_array::{
    common, ArrayConfig, Clock, DriverError, ManualClock, MetricsHub, Mode, ReflectanceArray,
    Target,
};

type Array = ReflectanceArray<MockBus, ManualClock>;

fn setup(boards: Vec<SimulatedBoard>) -> anyhow::Result<(Array, MockBus, SimulatedArray)> {
    let bus = MockBus::open("mock0")?;
    let handle = bus.clone();
    let config = ArrayConfig {
        devices: (0..boards.len()).map(|i| format!("refl{i}")).collect(),
        ..ArrayConfig::default()
    };
    let sim = SimulatedArray::new(boards);
    sim.attach(&handle)?;
    let array = ReflectanceArray::new(bus, ManualClock::starting_at(1_000), config)?;
    Ok((array, handle, sim))
}

fn starts(bus: &MockBus) -> anyhow::Result<usize> {
    Ok(bus
        .sent()?
        .iter()
        .filter(|f| f.data[0] == common::MEASURE_CONTINUOUS)
        .count())
}

#[test]
fn center_frame_scenario() -> anyhow::Result<()> {
    let (mut array, bus, _) = setup(vec![SimulatedBoard::default(), SimulatedBoard::default()])?;
    bus.clear_responder()?;
    array.message_decode(0x161, &[0x0E, 0x88, 0x13, 0xA5, 0x07, 0, 0, 0], 5);

    let slot = array.slot(0).ok_or_else(|| anyhow::anyhow!("slot 0"))?;
    assert_eq!(slot.center, 5000);
    assert_eq!(slot.readings.digital().copied(), Some([1, 0, 1, 0, 0, 1, 0, 1, 7]));
    // Device 1 untouched.
    assert_eq!(array.slot(1).map(|s| s.center), Some(0));
    Ok(())
}

#[test]
fn analog_reading_negotiates_once() -> anyhow::Result<()> {
    let mut board = SimulatedBoard::default();
    board.analog = [10, 20, 30, 40, 50, 60, 70, 80, 90];
    let (mut array, bus, _) = setup(vec![board])?;

    assert_eq!(array.reading(0, 0), 10);
    assert_eq!(starts(&bus)?, 1);
    assert_eq!(array.slot(0).and_then(|s| s.mode), Some(Mode::Analog));

    // Within the inactivity window nothing more goes out.
    for t in 0..9 {
        assert_eq!(array.reading(t, 0), (t as u16 + 1) * 10);
    }
    assert_eq!(starts(&bus)?, 1);
    assert!(array.alive(0, false));
    Ok(())
}

#[test]
fn switching_modes_renegotiates() -> anyhow::Result<()> {
    let (mut array, bus, _) = setup(vec![SimulatedBoard::with_line(&[3, 4, 5])])?;

    assert_eq!(array.center(0, true), 5000);
    assert!(array.dark(4, 0, false));
    assert!(!array.dark(0, 0, false));
    assert_eq!(starts(&bus)?, 1);

    assert_eq!(array.reading(4, 0), 150);
    assert_eq!(starts(&bus)?, 2);

    // Bright-center mode flips the bits on the wire; the answers must not change.
    assert_eq!(array.center(0, false), 5000);
    assert_eq!(array.slot(0).and_then(|s| s.mode), Some(Mode::DigitalBrightCenter));
    assert!(array.dark(4, 0, false));
    assert!(!array.dark(0, 0, false));
    assert!(array.any(true, 0, 0, 0xFF));
    assert!(array.any(false, 0, 0, 0xFF));
    assert_eq!(starts(&bus)?, 3);
    Ok(())
}

#[test]
fn silent_board_reports_dead_after_eight_attempts() -> anyhow::Result<()> {
    let silent = SimulatedBoard {
        responsive: false,
        ..SimulatedBoard::default()
    };
    let (mut array, bus, _) = setup(vec![SimulatedBoard::default(), silent])?;

    assert_eq!(array.center(1, true), 0);
    assert_eq!(starts(&bus)?, 8);
    assert!(matches!(
        array.last_error(),
        Some(DriverError::DeviceDead { device: 1 })
    ));
    assert_eq!(array.clock().now_ms(), 1_400);

    // The healthy board is unaffected.
    assert_eq!(array.reading(2, 0), 500);
    Ok(())
}

#[test]
fn calibration_round_trip() -> anyhow::Result<()> {
    let mut board = SimulatedBoard::default();
    board.calibration_dark = [101, 102, 103, 104, 105, 106, 107, 108, 109];
    board.calibration_bright = [901, 902, 903, 904, 905, 906, 907, 908, 909];
    let (mut array, bus, _) = setup(vec![board])?;

    assert!(array.alive(0, true));
    assert!(array.calibrate(Target::All));
    assert!(array.alive(0, false));
    assert!(array.calibration_data_request(Target::Device(0), true));
    assert_eq!(array.calibration_data_get(0, true, 0), 101);
    assert_eq!(array.calibration_data_get(8, false, 0), 909);
    let printed = array.calibration_print();
    assert!(printed.starts_with("Calibration for refl0."));
    assert!(printed.contains("Dark:  101 102"));

    let sent: Vec<u8> = bus.sent()?.iter().map(|f| f.data[0]).collect();
    assert_eq!(sent, vec![common::REPORT_ALIVE, 0x09, 0x0D]);
    Ok(())
}

#[test]
fn calibration_needs_a_live_board() -> anyhow::Result<()> {
    let (mut array, bus, _) = setup(vec![SimulatedBoard::default()])?;
    assert!(!array.calibrate(Target::Device(0)));
    assert!(bus.sent()?.is_empty());

    bus.clear_responder()?;
    bus.inject(CanFrame::new(
        CanId::standard(0x161).ok_or_else(|| anyhow::anyhow!("id"))?,
        &[common::REPORT_ALIVE],
    )
    .ok_or_else(|| anyhow::anyhow!("frame"))?)?;
    array.service();
    assert!(!array.calibrate(Target::Device(0)));
    assert!(matches!(
        array.last_error(),
        Some(DriverError::CalibrationTimeout { device: 0 })
    ));
    Ok(())
}

#[test]
fn test_lines_are_rate_limited() -> anyhow::Result<()> {
    let (mut array, _, sim) = setup(vec![
        SimulatedBoard::with_line(&[0]),
        SimulatedBoard::with_line(&[8]),
    ])?;
    assert!(array.alive(0, true));
    assert!(array.alive(1, true));

    let line = array.test(false).ok_or_else(|| anyhow::anyhow!("first line"))?;
    assert_eq!(line, "100000000 c:1000| 000000001 c:9000");
    assert!(array.test(false).is_none());

    sim.update(0, |b| b.analog[0] = 42);
    array.clock().clone().advance(301);
    let line = array.test(true).ok_or_else(|| anyhow::anyhow!("analog line"))?;
    assert!(line.starts_with(" 42 500 "));
    Ok(())
}

#[test]
fn metrics_follow_traffic() -> anyhow::Result<()> {
    let hub = MetricsHub::new()?;
    let (array, bus, _) = setup(vec![SimulatedBoard::default()])?;
    let mut array = array.with_metrics(hub.array.clone());
    assert_eq!(array.reading(0, 0), 500);
    bus.inject(CanFrame::new(
        CanId::standard(0x300).ok_or_else(|| anyhow::anyhow!("id"))?,
        &[1],
    )
    .ok_or_else(|| anyhow::anyhow!("frame"))?)?;
    array.service();

    let text = hub.encode_text();
    assert!(text.contains("refl_frames_decoded 3"));
    assert!(text.contains("refl_frames_unclaimed 1"));
    assert!(text.contains("refl_start_commands 1"));
    assert!(text.contains("refl_boards_registered 1"));
    Ok(())
}
