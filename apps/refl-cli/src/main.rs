use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tracing::info;

use can_transport as can;
use can_transport::CanBus;
use reflectance_array as refl;
use refl::sim::{SimulatedArray, SimulatedBoard};

#[derive(Parser, Debug)]
#[command(
    name = "refl",
    version,
    about = "Reflectance array CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Optional YAML config for the driver
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Stream {
    Analog,
    Digital,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the CAN ID pair of every board slot
    Ids,
    /// Print the command table
    Commands,
    /// Decode one frame into a fresh driver and print the board as JSON
    Decode {
        /// CAN id the frame arrived on (hex with 0x prefix or decimal)
        #[arg(long, default_value = "0x161")]
        id: String,
        /// Data bytes in hex, e.g. 0E 88 13 A5 07
        #[arg(long, num_args = 1.., value_delimiter = ' ')]
        data: Vec<String>,
        /// Number of boards to register before decoding
        #[arg(long, default_value_t = 1usize)]
        boards: usize,
    },
    /// Run the driver against simulated boards on the mock bus
    Simulate {
        #[arg(long, default_value_t = 2usize)]
        boards: usize,
        #[arg(long, value_enum, default_value = "digital")]
        stream: Stream,
        /// Number of test lines to print
        #[arg(long, default_value_t = 10u32)]
        cycles: u32,
        /// Leave the last board silent to watch negotiation give up
        #[arg(long, action = ArgAction::SetTrue)]
        silent_last: bool,
        /// Calibrate and print calibration data first
        #[arg(long, action = ArgAction::SetTrue)]
        calibrate: bool,
    },
    /// Run a short simulation and dump the driver metrics
    Metrics {
        #[arg(long, default_value_t = 1usize)]
        boards: usize,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ids => {
            for (slot, (id_in, id_out)) in refl::CAN_IDS.iter().enumerate() {
                println!("{slot}\tin=0x{id_in:03X}\tout=0x{id_out:03X}");
            }
            Ok(())
        }
        Commands::Commands => {
            for cmd in refl::Command::all() {
                println!("0x{:02X}\t{:?}\t{}", cmd.byte(), cmd, cmd.name());
            }
            Ok(())
        }
        Commands::Decode { id, data, boards } => decode(config, &id, &data, boards),
        Commands::Simulate {
            boards,
            stream,
            cycles,
            silent_last,
            calibrate,
        } => simulate(config, boards, stream, cycles, silent_last, calibrate),
        Commands::Metrics { boards } => metrics(config, boards),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn load_config(path: Option<&str>) -> Result<refl::ArrayConfig> {
    match path {
        Some(p) => refl::load_config_file(p),
        None => Ok(refl::ArrayConfig::default()),
    }
}

fn open_array(
    mut config: refl::ArrayConfig,
    boards: usize,
) -> Result<(refl::ReflectanceArray<can::MockBus, refl::SystemClock>, can::MockBus)> {
    if config.devices.len() < boards {
        for i in config.devices.len()..boards {
            config.devices.push(format!("refl{i}"));
        }
    }
    let bus = can::MockBus::open("mock0")?;
    let handle = bus.clone();
    let array = refl::ReflectanceArray::new(bus, refl::SystemClock::new(), config)?;
    Ok((array, handle))
}

fn decode(config: refl::ArrayConfig, id_str: &str, data_hex: &[String], boards: usize) -> Result<()> {
    let id = parse_id(id_str).ok_or_else(|| anyhow::anyhow!("invalid CAN id: {id_str}"))?;
    let bytes = parse_hex_bytes(data_hex)?;
    if bytes.is_empty() || bytes.len() > 8 {
        anyhow::bail!("expected 1 to 8 data bytes, got {}", bytes.len());
    }
    let mut data = [0u8; 8];
    data[..bytes.len()].copy_from_slice(&bytes);

    let (mut array, _) = open_array(config, boards)?;
    if !array.message_decode(id, &data, bytes.len() as u8) {
        anyhow::bail!("0x{id:03X} belongs to none of the {boards} registered boards");
    }
    if let Some(err) = array.last_error() {
        eprintln!("diagnostic: {err}");
    }
    let device = array
        .registry()
        .slot_for(id)
        .ok_or_else(|| anyhow::anyhow!("no slot for 0x{id:03X}"))?;
    let snapshot = array
        .snapshot(device)
        .ok_or_else(|| anyhow::anyhow!("no snapshot for slot {device}"))?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn simulated(boards: usize, silent_last: bool) -> SimulatedArray {
    let mut sims: Vec<SimulatedBoard> = (0..boards)
        .map(|i| SimulatedBoard::with_line(&[i % refl::SENSOR_COUNT, (i + 1) % refl::SENSOR_COUNT]))
        .collect();
    if silent_last {
        if let Some(last) = sims.last_mut() {
            last.responsive = false;
        }
    }
    SimulatedArray::new(sims)
}

fn simulate(
    config: refl::ArrayConfig,
    boards: usize,
    stream: Stream,
    cycles: u32,
    silent_last: bool,
    calibrate: bool,
) -> Result<()> {
    let period = Duration::from_millis(config.test_period_ms + 1);
    let (mut array, bus) = open_array(config, boards)?;
    let sim = simulated(boards, silent_last);
    sim.attach(&bus)?;

    for device in 0..array.count() {
        let alive = array.alive(device, true);
        info!(device, alive, "ping");
    }
    if calibrate {
        array.calibrate(refl::Target::All);
        array.calibration_data_request(refl::Target::All, true);
        print!("{}", array.calibration_print());
    }

    let mut printed = 0;
    let mut shift = 0usize;
    while printed < cycles {
        if let Some(line) = array.test(matches!(stream, Stream::Analog)) {
            println!("{line}");
            printed += 1;
            // Move the line one transistor to the right on every board.
            shift += 1;
            for device in 0..boards {
                let under = (device + shift) % refl::SENSOR_COUNT;
                sim.update(device, |b| {
                    let moved = SimulatedBoard::with_line(&[under]);
                    b.dark = moved.dark;
                    b.analog = moved.analog;
                    b.center_dark = moved.center_dark;
                });
            }
            bus.clear_sent()?;
        }
        std::thread::sleep(period);
        for frame in sim.tick() {
            bus.inject(frame)?;
        }
        array.service();
    }
    if let Some(err) = array.last_error() {
        eprintln!("last diagnostic: {err}");
    }
    Ok(())
}

fn metrics(config: refl::ArrayConfig, boards: usize) -> Result<()> {
    let hub = refl::MetricsHub::new()?;
    let (array, bus) = open_array(config, boards)?;
    let mut array = array.with_metrics(hub.array.clone());
    simulated(boards, false).attach(&bus)?;
    for device in 0..array.count() {
        array.reading(0, device);
        array.center(device, true);
    }
    print!("{}", hub.encode_text());
    Ok(())
}

fn parse_id(s: &str) -> Option<u32> {
    let t = s.trim();
    let parsed = if let Some(hex) = t.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        t.parse::<u32>().ok()?
    };
    can::CanId::standard(u16::try_from(parsed).ok()?).map(|id| id.raw())
}

fn parse_hex_bytes(items: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(items.len());
    for s in items.iter().filter(|s| !s.trim().is_empty()) {
        let t = s.trim();
        let no_prefix = t.strip_prefix("0x").unwrap_or(t);
        let b = u8::from_str_radix(no_prefix, 16)
            .map_err(|e| anyhow::anyhow!("invalid hex byte '{t}': {e}"))?;
        out.push(b);
    }
    Ok(out)
}
