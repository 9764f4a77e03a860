use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use multicam::config::Config;
use multicam::frame::{RgbFrame, Size};
use multicam::hal::Facing;
use multicam::orchestrator::{
    LogicalCameraStream, MultiCamWatcher, SnapshotCapture, DEFAULT_BUFFER_SLOTS,
};
use multicam::sim::{SimCamera, SimulatedRig};

/// Parse and validate a frame size (WIDTHxHEIGHT, both even)
fn parse_size(s: &str) -> Result<Size, String> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid size format '{}'. Use WIDTHxHEIGHT (e.g., 640x480)",
            s
        ));
    }
    let width: u32 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid width '{}' in size", parts[0]))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid height '{}' in size", parts[1]))?;
    if width == 0 || height == 0 {
        return Err("Size width and height must be greater than 0".to_string());
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err("Size width and height must be even (4:2:0 chroma)".to_string());
    }
    Ok(Size::new(width, height))
}

/// Parse and validate the simulated camera count (1-16)
fn parse_camera_count(s: &str) -> Result<usize, String> {
    let count: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid camera count", s))?;
    if !(1..=16).contains(&count) {
        return Err(format!(
            "Camera count must be between 1 and 16, got {}",
            count
        ));
    }
    Ok(count)
}

/// multicam: multi-camera capture orchestration
#[derive(Parser)]
#[command(name = "multicam")]
#[command(version, about = "Multi-camera capture orchestration")]
#[command(long_about = "Coordinate capture sessions across many cameras and decode \
    their raw 4:2:0 buffers into RGB frames. The demo subcommands run against a \
    simulated camera rig, so no hardware is required.")]
#[command(after_help = "EXAMPLES:
    # Show the simulated rig
    multicam list-devices --cameras 3

    # One bounded snapshot across all cameras
    multicam snapshot --deadline-ms 500

    # Continuously watch all cameras until Ctrl+C
    multicam watch --cameras 4

    # Stream the back-facing logical multi-camera device
    multicam stream --size 320x240 --frames 10")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the devices of the simulated rig
    ListDevices {
        /// Number of simulated cameras
        #[arg(long, value_parser = parse_camera_count)]
        cameras: Option<usize>,
    },

    /// Capture one frame from every camera, bounded by a per-device deadline
    Snapshot {
        /// Per-device deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Number of simulated cameras
        #[arg(long, value_parser = parse_camera_count)]
        cameras: Option<usize>,

        /// Custom config file path (default: ~/.config/multicam/config.toml)
        #[arg(long, short = 'c')]
        config: Option<String>,
    },

    /// Keep all cameras streaming and print the latest frames until Ctrl+C
    Watch {
        /// Interval between polls in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Stop after this many milliseconds (default: run until Ctrl+C)
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Number of simulated cameras
        #[arg(long, value_parser = parse_camera_count)]
        cameras: Option<usize>,

        /// Custom config file path (default: ~/.config/multicam/config.toml)
        #[arg(long, short = 'c')]
        config: Option<String>,
    },

    /// Stream frames from the back-facing logical multi-camera device
    Stream {
        /// Output size (WIDTHxHEIGHT, even dimensions)
        #[arg(long, value_parser = parse_size, default_value = "320x240")]
        size: Size,

        /// Number of frames to receive before stopping
        #[arg(long, default_value_t = 10)]
        frames: u32,

        /// Number of simulated cameras
        #[arg(long, value_parser = parse_camera_count)]
        cameras: Option<usize>,
    },
}

/// Global flag for handling Ctrl+C across the watch loop
static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

fn ctrlc_received() -> bool {
    CTRLC_RECEIVED.load(Ordering::SeqCst)
}

fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
        eprintln!("\nReceived Ctrl+C, shutting down...");
    })
}

/// Build the demo rig: camera 0 is a back-facing logical multi-camera, the
/// rest alternate front/external with varying size tables.
fn build_rig(cameras: usize, frame_interval: Duration) -> SimulatedRig {
    let mut rig = SimulatedRig::new().with_camera(
        SimCamera::new("0")
            .facing(Facing::Back)
            .sizes(&[(640, 480), (320, 240), (1280, 720)])
            .logical(&["100", "101"])
            .frame_interval(frame_interval),
    );
    for index in 1..cameras {
        let facing = if index % 2 == 0 {
            Facing::External
        } else {
            Facing::Front
        };
        rig = rig.with_camera(
            SimCamera::new(&index.to_string())
                .facing(facing)
                .sizes(&[(320, 240), (160, 120)])
                .frame_interval(frame_interval),
        );
    }
    if cameras > 1 {
        rig = rig.with_combination(&["0", "1"]);
    }
    rig
}

/// One-line summary of a decoded frame.
fn describe_frame(frame: &RgbFrame) -> String {
    let [r, g, b] = frame.mean_channels();
    format!(
        "{}x{} mean rgb ({:.0}, {:.0}, {:.0})",
        frame.width(),
        frame.height(),
        r,
        g,
        b
    )
}

fn run_list_devices(cameras: usize) -> Result<(), String> {
    let rig = build_rig(cameras, Duration::from_millis(33));
    let devices = rig
        .hal()
        .enumerate_devices()
        .map_err(|e| e.to_string())?;
    let combinations = rig
        .hal()
        .concurrent_combinations()
        .map_err(|e| e.to_string())?;

    println!("Devices:");
    for descriptor in &devices {
        let sizes: Vec<String> = descriptor.sizes.iter().map(|s| s.to_string()).collect();
        let logical = if descriptor.logical_multi_camera {
            format!(" logical[{}]", descriptor.physical_ids.join(","))
        } else {
            String::new()
        };
        println!(
            "  [{}] {}{} {}",
            descriptor.id,
            descriptor.facing,
            logical,
            sizes.join(" ")
        );
    }
    if !combinations.is_empty() {
        println!("Simultaneous combinations:");
        for combo in &combinations {
            println!("  {}", combo.join(" + "));
        }
    }
    Ok(())
}

fn run_snapshot(deadline: Duration, cameras: usize, buffer_slots: usize) -> Result<(), String> {
    let rig = build_rig(cameras, Duration::from_millis(15));
    let mut capture = SnapshotCapture::new(rig.hal())
        .with_deadline(deadline)
        .with_buffer_slots(buffer_slots);

    let start = Instant::now();
    let frames = capture.run().map_err(|e| e.to_string())?;
    let elapsed = start.elapsed();

    println!(
        "Captured {} frame(s) from {} camera(s) in {:?}",
        frames.len(),
        cameras,
        elapsed
    );
    for (index, frame) in frames.iter().enumerate() {
        println!("  frame {}: {}", index, describe_frame(frame));
    }
    for id in capture.skipped_devices() {
        match capture.last_error(id) {
            Some(error) => println!("  camera {}: skipped ({})", id, error),
            None => println!("  camera {}: skipped (deadline)", id),
        }
    }
    Ok(())
}

fn run_watch(
    poll_interval: Duration,
    duration: Option<Duration>,
    cameras: usize,
) -> Result<(), String> {
    if let Err(e) = setup_ctrlc_handler() {
        eprintln!("Warning: Could not set up Ctrl+C handler: {}", e);
    }

    let rig = build_rig(cameras, Duration::from_millis(33));
    let mut watcher = MultiCamWatcher::new(rig.hal()).map_err(|e| e.to_string())?;

    println!("Watching {} camera(s)... (Ctrl+C to stop)", cameras);
    let start = Instant::now();
    loop {
        if ctrlc_received() {
            break;
        }
        if let Some(limit) = duration {
            if start.elapsed() >= limit {
                break;
            }
        }

        std::thread::sleep(poll_interval);
        let frames = watcher.all_frames();
        let lines: Vec<String> = watcher
            .device_ids()
            .iter()
            .zip(frames.iter())
            .map(|(id, frame)| match frame {
                Some(frame) => format!("[{}] {}", id, describe_frame(frame)),
                None => match watcher.last_error(id) {
                    Some(error) => format!("[{}] no frame ({})", id, error),
                    None => format!("[{}] no frame yet", id),
                },
            })
            .collect();
        println!("{}", lines.join("  "));
    }

    watcher.stop();
    println!("Watch stopped.");
    Ok(())
}

fn run_stream(size: Size, frames: u32, cameras: usize) -> Result<(), String> {
    let rig = build_rig(cameras, Duration::from_millis(15));
    let mut stream =
        LogicalCameraStream::open(rig.hal(), Facing::Back, size).map_err(|e| e.to_string())?;

    println!(
        "Streaming logical camera {} at {}...",
        stream.device_id(),
        size
    );
    for index in 0..frames {
        match stream.recv_timeout(Duration::from_secs(5)) {
            Some(frame) => println!("  frame {}: {}", index, describe_frame(&frame)),
            None => {
                let reason = stream
                    .last_error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "timed out".to_string());
                stream.stop();
                return Err(format!("Stream stalled: {}", reason));
            }
        }
    }
    stream.stop();
    println!("Stream stopped.");
    Ok(())
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::ListDevices { cameras } => run_list_devices(cameras.unwrap_or(2)),
        Commands::Snapshot {
            deadline_ms,
            cameras,
            config,
        } => {
            let cfg = load_config(config.as_deref());
            // Merge settings: CLI args > config file > built-in defaults
            let deadline = deadline_ms
                .or(cfg.snapshot.deadline_ms)
                .unwrap_or(3000);
            let buffer_slots = cfg.snapshot.buffer_slots.unwrap_or(DEFAULT_BUFFER_SLOTS);
            let cameras = cameras.or(cfg.rig.cameras).unwrap_or(2);
            run_snapshot(Duration::from_millis(deadline), cameras, buffer_slots)
        }
        Commands::Watch {
            poll_interval_ms,
            duration_ms,
            cameras,
            config,
        } => {
            let cfg = load_config(config.as_deref());
            let poll_interval = poll_interval_ms
                .or(cfg.watch.poll_interval_ms)
                .unwrap_or(500);
            let cameras = cameras.or(cfg.rig.cameras).unwrap_or(2);
            run_watch(
                Duration::from_millis(poll_interval),
                duration_ms.map(Duration::from_millis),
                cameras,
            )
        }
        Commands::Stream {
            size,
            frames,
            cameras,
        } => run_stream(size, frames, cameras.unwrap_or(2)),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Load the config file, falling back to defaults with a warning on failure.
fn load_config(path: Option<&str>) -> Config {
    let path = path.map(std::path::Path::new);
    match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Failed to load config file: {}", e);
            eprintln!("Using default settings.\n");
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_valid() {
        assert_eq!(parse_size("640x480").unwrap(), Size::new(640, 480));
        assert_eq!(parse_size("320x240").unwrap(), Size::new(320, 240));
    }

    #[test]
    fn test_parse_size_invalid_format() {
        assert!(parse_size("640").is_err());
        assert!(parse_size("640:480").is_err());
        assert!(parse_size("widthxheight").is_err());
    }

    #[test]
    fn test_parse_size_zero_values() {
        assert!(parse_size("0x480").is_err());
        assert!(parse_size("640x0").is_err());
    }

    #[test]
    fn test_parse_size_rejects_odd_dimensions() {
        let err = parse_size("641x480").unwrap_err();
        assert!(err.contains("even"));
        assert!(parse_size("640x481").is_err());
    }

    #[test]
    fn test_parse_camera_count_valid() {
        assert_eq!(parse_camera_count("1").unwrap(), 1);
        assert_eq!(parse_camera_count("16").unwrap(), 16);
    }

    #[test]
    fn test_parse_camera_count_out_of_range() {
        assert!(parse_camera_count("0").is_err());
        assert!(parse_camera_count("17").is_err());
        assert!(parse_camera_count("abc").is_err());
    }

    #[test]
    fn test_build_rig_shape() {
        let rig = build_rig(3, Duration::from_millis(33));
        let devices = rig.hal().enumerate_devices().expect("rig available");
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].facing, Facing::Back);
        assert!(devices[0].logical_multi_camera);
        assert_eq!(devices[1].facing, Facing::Front);
        assert_eq!(devices[2].facing, Facing::External);
    }

    #[test]
    fn test_describe_frame() {
        let frame = RgbFrame::from_raw(2, 1, vec![10, 20, 30, 10, 20, 30]);
        let summary = describe_frame(&frame);
        assert!(summary.contains("2x1"));
        assert!(summary.contains("(10, 20, 30)"));
    }
}
