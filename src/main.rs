use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration, Instant};

use trench_capture::config::{CaptureConfig, SessionResetPolicy};
use trench_capture::controller::{AutoConfirm, CaptureSessionController};
use trench_capture::dashboard;
use trench_capture::media::{JpegFrameEncoder, MockCamera, ZoomMode};
use trench_capture::network::{HttpNetworkClient, NetworkClient, OfflineBackend};
use trench_capture::sensors::{
    SensorSource, SimulatedBattery, SimulatedGps, SimulatedOrientation, SimulatedStorage,
};
use trench_capture::session::SessionStatus;
use trench_capture::types::{Coordinate, StorageEstimate};

const STATUS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "trench_capture")]
#[command(about = "Field capture session against simulated sensors and a mock camera", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "60")]
    duration: u64,

    /// Site name used in filenames and session metadata
    #[arg(long, default_value = "Trench A")]
    site: String,

    /// Session date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    date: Option<String>,

    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long)]
    backend_url: Option<String>,

    /// Keep sessions and uploads in memory instead of calling the backend
    #[arg(long)]
    offline: bool,

    /// Seconds between automatic capture attempts
    #[arg(long, default_value = "5")]
    capture_interval: u64,

    /// Zoom mode: wide, standard, telephoto
    #[arg(long, default_value = "standard")]
    zoom: String,

    /// Answer yes when asked to start on a low battery
    #[arg(long)]
    confirm_low_battery: bool,

    /// Keep anchor and sequence across session restarts
    #[arg(long)]
    carry_over: bool,

    /// Tilt tolerance in degrees
    #[arg(long)]
    tilt_tolerance: Option<f64>,

    /// Output directory for live_status.json
    #[arg(long, default_value = "trench_capture_sessions")]
    output_dir: PathBuf,

    /// Serve the operator page and API on this port
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Don't open a session automatically; wait for the operator page
    #[arg(long)]
    manual: bool,

    /// Simulated start latitude
    #[arg(long, default_value = "37.9364")]
    origin_lat: f64,

    /// Simulated start longitude
    #[arg(long, default_value = "27.3411")]
    origin_lng: f64,

    /// Tip the simulated device out of tolerance every N orientation samples
    #[arg(long)]
    wobble_every: Option<u64>,

    /// Simulated starting battery level (0.0-1.0)
    #[arg(long, default_value = "0.8")]
    battery: f64,
}

fn parse_zoom(value: &str) -> Result<ZoomMode> {
    match value.to_ascii_lowercase().as_str() {
        "wide" => Ok(ZoomMode::Wide),
        "standard" => Ok(ZoomMode::Standard),
        "telephoto" | "tele" => Ok(ZoomMode::Telephoto),
        other => anyhow::bail!("unknown zoom mode {:?}", other),
    }
}

fn build_config(args: &Args) -> Result<CaptureConfig> {
    let mut config = match &args.config {
        Some(path) => CaptureConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CaptureConfig::default(),
    };
    if let Some(url) = &args.backend_url {
        config.backend_url = url.clone();
    }
    if let Some(tolerance) = args.tilt_tolerance {
        config.tilt_tolerance_deg = tolerance;
    }
    if args.carry_over {
        config.reset_policy = SessionResetPolicy::CarryOver;
    }
    config.validate()?;
    Ok(config)
}

fn build_sources(args: &Args, config: &CaptureConfig) -> Vec<Box<dyn SensorSource>> {
    let mut orientation = SimulatedOrientation::new(90.0, 35.0);
    orientation.wobble_every = args.wobble_every;

    vec![
        Box::new(SimulatedGps::new(
            Coordinate::new(args.origin_lat, args.origin_lng),
            45.0,
            0.8,
            config.position.clone(),
        )),
        Box::new(orientation),
        Box::new(SimulatedBattery::new(args.battery, 0.002)),
        Box::new(SimulatedStorage::new(Some(StorageEstimate {
            quota_bytes: 8 * 1024 * 1024 * 1024,
            usage_bytes: 3 * 1024 * 1024 * 1024,
        }))),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let zoom = parse_zoom(&args.zoom)?;
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    info!("Trench capture starting");
    info!("  Site: {}", args.site);
    info!("  Duration: {} seconds (0=continuous)", args.duration);
    info!(
        "  Backend: {}",
        if args.offline { "offline" } else { config.backend_url.as_str() }
    );
    info!("  Reset policy: {:?}", config.reset_policy);
    info!("  Output Dir: {}", args.output_dir.display());

    let offline = args.offline.then(|| Arc::new(OfflineBackend::new()));
    let network: Arc<dyn NetworkClient> = match &offline {
        Some(backend) => backend.clone(),
        None => Arc::new(HttpNetworkClient::new(&config.backend_url, config.request_timeout())),
    };
    let encoder = Arc::new(JpegFrameEncoder::new(config.jpeg_quality));
    let controller = Arc::new(CaptureSessionController::new(
        config,
        Arc::new(MockCamera::new(640, 480)),
        encoder,
        network,
    ));

    controller.set_site_name(&args.site)?;
    if let Some(date) = &args.date {
        controller.set_date(date)?;
    }
    controller.set_zoom_mode(zoom).await?;

    if let Some(mut outcomes) = controller.take_upload_outcomes() {
        tokio::spawn(async move {
            while let Some(outcome) = outcomes.recv().await {
                match outcome.result {
                    Ok(()) => info!("upload #{} ok: {}", outcome.sequence_number, outcome.filename),
                    Err(e) => warn!("upload #{} failed: {}", outcome.sequence_number, e),
                }
            }
        });
    }

    let (tx, rx) = mpsc::channel(controller.config().sensor_channel_capacity);
    let pump = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run_event_pump(rx).await })
    };

    let mut sources = build_sources(&args, controller.config());
    for source in sources.iter_mut() {
        if let Err(e) = source.start(tx.clone()) {
            warn!("sensor {} not started: {}", source.name(), e);
        }
    }
    drop(tx);

    if let Some(port) = args.dashboard_port {
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve(controller, port).await {
                error!("dashboard failed: {}", e);
            }
        });
    }

    // Give the sensors a moment to report before the readiness checks
    sleep(Duration::from_millis(1500)).await;

    if !args.manual {
        match controller.start(&AutoConfirm(args.confirm_low_battery)).await {
            Ok(id) => info!("session {} open", id),
            Err(e) => error!("could not open session: {}", e),
        }
    }

    let status_path = args.output_dir.join("live_status.json");
    let capture_every = Duration::from_secs(args.capture_interval.max(1));
    let started = Instant::now();
    let mut last_capture = Instant::now();
    let mut ticker = interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                break;
            }
        }

        if args.duration > 0 && started.elapsed() >= Duration::from_secs(args.duration) {
            info!("duration reached, stopping");
            break;
        }

        if controller.status()? == SessionStatus::Active && last_capture.elapsed() >= capture_every {
            last_capture = Instant::now();
            match controller.capture().await {
                Ok(ticket) => info!("capture #{} -> {}", ticket.sequence_number, ticket.filename),
                Err(e) if e.is_gate_refusal() => warn!("capture skipped: {}", e),
                Err(e) => error!("capture failed: {}", e),
            }
        }

        let snapshot = controller.snapshot()?;
        if let Err(e) = snapshot.save(&status_path) {
            warn!("could not write {}: {}", status_path.display(), e);
        }
    }

    if controller.status()? == SessionStatus::Active {
        controller.stop()?;
    }
    let mut last_readings = Vec::new();
    for source in sources.iter_mut() {
        source.stop();
        last_readings.push((source.name(), source.latest()));
    }
    drop(sources);

    // Let in-flight uploads land before the final report
    let drain_deadline = Instant::now() + Duration::from_secs(10);
    while controller.snapshot()?.captures_in_flight > 0 && Instant::now() < drain_deadline {
        sleep(Duration::from_millis(100)).await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(1), pump).await;

    let final_snapshot = controller.snapshot()?;
    let final_path = args.output_dir.join("live_status_final.json");
    final_snapshot.save(&final_path)?;

    println!("\n=== Final Stats ===");
    println!("{}", final_snapshot.summary());
    println!("Photos taken: {}", final_snapshot.sequence_number);
    println!("Uploaded: {}", final_snapshot.uploads_completed);
    println!("Failed: {}", final_snapshot.uploads_failed);
    println!("Still in flight: {}", final_snapshot.captures_in_flight);
    println!("Distance from anchor: {:.1} m", final_snapshot.position.distance_m);
    if let Some(err) = &final_snapshot.last_error {
        println!("Last error: {}", err);
    }
    for (name, latest) in &last_readings {
        match latest {
            Some(event) => println!("Last {} reading: {:?}", name, event),
            None => println!("Last {} reading: none", name),
        }
    }
    if let Some(backend) = &offline {
        println!(
            "Offline backend: {} session(s), {} photo(s) stored",
            backend.sessions().len(),
            backend.photos().len()
        );
    }
    Ok(())
}
