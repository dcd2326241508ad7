//! `iris` – live classification demo.
//!
//! Runs the full capture → inference → publish pipeline against simulated
//! hardware and prints what a presentation layer would render:
//!
//! 1. Loads `~/.iris/config.toml`, writing the defaults on first run.
//! 2. Requests camera access, which configures and starts the session.
//! 3. Streams classifications and once-per-second metrics to the terminal,
//!    takes one photo partway through, then stops.
//! 4. **Ctrl-C** stops the session cleanly.

mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::{ColoredString, Colorize};
use tokio::time::Instant;
use tracing::{info, warn};

use iris_hal::{SimCaptureDevice, SimClassifier};
use iris_middleware::Observation;
use iris_runtime::{FeedbackKind, FeedbackSink, VisionEngine, init_tracing};
use iris_types::{AuthorizationState, CapturedPhoto, PerformanceSample};

fn main() {
    let _tracing = init_tracing("iris");

    print_banner();
    let cfg = load_config();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping capture …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the run ends only on its timer");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };
    runtime.block_on(run(cfg, shutdown));
}

fn load_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Demo run
// ─────────────────────────────────────────────────────────────────────────────

async fn run(cfg: config::Config, shutdown: Arc<AtomicBool>) {
    let device = SimCaptureDevice::builder()
        .frame_rate(cfg.frame_rate)
        .auto_complete_stills()
        .build();
    let classifier =
        SimClassifier::demo().with_latency(Duration::from_millis(cfg.inference_latency_ms));
    let engine = VisionEngine::builder(Arc::new(device), Arc::new(classifier))
        .feedback(Arc::new(ConsoleFeedback))
        .pipeline_config(cfg.pipeline.clone())
        .session_config(cfg.session.clone())
        .build();

    println!();
    println!(
        "  Simulated camera: {} fps, classifier latency {} ms",
        cfg.frame_rate.to_string().bold(),
        cfg.inference_latency_ms.to_string().bold()
    );

    let authorization = engine.request_authorization().await;
    if authorization != AuthorizationState::Authorized {
        println!(
            "  {} Camera access {:?}; nothing to classify.",
            "✗".red().bold(),
            authorization
        );
        return;
    }
    if let Some(e) = engine.configuration_error() {
        println!("  {} Camera setup failed: {}", "✗".red().bold(), e);
        return;
    }
    engine.start();
    if cfg.torch
        && let Err(e) = engine.set_torch(true)
    {
        println!("  {} Torch unavailable: {}", "!".yellow().bold(), e);
    }
    println!("  {} Capture session running\n", "●".green().bold());

    let mut classifications = engine.subscribe();
    let mut metrics = engine.subscribe();
    let mut photos = engine.subscribe();
    let started = Instant::now();
    let deadline = (cfg.run_seconds > 0).then(|| started + Duration::from_secs(cfg.run_seconds));
    let photo_at = started + Duration::from_secs(cfg.photo_after_seconds);
    let mut photo_requested = false;
    let mut poll = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            Some(observation) = classifications.changed_classification() => {
                print_observation(&observation);
            }
            Some(sample) = metrics.changed_metrics() => print_metrics(&sample),
            Some(photo) = photos.changed_photo() => print_photo(&photo),
            _ = poll.tick() => {
                let now = Instant::now();
                if shutdown.load(Ordering::SeqCst) || deadline.is_some_and(|d| now >= d) {
                    break;
                }
                if !photo_requested && now >= photo_at {
                    photo_requested = true;
                    if let Err(e) = engine.capture_photo() {
                        println!("  {} Photo rejected: {}", "!".yellow().bold(), e);
                    }
                }
            }
        }
    }

    engine.stop();
    engine.session().flush();
    info!(elapsed_s = started.elapsed().as_secs_f64(), "demo finished");
    println!();
    println!("  {} Capture session stopped.", "✓".green().bold());
}

// ─────────────────────────────────────────────────────────────────────────────
// Presentation
// ─────────────────────────────────────────────────────────────────────────────

/// Prints cues in place of haptics.
struct ConsoleFeedback;

impl FeedbackSink for ConsoleFeedback {
    fn emit(&self, kind: FeedbackKind) {
        let cue = match kind {
            FeedbackKind::ConfidentObservation { label } => format!("spotted {label}"),
            FeedbackKind::TorchToggled { on } => format!("torch {}", if on { "on" } else { "off" }),
            FeedbackKind::PhotoRequested => "shutter".to_string(),
        };
        println!("  {} {}", "♪".magenta().bold(), cue.magenta());
    }
}

fn confidence_colored(confidence: f32) -> ColoredString {
    let text = format!("{:>5.1}%", confidence * 100.0);
    if confidence >= 0.7 {
        text.green()
    } else if confidence >= 0.4 {
        text.yellow()
    } else {
        text.red()
    }
}

fn print_observation(observation: &Observation) {
    let Some(result) = observation.result() else {
        return;
    };
    let alternatives = result
        .ranked_alternatives
        .iter()
        .skip(1)
        .map(|p| format!("{} {:.0}%", p.label, p.confidence * 100.0))
        .collect::<Vec<_>>()
        .join(", ");
    println!(
        "  #{:<5} {} {:<20} {}",
        result.sequence.to_string().dimmed(),
        confidence_colored(result.confidence),
        result.label.bold(),
        alternatives.dimmed()
    );
}

fn print_metrics(sample: &PerformanceSample) {
    println!(
        "  {} {:>5.1} fps  {:>6.1} ms  {} dropped",
        "⏱".cyan(),
        sample.frames_per_second,
        sample.last_inference_latency_ms,
        sample.frames_dropped
    );
}

fn print_photo(photo: &CapturedPhoto) {
    let label = if photo.associated_label.is_empty() {
        "(nothing recognised)".to_string()
    } else {
        format!(
            "{} {:.0}%",
            photo.associated_label,
            photo.associated_confidence * 100.0
        )
    };
    println!(
        "  {} photo {} · {} bytes · {} · {}",
        "📷".bold(),
        photo.id.to_string().dimmed(),
        photo.image_bytes.len(),
        label.bold(),
        photo.captured_at.format("%H:%M:%S")
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___      _      "#.bold().cyan());
    println!("{}", r#"  |_ _|_ __(_)___  "#.bold().cyan());
    println!("{}", r#"   | || '__| / __| "#.bold().cyan());
    println!("{}", r#"   | || |  | \__ \ "#.bold().cyan());
    println!("{}", r#"  |___|_|  |_|___/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Iris".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  On-device live image classification");
    println!();
}
