//! Frostsim - headless frost storm
//!
//! Drives one simulation through a scripted storm of pointer strokes,
//! scripted presets, rain and a wiper sweep, then lets the surface settle
//! and prints per-phase statistics.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p frostsim --bin frostsim -- [--cpu] [--config FILE] [--screen WxH] [--seed N]
//! cargo run -p frostsim --bin frostsim -- --help
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use frostsim::gestures::{line_default, point_default, title_line};
use frostsim::{
    Capabilities, FrostConfig, FrostSimulation, Point, PointerStroke, Rain, WindowFrame, Wiper,
};

/// Host frame period.
const FRAME_MS: f32 = 16.0;

/// Frostsim - scripted frost storm on a headless surface
#[derive(Parser, Debug)]
#[command(name = "frostsim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Skip the GPU and run on explicit arrays
    #[arg(long)]
    cpu: bool,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Screen size in pixels
    #[arg(long, value_name = "WxH", value_parser = parse_screen, default_value = "1920x1080")]
    screen: (u32, u32),

    /// Rain seed
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
}

fn parse_screen(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WxH, got '{}'", value))?;
    let w: u32 = w.parse().map_err(|_| format!("bad width '{}'", w))?;
    let h: u32 = h.parse().map_err(|_| format!("bad height '{}'", h))?;
    if w == 0 || h == 0 {
        return Err(format!("screen size {}x{} must be positive", w, h));
    }
    Ok((w, h))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("frostsim=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("frostsim: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "wgpu")]
fn build_simulation(
    config: FrostConfig,
    cpu_only: bool,
) -> frostsim::Result<(FrostSimulation, Capabilities)> {
    if !cpu_only {
        match pollster::block_on(frostsim::GpuContext::new()) {
            Ok(gpu) => {
                let capabilities = gpu.capabilities();
                let sim = FrostSimulation::with_gpu(config, std::sync::Arc::new(gpu))?;
                return Ok((sim, capabilities));
            }
            Err(e) => tracing::warn!("No GPU, running on the CPU: {}", e),
        }
    }
    Ok((FrostSimulation::new(config)?, Capabilities::none()))
}

#[cfg(not(feature = "wgpu"))]
fn build_simulation(
    config: FrostConfig,
    _cpu_only: bool,
) -> frostsim::Result<(FrostSimulation, Capabilities)> {
    Ok((FrostSimulation::new(config)?, Capabilities::none()))
}

/// Statistics printer for one phase.
struct Phase {
    name: &'static str,
    started: Instant,
    start_ticks: u64,
}

impl Phase {
    fn begin(name: &'static str, sim: &FrostSimulation) -> Self {
        tracing::info!("Phase: {}", name);
        Self {
            name,
            started: Instant::now(),
            start_ticks: sim.ticks(),
        }
    }

    fn end(self, sim: &mut FrostSimulation) {
        let peak = sim
            .heights()
            .map(|h| h.iter().fold(0.0f32, |m, v| m.max(v.abs())))
            .unwrap_or(0.0);
        let backend = sim
            .backend_kind()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "none".to_string());

        println!(
            "{:<10} {:>7} {:>9} {:>10.4} {:>10.2}  {}",
            self.name,
            sim.ticks() - self.start_ticks,
            sim.activity(),
            peak,
            self.started.elapsed().as_secs_f64() * 1000.0,
            backend
        );
    }
}

fn run(args: Args) -> frostsim::Result<()> {
    let config = match &args.config {
        Some(path) => FrostConfig::load(path)?,
        None => FrostConfig::default(),
    };
    let stimulus = config.stimulus.clone();

    let (mut sim, capabilities) = build_simulation(config, args.cpu)?;
    let (width, height) = args.screen;
    sim.reset(width, height, capabilities)?;

    let Some(mapping) = sim.screen_mapping() else {
        return Ok(());
    };

    println!(
        "{:<10} {:>7} {:>9} {:>10} {:>10}  {}",
        "Phase", "Ticks", "Activity", "Peak |h|", "Time (ms)", "Backend"
    );
    println!("{}", "-".repeat(64));

    // Pointer: press, circle, release
    let phase = Phase::begin("pointer", &sim);
    let mut pointer = PointerStroke::new(&stimulus);
    let centre = Point::new(width as i32 / 3, height as i32 / 2);
    let radius = height as f32 / 4.0;
    sim.inject_screen(&pointer.press(Point::new(centre.x + radius as i32, centre.y)))?;
    for i in 1..=60 {
        let angle = i as f32 / 60.0 * std::f32::consts::TAU;
        let p = Point::new(
            centre.x + (radius * angle.cos()) as i32,
            centre.y + (radius * angle.sin()) as i32,
        );
        if let Some(stroke) = pointer.motion(p) {
            sim.inject_screen(&stroke)?;
        }
        sim.advance(FRAME_MS);
    }
    pointer.release();
    phase.end(&mut sim);

    // Presets
    let phase = Phase::begin("presets", &sim);
    sim.inject_screen(&point_default(&stimulus, &mapping, None))?;
    sim.inject_screen(&line_default(&stimulus, &mapping))?;
    sim.inject_screen(&title_line(
        &stimulus,
        WindowFrame {
            x: width as i32 / 2,
            y: height as i32 / 5,
            width: width as i32 / 3,
            left: 4,
            right: 4,
            top: 24,
        },
    ))?;
    for _ in 0..30 {
        sim.advance(FRAME_MS);
    }
    phase.end(&mut sim);

    // Rain
    let phase = Phase::begin("rain", &sim);
    let mut rain = Rain::new(&stimulus, args.seed);
    for _ in 0..180 {
        for drop in rain.poll(FRAME_MS, &mapping) {
            sim.inject_screen(&drop)?;
        }
        sim.advance(FRAME_MS);
    }
    phase.end(&mut sim);

    // Wiper: first kick after one interval, then a full sweep
    let phase = Phase::begin("wiper", &sim);
    let mut wiper = Wiper::new(&stimulus);
    for _ in 0..240 {
        if let Some(wedge) = wiper.poll(FRAME_MS, sim.is_active(), &mapping) {
            sim.inject_screen(&wedge)?;
        }
        sim.advance(FRAME_MS);
    }
    phase.end(&mut sim);

    // Settle
    let phase = Phase::begin("settle", &sim);
    for _ in 0..sim.ticks_to_rest() {
        sim.advance(FRAME_MS);
    }
    phase.end(&mut sim);

    println!();
    println!(
        "Final state: {:?}, {} ticks, active: {}",
        sim.state(),
        sim.ticks(),
        sim.is_active()
    );

    sim.teardown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["frostsim"]).unwrap();
        assert!(!args.cpu);
        assert!(args.config.is_none());
        assert_eq!(args.screen, (1920, 1080));
        assert_eq!(args.seed, 0x5eed);
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "frostsim",
            "--cpu",
            "--config",
            "frost.toml",
            "--screen",
            "800x600",
            "--seed",
            "7",
        ])
        .unwrap();
        assert!(args.cpu);
        assert_eq!(args.config, Some(PathBuf::from("frost.toml")));
        assert_eq!(args.screen, (800, 600));
        assert_eq!(args.seed, 7);
    }

    #[test]
    fn test_rejects_bad_screen() {
        for screen in ["800", "800x", "x600", "0x600", "800x-1"] {
            assert!(Args::try_parse_from(["frostsim", "--screen", screen]).is_err());
        }
        assert!(Args::try_parse_from(["frostsim", "--bogus"]).is_err());
    }
}
