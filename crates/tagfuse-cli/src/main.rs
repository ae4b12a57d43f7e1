//! `tagfuse` – the pose-fusion node.
//!
//! ```text
//! tagfuse [CONFIG]
//! ```
//!
//! 1. Resolves the configuration path (`config/simulator.toml` when none is
//!    given).  Any other argument count is a usage error: exit status 2.
//! 2. Loads and validates the TOML configuration (exit status 2 on failure).
//! 3. Wires the bus listeners, the reference estimator and the publisher into
//!    an update scheduler, and starts the simulated robot if configured.
//! 4. Ticks until Ctrl-C.  A fatal estimation error exits with status 1
//!    after the estimator's diagnostic dump.

mod config;

use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use tagfuse_hal::SimRobot;
use tagfuse_middleware::{EventBus, TelemetryTable, Topic};
use tagfuse_perception::Localizer;
use tagfuse_runtime::{
    CameraListener, CameraSource, Collaborators, ConfigListener, DataPublisher, OdomListener,
    UpdateScheduler, init_tracing, run_loop,
};
use tagfuse_types::{Event, EventPayload, FusionError};

const DEFAULT_CONFIG_PATH: &str = "config/simulator.toml";

const EXIT_FATAL: u8 = 1;
const EXIT_USAGE: u8 = 2;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let path = match config_path_from_args(&args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            eprintln!("{} tagfuse [CONFIG]", "usage:".bold());
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let cfg = match config::load_from(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let _tracing = init_tracing("tagfuse");
    print_banner(&path, &cfg);

    let shutdown = Arc::new(AtomicBool::new(false));
    let bus = EventBus::new(cfg.bus_capacity);
    install_ctrlc_handler(bus.clone(), Arc::clone(&shutdown));

    // Listeners subscribe before the simulator starts so the startup layout
    // and prior are not missed.
    let mut scheduler = match build_scheduler(&cfg, &bus) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let sim = match cfg
        .sim_config()
        .map(|sim| SimRobot::new(sim).spawn(bus.clone(), Arc::clone(&shutdown)))
        .transpose()
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let result = run_loop(&mut scheduler, cfg.loop_timing(), &shutdown);

    shutdown.store(true, Ordering::SeqCst);
    if let Some(handle) = sim
        && handle.join().is_err()
    {
        warn!("simulator thread panicked");
    }

    match result {
        Ok(summary) => {
            info!(
                ticks = summary.ticks,
                published = summary.published,
                not_ready = summary.not_ready,
                "tagfuse stopped"
            );
            println!("{}", "  ✓ Exiting tagfuse.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "fatal error; exiting");
            eprintln!("{} {}", "fatal:".red().bold(), e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// No argument selects the default path; exactly one names the file.
fn config_path_from_args(args: &[String]) -> Result<PathBuf, FusionError> {
    match args {
        [] => Ok(PathBuf::from(DEFAULT_CONFIG_PATH)),
        [path] => Ok(PathBuf::from(path)),
        _ => Err(FusionError::Usage(format!(
            "expected at most one configuration path, got {} arguments",
            args.len()
        ))),
    }
}

fn build_scheduler(
    cfg: &config::Config,
    bus: &EventBus,
) -> Result<UpdateScheduler<Localizer>, FusionError> {
    let cameras = cfg
        .camera_settings()
        .into_iter()
        .map(|settings| {
            CameraListener::spawn(bus, settings).map(|c| Box::new(c) as Box<dyn CameraSource>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let table = TelemetryTable::new(bus.clone(), format!("/{}", cfg.root_table_name));

    Ok(UpdateScheduler::new(
        Localizer::new(cfg.localizer_config()),
        Collaborators {
            config: Box::new(ConfigListener::spawn(bus)?),
            odometry: Box::new(OdomListener::spawn(bus)?),
            cameras,
            publisher: Box::new(DataPublisher::new(table)),
        },
    ))
}

fn install_ctrlc_handler(bus: EventBus, shutdown: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after the current tick …".yellow().bold());
        let _ = bus.publish_to(
            Topic::SystemAlerts,
            Event::new(
                "tagfuse-cli",
                EventPayload::Fault {
                    component: "cli".to_string(),
                    code: 130,
                    message: "operator requested shutdown".to_string(),
                },
            ),
        );
        shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the node can only be killed");
    }
}

fn print_banner(path: &Path, cfg: &config::Config) {
    println!();
    println!("  {} {}",
        "tagfuse".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Odometry + fiducial-marker pose fusion");
    println!();
    println!("  Config      {}", path.display().to_string().bold());
    println!("  Table root  /{}", cfg.root_table_name);
    let names: Vec<&str> = cfg.cameras.iter().map(|c| c.name.as_str()).collect();
    println!(
        "  Cameras     {}",
        if names.is_empty() { "<none>".dimmed().to_string() } else { names.join(", ") }
    );
    if cfg.simulation.is_some() {
        println!("  Source      {}", "simulated robot".yellow());
    }
    println!();
}
