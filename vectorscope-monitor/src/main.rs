use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use vectorscope::prelude::*;
use vectorscope::settings::resolve_settings_path;
use vectorscope::{MonitorOptions, build_registry};

#[derive(Parser, Debug)]
#[command(
    about = "Live chrominance vectorscope for a named producer",
    version
)]
struct Args {
    /// Settings file (YAML, or JSON with a .json extension)
    #[arg(long, default_value = "monitor.yaml")]
    config: PathBuf,

    /// WGSL file replacing the built-in scope effect
    #[arg(long)]
    effect: Option<PathBuf>,

    /// Print the names a monitor can target and exit
    #[arg(long)]
    list: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let result = if args.list {
        list_targets(args.config)
    } else {
        vectorscope::run(MonitorOptions {
            settings_path: args.config,
            effect: args
                .effect
                .map_or(EffectSource::Embedded, EffectSource::File),
        })
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("vectorscope-monitor: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn list_targets(config: PathBuf) -> Result<(), String> {
    init_logger();

    let path = resolve_settings_path(config)?;
    let config = AppConfig::load(&path)?;
    let gpu = GpuContext::headless()?;
    let base_dir = path.parent().map(PathBuf::from).unwrap_or_default();
    let registry = build_registry(&gpu, &config, &base_dir)?;

    for name in registry.video_producer_names() {
        println!("{}", name);
    }

    Ok(())
}
