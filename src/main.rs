use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::WrapErr;
use structopt::clap::AppSettings;
use structopt::StructOpt;
use tea_fluid::{
    channel, FluidParameters, FrameSource, LocalFrames, Scalar, SharedSimSurface,
    SimulationStatistics,
};
use tracing_subscriber::EnvFilter;

#[derive(StructOpt, Debug)]
struct FrameOpt {
    /// JSON file with simulation parameters. Missing keys use the defaults.
    #[structopt(short, long)]
    config: Option<PathBuf>,
    #[structopt(short, long, default_value = "600")]
    frames: usize,
    /// Directory to write numbered PNG frames into
    #[structopt(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "tea_fluid")]
enum Opt {
    /// Simulate and render in this process
    Run(FrameOpt),
    /// Simulate and render in a child process, reading frames over shared memory
    Shared(FrameOpt),
    /// Producer side of `shared`
    #[structopt(setting = AppSettings::Hidden)]
    Produce {
        #[structopt(long)]
        segment: PathBuf,
        /// Parameters as a JSON string
        #[structopt(long)]
        params: String,
    },
}

fn load_params(config: &Option<PathBuf>) -> eyre::Result<FluidParameters> {
    match config {
        Some(path) => FluidParameters::from_json_file(path)
            .wrap_err_with(|| format!("Failed to load parameters from {:?}", path)),
        None => Ok(FluidParameters::default()),
    }
}

fn save_frame(dir: &Path, index: usize, frame: &image::RgbImage) -> eyre::Result<()> {
    let path = dir.join(format!("{:04}.png", index));
    frame
        .save(&path)
        .wrap_err_with(|| format!("Failed to write frame {:?}", path))
}

fn run_local(opt: FrameOpt) -> eyre::Result<()> {
    let params = load_params(&opt.config)?;
    let dt = 1. / params.tick_rate as Scalar;
    let report_every = params.tick_rate.max(1) as usize;
    let mut frames = LocalFrames::new(params).wrap_err("Failed to build the simulation")?;

    if let Some(dir) = &opt.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    for index in 0..opt.frames {
        let frame = frames.next_frame(dt)?;
        if let Some(dir) = &opt.output_dir {
            save_frame(dir, index, frame)?;
        }

        if index % report_every == 0 {
            let sim = &frames.sim;
            tracing::info!(
                "frame {}: t = {:.2}s, {} droplets, water {:.1}, dye {:.2}, leaves {:.2} dry",
                index,
                sim.total_time(),
                sim.particle_count(),
                sim.total_water(),
                sim.total_dye(),
                sim.mean_leaf_strength()
            );
        }
    }

    Ok(())
}

fn run_shared(opt: FrameOpt) -> eyre::Result<()> {
    let params = load_params(&opt.config)?;
    let period = Duration::from_secs_f64(1. / params.tick_rate.max(1) as f64);
    let mut surface = SharedSimSurface::new(params).wrap_err("Failed to create the frame channel")?;
    surface.start().wrap_err("Failed to start the producer")?;

    if let Some(dir) = &opt.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut last_counter = None;
    for index in 0..opt.frames {
        std::thread::sleep(period);
        let (counter, _) = surface.frame_state();
        let frame = surface.next_frame(0.)?;
        if let Some(dir) = &opt.output_dir {
            save_frame(dir, index, frame)?;
        }

        if last_counter == Some(counter) {
            tracing::debug!("frame {}: producer has not published since the last poll", index);
        }
        last_counter = Some(counter);
    }

    surface.shutdown()?;
    Ok(())
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Opt::from_args() {
        Opt::Run(opt) => run_local(opt),
        Opt::Shared(opt) => run_shared(opt),
        Opt::Produce { segment, params } => {
            let params: FluidParameters =
                serde_json::from_str(&params).wrap_err("Serde failed to deserialize JSON.")?;
            channel::run_producer(&segment, params)
                .wrap_err_with(|| format!("Producer for {:?} failed", segment))
        }
    }
}
