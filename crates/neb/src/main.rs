use std::{fs::File, io, os::unix::prelude::AsRawFd, path::Path};

use anyhow::{Context, bail};
use clap::Parser;
use neb::{
    Config, Neb, Status,
    path::ReactionPath,
    snapshot::{Snapshot, Summary},
};
use pes::Geom;

/// number of points in the interpolated energy profile
const PROFILE_POINTS: usize = 50;

/// minimum energy paths with the nudged elastic band method
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    /// input file
    #[arg(value_parser, default_value_t = String::from("neb.toml"))]
    infile: String,

    /// Overwrite existing output from a previous run. Defaults to false.
    #[arg(short, long, default_value_t = false)]
    overwrite: bool,

    /// Set the number of images to evaluate at once, overriding
    /// parallel_images in the input file. Defaults to 0, which means to use
    /// the input file value.
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Start from the geometries in this XYZ file, such as a snapshot from an
    /// earlier run, instead of the initial path in the input file. It must
    /// have one frame for every image after interpolation.
    #[arg(short, long)]
    restart: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let path = Path::new("neb.out");
    if path.exists() && !args.overwrite {
        bail!("existing neb output. overwrite with -o/--overwrite");
    }
    let outfile = File::create(path).context("failed to create outfile")?;
    let logfile =
        File::create("neb.log").context("failed to create log file")?;
    let out_fd = outfile.as_raw_fd();
    let log_fd = logfile.as_raw_fd();
    // redirect stdout to outfile and stderr to logfile
    unsafe {
        libc::dup2(out_fd, 1);
        libc::dup2(log_fd, 2);
    }

    let mut config = Config::load(&args.infile)
        .with_context(|| format!("failed to load {}", args.infile))?;
    if args.threads > 0 {
        config.parallel_images = args.threads;
    }
    println!("PID: {}", std::process::id());
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("{config}");

    let mut chain = config.chain()?;
    if let Some(restart) = &args.restart {
        let contents = std::fs::read_to_string(restart)
            .with_context(|| format!("failed to read {restart}"))?;
        let geoms = Geom::frames(&contents)
            .with_context(|| format!("failed to parse {restart}"))?;
        chain.restart(&geoms)?;
        println!("restarting from {restart}");
    }
    println!("initial path contains {} images", chain.len());

    let snapshot = Snapshot::new(".", &config.name, config.tolerance);
    snapshot.write_tagged(&chain, "init")?;

    let mut neb =
        Neb::from_config(&config, chain, config.calculator.script())
            .snapshot(snapshot.clone());
    let outcome = match neb.run(&mut io::stdout()) {
        Ok(outcome) => outcome,
        Err(e) => {
            println!("error: {e}");
            return Err(e.into());
        }
    };
    println!("\n{outcome}");
    if outcome.status == Status::Exhausted {
        println!(
            "WARNING: the path is not converged to tolerance {}",
            config.tolerance
        );
    }

    let chain = neb.into_chain();
    snapshot.write_tagged(&chain, "final")?;

    let path = ReactionPath::new(&chain)?;
    snapshot.write_profile(&path, PROFILE_POINTS)?;
    println!(
        "wrote {PROFILE_POINTS}-point energy profile to {}",
        snapshot.profile_file().display()
    );

    let summary = Summary::new(&outcome, &chain);
    if let Some(barrier) = summary.barrier {
        println!("barrier height = {barrier:.8}");
    }
    snapshot.write_summary(&summary)?;

    println!("normal termination of neb");

    Ok(())
}
