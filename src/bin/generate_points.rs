//! Synthetic clustered-point generator.
//!
//! Scatters `points` samples around each of `centers` cluster centers in
//! 2-d space and writes the result twice: `a.out.bin` in the binary point
//! format (native-endian `usize` width, then `f32` records) and
//! `a.out.txt` in the text format, so both `build` and `build_bin` have
//! matching inputs to chew on.

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::process::ExitCode;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser)]
#[command(name = "generate_points", about = "Generate clustered 2-d test points")]
struct Cli {
    /// Points to scatter around each center.
    points: usize,

    /// Number of cluster centers.
    centers: usize,

    /// RNG seed (omit for a random run).
    #[arg(long)]
    seed: Option<u64>,
}

const DIMS: usize = 2;

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // Centers are uniform in (-10, 10); later centers get wider scatter so
    // the clusters are not all equally tight.
    let centers: Vec<[f32; DIMS]> = (0..cli.centers)
        .map(|_| [rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0)])
        .collect();

    let mut binary = BufWriter::new(File::create("a.out.bin")?);
    let mut text = BufWriter::new(File::create("a.out.txt")?);

    binary.write_all(&DIMS.to_ne_bytes())?;

    for (index, center) in centers.iter().enumerate() {
        let spread = 0.05 * (index + 1) as f32;
        for _ in 0..cli.points {
            let x = center[0] + rng.gen_range(-spread..=spread);
            let y = center[1] + rng.gen_range(-spread..=spread);

            binary.write_all(&x.to_ne_bytes())?;
            binary.write_all(&y.to_ne_bytes())?;
            writeln!(text, "{x} {y}")?;
        }
    }

    binary.flush()?;
    text.flush()?;

    println!(
        "wrote {} points ({} centers x {}) to a.out.bin and a.out.txt",
        cli.points * cli.centers,
        cli.centers,
        cli.points
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("generate_points: {error}");
            ExitCode::FAILURE
        }
    }
}
