//! K-tree command-line driver.
//!
//! ```text
//! k-tree build     <in.txt> <order> <out> <threads>
//! k-tree build_bin <in.bin> <order> <out> <threads>
//! k-tree load      <in.serialized> <order> <out>
//! k-tree unittest
//! ```
//!
//! `build`/`build_bin` read a point file, insert every point with the
//! requested number of worker threads (each with its own arena), repair
//! the leaf counters, and serialize the tree. `load` round-trips a
//! serialized tree. Exit status is 0 on success and nonzero with a
//! diagnostic on unreadable input or a malformed tree.

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};

use k_tree::{read_binary_points, read_text_points, Arena, Tree, Vector};

// =============================================================================
// CLI surface
// =============================================================================

#[derive(Parser)]
#[command(name = "k-tree", version, about = "Concurrent K-tree builder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a tree from a text point file (one vector per line).
    Build {
        /// Input text point file.
        input: PathBuf,
        /// Tree order (branching factor).
        order: usize,
        /// Output file for the serialized tree.
        output: PathBuf,
        /// Worker thread count.
        threads: usize,
    },

    /// Build a tree from a binary point file (usize width + f32 records).
    #[command(name = "build_bin")]
    BuildBin {
        /// Input binary point file.
        input: PathBuf,
        /// Tree order (branching factor).
        order: usize,
        /// Output file for the serialized tree.
        output: PathBuf,
        /// Worker thread count.
        threads: usize,
    },

    /// Load a serialized tree and re-serialize it.
    Load {
        /// Input serialized tree.
        input: PathBuf,
        /// Tree order the input was built with.
        order: usize,
        /// Output file for the re-serialized tree.
        output: PathBuf,
    },

    /// Run the built-in self checks.
    Unittest,
}

fn main() -> ExitCode {
    k_tree::init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Build {
            input,
            order,
            output,
            threads,
        } => build(&input, order, &output, threads, PointFormat::Text),

        Command::BuildBin {
            input,
            order,
            output,
            threads,
        } => build(&input, order, &output, threads, PointFormat::Binary),

        Command::Load {
            input,
            order,
            output,
        } => load(&input, order, &output),

        Command::Unittest => unittest(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("k-tree: {error}");
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Build
// =============================================================================

enum PointFormat {
    Text,
    Binary,
}

/// One insert waiting to be claimed by a worker.
struct Job<'a> {
    claimed: AtomicBool,
    point: &'a Vector,
}

impl<'a> Job<'a> {
    fn new(point: &'a Vector) -> Self {
        Self {
            claimed: AtomicBool::new(false),
            point,
        }
    }
}

/// Walk the shared work list, claiming each job at most once.
fn worker_loop<'a>(tree: &Tree<'a>, arena: &'a Arena, jobs: &[Job<'a>]) {
    for job in jobs {
        if job.claimed.load(Ordering::Relaxed) {
            continue;
        }
        if job
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tree.insert(arena, job.point);
        }
    }
}

fn build(
    input: &Path,
    order: usize,
    output: &Path,
    threads: usize,
    format: PointFormat,
) -> Result<(), Box<dyn Error>> {
    let threads = threads.max(1);

    // Every arena outlives the tree; declaration order matters.
    let point_arena = Arena::new();
    let worker_arenas: Vec<Arena> = (0..threads).map(|_| Arena::new()).collect();
    let tree_arena = Arena::new();

    let timer = Instant::now();
    let points = match format {
        PointFormat::Text => read_text_points(&point_arena, input)?,
        PointFormat::Binary => read_binary_points(&point_arena, input)?,
    };
    let dims = points[0].dims();
    println!("reading: {} ms ({} points)", timer.elapsed().as_millis(), points.len());

    let jobs: Vec<Job<'_>> = points.iter().map(|&point| Job::new(point)).collect();
    let mut tree = Tree::new(&tree_arena, order, dims);

    let timer = Instant::now();
    thread::scope(|scope| {
        let tree = &tree;
        let jobs = &jobs;
        for arena in &worker_arenas {
            scope.spawn(move || worker_loop(tree, arena, jobs));
        }
    });
    println!(
        "D:{} O:{} T:{} clustering: {} ms ({} splits)",
        dims,
        order,
        threads,
        timer.elapsed().as_millis(),
        tree.completed_splits()
    );

    let timer = Instant::now();
    tree.normalize_counts();
    println!("re-adjustment: {} ms", timer.elapsed().as_millis());

    let timer = Instant::now();
    let mut out = BufWriter::new(File::create(output)?);
    tree.serialize(&mut out)?;
    out.flush()?;
    println!("serializing: {} ms", timer.elapsed().as_millis());

    Ok(())
}

// =============================================================================
// Load
// =============================================================================

fn load(input: &Path, order: usize, output: &Path) -> Result<(), Box<dyn Error>> {
    let text = std::fs::read_to_string(input)
        .map_err(|error| format!("cannot read serialized tree '{}': {error}", input.display()))?;

    let arena = Arena::new();
    let tree = Tree::deserialize(&arena, order, text.as_bytes())?;

    let mut out = BufWriter::new(File::create(output)?);
    tree.serialize(&mut out)?;
    out.flush()?;

    println!(
        "loaded: {} leaves, depth {}, width {}",
        tree.leaf_count(),
        tree.depth(),
        tree.dims()
    );
    Ok(())
}

// =============================================================================
// Self checks
// =============================================================================

fn ensure(condition: bool, message: &str) -> Result<(), Box<dyn Error>> {
    if condition {
        Ok(())
    } else {
        Err(format!("self check failed: {message}").into())
    }
}

fn vector_selfcheck() -> Result<(), Box<dyn Error>> {
    let arena = Arena::new();

    let a = Vector::from_slice_in(&arena, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    let b = Vector::from_slice_in(&arena, &[9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0]);

    let oracle: f32 = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();
    ensure(a.distance_squared(b) == oracle, "distance vs oracle")?;

    a.add_assign(b);
    ensure(a.as_slice().iter().sum::<f32>() == 80.0, "add_assign")?;

    a.div_assign(5.0);
    ensure(a.as_slice().iter().sum::<f32>() == 16.0, "div_assign")?;

    a.fused_multiply_add(a, 5.0);
    ensure(a.as_slice().iter().sum::<f32>() == 96.0, "fused_multiply_add")?;

    a.zero();
    ensure(a.as_slice().iter().all(|&x| x == 0.0), "zero")?;

    println!("vector: PASS");
    Ok(())
}

fn tree_selfcheck() -> Result<(), Box<dyn Error>> {
    let arena = Arena::new();
    let mut tree = Tree::new(&arena, 4, 2);

    for i in 0..64u32 {
        let point = [(i % 8) as f32, (i / 8) as f32];
        tree.insert(&arena, Vector::from_slice_in(&arena, &point));
    }
    tree.normalize_counts();

    ensure(tree.leaf_count() == 64, "leaf count after 64 inserts")?;
    ensure(
        tree.root().map(|root| root.leaves_below()) == Some(64),
        "normalized root count",
    )?;
    ensure(tree.splits_quiescent(), "split counter quiescent")?;

    let mut first = Vec::new();
    tree.serialize(&mut first)?;
    let reloaded = Tree::deserialize(&arena, 4, first.as_slice())?;
    let mut second = Vec::new();
    reloaded.serialize(&mut second)?;
    ensure(first == second, "serialize round trip")?;

    println!("tree: PASS");
    Ok(())
}

fn concurrent_selfcheck() -> Result<(), Box<dyn Error>> {
    let worker_arenas: Vec<Arena> = (0..4).map(|_| Arena::new()).collect();
    let tree_arena = Arena::new();
    let mut tree = Tree::new(&tree_arena, 4, 2);

    thread::scope(|scope| {
        let tree = &tree;
        for arena in &worker_arenas {
            scope.spawn(move || {
                for _ in 0..250 {
                    tree.insert(arena, Vector::from_slice_in(arena, &[3.0, 3.0]));
                }
            });
        }
    });
    tree.normalize_counts();

    ensure(tree.leaf_count() == 1000, "1000 concurrent inserts")?;
    ensure(tree.splits_quiescent(), "quiescent after join")?;

    let root = tree.root().expect("root exists");
    let centroid = root.centroid().as_slice();
    ensure(
        (centroid[0] - 3.0).abs() < 1e-4 && (centroid[1] - 3.0).abs() < 1e-4,
        "identical-point centroid",
    )?;

    println!("concurrent: PASS");
    Ok(())
}

fn unittest() -> Result<(), Box<dyn Error>> {
    vector_selfcheck()?;
    tree_selfcheck()?;
    concurrent_selfcheck()?;
    println!("PASS");
    Ok(())
}
