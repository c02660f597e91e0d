use clap::{Parser, ValueEnum};
use quartet_treesearch::io::{read_reference_tree_files, read_start_tree, write_newick};
use quartet_treesearch::objective::{Objective, ObjectiveFunctions};
use quartet_treesearch::quartet::{QuartetScoreComputer, ScoreOracle};
use quartet_treesearch::search::{Algorithm, AnnealingConfig, SearchConfig, run_search};
use quartet_treesearch::start_tree::{StartTreeKind, build_start_tree};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Infer a species tree maximising quartet internode certainty with respect
/// to a set of reference trees.
#[derive(Parser, Debug)]
#[command(name = "quartet-treesearch", version, about = "Quartet-score tree search over NNI/SPR moves")]
struct Args {
    /// Reference tree files (Newick list or BEAST/NEXUS, optionally .gz)
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Start from the first tree of this file instead of building one
    #[arg(short = 's', long = "start")]
    start: Option<PathBuf>,

    /// How to build the start tree when --start is not given
    #[arg(long = "start-tree", value_enum, default_value_t = StartArg::Random)]
    start_tree: StartArg,

    /// Search algorithm
    #[arg(short = 'a', long = "algorithm", value_enum, default_value_t = AlgorithmArg::Annealing)]
    algorithm: AlgorithmArg,

    /// Objective function
    #[arg(long = "objective", value_enum, default_value_t = ObjectiveArg::Lqic)]
    objective: ObjectiveArg,

    /// Only try moves around negatively scored edges (greedy searches)
    #[arg(long = "restricted", default_value_t = false)]
    restricted: bool,

    /// Annealing: start at a low temperature
    #[arg(long = "low-temp", default_value_t = false)]
    low_temp: bool,

    /// Annealing: epoch length factor (epoch = factor * edges^2)
    #[arg(long = "epoch-factor", default_value_t = 0.005)]
    epoch_factor: f64,

    /// Annealing: hard cap on the number of epochs
    #[arg(long = "max-epochs", default_value_t = 10_000)]
    max_epochs: usize,

    /// Seed for the random number generator (OS entropy when absent)
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Disable memoization of edge scores
    #[arg(long = "no-cache", default_value_t = false)]
    no_cache: bool,

    /// Output path for the result tree (`-` for stdout, `.gz` to compress)
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Quiet mode: suppresses progress messages on stdout
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,

    /// Log search details on stderr (-v info, -vv debug)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StartArg { Random, Stepwise, Exhaustive }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AlgorithmArg { Nni, Spr, Combo, Annealing }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ObjectiveArg { Lqic, Qpic, Eqpic }

impl From<StartArg> for StartTreeKind {
    fn from(arg: StartArg) -> Self {
        match arg {
            StartArg::Random => StartTreeKind::Random,
            StartArg::Stepwise => StartTreeKind::Stepwise,
            StartArg::Exhaustive => StartTreeKind::Exhaustive,
        }
    }
}

impl From<AlgorithmArg> for Algorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Nni => Algorithm::Nni,
            AlgorithmArg::Spr => Algorithm::Spr,
            AlgorithmArg::Combo => Algorithm::Combo,
            AlgorithmArg::Annealing => Algorithm::Annealing,
        }
    }
}

impl From<ObjectiveArg> for Objective {
    fn from(arg: ObjectiveArg) -> Self {
        match arg {
            ObjectiveArg::Lqic => Objective::Lqic,
            ObjectiveArg::Qpic => Objective::Qpic,
            ObjectiveArg::Eqpic => Objective::Eqpic,
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);
    // progress lines would end up in the tree stream
    let show = !args.quiet && args.output.as_os_str() != "-";

    let objective = Objective::from(args.objective);
    let config = SearchConfig {
        algorithm: args.algorithm.into(),
        objective,
        restricted: args.restricted,
        annealing: AnnealingConfig {
            low_temperature: args.low_temp,
            epoch_factor: args.epoch_factor,
            max_epochs: args.max_epochs,
            ..AnnealingConfig::default()
        },
    };
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    // Read reference trees and build the quartet table
    let t0 = Instant::now();
    let references = match read_reference_tree_files(&args.input) {
        Ok(trees) => trees,
        Err(e) => {
            eprintln!("Failed to read reference trees: {e}");
            std::process::exit(2);
        }
    };
    let mut oracle = match QuartetScoreComputer::new(&references) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Failed to index reference trees: {e}");
            std::process::exit(2);
        }
    };
    oracle.set_cache_enabled(!args.no_cache);
    let read_s = t0.elapsed().as_secs_f64();
    log_if(show, format!("Read {} reference trees over {} taxa {read_s:.3}s", references.len(), oracle.taxa().len()));

    // Start tree
    let t1 = Instant::now();
    let start = match &args.start {
        Some(path) => read_start_tree(path).unwrap_or_else(|e| {
            eprintln!("Failed to read start tree {path:?}: {e}");
            std::process::exit(2);
        }),
        None => {
            let leaves = oracle.taxa().to_vec();
            let kind = StartTreeKind::from(args.start_tree);
            build_start_tree(kind, &leaves, &mut oracle, objective, &mut rng).unwrap_or_else(|e| {
                eprintln!("Failed to build {kind} start tree: {e}");
                std::process::exit(3);
            })
        }
    };
    let start_score = match oracle.recompute_scores(&start, false) {
        Ok(()) => (ObjectiveFunctions::<QuartetScoreComputer>::new(objective).value)(&oracle),
        Err(e) => {
            eprintln!("Start tree does not match the reference taxa: {e}");
            std::process::exit(2);
        }
    };
    let start_s = t1.elapsed().as_secs_f64();
    log_if(show, format!("Start tree {objective} {start_score:.4} {start_s:.3}s"));

    // Search
    let t2 = Instant::now();
    let result = match run_search(&start, &mut oracle, &config, &mut rng) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("Search failed: {e}");
            std::process::exit(3);
        }
    };
    let score = (ObjectiveFunctions::<QuartetScoreComputer>::new(objective).value)(&oracle);
    let search_s = t2.elapsed().as_secs_f64();
    log_if(show, format!("Search {} finished with {objective} {score:.4} {search_s:.3}s", config.algorithm));

    let t3 = Instant::now();
    if let Err(e) = write_newick(&args.output, std::slice::from_ref(&result)) {
        eprintln!("Failed to write output {:?}: {e}", args.output);
        std::process::exit(4);
    }
    let write_s = t3.elapsed().as_secs_f64();
    log_write_done(show, &args.output, write_s);
}

fn log_if(show: bool, msg: String) {
    if show { println!("{}", msg); }
}

fn log_write_done(show: bool, output: &PathBuf, secs: f64) {
    if !show { return; }
    let is_stdout = output.as_os_str() == "-";
    if is_stdout {
        println!("Writing to stdout {secs:.3}s");
    } else {
        println!("Writing to output {secs:.3}s");
    }
}
