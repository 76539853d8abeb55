use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pigment_lib::build::{colors, input};
use pigment_lib::{
    build_coloring, index, install_signal_handlers, pseudoalign, AlignmentMode, BuildConfig,
    ColoredIndex, GraphIndex, QueryConfig, TempFileManager,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pigment")]
#[command(version = "0.1.0")]
#[command(about = "Pseudoalignment against a colored de Bruijn graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a colored index from reference sequences
    Build {
        /// K-mer length (required unless --load-boss is given)
        #[arg(short, long, required_unless_present = "load_boss")]
        k: Option<usize>,

        /// Input sequences in FASTA/FASTQ format, .gz accepted
        #[arg(short, long)]
        input: PathBuf,

        /// Color file: one non-negative integer per input sequence
        #[arg(short, long, conflicts_with = "auto_colors")]
        colors: Option<PathBuf>,

        /// Assign color ids 0, 1, 2, … by sequence index (the default when
        /// no color file is given)
        #[arg(long)]
        auto_colors: bool,

        /// Index output prefix; writes <prefix>.tdbg and <prefix>.tcolors
        #[arg(short, long)]
        output: PathBuf,

        /// Directory for temporary files
        #[arg(long)]
        temp_dir: PathBuf,

        /// RAM budget in megabytes for the external-memory stages
        #[arg(long, default_value_t = 1000)]
        mem_megas: usize,

        /// Number of worker threads
        #[arg(long, default_value_t = 1)]
        n_threads: usize,

        /// Color-set pointer layout tuning knob
        #[arg(long, default_value_t = 3)]
        colorset_pointer_tradeoff: usize,

        /// Index only the forward strand of the input
        #[arg(long)]
        forward_strand_only: bool,

        /// Reuse the de Bruijn graph already built at <prefix>.tdbg and
        /// only (re)build the colors
        #[arg(long)]
        load_boss: bool,
    },

    /// Pseudoalign query sequences against a built index
    Pseudoalign {
        /// Query sequences in FASTA/FASTQ format, .gz accepted
        #[arg(short, long)]
        query: PathBuf,

        /// Index prefix given to `pigment build -o`
        #[arg(short, long)]
        index: PathBuf,

        /// Output file, one line per query
        #[arg(short, long)]
        output: PathBuf,

        /// Directory for temporary files
        #[arg(long)]
        temp_dir: PathBuf,

        /// Number of worker threads
        #[arg(long, default_value_t = 1)]
        n_threads: usize,

        /// Batch size per worker in megabytes of query sequence
        #[arg(long, default_value_t = 8.0)]
        buffer_size_megas: f64,

        /// Also match the reverse complement of every query k-mer
        #[arg(long)]
        rc: bool,

        /// Threshold mode: report colors covering at least this fraction
        /// of the query's k-mers (in [0, 1]); without it, report the exact
        /// intersection
        #[arg(long)]
        threshold: Option<f64>,

        /// In threshold mode, leave k-mers missing from the graph out of
        /// the denominator
        #[arg(long, conflicts_with = "include_unknown_kmers")]
        ignore_unknown_kmers: bool,

        /// In threshold mode, count k-mers missing from the graph in the
        /// denominator (the default)
        #[arg(long)]
        include_unknown_kmers: bool,

        /// Sort the color ids on each output line
        #[arg(long)]
        sort_output: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info.
    // All diagnostics go to stderr; stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            k,
            input,
            colors,
            auto_colors,
            output,
            temp_dir,
            mem_megas,
            n_threads,
            colorset_pointer_tradeoff,
            forward_strand_only,
            load_boss,
        } => build_command(BuildArgs {
            k,
            input,
            colors,
            auto_colors,
            output,
            temp_dir,
            mem_megas,
            n_threads,
            colorset_pointer_tradeoff,
            forward_strand_only,
            load_boss,
        }),
        Commands::Pseudoalign {
            query,
            index,
            output,
            temp_dir,
            n_threads,
            buffer_size_megas,
            rc,
            threshold,
            ignore_unknown_kmers,
            include_unknown_kmers,
            sort_output,
        } => pseudoalign_command(PseudoalignArgs {
            query,
            index,
            output,
            temp_dir,
            n_threads,
            buffer_size_megas,
            rc,
            threshold,
            ignore_unknown_kmers,
            include_unknown_kmers,
            sort_output,
        }),
    }
}

struct BuildArgs {
    k: Option<usize>,
    input: PathBuf,
    colors: Option<PathBuf>,
    auto_colors: bool,
    output: PathBuf,
    temp_dir: PathBuf,
    mem_megas: usize,
    n_threads: usize,
    colorset_pointer_tradeoff: usize,
    forward_strand_only: bool,
    load_boss: bool,
}

fn build_command(args: BuildArgs) -> anyhow::Result<()> {
    let temp = TempFileManager::new(&args.temp_dir)
        .with_context(|| format!("cannot use temp directory {}", args.temp_dir.display()))?;
    install_signal_handlers(&temp)?;

    let ram_bytes = args.mem_megas * 1_000_000;

    info!("Reading sequences from {}", args.input.display());
    let seqs = input::read_sequences(&args.input)?;
    info!("  {} sequences", seqs.len());

    let labels = match &args.colors {
        Some(path) => colors::read_color_file(path, seqs.len())?,
        None => {
            if args.auto_colors {
                info!("Assigning automatic colors 0..{}", seqs.len());
            } else {
                info!("No color file given, assigning colors by sequence index");
            }
            colors::auto_colors(seqs.len())
        }
    };

    let (runs, run_colors) = input::split_at_non_acgt(&seqs, &labels)?;
    if runs.len() != seqs.len() {
        info!("  Split into {} ACGT runs", runs.len());
    }
    drop(seqs);

    let graph = if args.load_boss {
        let path = index::graph_path(&args.output);
        info!("Loading the de Bruijn graph from {}", path.display());
        GraphIndex::load(&path)?
    } else {
        let k = args.k.expect("clap requires -k without --load-boss");
        GraphIndex::build(
            &runs,
            k,
            !args.forward_strand_only,
            ram_bytes,
            args.n_threads,
            &temp,
        )?
    };

    let config = BuildConfig {
        k: graph.k(),
        ram_bytes,
        n_threads: args.n_threads,
        add_rev_comp: !args.forward_strand_only,
        colorset_pointer_tradeoff: args.colorset_pointer_tradeoff,
    };
    config.log();

    let coloring = build_coloring(&graph, &runs, &run_colors, &config, &temp)?;

    info!("Writing the index to prefix {}", args.output.display());
    if args.load_boss {
        // The graph on disk is the one just loaded; only the colors change.
        let path = index::coloring_path(&args.output);
        let mut writer = BufWriter::new(File::create(&path)?);
        coloring.serialize(&mut writer)?;
        writer.flush()?;
    } else {
        ColoredIndex { graph, coloring }.save(&args.output)?;
    }

    info!("Finished");
    Ok(())
}

struct PseudoalignArgs {
    query: PathBuf,
    index: PathBuf,
    output: PathBuf,
    temp_dir: PathBuf,
    n_threads: usize,
    buffer_size_megas: f64,
    rc: bool,
    threshold: Option<f64>,
    ignore_unknown_kmers: bool,
    include_unknown_kmers: bool,
    sort_output: bool,
}

fn pseudoalign_command(args: PseudoalignArgs) -> anyhow::Result<()> {
    let temp = TempFileManager::new(&args.temp_dir)
        .with_context(|| format!("cannot use temp directory {}", args.temp_dir.display()))?;
    install_signal_handlers(&temp)?;

    if args.threshold.is_none() && (args.ignore_unknown_kmers || args.include_unknown_kmers) {
        warn!("unknown-k-mer flags have no effect in intersection mode");
    }
    if !(args.buffer_size_megas > 0.0) {
        anyhow::bail!("--buffer-size-megas must be positive");
    }

    let index = ColoredIndex::load(&args.index)?;

    let mode = match args.threshold {
        None => AlignmentMode::Intersection,
        Some(tau) => AlignmentMode::Threshold {
            tau,
            ignore_unknown: args.ignore_unknown_kmers,
        },
    };
    let config = QueryConfig {
        mode,
        reverse_complement: args.rc,
        n_threads: args.n_threads,
        buffer_bytes: ((args.buffer_size_megas * 1e6) as usize).max(1),
        sort_output: args.sort_output,
    };

    let out = BufWriter::new(
        File::create(&args.output)
            .with_context(|| format!("cannot create {}", args.output.display()))?,
    );
    pseudoalign(&index.graph, &index.coloring, &config, &args.query, out)?;

    info!("Finished");
    Ok(())
}
