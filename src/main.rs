use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use discload::config::{DEFAULT_COMMIT_RATE, DEFAULT_DATABASE, DEFAULT_DATA_DIR, DEFAULT_DUMP_DATE};
use discload::db::{self, SqliteStore};
use discload::pipeline::{DumpSet, ImportConfig, Selection};
use discload::stats::ImportStats;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "discload")]
#[command(about = "Load Discogs XML dumps into a relational SQLite database")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream dump files into the database
    Import(ImportArgs),
    /// Create, drop or reset the database tables
    Db(DbArgs),
}

#[derive(Args)]
#[command(group(ArgGroup::new("load").required(true).multiple(true)))]
struct ImportArgs {
    /// Load the labels
    #[arg(long, group = "load")]
    labels: bool,

    /// Load the parent labels
    #[arg(long, group = "load")]
    parent_labels: bool,

    /// Load the sublabels
    #[arg(long, group = "load")]
    sublabels: bool,

    /// Load the artists
    #[arg(long, group = "load")]
    artists: bool,

    /// Load the artists' aliases
    #[arg(long, group = "load")]
    artist_aliases: bool,

    /// Load the artists' groups
    #[arg(long, group = "load")]
    artist_groups: bool,

    /// Load the masters
    #[arg(long, group = "load")]
    masters: bool,

    /// Load the releases
    #[arg(long, group = "load")]
    releases: bool,

    /// Load the release artists
    #[arg(long, group = "load")]
    release_artists: bool,

    /// Load the release labels
    #[arg(long, group = "load")]
    release_labels: bool,

    /// Load everything
    #[arg(long, group = "load")]
    all: bool,

    /// Directory containing discogs_<date>_<family>.xml dumps
    #[arg(long, env = "DISCLOAD_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Dump date embedded in the file names
    #[arg(long, default_value = DEFAULT_DUMP_DATE)]
    date: String,

    /// SQLite database to write
    #[arg(long, env = "DISCLOAD_DATABASE", default_value = DEFAULT_DATABASE)]
    database: PathBuf,

    /// Commit to the database every N changes (0 = only at the end of each pass)
    #[arg(long, default_value_t = DEFAULT_COMMIT_RATE)]
    commit_rate: u32,

    /// Skip names and releases that already exist instead of failing
    #[arg(long)]
    skip_existing: bool,

    /// Write per-pass statistics as JSON to this path
    #[arg(long)]
    stats_json: Option<PathBuf>,
}

impl ImportArgs {
    fn selection(&self) -> Selection {
        Selection {
            labels: self.labels,
            parent_labels: self.parent_labels,
            sublabels: self.sublabels,
            artists: self.artists,
            artist_aliases: self.artist_aliases,
            artist_groups: self.artist_groups,
            masters: self.masters,
            releases: self.releases,
            release_artists: self.release_artists,
            release_labels: self.release_labels,
            all: self.all,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DbAction {
    /// Create tables
    Create,
    /// Drop tables
    Drop,
    /// Drop and create
    Reset,
}

#[derive(Args)]
struct DbArgs {
    #[arg(value_enum)]
    action: DbAction,

    /// SQLite database to operate on
    #[arg(long, env = "DISCLOAD_DATABASE", default_value = DEFAULT_DATABASE)]
    database: PathBuf,
}

fn print_summary(stats: &ImportStats, store: &SqliteStore) -> Result<()> {
    println!();
    println!("=== Summary ===");
    for pass in &stats.passes {
        println!(
            "{:<16} seen {:>10}  accepted {:>10}  skipped {:>10}  commits {:>6}  {:.2}s",
            pass.pass.description(),
            pass.elements_seen,
            pass.accepted,
            pass.skipped(),
            pass.commits,
            pass.duration_secs
        );
    }
    println!();
    println!("Total time:         {:.2}s", stats.duration_secs());
    println!("Elements processed: {}", stats.elements_seen());
    println!("Accepted:           {}", stats.accepted());
    println!("Skipped:            {}", stats.skipped());
    println!();
    for (table, count) in store.table_counts()? {
        println!("{:<20}{}", format!("{table}:"), count);
    }
    Ok(())
}

fn run_import(args: ImportArgs) -> Result<()> {
    let config = ImportConfig {
        dumps: DumpSet::new(&args.data_dir, args.date.clone()),
        selection: args.selection(),
        commit_rate: args.commit_rate,
    };

    let mut store = SqliteStore::open(&args.database)?.with_skip_existing(args.skip_existing);
    info!(database = %args.database.display(), commit_rate = args.commit_rate, "Starting import");

    let stats = discload::pipeline::run_import(&mut store, &config)?;
    print_summary(&stats, &store)?;

    if let Some(path) = &args.stats_json {
        let file = File::create(path)
            .with_context(|| format!("Failed to create stats file: {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &stats)
            .context("Failed to write stats")?;
        info!(path = %path.display(), "Statistics written");
    }
    Ok(())
}

fn run_db(args: DbArgs) -> Result<()> {
    let conn = db::open_connection(&args.database)?;
    match args.action {
        DbAction::Create => db::create_schema(&conn)?,
        DbAction::Drop => db::drop_schema(&conn)?,
        DbAction::Reset => db::reset_schema(&conn)?,
    }
    println!("Done: {}", args.database.display());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Import(args) => run_import(args),
        Commands::Db(args) => run_db(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
