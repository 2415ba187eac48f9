//! `snapraid`: a thin driver over `snapraid_core` that exercises the library
//! end to end — load a TOML-described array, run one of `sync`/`check`/
//! `fix`/`scrub`/`status`/`rehash`, and exit with the run's outcome code.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rand::RngCore;
use snapraid_core::config::Config;
use snapraid_core::content;
use snapraid_core::error::{CoreResult, Outcome};
use snapraid_core::parityfile::ParityFile;
use snapraid_core::pipeline::{check, scrub, sync};
use snapraid_core::progress::{Interrupt, Progress, SystemClock};

#[derive(Parser)]
#[command(name = "snapraid")]
#[command(about = "block-level parity protection for an array of independent data disks")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Path to the array's TOML configuration file.
    #[arg(short, long, default_value = "snapraid.conf")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold every pending file addition/removal into the parity files.
    Sync,
    /// Verify stored hashes and parity against what's on disk; report only.
    Check,
    /// Like `check`, but repair what the parity can reconstruct.
    Fix,
    /// Re-verify a rolling sample of already-synced slots.
    Scrub {
        #[arg(long, default_value_t = scrub::DEFAULT_FRACTION)]
        fraction: f64,
        #[arg(long, default_value_t = scrub::DEFAULT_OLDER_THAN_DAYS)]
        older_than_days: u32,
    },
    /// Print array size and last-sync/last-check summary.
    Status,
    /// Mark every synced block for rehashing under the array's configured
    /// algorithm; the next `sync` clears the flag one block at a time.
    Rehash,
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let outcome = match run(&cli) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            e.outcome()
        }
    };
    std::process::exit(outcome.exit_code());
}

fn run(cli: &Cli) -> CoreResult<Outcome> {
    let config = Config::load(&cli.config)?;

    let mut disk_roots = HashMap::new();
    for disk in &config.disks {
        disk_roots.insert(disk.name.clone(), disk.path.clone());
    }

    let primary_content = &config.content[0];
    let (mut store, algorithm, seed, prev) = if primary_content.exists() {
        let loaded = content::load(primary_content, &disk_roots, false)?;
        (loaded.store, loaded.algorithm, loaded.seed, loaded.prev)
    } else {
        let mut store = snapraid_core::blockstore::BlockStore::new(config.array.block_size);
        for disk in &config.disks {
            store.add_disk(disk.name.clone(), disk.path.clone());
        }
        let mut seed = [0u8; 16];
        rand::rng().fill_bytes(&mut seed);
        (store, config.hash_algorithm(), seed, None)
    };

    let mut parity: Vec<ParityFile> = config
        .parities
        .iter()
        .map(|p| ParityFile::create(&p.path, config.array.block_size, store.parity_allocated_size()))
        .collect::<CoreResult<_>>()?;

    let interrupt = Interrupt::new();
    install_sigint_handler(interrupt.clone());
    let clock = SystemClock;

    let outcome = match &cli.command {
        Commands::Sync => {
            let progress = Progress::new(store.parity_allocated_size());
            let report = sync::run(
                &mut store,
                &mut parity,
                algorithm,
                &seed,
                config.array.neutralize_xls_headers,
                &config.content,
                config.array.autosave_bytes,
                prev,
                &interrupt,
                &progress,
                &clock,
            )?;
            tracing::info!(slots_touched = report.slots_touched, slots_total = report.slots_total, interrupted = report.interrupted, "sync finished");
            if report.interrupted {
                Outcome::OperationalFailure
            } else {
                Outcome::Success
            }
        }
        Commands::Check | Commands::Fix => {
            let fix = matches!(cli.command, Commands::Fix);
            let slots: Vec<u64> = (0..store.parity_used_size()).collect();
            let progress = Progress::new(slots.len() as u64);
            let report = check::run(
                &mut store,
                &mut parity,
                algorithm,
                &seed,
                config.array.neutralize_xls_headers,
                fix,
                &slots,
                &config.content,
                prev,
                &interrupt,
                &progress,
                &clock,
            )?;
            tracing::info!(bad_slots = report.bad_slot_count(), checked = report.results.len(), "check finished");
            report.outcome()
        }
        Commands::Scrub { fraction, older_than_days } => {
            let progress = Progress::new(store.parity_used_size());
            let report = scrub::run(
                &mut store,
                &mut parity,
                algorithm,
                &seed,
                config.array.neutralize_xls_headers,
                *fraction,
                *older_than_days,
                &config.content,
                prev,
                &interrupt,
                &progress,
                &clock,
            )?;
            tracing::info!(bad_slots = report.bad_slot_count(), checked = report.results.len(), "scrub finished");
            report.outcome()
        }
        Commands::Status => {
            print_status(&store, &config);
            Outcome::Success
        }
        Commands::Rehash => {
            snapraid_core::pipeline::mark_all_for_rehash(&mut store);
            content::save(&config.content, &store, algorithm, &seed, Some((algorithm, seed)))?;
            tracing::info!("every synced block marked for rehash; run `sync` to apply it");
            Outcome::Success
        }
    };

    Ok(outcome)
}

fn print_status(store: &snapraid_core::blockstore::BlockStore, config: &Config) {
    println!("block size: {} bytes", store.block_size());
    println!("allocated slots: {}", store.parity_allocated_size());
    println!("synced slots:    {}", store.parity_used_size());
    println!("needs rehash:    {}", snapraid_core::pipeline::rehash_pending(store));

    // The info array's per-slot `time_t` doubles as a last-sync/last-check
    // histogram (spec §3); status only needs the two summary numbers a
    // human actually reads: how stale the newest sync is, and how many
    // slots are still flagged bad from the last check/scrub.
    let used = store.parity_used_size();
    let mut last_sync = 0u32;
    let mut bad_slots = 0u64;
    for slot in 0..used {
        let info = store.info_get(slot as usize);
        last_sync = last_sync.max(info.time());
        if info.is_bad() {
            bad_slots += 1;
        }
    }
    println!("last sync:       {}", format_unix_time(last_sync));
    println!("bad slots:       {bad_slots}");

    for disk in &config.disks {
        if let Some(id) = store.disk_by_name(&disk.name) {
            let count = store.disk(id).map(|d| d.files_in_order().count()).unwrap_or(0);
            println!("disk {:>10}: {} files", disk.name, count);
        }
    }
}

/// Renders an info-array `time_t` (spec §3; `0` means "never synced") as an
/// RFC 3339 timestamp for `status` output.
fn format_unix_time(secs: u32) -> String {
    if secs == 0 {
        return "never".to_string();
    }
    DateTime::<Utc>::from_timestamp(secs as i64, 0).map(|dt| dt.to_rfc3339()).unwrap_or_else(|| "invalid".to_string())
}

#[cfg(unix)]
fn install_sigint_handler(interrupt: Interrupt) {
    ctrlc_shim::install(interrupt);
}

#[cfg(not(unix))]
fn install_sigint_handler(_interrupt: Interrupt) {}

#[cfg(unix)]
mod ctrlc_shim {
    //! A minimal `SIGINT` handler: async-signal-safe only because it touches
    //! nothing but an `AtomicBool` through the already-installed
    //! [`Interrupt`] flag.
    use super::Interrupt;
    use std::sync::OnceLock;

    static INTERRUPT: OnceLock<Interrupt> = OnceLock::new();

    extern "C" fn handler(_sig: libc::c_int) {
        if let Some(flag) = INTERRUPT.get() {
            flag.trigger();
        }
    }

    pub fn install(interrupt: Interrupt) {
        if INTERRUPT.set(interrupt).is_ok() {
            unsafe {
                libc::signal(libc::SIGINT, handler as usize);
            }
        }
    }
}
