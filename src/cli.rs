//
// cli.rs
// dicomweb-static
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the corresponding modules.
//

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::{archive, repair};

/// Command-line interface glue code: defines the available verbs and dispatches to modules.
#[derive(Parser)]
#[command(name = "dicomweb-static")]
#[command(about = "Conversor DICOM para arquivo DICOMweb estático", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a DICOM directory tree into a static DICOMweb archive
    Convert {
        source_dir: PathBuf,
        output_dir: PathBuf,
    },
    /// Backfill the series-level singleton record for an already written study
    BackfillSeries {
        source_dir: PathBuf,
        output_dir: PathBuf,
    },
    /// Copy the first instance thumbnail up to the series directory
    PromoteThumbnail { series_dir: PathBuf },
    /// Strip non-essential tags from an oversized series metadata file
    PruneMetadata { series_dir: PathBuf },
}

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse the raw CLI arguments once and dispatch to a subcommand handler.
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            source_dir,
            output_dir,
        } => {
            let summary = archive::convert(&source_dir, &output_dir)?;
            println!("Conversion complete");
            println!("  Studies:    {}", summary.studies);
            println!("  Series:     {}", summary.stats.series);
            println!("  Instances:  {}", summary.stats.instances);
            println!("  Frames:     {}", summary.stats.frames);
            println!("  Thumbnails: {}", summary.stats.thumbnails);
            if summary.report.total_skipped() > 0 {
                println!("  Skipped:    {}", summary.report.total_skipped());
                for (reason, count) in &summary.report.skipped {
                    println!("    {}: {}", reason, count);
                }
            }
        }
        Commands::BackfillSeries {
            source_dir,
            output_dir,
        } => {
            let path = repair::backfill_series_singleton(&source_dir, &output_dir)?;
            println!("Series singleton written to {:?}", path);
        }
        Commands::PromoteThumbnail { series_dir } => {
            match repair::promote_thumbnail(&series_dir)? {
                Some(path) => println!("Series thumbnail written to {:?}", path),
                None => println!("No instance thumbnail available; nothing promoted"),
            }
        }
        Commands::PruneMetadata { series_dir } => {
            let outcome = repair::prune_metadata(&series_dir)?;
            println!("Pruned metadata for {} instance(s)", outcome.instances);
            println!("  Before: {} bytes", outcome.bytes_before);
            println!("  After:  {} bytes", outcome.bytes_after);
            println!("  Backup: metadata_original.gz");
        }
    }

    Ok(())
}
