//! Corpus Curator CLI
//!
//! Thin command-line front end over the curation library. Each subcommand runs
//! one stage (or the whole pipeline) and prints a colored summary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use corpus_curator::corpus::{
    balance_corpus, purge_non_images, repair_corpus, rng_from_seed, standardize_corpus,
    survey_corpus, BalanceStatus,
};
use corpus_curator::semantic::filter_outliers;
use corpus_curator::utils::logging::{init_logging, LogConfig, LogLevel};
use corpus_curator::utils::{format_duration, format_number};
use corpus_curator::{CurationConfig, CurationPipeline, PrecomputedScores, PromptTemplate, Stage};

/// Image corpus curation
///
/// Repairs, standardizes, balances and filters a class-per-directory image
/// corpus so it is ready for classifier training.
#[derive(Parser, Debug)]
#[command(name = "corpus_curator")]
#[command(author = "Warre Snaet")]
#[command(version = "0.1.0")]
#[command(about = "Curate class-per-directory image corpora", long_about = None)]
struct Cli {
    /// Enable verbose logging (per-file actions)
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(long, default_value = "false", global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// JSON configuration file (defaults are used for missing fields)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show progress bars
    #[arg(long, default_value = "false", global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete files that do not carry an image extension
    Purge {
        /// Corpus root (one subdirectory per class)
        #[arg(short, long)]
        root: PathBuf,

        /// Comma-separated list of allowed extensions
        #[arg(long, value_delimiter = ',')]
        extensions: Option<Vec<String>>,
    },

    /// Delete undecodable images and re-encode softly corrupt ones
    Repair {
        #[arg(short, long)]
        root: PathBuf,
    },

    /// Convert every image to RGB JPEG with a .jpg extension
    Standardize {
        #[arg(short, long)]
        root: PathBuf,
    },

    /// Add augmented copies until every class reaches the target
    Balance {
        #[arg(short, long)]
        root: PathBuf,

        /// Minimum number of images per class
        #[arg(short, long)]
        target: Option<usize>,

        /// Random seed for reproducible augmentation
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Quarantine images whose score against their label is below the threshold
    Filter {
        #[arg(short, long)]
        root: PathBuf,

        /// Quarantine root (must be outside the corpus)
        #[arg(short, long)]
        quarantine: PathBuf,

        /// JSON file mapping corpus-relative paths to scores
        #[arg(short, long)]
        scores: PathBuf,

        /// Confidence threshold
        #[arg(long)]
        threshold: Option<f32>,

        /// Prompt template with a {} placeholder for the label
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Print a read-only census of the corpus
    Survey {
        #[arg(short, long)]
        root: PathBuf,

        /// List images with at least this many channels
        #[arg(long, default_value = "4")]
        min_channels: u8,
    },

    /// Run the full pipeline
    ///
    /// Precomputed scores are keyed by the final file names, which standardize
    /// and balance change. Run once without --scores (the filter is skipped),
    /// score the curated corpus, then run again with --from filter --scores.
    Run {
        #[arg(short, long)]
        root: PathBuf,

        /// Scores for the outlier filter; only accepted with --from filter
        #[arg(short, long)]
        scores: Option<PathBuf>,

        /// Quarantine root for the outlier filter
        #[arg(short, long)]
        quarantine: Option<PathBuf>,

        /// Resume from this stage (purge, repair, standardize, balance, filter)
        #[arg(long, default_value = "purge")]
        from: Stage,

        /// Write the full JSON report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Random seed for reproducible augmentation
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::parse(level);
    }

    let _ = init_logging(&log_config);

    let mut config = load_config(cli.config.as_deref())?;
    config.show_progress = cli.progress;

    match cli.command {
        Commands::Purge { root, extensions } => {
            if let Some(extensions) = extensions {
                config.allowed_extensions = extensions;
            }
            cmd_purge(&root, &config)?;
        }

        Commands::Repair { root } => {
            cmd_repair(&root, &config)?;
        }

        Commands::Standardize { root } => {
            cmd_standardize(&root, &config)?;
        }

        Commands::Balance { root, target, seed } => {
            if let Some(target) = target {
                config.balance.target_per_class = target;
            }
            if seed.is_some() {
                config.balance.seed = seed;
            }
            cmd_balance(&root, &config)?;
        }

        Commands::Filter {
            root,
            quarantine,
            scores,
            threshold,
            prompt,
        } => {
            if let Some(threshold) = threshold {
                config.filter.threshold = threshold;
            }
            if let Some(prompt) = prompt {
                config.filter.prompt_template = PromptTemplate::new(prompt);
            }
            config.validate()?;
            cmd_filter(&root, &quarantine, &scores, &config)?;
        }

        Commands::Survey { root, min_channels } => {
            cmd_survey(&root, &config, min_channels)?;
        }

        Commands::Run {
            root,
            scores,
            quarantine,
            from,
            report,
            seed,
        } => {
            if seed.is_some() {
                config.balance.seed = seed;
            }
            cmd_run(
                &root,
                config,
                scores.as_deref(),
                quarantine.as_deref(),
                from,
                report.as_deref(),
            )?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CurationConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            CurationConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))
        }
        None => Ok(CurationConfig::default()),
    }
}

fn print_header(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

fn cmd_purge(root: &Path, config: &CurationConfig) -> Result<()> {
    let report = purge_non_images(root, &config.allowed_extensions)?;

    print_header("Purge");
    println!("  Files scanned:     {}", format_number(report.scanned));
    println!(
        "  Non-images removed: {}",
        format_number(report.removed.len()).yellow()
    );
    if !report.failures.is_empty() {
        println!("  {} {}", "Failed deletions:".red(), report.failures.len());
    }
    Ok(())
}

fn cmd_repair(root: &Path, config: &CurationConfig) -> Result<()> {
    let report = repair_corpus(root, config)?;

    print_header("Integrity");
    println!("  Images checked:  {}", format_number(report.scanned));
    println!("  OK:              {}", format_number(report.ok).green());
    println!("  Repaired:        {}", format_number(report.repaired.len()).yellow());
    println!("  Removed:         {}", format_number(report.removed.len()).red());
    if !report.skipped_non_images.is_empty() {
        println!(
            "  Not images:      {} (run purge to remove)",
            report.skipped_non_images.len()
        );
    }
    Ok(())
}

fn cmd_standardize(root: &Path, config: &CurationConfig) -> Result<()> {
    let report = standardize_corpus(root, config)?;

    print_header("Standardize");
    println!("  Images checked:  {}", format_number(report.scanned));
    println!("  Already canonical: {}", format_number(report.unchanged).green());
    println!(
        "  Converted:       {} ({} color changes)",
        format_number(report.converted.len()).yellow(),
        report.recolored
    );
    println!("  Removed:         {}", format_number(report.removed.len()).red());
    if report.problems.len() > report.removed.len() {
        println!(
            "  {} {}",
            "Left untouched:".red(),
            report.problems.len() - report.removed.len()
        );
    }
    Ok(())
}

fn cmd_balance(root: &Path, config: &CurationConfig) -> Result<()> {
    let mut rng = rng_from_seed(config.balance.seed);
    let report = balance_corpus(root, config, &mut rng)?;

    print_header("Balance");
    println!("  Target per class: {}", format_number(report.target));
    for class in &report.classes {
        let status = match class.status {
            BalanceStatus::NoSources => "no sources".red(),
            BalanceStatus::AlreadySufficient => "sufficient".green(),
            BalanceStatus::Balanced => "balanced".green(),
            BalanceStatus::Shortfall => format!("short by {}", class.shortfall).red(),
        };
        println!(
            "  {:<20} {:>6} originals  +{:<6} {}",
            class.label,
            format_number(class.originals),
            format_number(class.created),
            status
        );
    }
    println!(
        "  Created {} synthetic images",
        format_number(report.total_created).bold()
    );
    Ok(())
}

fn cmd_filter(root: &Path, quarantine: &Path, scores: &Path, config: &CurationConfig) -> Result<()> {
    let scorer = PrecomputedScores::from_file(scores)
        .with_context(|| format!("Failed to load scores from {:?}", scores))?;
    info!("Loaded {} precomputed scores", scorer.len());

    let report = filter_outliers(root, quarantine, &scorer, config)?;

    print_header(&format!("Outlier filter (threshold {:.2})", report.threshold));
    for class in &report.classes {
        if class.quarantined.is_empty() {
            println!("  {:<20} {}", class.label, "all above threshold".green());
        } else {
            println!(
                "  {:<20} moved {} of {}",
                class.label,
                class.quarantined.len().to_string().yellow(),
                class.processed
            );
        }
    }
    println!(
        "  Processed {}, quarantined {}, retained {}, failed {}",
        format_number(report.processed),
        format_number(report.quarantined),
        format_number(report.retained),
        format_number(report.failed)
    );
    Ok(())
}

fn cmd_survey(root: &Path, config: &CurationConfig, min_channels: u8) -> Result<()> {
    let survey = survey_corpus(root, &config.allowed_extensions, min_channels)?;

    print_header("Extensions");
    for (ext, count) in &survey.extensions {
        let ext = if ext.is_empty() { "(none)" } else { ext.as_str() };
        println!("  {:<8} {}", ext, format_number(*count));
    }

    print_header("Classes");
    for class in &survey.classes {
        println!(
            "  {:<20} {:>6} images ({} synthetic, {} non-canonical, {} with {}+ channels, {} unreadable)",
            class.label,
            format_number(class.images),
            class.synthetic,
            class.non_canonical,
            class.multi_channel.len(),
            min_channels,
            class.unreadable.len()
        );
    }

    if let Some((min, max)) = survey.class_size_range() {
        println!();
        println!(
            "  {} images in {} classes (smallest {}, largest {})",
            format_number(survey.total_images()),
            survey.classes.len(),
            format_number(min),
            format_number(max)
        );
    }
    Ok(())
}

/// Check the filter arguments of `run` before anything touches the corpus
fn check_filter_args(scores: Option<&Path>, quarantine: Option<&Path>, from: Stage) -> Result<()> {
    match (scores, quarantine) {
        (Some(_), None) => anyhow::bail!("--scores requires --quarantine"),
        (None, Some(_)) => anyhow::bail!("--quarantine requires --scores"),
        (Some(_), Some(_)) if from != Stage::Filter => anyhow::bail!(
            "--scores needs --from filter: earlier stages rename files and add synthetic \
             images the scores cannot cover. Run without --scores first, score the result, \
             then resume with --from filter"
        ),
        _ => Ok(()),
    }
}

fn cmd_run(
    root: &Path,
    config: CurationConfig,
    scores: Option<&Path>,
    quarantine: Option<&Path>,
    from: Stage,
    report_path: Option<&Path>,
) -> Result<()> {
    check_filter_args(scores, quarantine, from)?;

    let start = Instant::now();
    let mut rng = rng_from_seed(config.balance.seed);

    let scorer = match scores {
        Some(path) => Some(
            PrecomputedScores::from_file(path)
                .with_context(|| format!("Failed to load scores from {:?}", path))?,
        ),
        None => None,
    };

    let mut pipeline = CurationPipeline::new(config).start_at(from);
    if let (Some(scorer), Some(quarantine)) = (&scorer, quarantine) {
        pipeline = pipeline.with_filter(scorer, quarantine);
    }

    let report = pipeline.run(root, &mut rng)?;

    print_header("Curation complete");
    println!(
        "  Stages: {}",
        report
            .stages_run
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    if let Some(purge) = &report.purge {
        println!("  Non-images removed:  {}", format_number(purge.removed.len()));
    }
    if let Some(integrity) = &report.integrity {
        println!(
            "  Repaired / removed:  {} / {}",
            format_number(integrity.repaired.len()),
            format_number(integrity.removed.len())
        );
    }
    if let Some(standardize) = &report.standardize {
        println!("  Converted:           {}", format_number(standardize.converted.len()));
    }
    if let Some(balance) = &report.balance {
        println!("  Synthetic created:   {}", format_number(balance.total_created));
        if balance.total_shortfall > 0 {
            println!(
                "  {} {}",
                "Shortfall:".red(),
                format_number(balance.total_shortfall)
            );
        }
    }
    if let Some(outliers) = &report.outliers {
        println!("  Quarantined:         {}", format_number(outliers.quarantined));
    }
    println!("  Problems recorded:   {}", report.problem_count());
    println!("  Elapsed:             {}", format_duration(start.elapsed().as_secs_f64()));

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("Failed to write report to {:?}", path))?;
        println!("  Report saved to: {}", path.display().to_string().green());
    }

    Ok(())
}
