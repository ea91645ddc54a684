//! PDF Shrink CLI tool
//!
//! A command-line tool for shrinking PDFs by rewriting their object graph.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glob::glob;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use pdf_shrink::pdf::{inspect_file, optimize_file, ImageOptions, OptimizeOptions, OptimizeReport};

/// PDF Shrink - Remove dead objects, merge duplicates and recompress PDFs
#[derive(Parser)]
#[command(name = "pdf-shrink")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Lossless optimization, writing report.min.pdf
    pdf-shrink optimize report.pdf

    # Re-encode images as JPEG, capped at 150 dpi
    pdf-shrink optimize --lossy --max-dpi 150 -o small.pdf scan.pdf

    # Optimize every PDF in a directory into out/
    pdf-shrink optimize --out-dir out \"docs/*.pdf\"")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize one or more PDF files
    Optimize {
        /// Input PDF files. Supports glob patterns like "*.pdf"
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output PDF file path (single input only)
        #[arg(short, long, conflicts_with = "out_dir")]
        output: Option<PathBuf>,

        /// Directory receiving optimized files under their original names
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Re-encode eligible images as JPEG
        #[arg(long)]
        lossy: bool,

        /// JPEG quality between 0 and 1
        #[arg(long, default_value_t = pdf_shrink::pdf::images::DEFAULT_QUALITY)]
        quality: f32,

        /// Downsample images above this effective resolution (implies --lossy)
        #[arg(long)]
        max_dpi: Option<f32>,

        /// Replace embedded copies of the 14 standard fonts with references
        #[arg(long)]
        unembed_fonts: bool,

        /// Include per-image decisions in the report
        #[arg(long)]
        debug: bool,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show information about a PDF file
    Info {
        /// PDF file to inspect
        input: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    match cli.command {
        Commands::Optimize {
            inputs, output, out_dir, lossy, quality, max_dpi, unembed_fonts, debug, json,
        } => {
            if !(0.0..=1.0).contains(&quality) {
                bail!("--quality must be between 0 and 1, got {}", quality);
            }
            let options = OptimizeOptions {
                images: ImageOptions {
                    enabled: lossy || max_dpi.is_some(),
                    quality,
                    max_dpi,
                    ..Default::default()
                },
                unembed_fonts,
                debug,
                ..Default::default()
            };
            cmd_optimize(inputs, output, out_dir, &options, json)
        }
        Commands::Info { input, json } => cmd_info(&input, json),
    }
}

/// Expand glob patterns in input paths
fn expand_globs(patterns: Vec<String>) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        // Check if pattern contains glob characters
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let mut matched = false;
            for entry in glob(&pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))? {
                match entry {
                    Ok(path) => {
                        paths.push(path);
                        matched = true;
                    }
                    Err(e) => log::warn!("glob error for {}: {}", pattern, e),
                }
            }
            if !matched {
                bail!("No files matched pattern: {}", pattern);
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }

    // Sort paths for consistent ordering
    paths.sort();
    paths.dedup();

    Ok(paths)
}

/// Where the optimized copy of `input` is written
fn output_path_for(input: &Path, output: Option<&Path>, out_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(output) = output {
        return Ok(output.to_path_buf());
    }
    let file_name = input
        .file_name()
        .with_context(|| format!("Not a file: {}", input.display()))?;
    if let Some(dir) = out_dir {
        return Ok(dir.join(file_name));
    }
    let stem = input.file_stem().unwrap_or(file_name).to_string_lossy();
    Ok(input.with_file_name(format!("{}.min.pdf", stem)))
}

/// Output path for every input; two inputs may not share a target
fn plan_outputs(inputs: &[PathBuf], output: Option<&Path>, out_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(inputs.len());
    for input in inputs {
        let target = output_path_for(input, output, out_dir)?;
        if !seen.insert(target.clone()) {
            bail!(
                "{} would overwrite the output of another input ({})",
                input.display(),
                target.display()
            );
        }
        targets.push(target);
    }
    Ok(targets)
}

/// Optimize every input, continuing past failures
fn cmd_optimize(
    inputs: Vec<String>,
    output: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    options: &OptimizeOptions,
    json: bool,
) -> Result<()> {
    let inputs = expand_globs(inputs)?;
    if output.is_some() && inputs.len() > 1 {
        bail!("--output takes a single input; use --out-dir for {} files", inputs.len());
    }
    let targets = plan_outputs(&inputs, output.as_deref(), out_dir.as_deref())?;
    if let Some(dir) = &out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }

    let mut failures = 0;
    for (input, target) in inputs.iter().zip(&targets) {
        match optimize_file(input, target, options) {
            Ok(report) => print_report(input, target, &report, json)?,
            Err(e) => {
                eprintln!("Error: {}: {}", input.display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} files failed", failures, inputs.len());
    }
    Ok(())
}

fn print_report(input: &Path, target: &Path, report: &OptimizeReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let before = report.input_bytes.unwrap_or_default();
    let after = report.output_bytes.unwrap_or_default();
    let saved = if before > 0 {
        100.0 * (before as f64 - after as f64) / before as f64
    } else {
        0.0
    };
    println!("{} -> {}", input.display(), target.display());
    println!("  Size: {} -> {} bytes ({:.1}% saved)", before, after, saved);
    println!("  Objects removed: {}", report.removed());
    println!("  Objects deduplicated: {}", report.dedup.deduplicated);
    println!(
        "  Streams recompressed: {} (skipped {})",
        report.streams.recompressed, report.streams.skipped
    );
    if report.images.converted + report.images.skipped > 0 {
        println!(
            "  Images converted: {} (downsampled {}, skipped {})",
            report.images.converted, report.images.downsampled, report.images.skipped
        );
        for (reason, count) in &report.images.skip_reasons {
            println!("    {}: {}", reason.as_str(), count);
        }
    }
    if report.fonts.pdfa_skipped {
        println!("  Fonts: left embedded (PDF/A)");
    } else if report.fonts.unembedded + report.fonts.skipped > 0 {
        println!(
            "  Fonts unembedded: {} (skipped {})",
            report.fonts.unembedded, report.fonts.skipped
        );
    }
    Ok(())
}

/// Show information about a PDF
fn cmd_info(input: &Path, json: bool) -> Result<()> {
    let info = inspect_file(input).with_context(|| format!("Failed to inspect {}", input.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", input.display());
    println!("Version: {}", info.version);
    println!("Pages: {}", info.page_count);
    println!("Objects: {} ({} streams)", info.object_count, info.stream_count);
    println!("Images: {}", info.image_count);
    println!("Fonts: {} ({} embedded font programs)", info.font_count, info.embedded_font_files);
    if info.traits.pdfa {
        println!("Conformance: PDF/A");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_sits_next_to_input() {
        let target = output_path_for(Path::new("docs/report.pdf"), None, None).unwrap();
        assert_eq!(target, PathBuf::from("docs/report.min.pdf"));
    }

    #[test]
    fn test_same_name_into_out_dir_is_rejected() {
        let inputs = vec![PathBuf::from("a/report.pdf"), PathBuf::from("b/report.pdf")];
        let result = plan_outputs(&inputs, None, Some(Path::new("out")));
        assert!(result.is_err());
    }

    #[test]
    fn test_distinct_names_into_out_dir() {
        let inputs = vec![PathBuf::from("a/one.pdf"), PathBuf::from("b/two.pdf")];
        let targets = plan_outputs(&inputs, None, Some(Path::new("out"))).unwrap();
        assert_eq!(targets, vec![PathBuf::from("out/one.pdf"), PathBuf::from("out/two.pdf")]);
    }
}
