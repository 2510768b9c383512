//! `voxmap-cli` – map inspection tool.
//!
//! Small diagnostic front end for persisted voxmap files:
//!
//! - `voxmap info <map>` – header, node/leaf counts and label coverage.
//! - `voxmap histogram <map> <out.eps>` – render the per-channel label
//!   histograms to EPS via gnuplot.

use std::process::ExitCode;

use colored::Colorize;
use voxmap_semantic::LabelTree;
use voxmap_semantic::histogram;

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // Initialise tracing-subscriber using RUST_LOG (defaults to "info").
    // Set VOXMAP_LOG_FORMAT=json for newline-delimited JSON logs.  The
    // user-facing output below still uses println! for UX consistency.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("VOXMAP_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    // Tree types must be registered before any map file is opened.
    voxmap_semantic::register_tree_types();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.as_slice() {
        [cmd, map] if cmd.as_str() == "info" => cmd_info(map),
        [cmd, map, out] if cmd.as_str() == "histogram" => cmd_histogram(map, out),
        _ => {
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!("{}", "voxmap – semantic occupancy map inspector".bold());
    println!();
    println!("Usage:");
    println!("  voxmap info <map>                 show map statistics");
    println!("  voxmap histogram <map> <out.eps>  render label histograms via gnuplot");
}

fn cmd_info(path: &str) -> Result<(), voxmap_core::MapError> {
    let tree = LabelTree::read_file(path)?;

    let mut leaves = 0usize;
    let mut occupied = 0usize;
    let mut labeled = 0usize;
    for (node, _depth) in tree.leaves() {
        leaves += 1;
        if tree.is_occupied(node) {
            occupied += 1;
        }
        if node.data.is_label_set() {
            labeled += 1;
        }
    }

    println!("{} {}", "map:".bold(), path);
    println!("  resolution   {:.4} m", tree.resolution());
    println!("  nodes        {}", tree.num_nodes());
    println!("  leaves       {leaves}");
    println!("  occupied     {}", occupied.to_string().green());
    println!("  labeled      {}", labeled.to_string().cyan());
    Ok(())
}

fn cmd_histogram(path: &str, out: &str) -> Result<(), voxmap_core::MapError> {
    let tree = LabelTree::read_file(path)?;
    let h = histogram::label_histogram(&tree);
    println!(
        "  {} occupied leaves over 5 channels",
        h.samples.to_string().bold()
    );
    histogram::write_histogram_eps(&tree, out)?;
    println!("  {} {}", "✓ wrote".green(), out);
    Ok(())
}
