//! Diagnostic label histograms.
//!
//! Builds 256-bin per-channel histograms (color channels, interest score,
//! visit count) over the occupied leaves of a [`LabelTree`] and optionally
//! renders them to an EPS file through an external `gnuplot` process.  The
//! histogram computation is pure; the render is best-effort I/O whose
//! failure never touches the tree.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::warn;
use voxmap_core::MapError;

use crate::tree::LabelTree;

/// Number of bins per channel; values are clamped into `[0, 255]`.
pub const HISTOGRAM_BINS: usize = 256;

/// Per-channel histograms over the occupied leaves of a tree.
#[derive(Clone)]
pub struct LabelHistogram {
    pub r: [u32; HISTOGRAM_BINS],
    pub g: [u32; HISTOGRAM_BINS],
    pub b: [u32; HISTOGRAM_BINS],
    pub interest: [u32; HISTOGRAM_BINS],
    pub visits: [u32; HISTOGRAM_BINS],
    /// Number of occupied leaves that contributed.
    pub samples: u64,
}

impl LabelHistogram {
    fn empty() -> Self {
        Self {
            r: [0; HISTOGRAM_BINS],
            g: [0; HISTOGRAM_BINS],
            b: [0; HISTOGRAM_BINS],
            interest: [0; HISTOGRAM_BINS],
            visits: [0; HISTOGRAM_BINS],
            samples: 0,
        }
    }
}

fn bin(value: f64) -> usize {
    value.clamp(0.0, (HISTOGRAM_BINS - 1) as f64) as usize
}

/// Compute the per-channel histograms over all occupied leaves.
///
/// Leaves with an unset label still contribute their color channels (the
/// default white) and a zero interest bin, mirroring what an inspection of
/// the raw payloads would show.
pub fn label_histogram(tree: &LabelTree) -> LabelHistogram {
    let mut h = LabelHistogram::empty();
    for (node, _depth) in tree.leaves() {
        if !tree.is_occupied(node) {
            continue;
        }
        let label = node.data.label();
        h.r[bin(label.r)] += 1;
        h.g[bin(label.g)] += 1;
        h.b[bin(label.b)] += 1;
        h.interest[bin(label.interest.unwrap_or(0.0))] += 1;
        h.visits[bin(label.num_visits as f64)] += 1;
        h.samples += 1;
    }
    h
}

/// Render the tree's label histograms to an EPS file via `gnuplot`.
///
/// Spawns `gnuplot` and streams the plot script plus inline data over its
/// stdin.  A missing binary, a broken pipe or a non-zero exit status is
/// reported as [`MapError::Io`] (and logged); the tree itself is read-only
/// throughout and cannot be corrupted by a failing render.
pub fn write_histogram_eps(tree: &LabelTree, out: impl AsRef<Path>) -> Result<(), MapError> {
    let h = label_histogram(tree);
    let out = out.as_ref();

    let mut child = Command::new("gnuplot")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            warn!(error = %e, "failed to spawn gnuplot for histogram render");
            MapError::Io(e)
        })?;

    {
        let Some(stdin) = child.stdin.as_mut() else {
            return Err(MapError::Io(std::io::Error::other(
                "gnuplot stdin unavailable",
            )));
        };
        write_plot_script(stdin, &h, out)?;
    }

    let status = child.wait()?;
    if !status.success() {
        warn!(%status, "gnuplot exited with failure while rendering histogram");
        return Err(MapError::Io(std::io::Error::other(format!(
            "gnuplot exited with {status}"
        ))));
    }
    Ok(())
}

fn write_plot_script<W: Write>(
    w: &mut W,
    h: &LabelHistogram,
    out: &Path,
) -> Result<(), MapError> {
    writeln!(w, "set term postscript eps enhanced color")?;
    writeln!(w, "set output \"{}\"", out.display())?;
    write!(w, "plot [-1:{HISTOGRAM_BINS}] ")?;
    writeln!(
        w,
        "'-' w filledcurve lt 1 lc 1 tit \"r\", \
         '-' w filledcurve lt 1 lc 2 tit \"g\", \
         '-' w filledcurve lt 1 lc 3 tit \"b\", \
         '-' w l lt 2 lc 4 tit \"interest\", \
         '-' w l lt 2 lc 5 tit \"visits\""
    )?;
    for channel in [&h.r, &h.g, &h.b, &h.interest, &h.visits] {
        write_channel(w, channel)?;
    }
    Ok(())
}

fn write_channel<W: Write>(w: &mut W, counts: &[u32; HISTOGRAM_BINS]) -> Result<(), MapError> {
    for (i, count) in counts.iter().enumerate() {
        writeln!(w, "{i} {count}")?;
    }
    writeln!(w, "e")?;
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
