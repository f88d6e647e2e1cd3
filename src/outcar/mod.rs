//! For reading VASP [OUTCAR](https://www.vasp.at/wiki/index.php/OUTCAR) files from molecular
//! dynamics runs (`IBRION = 0`). A single OUTCAR may hold several concatenated runs ("cycles"),
//! e.g. from restarting a job and appending its output.
//!
//! Parsing is positional: each run starts with a header (potentials, INCAR echo, cell),
//! followed by one block per ionic step. A step block holds the electronic iterations, a line
//! marking the end of the self-consistency loop, then the summary sections we decode.

pub mod header;
pub mod snapshot;

use std::sync::LazyLock;

use regex::Regex;

pub use header::{HeaderScanner, RunHeader};
pub use snapshot::{DecodeContext, SnapshotDecoder};

/// e.g. `----------------------------------------- Iteration    1(   1)  ---------------`
static ITERATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Iteration\s+\d+\s*\(\s*\d+\s*\)").unwrap());

/// Ends the electronic loop of one ionic step. Either `aborting loop because EDIFF is reached`
/// or `aborting loop EDIFF was not reached (unconverged)`.
pub(crate) const LOOP_END: &str = "aborting loop";

/// The first electronic iteration of a step. Also ends a run header.
pub(crate) fn is_iteration_marker(line: &str) -> bool {
    line.contains("Iteration") && ITERATION_RE.is_match(line)
}

/// The first lines of a run header: the version banner (`vasp.6.3.0 18Jan22 ...`), then the
/// potential listing.
pub(crate) fn is_run_start(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("vasp.") || t.starts_with("POTCAR:") || t.starts_with("TITEL")
}

/// A line that ends the summary of an ionic step: the next step's first iteration, another
/// electronic loop ending, or the header of the next run.
pub(crate) fn is_step_boundary(line: &str) -> bool {
    line.contains(LOOP_END) || is_iteration_marker(line) || is_run_start(line)
}
