//! Converts the OUTCAR logs of VASP molecular dynamics runs into a compact, line-oriented
//! trajectory format, in a single streaming pass.
//!
//! A log may hold several concatenated runs. A step window, counted in global steps across all
//! runs, selects which steps are decoded and written; the rest are scanned past without being
//! parsed. See [`convert`] and [`convert_file`].
//!
//! [`outcar`] holds the log scanners, [`trajectory`] the output format and a reader for it.

pub mod convert;
pub mod error;
pub mod lattice;
pub mod outcar;
pub mod text;
pub mod trajectory;

use std::rc::Rc;

use lin_alg::f64::Vec3;

pub use convert::{
    ConversionObserver, ConvertOptions, Converter, Window, convert, convert_file, convert_stream,
};
pub use error::{Error, Result};
pub use lattice::{Atom, Lattice};
pub use trajectory::{
    BufferedTrajectoryWriter, TrajectoryHeader, TrajectoryReader, TrajectorySink, TrajectoryWriter,
};

/// fs to ps.
const FS_TO_PS: f64 = 0.001;

/// One contiguous MD segment of a log.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationRun {
    /// 0 for the first run in a log.
    pub cycle: usize,
    /// As read from the header (`NSW`). After conversion, the number of steps actually emitted.
    pub steps: usize,
    /// fs
    pub step_duration: f64,
}

impl SimulationRun {
    /// ps
    pub fn time(&self) -> f64 {
        self.steps as f64 * self.step_duration * FS_TO_PS
    }
}

/// Summary of a whole conversion.
#[derive(Clone, Debug, Default)]
pub struct Simulation {
    pub name: String,
    /// The first lattice seen. Composition doesn't change across runs of one log.
    pub lattice: Option<Rc<Lattice>>,
    pub runs: Vec<SimulationRun>,
}

impl Simulation {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn total_steps(&self) -> usize {
        self.runs.iter().map(|r| r.steps).sum()
    }

    /// ps. Each run contributes with its own step duration.
    pub fn total_time(&self) -> f64 {
        self.runs.iter().map(|r| r.time()).sum()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Thermodynamics {
    /// K
    pub temperature: f64,
    /// GPa. Mean of the diagonal of `stress`.
    pub pressure: f64,
    /// eV
    pub energy: f64,
    /// GPa; XX YY ZZ XY YZ ZX
    pub stress: Option<[f64; 6]>,
}

/// A per-atom table with one column per orbital, e.g. `s p d tot`.
#[derive(Clone, Debug, PartialEq)]
pub struct OrbitalTable {
    pub orbitals: Vec<String>,
    /// Outer: atoms. Inner: one value per orbital column.
    pub values: Vec<Vec<f64>>,
}

impl OrbitalTable {
    /// Sum over atoms of the last (total) column.
    pub fn total(&self) -> f64 {
        self.values.iter().filter_map(|row| row.last()).sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dynamics {
    /// Å
    pub positions: Vec<Vec3>,
    /// eV/Å
    pub forces: Vec<Vec3>,
    /// Å/fs. `None` for the first decoded step of a run.
    pub velocities: Option<Vec<Vec3>>,
    pub charge: Option<OrbitalTable>,
    pub magnetization: Option<OrbitalTable>,
}

impl Dynamics {
    pub fn total_magnetization(&self) -> Option<f64> {
        self.magnetization.as_ref().map(|m| m.total())
    }
}

/// The state of the system at one MD step. Snapshots are written out as soon as they're
/// decoded; a conversion never holds more than one.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Global step index, counting every step of every run in the log.
    pub step: usize,
    pub thermo: Thermodynamics,
    pub dynamics: Dynamics,
}
