//! Run headers: which species are present, how many of each, the cell, and the MD parameters.
//!
//! Several of the values we want are printed more than once before the first ionic step. (For
//! example, the cell is printed, then reprinted after symmetry analysis.) The last one seen
//! before the first `Iteration` line wins.

use std::io::BufRead;

use lin_alg::f64::Vec3;

use super::is_iteration_marker;
use crate::{
    Atom, Lattice, SimulationRun,
    error::{Error, Result},
    text::{Line, LineCursor, parse_list_after_eq, parse_token, tokens_after_eq},
};

/// Everything needed to decode the steps of one run.
#[derive(Clone, Debug)]
pub struct RunHeader {
    pub run: SimulationRun,
    pub lattice: Lattice,
}

/// Where we are in the header. The MD parameters we read are only trusted inside the echo of
/// the INCAR's ionic-relaxation group; `POMASS` and `ZVAL` also show up, with different
/// formatting, in each potential's own listing.
#[derive(Clone, Copy, PartialEq, Debug)]
enum Section {
    Preamble,
    RunParameters,
}

/// A header line we act on.
#[derive(Clone, Copy, PartialEq, Debug)]
enum Marker {
    /// `TITEL  = PAW_PBE Si 05Jan2001`; one per species.
    Title,
    /// `ions per type =  8  16`
    IonsPerType,
    /// `SYSTEM =  quartz`
    System,
    /// `Ionic relaxation`
    RunParametersStart,
    /// `DOS related values:`
    RunParametersEnd,
    /// `NSW    =   1000    number of steps for IOM`
    Steps,
    /// `POTIM  = 0.5000    time-step for ionic-motion`
    StepDuration,
    /// `POMASS =  28.09 16.00`
    Masses,
    /// `ZVAL   =   4.00  6.00`
    Valences,
    /// `direct lattice vectors    reciprocal lattice vectors`, followed by three rows.
    LatticeVectors,
    /// First electronic iteration of the first ionic step.
    Iteration,
}

impl Marker {
    /// Which marker, if any, starts this line, given the section we're in.
    fn classify(line: &str, section: Section) -> Option<Self> {
        let t = line.trim_start();

        if section == Section::RunParameters {
            if t.starts_with("DOS related values") {
                return Some(Self::RunParametersEnd);
            }
            if t.starts_with("NSW") {
                return Some(Self::Steps);
            }
            if t.starts_with("POTIM") {
                return Some(Self::StepDuration);
            }
            if t.starts_with("POMASS") {
                return Some(Self::Masses);
            }
            if t.starts_with("ZVAL") {
                return Some(Self::Valences);
            }
        }

        if t.starts_with("TITEL") {
            Some(Self::Title)
        } else if t.contains("ions per type") {
            Some(Self::IonsPerType)
        } else if t.starts_with("SYSTEM") && t.contains('=') {
            Some(Self::System)
        } else if t.starts_with("Ionic relaxation") {
            Some(Self::RunParametersStart)
        } else if t.contains("direct lattice vectors") && t.contains("reciprocal lattice vectors") {
            Some(Self::LatticeVectors)
        } else if is_iteration_marker(t) {
            Some(Self::Iteration)
        } else {
            None
        }
    }
}

/// Header values collected so far.
#[derive(Default, Debug)]
struct Fields {
    symbols: Vec<String>,
    counts: Vec<usize>,
    masses: Vec<f64>,
    valences: Vec<f64>,
    name: Option<String>,
    steps: Option<usize>,
    step_duration: Option<f64>,
    basis: Option<[Vec3; 3]>,
}

fn missing_token(line: usize, marker: &str) -> Error {
    Error::MalformedHeader {
        line,
        details: format!("{marker} line has no value"),
    }
}

impl Fields {
    /// Record the value(s) carried on a single marker line.
    fn read_line(&mut self, marker: Marker, line: Line) -> Result<()> {
        let Line { num, text } = line;

        match marker {
            Marker::Title => {
                let symbol = tokens_after_eq(text)
                    .nth(1)
                    .ok_or_else(|| missing_token(num, "TITEL"))?;
                self.symbols.push(symbol.to_owned());
            }
            Marker::IonsPerType => {
                self.counts = parse_list_after_eq(text, num, "an ion count")?
                    .ok_or_else(|| missing_token(num, "ions per type"))?;
            }
            Marker::System => {
                let name = tokens_after_eq(text)
                    .next()
                    .ok_or_else(|| missing_token(num, "SYSTEM"))?;
                self.name = Some(name.to_owned());
            }
            Marker::Steps => {
                let t = tokens_after_eq(text)
                    .next()
                    .ok_or_else(|| missing_token(num, "NSW"))?;
                self.steps = Some(parse_token(t, num, "a step count")?);
            }
            Marker::StepDuration => {
                let t = tokens_after_eq(text)
                    .next()
                    .ok_or_else(|| missing_token(num, "POTIM"))?;
                self.step_duration = Some(parse_token(t, num, "a time step")?);
            }
            Marker::Masses => {
                self.masses = parse_list_after_eq(text, num, "a mass")?
                    .ok_or_else(|| missing_token(num, "POMASS"))?;
            }
            Marker::Valences => {
                self.valences = parse_list_after_eq(text, num, "a valence")?
                    .ok_or_else(|| missing_token(num, "ZVAL"))?;
            }
            // These don't carry values on their own line.
            Marker::RunParametersStart
            | Marker::RunParametersEnd
            | Marker::LatticeVectors
            | Marker::Iteration => {}
        }

        Ok(())
    }

    /// Check the collected values agree with each other, and build the run and its cell.
    fn assemble(self, cycle: usize, line: usize) -> Result<RunHeader> {
        let n = self.symbols.len();
        if self.counts.len() != n || self.masses.len() != n || self.valences.len() != n {
            return Err(Error::MalformedHeader {
                line,
                details: format!(
                    "per-species lists disagree: {} TITEL symbols, {} ion counts, {} masses, {} valences",
                    n,
                    self.counts.len(),
                    self.masses.len(),
                    self.valences.len()
                ),
            });
        }

        let steps = self.steps.ok_or_else(|| Error::MalformedHeader {
            line,
            details: "no NSW (step count) before the first iteration".to_owned(),
        })?;

        let step_duration = self.step_duration.ok_or_else(|| Error::MalformedHeader {
            line,
            details: "no POTIM (time step) before the first iteration".to_owned(),
        })?;

        let composition = self
            .symbols
            .iter()
            .zip(&self.masses)
            .zip(&self.valences)
            .zip(self.counts)
            .map(|(((sym, mass), val), count)| (Atom::new(sym, *mass, *val), count));

        let name = self.name.unwrap_or_else(|| "unknown".to_owned());

        let lattice = match self.basis {
            Some(basis) => Lattice::new(&name, basis, composition),
            None => {
                log::warn!("No lattice vectors in the header of cycle {cycle}; using a zero cell");
                let zero = Vec3::new(0., 0., 0.);
                Lattice::new(&name, [zero; 3], composition)
            }
        };

        Ok(RunHeader {
            run: SimulationRun {
                cycle,
                steps,
                step_duration,
            },
            lattice,
        })
    }
}

/// Reads the three rows after the lattice vector title. Only the first three columns are
/// direct-space vectors; the rest are reciprocal.
fn read_basis<R: BufRead>(cursor: &mut LineCursor<R>) -> Result<[Vec3; 3]> {
    let mut rows = [Vec3::new(0., 0., 0.); 3];

    for row in &mut rows {
        let Line { num, text } = cursor.expect_line("the direct lattice vectors")?;

        let mut vals = [0.; 3];
        let mut tokens = text.split_whitespace();
        for v in &mut vals {
            let t = tokens.next().ok_or_else(|| Error::MalformedHeader {
                line: num,
                details: "lattice vector row has fewer than 3 values".to_owned(),
            })?;
            *v = parse_token(t, num, "a lattice vector component")?;
        }

        *row = Vec3::new(vals[0], vals[1], vals[2]);
    }

    Ok(rows)
}

/// Scans forward to the next complete run header.
pub struct HeaderScanner;

impl HeaderScanner {
    /// Consume lines up to and including the first `Iteration` line, collecting the header.
    /// Returns `None` if the input ends first; that's the normal end of a log, not an error.
    pub fn scan<R: BufRead>(cursor: &mut LineCursor<R>, cycle: usize) -> Result<Option<RunHeader>> {
        let mut fields = Fields::default();
        let mut section = Section::Preamble;

        loop {
            let Some(line) = cursor.next_line()? else {
                if fields.steps.is_some() || !fields.symbols.is_empty() {
                    log::warn!("Input ended inside a run header (cycle {cycle}); ignoring it");
                }
                return Ok(None);
            };

            let Some(marker) = Marker::classify(line.text, section) else {
                continue;
            };

            match marker {
                Marker::RunParametersStart => section = Section::RunParameters,
                Marker::RunParametersEnd => section = Section::Preamble,
                Marker::LatticeVectors => fields.basis = Some(read_basis(cursor)?),
                Marker::Iteration => {
                    let header = fields.assemble(cycle, line.num)?;
                    log::debug!(
                        "Header for cycle {cycle} complete at line {}: {} atoms, {} steps",
                        line.num,
                        header.lattice.n_atoms(),
                        header.run.steps
                    );
                    return Ok(Some(header));
                }
                _ => fields.read_line(marker, line)?,
            }
        }
    }
}
