//! Ionic steps. Each step is either skipped (only scanned for its end) or decoded into a
//! [`Snapshot`].
//!
//! After the electronic loop ends, VASP prints a summary whose sections depend on the INCAR's
//! verbosity settings. Any of them may be missing; a missing section leaves its quantity at
//! its default. A section that *is* present must be complete: per-atom tables are aligned by
//! row, so a short or unparseable table is an error.

use std::{io::BufRead, rc::Rc};

use lin_alg::f64::Vec3;

use super::{LOOP_END, is_step_boundary};
use crate::{
    Dynamics, Lattice, OrbitalTable, SimulationRun, Snapshot, Thermodynamics,
    error::{Error, Result},
    text::{Line, LineCursor, parse_token},
};

/// VASP prints stresses in kBar.
const KBAR_TO_GPA: f64 = 0.1;

/// State shared by every step decoded within one run. Build a new one for each run; it
/// remembers the previous step's positions, which only make sense within a run.
#[derive(Clone, Debug)]
pub struct DecodeContext {
    /// fs
    pub step_duration: f64,
    pub lattice: Rc<Lattice>,
    pub n_atoms: usize,
    prev_positions: Option<Vec<Vec3>>,
}

impl DecodeContext {
    pub fn new(run: &SimulationRun, lattice: Rc<Lattice>) -> Self {
        let n_atoms = lattice.n_atoms();

        Self {
            step_duration: run.step_duration,
            lattice,
            n_atoms,
            prev_positions: None,
        }
    }

    /// Å/fs, from the displacement since the previous decoded step. Displacements are wrapped
    /// to the nearest periodic image, so atoms crossing the cell boundary don't appear to jump.
    fn velocities(&self, positions: &[Vec3]) -> Option<Vec<Vec3>> {
        let prev = self.prev_positions.as_ref()?;
        if prev.len() != positions.len() || self.step_duration <= 0. {
            return None;
        }

        let wrap = !self.lattice.is_degenerate();

        let vels = positions
            .iter()
            .zip(prev)
            .map(|(p, p_prev)| {
                let mut d = *p - *p_prev;
                if wrap {
                    let f = self.lattice.reduced(d);
                    let f = Vec3::new(f.x - f.x.round(), f.y - f.y.round(), f.z - f.z.round());
                    d = self.lattice.cartesian(f);
                }
                d * (1. / self.step_duration)
            })
            .collect();

        Some(vels)
    }
}

/// A summary section we decode.
#[derive(Clone, Copy, PartialEq, Debug)]
enum Section {
    /// ` total charge`, a per-atom table by orbital.
    Charge,
    /// ` magnetization (x)`, same layout as charge.
    Magnetization,
    /// `FORCE on cell =-STRESS ...`, ending at the `Total+kin.` row.
    Stress,
    /// ` POSITION    TOTAL-FORCE (eV/Angst)`, then a separator and one row per atom.
    PositionsForces,
    /// `kin. lattice  EKIN_LAT= ... (temperature  318.53 K)`
    Temperature,
    /// `total energy   ETOTAL = ... eV`. Always the last line of a step.
    Energy,
}

impl Section {
    fn trigger(line: &str) -> Option<Self> {
        let t = line.trim();

        if t == "total charge" {
            Some(Self::Charge)
        } else if t.starts_with("magnetization (x)") {
            Some(Self::Magnetization)
        } else if t.starts_with("FORCE on cell =-STRESS") {
            Some(Self::Stress)
        } else if t.contains("POSITION") && t.contains("TOTAL-FORCE") {
            Some(Self::PositionsForces)
        } else if t.contains("EKIN_LAT") {
            Some(Self::Temperature)
        } else if t.contains("ETOTAL") {
            Some(Self::Energy)
        } else {
            None
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Charge => "total charge",
            Self::Magnetization => "magnetization",
            Self::Stress => "stress",
            Self::PositionsForces => "POSITION/TOTAL-FORCE",
            Self::Temperature => "EKIN_LAT",
            Self::Energy => "ETOTAL",
        }
    }
}

/// Quantities read so far for the current step.
#[derive(Default)]
struct Partial {
    temperature: Option<f64>,
    energy: Option<f64>,
    stress: Option<[f64; 6]>,
    posits_forces: Option<(Vec<Vec3>, Vec<Vec3>)>,
    charge: Option<OrbitalTable>,
    magnetization: Option<OrbitalTable>,
}

/// `... (temperature  318.53 K)` and `... ETOTAL = -23.3 eV` both carry their value second
/// from the end.
fn second_to_last(line: Line) -> Result<f64> {
    let t = line
        .text
        .split_whitespace()
        .rev()
        .nth(1)
        .ok_or_else(|| Error::NumericParse {
            line: line.num,
            token: line.text.trim().to_owned(),
            expected: "a value before the unit",
        })?;

    parse_token(t, line.num, "a number")
}

fn is_separator(t: &str) -> bool {
    t.starts_with("--")
}

/// Reads a per-atom orbital table: a `# of ion  s  p  d  tot` title row, a separator, then
/// `n_atoms` rows of an index followed by one value per column.
fn read_orbital_table<R: BufRead>(
    cursor: &mut LineCursor<R>,
    n_atoms: usize,
    section: Section,
) -> Result<OrbitalTable> {
    let label = section.label();

    let orbitals: Vec<String> = loop {
        let line = cursor.expect_line(label)?;
        let t = line.text.trim();
        if t.is_empty() {
            continue;
        }

        if !t.starts_with('#') {
            return Err(Error::RowCountMismatch {
                line: line.num,
                section: label,
                expected: n_atoms,
                found: 0,
            });
        }

        break t
            .split_once("ion")
            .map(|(_, cols)| cols)
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_owned)
            .collect();
    };

    let line = cursor.expect_line(label)?;
    if !is_separator(line.text.trim()) {
        cursor.unread();
    }

    let mut values = Vec::with_capacity(n_atoms);
    for i in 0..n_atoms {
        let line = cursor.expect_line(label)?;
        let t = line.text.trim();

        if t.is_empty() || is_separator(t) || t.starts_with("tot") {
            return Err(Error::RowCountMismatch {
                line: line.num,
                section: label,
                expected: n_atoms,
                found: i,
            });
        }

        let row = t
            .split_whitespace()
            .skip(1)
            .map(|tok| parse_token::<f64>(tok, line.num, "an orbital value"))
            .collect::<Result<Vec<_>>>()?;

        if row.len() != orbitals.len() {
            return Err(Error::NumericParse {
                line: line.num,
                token: t.to_owned(),
                expected: "one value per orbital column",
            });
        }

        values.push(row);
    }

    Ok(OrbitalTable { orbitals, values })
}

/// Scans to the `Total+kin.` row. Returns `None`, leaving the line for the caller, if another
/// section, the next step or the next run starts first.
fn read_stress<R: BufRead>(cursor: &mut LineCursor<R>) -> Result<Option<[f64; 6]>> {
    let label = Section::Stress.label();

    loop {
        let line = cursor.expect_line(label)?;
        let t = line.text.trim();

        if let Some(rest) = t.strip_prefix("Total+kin.") {
            let mut stress = [0.; 6];
            let mut tokens = rest.split_whitespace();

            for s in &mut stress {
                let tok = tokens.next().ok_or_else(|| Error::NumericParse {
                    line: line.num,
                    token: t.to_owned(),
                    expected: "six stress components",
                })?;
                let kbar: f64 = parse_token(tok, line.num, "a stress component")?;
                *s = kbar * KBAR_TO_GPA;
            }

            return Ok(Some(stress));
        }

        if Section::trigger(t).is_some() || is_step_boundary(t) {
            cursor.unread();
            return Ok(None);
        }
    }
}

/// Positions (Å) and forces (eV/Å), one row of six values per atom after a separator line.
fn read_positions_forces<R: BufRead>(
    cursor: &mut LineCursor<R>,
    n_atoms: usize,
) -> Result<(Vec<Vec3>, Vec<Vec3>)> {
    let label = Section::PositionsForces.label();

    // Separator
    cursor.expect_line(label)?;

    let mut posits = Vec::with_capacity(n_atoms);
    let mut forces = Vec::with_capacity(n_atoms);

    for i in 0..n_atoms {
        let line = cursor.expect_line(label)?;
        let t = line.text.trim();

        let mut vals = [0.; 6];
        let mut tokens = t.split_whitespace();

        if is_separator(t) {
            return Err(Error::RowCountMismatch {
                line: line.num,
                section: label,
                expected: n_atoms,
                found: i,
            });
        }

        for v in &mut vals {
            let tok = tokens.next().ok_or_else(|| Error::RowCountMismatch {
                line: line.num,
                section: label,
                expected: n_atoms,
                found: i,
            })?;
            *v = parse_token(tok, line.num, "a position or force component")?;
        }

        posits.push(Vec3::new(vals[0], vals[1], vals[2]));
        forces.push(Vec3::new(vals[3], vals[4], vals[5]));
    }

    Ok((posits, forces))
}

/// Reads one ionic step at a time.
pub struct SnapshotDecoder;

impl SnapshotDecoder {
    /// Consume a step without decoding it. Holds nothing but the current line.
    pub fn skip_step<R: BufRead>(cursor: &mut LineCursor<R>) -> Result<()> {
        loop {
            let line = cursor.expect_line("an ionic step")?;
            if line.text.contains(LOOP_END) {
                return Ok(());
            }
        }
    }

    /// Decode the next step as global step number `step`.
    pub fn decode_step<R: BufRead>(
        cursor: &mut LineCursor<R>,
        ctx: &mut DecodeContext,
        step: usize,
    ) -> Result<Snapshot> {
        Self::skip_step(cursor)?;

        let mut partial = Partial::default();

        loop {
            let line = cursor.expect_line("an ionic step summary")?;

            if is_step_boundary(line.text) {
                log::debug!("Step {step} ended at line {} without ETOTAL", line.num);
                cursor.unread();
                break;
            }

            let Some(section) = Section::trigger(line.text) else {
                continue;
            };

            match section {
                Section::Temperature => partial.temperature = Some(second_to_last(line)?),
                Section::Energy => {
                    partial.energy = Some(second_to_last(line)?);
                    break;
                }
                Section::Charge | Section::Magnetization => {
                    let table = read_orbital_table(cursor, ctx.n_atoms, section)?;
                    if section == Section::Charge {
                        partial.charge = Some(table);
                    } else {
                        partial.magnetization = Some(table);
                    }
                }
                Section::Stress => partial.stress = read_stress(cursor)?,
                Section::PositionsForces => {
                    partial.posits_forces = Some(read_positions_forces(cursor, ctx.n_atoms)?)
                }
            }
        }

        Ok(Self::assemble(partial, ctx, step))
    }

    fn assemble(partial: Partial, ctx: &mut DecodeContext, step: usize) -> Snapshot {
        let pressure = partial
            .stress
            .map(|s| (s[0] + s[1] + s[2]) / 3.)
            .unwrap_or(0.);

        let (positions, forces) = match partial.posits_forces {
            Some(pf) => pf,
            None => {
                let zero = Vec3::new(0., 0., 0.);
                (vec![zero; ctx.n_atoms], vec![zero; ctx.n_atoms])
            }
        };

        let velocities = ctx.velocities(&positions);
        ctx.prev_positions = Some(positions.clone());

        Snapshot {
            step,
            thermo: Thermodynamics {
                temperature: partial.temperature.unwrap_or(0.),
                pressure,
                energy: partial.energy.unwrap_or(0.),
                stress: partial.stress,
            },
            dynamics: Dynamics {
                positions,
                forces,
                velocities,
                charge: partial.charge,
                magnetization: partial.magnetization,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcar::{
        HeaderScanner,
        test_data::{HEADER, STEP_BODY},
    };
    use std::io::Cursor;

    const TOL: f64 = 1e-9;

    /// A cursor parked after the header, and a context for its run.
    fn setup(text: &str) -> (LineCursor<Cursor<&str>>, DecodeContext) {
        let mut cursor = LineCursor::new(Cursor::new(text));
        let header = HeaderScanner::scan(&mut cursor, 0).unwrap().unwrap();
        let ctx = DecodeContext::new(&header.run, Rc::new(header.lattice));
        (cursor, ctx)
    }

    #[test]
    fn decodes_every_section() {
        let text = format!("{HEADER}{STEP_BODY}");
        let (mut cursor, mut ctx) = setup(&text);

        let snap = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 7).unwrap();
        assert_eq!(snap.step, 7);

        let th = &snap.thermo;
        assert!((th.temperature - 318.53).abs() < TOL);
        assert!((th.energy + 23.333333).abs() < TOL);
        assert!((th.pressure - (0.3972 + 0.4037 + 0.38) / 3.).abs() < TOL);
        let stress = th.stress.unwrap();
        assert!((stress[3] + 0.0232).abs() < TOL);

        let dy = &snap.dynamics;
        assert_eq!(dy.positions.len(), 3);
        assert_eq!(dy.positions[1], Vec3::new(1.5, 2.5, 3.5));
        assert_eq!(dy.forces[1], Vec3::new(-0.11, 0.12, -0.13));
        assert!(dy.velocities.is_none());

        let charge = dy.charge.as_ref().unwrap();
        assert_eq!(charge.orbitals, ["s", "p", "d", "tot"]);
        assert_eq!(charge.values[2], vec![1.699, 4.110, 0.0, 5.809]);

        assert!((dy.total_magnetization().unwrap() - 0.041).abs() < TOL);
    }

    #[test]
    fn velocities_from_consecutive_steps() {
        let second = STEP_BODY.replace(
            "      0.10000      0.20000      0.30000",
            "      0.25000      0.20000      0.30000",
        );
        let text = format!("{HEADER}{STEP_BODY}{second}");
        let (mut cursor, mut ctx) = setup(&text);

        SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 0).unwrap();
        let snap = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 1).unwrap();

        let v = snap.dynamics.velocities.unwrap();
        // 0.15 Å over 1.5 fs
        assert!((v[0].x - 0.1).abs() < TOL);
        assert!(v[1].x.abs() < TOL);
    }

    #[test]
    fn wraps_displacements_across_the_cell() {
        // Atom 3 moves from x = 4.0 to x = 4.9 + one cell vector; the short way is +0.9.
        let second = STEP_BODY.replace(
            "      4.00000      0.50000      5.00000",
            "      9.81600      0.50000      5.00000",
        );
        let text = format!("{HEADER}{STEP_BODY}{second}");
        let (mut cursor, mut ctx) = setup(&text);

        SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 0).unwrap();
        let snap = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 1).unwrap();

        let v = snap.dynamics.velocities.unwrap();
        assert!((v[2].x - 0.9 / 1.5).abs() < 1e-6);
    }

    #[test]
    fn skip_then_decode() {
        let text = format!("{HEADER}{STEP_BODY}{STEP_BODY}");
        let (mut cursor, mut ctx) = setup(&text);

        SnapshotDecoder::skip_step(&mut cursor).unwrap();
        let snap = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 1).unwrap();
        assert!((snap.thermo.temperature - 318.53).abs() < TOL);
    }

    #[test]
    fn absent_sections_use_defaults() {
        let body = "------------------------ aborting loop because EDIFF is reached -----------
  total energy   ETOTAL =       -20.000000 eV
";
        let text = format!("{HEADER}{body}");
        let (mut cursor, mut ctx) = setup(&text);

        let snap = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 0).unwrap();
        assert_eq!(snap.thermo.temperature, 0.);
        assert_eq!(snap.thermo.pressure, 0.);
        assert!(snap.thermo.stress.is_none());
        assert_eq!(snap.thermo.energy, -20.);
        assert!(snap.dynamics.charge.is_none());
        assert!(snap.dynamics.magnetization.is_none());
        assert_eq!(snap.dynamics.positions, vec![Vec3::new(0., 0., 0.); 3]);
    }

    #[test]
    fn next_step_ends_a_summary_without_energy() {
        let body = "------------------------ aborting loop because EDIFF is reached -----------
  kin. lattice  EKIN_LAT=         0.000000  (temperature  300.00 K)
--------------------------------------- Iteration      2(   1)  ---------------------------------------
";
        let text = format!("{HEADER}{body}");
        let (mut cursor, mut ctx) = setup(&text);

        let snap = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 0).unwrap();
        assert_eq!(snap.thermo.temperature, 300.);
        assert_eq!(snap.thermo.energy, 0.);

        // The boundary line is left for the next step.
        assert!(cursor.next_line().unwrap().unwrap().text.contains("Iteration"));
    }

    #[test]
    fn next_run_ends_a_summary_without_energy() {
        let body = STEP_BODY.replace("  total energy   ETOTAL =       -23.333333 eV\n", "");
        let text = format!("{HEADER}{body}{HEADER}");
        let (mut cursor, mut ctx) = setup(&text);

        let snap = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 0).unwrap();
        assert!((snap.thermo.temperature - 318.53).abs() < TOL);
        assert_eq!(snap.thermo.energy, 0.);
        assert_eq!(snap.dynamics.positions[1], Vec3::new(1.5, 2.5, 3.5));

        // The banner is left for the header scanner, and the next header reads in full.
        assert!(cursor.next_line().unwrap().unwrap().text.starts_with(" vasp."));
        cursor.unread();
        let next = HeaderScanner::scan(&mut cursor, 1).unwrap().unwrap();
        assert_eq!(next.run.steps, 3);
        assert_eq!(next.lattice.n_atoms(), 3);
    }

    #[test]
    fn next_run_ends_an_unfinished_stress_block() {
        let body = STEP_BODY.split("  Total+kin.").next().unwrap();
        let text = format!("{HEADER}{body}{HEADER}");
        let (mut cursor, mut ctx) = setup(&text);

        let snap = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 0).unwrap();
        assert!(snap.thermo.stress.is_none());
        assert_eq!(snap.thermo.pressure, 0.);
        assert!(snap.dynamics.charge.is_some());
        assert_eq!(snap.dynamics.positions, vec![Vec3::new(0., 0., 0.); 3]);

        let next = HeaderScanner::scan(&mut cursor, 1).unwrap().unwrap();
        assert!((next.run.step_duration - 1.5).abs() < TOL);
    }

    #[test]
    fn short_position_table() {
        let body = STEP_BODY.replace(
            "      4.00000      0.50000      5.00000         0.100000     -0.100000      0.100000\n",
            "",
        );
        let text = format!("{HEADER}{body}");
        let (mut cursor, mut ctx) = setup(&text);

        let err = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::RowCountMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn short_charge_table() {
        let body = STEP_BODY.replacen("    3        1.699   4.110   0.000   5.809\n", "", 1);
        let text = format!("{HEADER}{body}");
        let (mut cursor, mut ctx) = setup(&text);

        let err = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::RowCountMismatch {
                section: "total charge",
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn bad_number_in_table() {
        let body = STEP_BODY.replace("1.50000      2.50000", "1.50000      2.5x000");
        let text = format!("{HEADER}{body}");
        let (mut cursor, mut ctx) = setup(&text);

        let err = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 0).unwrap_err();
        assert!(matches!(err, Error::NumericParse { ref token, .. } if token == "2.5x000"));
    }

    #[test]
    fn end_of_input_mid_step() {
        let cut = STEP_BODY.split(" POSITION").next().unwrap();
        let text = format!("{HEADER}{cut}");
        let (mut cursor, mut ctx) = setup(&text);

        let err = SnapshotDecoder::decode_step(&mut cursor, &mut ctx, 0).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfStream { .. }));

        let (mut cursor, _) = setup(HEADER);
        let err = SnapshotDecoder::skip_step(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfStream { .. }));
    }
}
