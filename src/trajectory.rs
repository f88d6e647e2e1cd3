//! The trajectory format we write: a plain-text summary block, the lattice, then one block per
//! snapshot.
//!
//! ```text
//! Simulation: quartz
//! Cycles =             3
//! Steps  =          1900
//! Time   =          0.850000 ps
//! Lattice: quartz
//!       4.91600000      0.00000000      0.00000000
//!      -2.45800000      4.25738000      0.00000000
//!       0.00000000      0.00000000      5.40500000
//! Si O
//! 1 2
//! Snapshot: 0
//! Temperature = 318.530000 K
//! Pressure = 0.393633 GPa
//! Energy = -23.333333 eV
//! Position_x      Position_y ...
//! <one row per atom: position, velocity, force>
//!
//! Snapshot: 1
//! ...
//! ```
//!
//! The summary totals aren't known until the whole log has been read. They're written as
//! fixed-width placeholders, and overwritten in place once the conversion finishes. Sinks that
//! can't seek are handled by [`BufferedTrajectoryWriter`].

use std::{
    io::{self, BufRead, Cursor, ErrorKind, Seek, SeekFrom, Write},
    rc::Rc,
};

use lin_alg::f64::Vec3;

use crate::{
    Atom, Dynamics, Lattice, Simulation, Snapshot, Thermodynamics,
    error::{Error, Result},
    text::{Line, LineCursor, parse_token},
};

/// Per-atom column titles. Downstream tools match this line exactly, including the second
/// `Position_z` where `Velocity_z` belongs.
pub const COLUMN_HEADER: &str = "Position_x      Position_y      Position_z      Velocity_x      \
Velocity_y      Position_z      Force_x         Force_y         Force_z";

/// Where decoded data goes. The converter calls `write_header` once, when the first run header
/// has been read, then `write_snapshot` per decoded step, then `finish` exactly once.
pub trait TrajectorySink {
    fn write_header(&mut self, sim: &Simulation, lattice: &Lattice) -> Result<()>;

    fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// Record final totals. If no header was ever written (the log held no runs), write one now
    /// for an empty simulation.
    fn finish(&mut self, sim: &Simulation) -> Result<()>;
}

/// The `Cycles`, `Steps` and `Time` lines. Fixed width, so the placeholder can be overwritten
/// in place.
fn totals(sim: &Simulation) -> String {
    format!(
        "Cycles =  {:>12}\nSteps  =  {:>12}\nTime   =  {:>16.6} ps\n",
        sim.runs.len(),
        sim.total_steps(),
        sim.total_time()
    )
}

/// Each value gets at least one leading space, so wide values can't run into their neighbour.
fn write_vec3<W: Write>(w: &mut W, v: Vec3) -> io::Result<()> {
    write!(w, " {:>15.8} {:>15.8} {:>15.8}", v.x, v.y, v.z)
}

/// Writes the trajectory format to a seekable output, e.g. a file.
pub struct TrajectoryWriter<W: Write + Seek> {
    out: W,
    /// Start and byte length of the totals lines, once the header has been written.
    totals_pos: Option<(u64, usize)>,
}

impl<W: Write + Seek> TrajectoryWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            totals_pos: None,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Seek> TrajectorySink for TrajectoryWriter<W> {
    fn write_header(&mut self, sim: &Simulation, lattice: &Lattice) -> Result<()> {
        let out = &mut self.out;

        writeln!(out, "Simulation: {}", sim.name)?;
        let placeholder = totals(sim);
        self.totals_pos = Some((out.stream_position()?, placeholder.len()));
        out.write_all(placeholder.as_bytes())?;

        writeln!(out, "Lattice: {}", lattice.name)?;
        for row in lattice.basis() {
            write_vec3(out, *row)?;
            writeln!(out)?;
        }

        let symbols: Vec<&str> = lattice
            .composition()
            .iter()
            .map(|(atom, _)| atom.symbol.as_str())
            .collect();
        let counts: Vec<String> = lattice
            .composition()
            .iter()
            .map(|(_, n)| n.to_string())
            .collect();

        writeln!(out, "{}", symbols.join(" "))?;
        writeln!(out, "{}", counts.join(" "))?;

        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let out = &mut self.out;
        let th = &snapshot.thermo;
        let dy = &snapshot.dynamics;

        writeln!(out, "Snapshot: {}", snapshot.step)?;
        writeln!(out, "Temperature = {:.6} K", th.temperature)?;
        writeln!(out, "Pressure = {:.6} GPa", th.pressure)?;
        writeln!(out, "Energy = {:.6} eV", th.energy)?;
        writeln!(out, "{COLUMN_HEADER}")?;

        let zero = Vec3::new(0., 0., 0.);
        for (i, (posit, force)) in dy.positions.iter().zip(&dy.forces).enumerate() {
            let vel = dy
                .velocities
                .as_ref()
                .and_then(|v| v.get(i).copied())
                .unwrap_or(zero);

            write_vec3(out, *posit)?;
            write_vec3(out, vel)?;
            write_vec3(out, *force)?;
            writeln!(out)?;
        }
        writeln!(out)?;

        Ok(())
    }

    fn finish(&mut self, sim: &Simulation) -> Result<()> {
        match self.totals_pos {
            Some((pos, len)) => {
                let text = totals(sim);
                if text.len() != len {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        format!("totals too wide to rewrite in place: {}", text.trim_end()),
                    )
                    .into());
                }

                let end = self.out.stream_position()?;
                self.out.seek(SeekFrom::Start(pos))?;
                self.out.write_all(text.as_bytes())?;
                self.out.seek(SeekFrom::Start(end))?;
            }
            None => {
                let lattice = sim.lattice.clone().unwrap_or_default();
                self.write_header(sim, &lattice)?;
            }
        }

        self.out.flush()?;
        Ok(())
    }
}

/// For outputs that can't seek, such as stdout or a pipe: the trajectory is assembled in memory
/// and copied out by `finish`.
pub struct BufferedTrajectoryWriter<W: Write> {
    buf: TrajectoryWriter<Cursor<Vec<u8>>>,
    out: W,
}

impl<W: Write> BufferedTrajectoryWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            buf: TrajectoryWriter::new(Cursor::new(Vec::new())),
            out,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TrajectorySink for BufferedTrajectoryWriter<W> {
    fn write_header(&mut self, sim: &Simulation, lattice: &Lattice) -> Result<()> {
        self.buf.write_header(sim, lattice)
    }

    fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.buf.write_snapshot(snapshot)
    }

    fn finish(&mut self, sim: &Simulation) -> Result<()> {
        self.buf.finish(sim)?;
        self.out.write_all(self.buf.get_ref().get_ref())?;
        self.out.flush()?;
        Ok(())
    }
}

/// The summary block of a trajectory file.
#[derive(Clone, Debug, PartialEq)]
pub struct TrajectoryHeader {
    pub name: String,
    pub cycles: usize,
    pub steps: usize,
    /// ps
    pub time: f64,
    /// Species only carry symbols; masses and valences aren't stored in this format.
    pub lattice: Rc<Lattice>,
}

/// Reads files written by [`TrajectoryWriter`], one snapshot at a time.
pub struct TrajectoryReader<R> {
    cursor: LineCursor<R>,
    n_atoms: usize,
}

fn malformed(line: usize, details: impl Into<String>) -> Error {
    Error::MalformedTrajectory {
        line,
        details: details.into(),
    }
}

/// The text after `prefix`, e.g. the name in `Lattice: quartz`.
fn after_prefix<'a>(line: Line<'a>, prefix: &str) -> Result<&'a str> {
    line.text
        .strip_prefix(prefix)
        .map(str::trim)
        .ok_or_else(|| malformed(line.num, format!("expected a line starting with '{prefix}'")))
}

/// The first token after `=` on a `Key = value unit` line.
fn value_after_eq<T: std::str::FromStr>(line: Line, key: &str, expected: &'static str) -> Result<T> {
    let rest = after_prefix(line, key)?;
    let tok = rest
        .trim_start()
        .strip_prefix('=')
        .and_then(|r| r.split_whitespace().next())
        .ok_or_else(|| malformed(line.num, format!("missing value for '{key}'")))?;

    parse_token(tok, line.num, expected)
}

fn parse_floats<const N: usize>(line: Line) -> Result<[f64; N]> {
    let mut vals = [0.; N];
    let mut tokens = line.text.split_whitespace();

    for v in &mut vals {
        let tok = tokens
            .next()
            .ok_or_else(|| malformed(line.num, format!("expected {N} values per row")))?;
        *v = parse_token(tok, line.num, "a number")?;
    }

    Ok(vals)
}

impl<R: BufRead> TrajectoryReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            cursor: LineCursor::new(reader),
            n_atoms: 0,
        }
    }

    /// Must be called once, before any snapshot is read.
    pub fn read_header(&mut self) -> Result<TrajectoryHeader> {
        const CTX: &str = "the trajectory header";
        let c = &mut self.cursor;

        let name = after_prefix(c.expect_line(CTX)?, "Simulation:")?.to_owned();
        let cycles = value_after_eq(c.expect_line(CTX)?, "Cycles", "a cycle count")?;
        let steps = value_after_eq(c.expect_line(CTX)?, "Steps", "a step count")?;
        let time = value_after_eq(c.expect_line(CTX)?, "Time", "a time in ps")?;
        let lattice_name = after_prefix(c.expect_line(CTX)?, "Lattice:")?.to_owned();

        let mut basis = [Vec3::new(0., 0., 0.); 3];
        for row in &mut basis {
            let [x, y, z] = parse_floats::<3>(c.expect_line(CTX)?)?;
            *row = Vec3::new(x, y, z);
        }

        let symbols: Vec<String> = c
            .expect_line(CTX)?
            .text
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        let line = c.expect_line(CTX)?;
        let counts = line
            .text
            .split_whitespace()
            .map(|t| parse_token::<usize>(t, line.num, "an atom count"))
            .collect::<Result<Vec<_>>>()?;

        if symbols.len() != counts.len() {
            return Err(malformed(
                line.num,
                format!("{} species symbols but {} counts", symbols.len(), counts.len()),
            ));
        }

        let composition = symbols
            .iter()
            .zip(counts)
            .map(|(sym, n)| (Atom::new(sym, 0., 0.), n));
        let lattice = Lattice::new(&lattice_name, basis, composition);
        self.n_atoms = lattice.n_atoms();

        Ok(TrajectoryHeader {
            name,
            cycles,
            steps,
            time,
            lattice: Rc::new(lattice),
        })
    }

    /// The next snapshot, or `None` at the end of the file. Velocities are always present,
    /// since the writer stores missing ones as zeros.
    pub fn next_snapshot(&mut self) -> Result<Option<Snapshot>> {
        const CTX: &str = "a snapshot";
        let c = &mut self.cursor;

        let step = loop {
            let Some(line) = c.next_line()? else {
                return Ok(None);
            };
            if line.text.trim().is_empty() {
                continue;
            }
            break parse_token(after_prefix(line, "Snapshot:")?, line.num, "a step index")?;
        };

        let temperature = value_after_eq(c.expect_line(CTX)?, "Temperature", "a temperature")?;
        let pressure = value_after_eq(c.expect_line(CTX)?, "Pressure", "a pressure")?;
        let energy = value_after_eq(c.expect_line(CTX)?, "Energy", "an energy")?;

        let line = c.expect_line(CTX)?;
        if line.text.trim() != COLUMN_HEADER {
            return Err(malformed(line.num, "expected the per-atom column titles"));
        }

        let mut positions = Vec::with_capacity(self.n_atoms);
        let mut velocities = Vec::with_capacity(self.n_atoms);
        let mut forces = Vec::with_capacity(self.n_atoms);

        for _ in 0..self.n_atoms {
            let v = parse_floats::<9>(c.expect_line(CTX)?)?;
            positions.push(Vec3::new(v[0], v[1], v[2]));
            velocities.push(Vec3::new(v[3], v[4], v[5]));
            forces.push(Vec3::new(v[6], v[7], v[8]));
        }

        Ok(Some(Snapshot {
            step,
            thermo: Thermodynamics {
                temperature,
                pressure,
                energy,
                stress: None,
            },
            dynamics: Dynamics {
                positions,
                forces,
                velocities: Some(velocities),
                ..Default::default()
            },
        }))
    }
}
