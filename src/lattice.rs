//! The simulation cell: direct lattice vectors, and which atoms fill it.

use std::hash::{Hash, Hasher};

use lin_alg::f64::{Mat3, Vec3};
use na_seq::Element;

/// Atomic mass unit in grams. Used for density.
const AMU_G: f64 = 1.660_539_066_60e-24;
/// Å³ to cm³
const A3_TO_CM3: f64 = 1.0e-24;

/// Stands in for the inverse of a basis that can't be inverted.
const DEGENERATE_INVERSE: [Vec3; 3] = [
    Vec3 {
        x: f64::NAN,
        y: f64::NAN,
        z: f64::NAN,
    }; 3
];

/// One atomic species, as declared by the potential and run-parameter listings of a header.
///
/// Equality and hashing cover all four fields; two atoms that differ only in mass are
/// different species. Floats are compared by bit pattern, which keeps `Eq` and `Hash` honest.
#[derive(Clone, Debug)]
pub struct Atom {
    pub symbol: String,
    /// 0 if the symbol isn't a known element.
    pub atomic_number: u8,
    /// amu
    pub mass: f64,
    /// Valence electrons treated explicitly by the potential.
    pub valence: f64,
}

impl Atom {
    /// `symbol` may be a potential label such as `Si_sv` or `H1.25`; it's reduced to the
    /// element symbol, and the atomic number is looked up from that.
    pub fn new(symbol: &str, mass: f64, valence: f64) -> Self {
        let symbol = element_symbol(symbol);
        let atomic_number = atomic_number(&symbol);

        Self {
            symbol,
            atomic_number,
            mass,
            valence,
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.atomic_number == other.atomic_number
            && self.mass.to_bits() == other.mass.to_bits()
            && self.valence.to_bits() == other.valence.to_bits()
    }
}

impl Eq for Atom {}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        self.atomic_number.hash(state);
        self.mass.to_bits().hash(state);
        self.valence.to_bits().hash(state);
    }
}

/// Strip potential-label decorations: `Si_sv` -> `Si`, `H1.25` -> `H`.
fn element_symbol(label: &str) -> String {
    label
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect()
}

/// `Element` has no atomic-number accessor, so the number is found by mapping back through
/// `from_atomic_number`. 0 for symbols `na_seq` doesn't know.
fn atomic_number(symbol: &str) -> u8 {
    let Ok(el) = Element::from_letter(symbol) else {
        return 0;
    };

    (1..=118u8)
        .find(|&n| Element::from_atomic_number(n).is_ok_and(|e| e == el))
        .unwrap_or(0)
}

/// A crystallographic cell. Built once per cycle from a complete header and shared, not
/// copied, by everything decoded in that cycle.
///
/// `basis` holds the direct lattice vectors as rows, in Å. If they don't span space, `inverse`
/// is all NaN; see [`Lattice::is_degenerate`]. The all-zero basis of `Lattice::default()` is the
/// placeholder used before any header has been read, and is itself degenerate.
#[derive(Clone, Debug)]
pub struct Lattice {
    pub name: String,
    basis: [Vec3; 3],
    /// Columns of the inverse of the matrix whose columns are the basis vectors.
    inverse: [Vec3; 3],
    /// In order of first appearance in the header.
    composition: Vec<(Atom, usize)>,
}

impl Default for Lattice {
    fn default() -> Self {
        let zero = Vec3::new(0., 0., 0.);
        Self::new("", [zero; 3], Vec::new())
    }
}

impl Lattice {
    /// Repeated atoms in `composition` are merged, adding their counts.
    pub fn new(
        name: &str,
        basis: [Vec3; 3],
        composition: impl IntoIterator<Item = (Atom, usize)>,
    ) -> Self {
        let mut merged: Vec<(Atom, usize)> = Vec::new();
        for (atom, count) in composition {
            match merged.iter_mut().find(|(a, _)| *a == atom) {
                Some((_, c)) => *c += count,
                None => merged.push((atom, count)),
            }
        }

        let inverse = invert(&basis);
        if inverse[0].x.is_nan() {
            log::warn!("Lattice '{name}' has a degenerate basis; reduced coordinates unavailable");
        }

        Self {
            name: name.to_owned(),
            basis,
            inverse,
            composition: merged,
        }
    }

    pub fn basis(&self) -> &[Vec3; 3] {
        &self.basis
    }

    pub fn composition(&self) -> &[(Atom, usize)] {
        &self.composition
    }

    /// Total number of atoms in the cell.
    pub fn n_atoms(&self) -> usize {
        self.composition.iter().map(|(_, n)| n).sum()
    }

    /// The basis can't be inverted (including the zero placeholder).
    pub fn is_degenerate(&self) -> bool {
        self.inverse[0].x.is_nan()
    }

    /// Cartesian (Å) to fractional coordinates. NaN for a degenerate lattice.
    pub fn reduced(&self, v: Vec3) -> Vec3 {
        let [c0, c1, c2] = self.inverse;
        c0 * v.x + c1 * v.y + c2 * v.z
    }

    /// Fractional to cartesian (Å) coordinates.
    pub fn cartesian(&self, f: Vec3) -> Vec3 {
        let [a0, a1, a2] = self.basis;
        a0 * f.x + a1 * f.y + a2 * f.z
    }

    pub fn reduced_all(&self, vs: &[Vec3]) -> Vec<Vec3> {
        vs.iter().map(|v| self.reduced(*v)).collect()
    }

    pub fn cartesian_all(&self, fs: &[Vec3]) -> Vec<Vec3> {
        fs.iter().map(|f| self.cartesian(*f)).collect()
    }

    /// Å³
    pub fn volume(&self) -> f64 {
        let [a0, a1, a2] = self.basis;
        a0.cross(a1).dot(a2).abs()
    }

    /// amu
    pub fn mass(&self) -> f64 {
        self.composition
            .iter()
            .map(|(atom, n)| *n as f64 * atom.mass)
            .sum()
    }

    /// g/cm³. Infinite or NaN for a zero-volume cell.
    pub fn density(&self) -> f64 {
        self.mass() * AMU_G / (self.volume() * A3_TO_CM3)
    }
}

impl PartialEq for Lattice {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.composition == other.composition
            && rows_eq(&self.basis, &other.basis)
            && rows_eq(&self.inverse, &other.inverse)
    }
}

/// NaN compares equal to NaN here, so degenerate lattices can still be compared.
fn rows_eq(a: &[Vec3; 3], b: &[Vec3; 3]) -> bool {
    let same = |x: f64, y: f64| x == y || (x.is_nan() && y.is_nan());

    a.iter()
        .zip(b)
        .all(|(u, v)| same(u.x, v.x) && same(u.y, v.y) && same(u.z, v.z))
}

fn invert(basis: &[Vec3; 3]) -> [Vec3; 3] {
    let [a0, a1, a2] = *basis;

    let det = a0.cross(a1).dot(a2);
    if det == 0. || !det.is_finite() {
        return DEGENERATE_INVERSE;
    }

    // Columns are the basis vectors, so this maps fractional to cartesian.
    let m = Mat3::from_cols(a0, a1, a2);

    m.inverse()
        .map(|inv| {
            [
                inv.clone() * Vec3::new(1., 0., 0.),
                inv.clone() * Vec3::new(0., 1., 0.),
                inv * Vec3::new(0., 0., 1.),
            ]
        })
        .unwrap_or(DEGENERATE_INVERSE)
}
