//! Synthetic OUTCAR logs, shaped like VASP 6 output but small: three atoms, and only the lines
//! the converter looks at plus a little noise.

use std::fmt::Write;

/// Quartz: one Si, two O.
pub const N_ATOMS: usize = 3;

/// Global step `g` has this temperature in K.
pub fn temperature(g: usize) -> f64 {
    300. + g as f64
}

/// Global step `g` has this energy in eV.
pub fn energy(g: usize) -> f64 {
    -10. - g as f64 * 0.001
}

/// Cartesian position of `atom` at global step `g`. Atoms drift 0.01 Å per step along x.
pub fn position(atom: usize, g: usize) -> [f64; 3] {
    [0.5 + atom as f64 + 0.01 * g as f64, 1.0, 2.0 + atom as f64]
}

/// The first electronic iteration of a step, 1-based within its run.
pub fn iteration_line(step: usize) -> String {
    format!(
        "--------------------------------------- Iteration {step:>6}(   1)  ---------------------------------------\n"
    )
}

/// Header for one run. Ends with the first step's `Iteration` line.
pub fn header(name: &str, steps: usize, step_duration: f64) -> String {
    let mut s = String::new();

    s.push_str(" vasp.6.3.0 18Jan22 (build Feb 02 2022 10:29:31) complex\n");
    s.push_str(" POTCAR:    PAW_PBE Si 05Jan2001\n");
    s.push_str(" POTCAR:    PAW_PBE O 08Apr2002\n");
    s.push_str("   POMASS =   28.085; ZVAL   =    4.000    mass and valenz\n");
    s.push_str("   TITEL  = PAW_PBE Si 05Jan2001\n");
    s.push_str("   POMASS =   16.000; ZVAL   =    6.000    mass and valenz\n");
    s.push_str("   TITEL  = PAW_PBE O 08Apr2002\n");
    s.push_str("   ions per type =               1   2\n");
    writeln!(s, "   SYSTEM =  {name}").unwrap();
    s.push_str(" Ionic relaxation\n");
    writeln!(s, "   NSW    = {steps:>6}    number of steps for IOM").unwrap();
    s.push_str("   IBRION =      0    ionic relax: 0-MD 1-quasi-New 2-CG\n");
    writeln!(s, "   POTIM  = {step_duration:.4}    time-step for ionic-motion").unwrap();
    s.push_str("   POMASS =  28.09 16.00\n");
    s.push_str("   ZVAL   =   4.00  6.00\n");
    s.push_str(" DOS related values:\n");
    s.push_str("   EMIN   =  10.00;   EMAX   =-10.00  energy-range for DOS\n\n");
    s.push_str("  direct lattice vectors                 reciprocal lattice vectors\n");
    s.push_str("     4.916000000  0.000000000  0.000000000     0.203417413  0.117443171  0.000000000\n");
    s.push_str("    -2.458000000  4.257380000  0.000000000     0.000000000  0.234886342  0.000000000\n");
    s.push_str("     0.000000000  0.000000000  5.405000000     0.000000000  0.000000000  0.185013876\n\n");
    s.push_str(&iteration_line(1));

    s
}

/// Everything from the end of the electronic loop to `ETOTAL`, for global step `g`.
pub fn step_body(g: usize) -> String {
    let mut s = String::new();

    s.push_str("    POTLOK:  cpu time    0.0130: real time    0.0131\n");
    s.push_str("------------------------ aborting loop because EDIFF is reached ----------------------------------------\n\n");

    s.push_str("  FORCE on cell =-STRESS in cart. coord.  units (eV):\n");
    s.push_str("  Total+kin.     3.000     6.000     9.000     0.100     0.200     0.300\n\n");

    s.push_str(" POSITION                                       TOTAL-FORCE (eV/Angst)\n");
    s.push_str(" -----------------------------------------------------------------------------------\n");
    for atom in 0..N_ATOMS {
        let [x, y, z] = position(atom, g);
        writeln!(
            s,
            "  {x:>11.5}  {y:>11.5}  {z:>11.5}      {:>11.6}  {:>11.6}  {:>11.6}",
            0.1 * atom as f64,
            -0.2,
            0.3
        )
        .unwrap();
    }
    s.push_str(" -----------------------------------------------------------------------------------\n\n");

    writeln!(
        s,
        "  kin. lattice  EKIN_LAT=         0.000000  (temperature {:>8.2} K)",
        temperature(g)
    )
    .unwrap();
    writeln!(s, "  total energy   ETOTAL = {:>16.6} eV", energy(g)).unwrap();

    s
}

/// A log of concatenated runs, each `(steps, step duration in fs)`.
pub fn outcar(runs: &[(usize, f64)]) -> String {
    let mut s = String::new();
    let mut g = 0;

    for &(steps, dt) in runs {
        s.push_str(&header("quartz", steps, dt));
        for local in 0..steps {
            if local > 0 {
                s.push_str(&iteration_line(local + 1));
            }
            s.push_str(&step_body(g));
            g += 1;
        }
    }

    s
}

/// The runs used throughout: 1900 steps, 0.85 ps.
pub const THREE_RUNS: [(usize, f64); 3] = [(300, 0.5), (600, 0.5), (1000, 0.4)];
