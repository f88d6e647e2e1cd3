use std::{
    io::{self, Write},
    time::Instant,
};

use indicatif::{ProgressBar, ProgressStyle};
use outcar_files::{
    ConversionObserver, Simulation, SimulationRun,
    convert::{StepPlan, WindowPolicy},
};

/// One progress bar per run, on stderr. Hidden entirely when quiet; indicatif also hides it
/// when stderr isn't a terminal.
pub struct RunProgress {
    enabled: bool,
    bar: Option<ProgressBar>,
    run_start: Instant,
}

impl RunProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            bar: None,
            run_start: Instant::now(),
        }
    }
}

impl ConversionObserver for RunProgress {
    fn run_started(&mut self, run: &SimulationRun, plan: &StepPlan) {
        if !self.enabled {
            return;
        }
        self.run_start = Instant::now();

        let bar = ProgressBar::new(run.steps as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.cyan} Run {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("invalid template")
                .progress_chars("=> "),
        );
        bar.set_prefix(run.cycle.to_string());
        bar.set_message(match plan.policy {
            WindowPolicy::BeforeWindow => "skipping",
            WindowPolicy::OpensInRun | WindowPolicy::AlreadyOpen => "decoding",
        });

        self.bar = Some(bar);
    }

    fn step(&mut self, _run: &SimulationRun, local_step: usize, _fraction: f64) {
        if let Some(bar) = &self.bar {
            bar.set_position(local_step as u64);
        }
    }

    fn run_finished(&mut self, run: &SimulationRun) {
        let Some(bar) = self.bar.take() else {
            return;
        };
        bar.finish_and_clear();

        let _ = writeln!(
            io::stderr().lock(),
            "  \x1b[32m✓\x1b[0m Run {:<4} {:>10} steps written {:>8.1}s",
            run.cycle,
            run.steps,
            self.run_start.elapsed().as_secs_f64()
        );
    }
}

pub fn print_summary(sim: &Simulation) {
    let mut stderr = io::stderr().lock();

    let _ = writeln!(stderr);
    let _ = writeln!(
        stderr,
        "  \x1b[32m✓\x1b[0m {}: {} runs, {} steps, {:.6} ps",
        sim.name,
        sim.runs.len(),
        sim.total_steps(),
        sim.total_time()
    );
    if let Some(lattice) = &sim.lattice {
        let _ = writeln!(
            stderr,
            "      \x1b[2m·\x1b[0m {} atoms, {:.3} Å³, {:.4} g/cm³",
            lattice.n_atoms(),
            lattice.volume(),
            lattice.density()
        );
    }
}
