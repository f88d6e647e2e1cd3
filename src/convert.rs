//! Drives a conversion: header scan, windowing, then per-step skip or decode, until the log
//! runs out or the window closes.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Seek, Write},
    ops::Range,
    path::Path,
    rc::Rc,
};

use crate::{
    Simulation, SimulationRun,
    error::Result,
    outcar::{DecodeContext, HeaderScanner, RunHeader, SnapshotDecoder},
    text::LineCursor,
    trajectory::{BufferedTrajectoryWriter, TrajectorySink, TrajectoryWriter},
};

/// Which global steps to decode and write. Steps are counted across every run in the log,
/// starting from 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Window {
    /// Steps before this one are skipped.
    pub initial_step: usize,
    /// At most this many steps are written. `None` for no limit.
    pub n_steps: Option<usize>,
}

/// How a run relates to the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowPolicy {
    /// The whole run comes before `initial_step`; every step is skipped.
    BeforeWindow,
    /// The run starts before `initial_step` and reaches it.
    OpensInRun,
    /// The run starts at or after `initial_step`.
    AlreadyOpen,
}

/// What to do with each step of one run. Both ranges hold global step indices; `skip` comes
/// first, and `decode` follows on directly from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepPlan {
    pub policy: WindowPolicy,
    pub skip: Range<usize>,
    pub decode: Range<usize>,
}

impl StepPlan {
    /// Number of snapshots the run contributes.
    pub fn emitted(&self) -> usize {
        self.decode.len()
    }
}

impl Window {
    pub fn new(initial_step: usize, n_steps: Option<usize>) -> Self {
        Self {
            initial_step,
            n_steps,
        }
    }

    /// One past the last global step to write.
    pub fn end(&self) -> usize {
        match self.n_steps {
            Some(n) => self.initial_step.saturating_add(n),
            None => usize::MAX,
        }
    }

    /// No step from `loaded` onwards can be written.
    pub fn is_closed(&self, loaded: usize) -> bool {
        loaded >= self.end()
    }

    /// Plan a run of `run_steps` steps, given that `loaded` steps came before it.
    pub fn plan(&self, loaded: usize, run_steps: usize) -> StepPlan {
        let run_end = loaded.saturating_add(run_steps);
        let final_step = self.end().min(run_end);
        let initial = self.initial_step;

        if initial > run_end {
            StepPlan {
                policy: WindowPolicy::BeforeWindow,
                skip: loaded..run_end,
                decode: run_end..run_end,
            }
        } else if initial > loaded {
            StepPlan {
                policy: WindowPolicy::OpensInRun,
                skip: loaded..initial,
                decode: initial..final_step.max(initial),
            }
        } else {
            StepPlan {
                policy: WindowPolicy::AlreadyOpen,
                skip: loaded..loaded,
                decode: loaded..final_step.max(loaded),
            }
        }
    }
}

/// Conversion settings.
#[derive(Clone, Debug, Default)]
pub struct ConvertOptions {
    pub window: Window,
    /// Name for the simulation. Defaults to the `SYSTEM` name of the first run.
    pub name: Option<String>,
}

/// Hooks for reporting progress. All methods default to doing nothing.
pub trait ConversionObserver {
    fn run_started(&mut self, _run: &SimulationRun, _plan: &StepPlan) {}

    /// Called before each step of a run, skipped or decoded. `fraction` is
    /// `local_step / run.steps`, in `[0, 1)`.
    fn step(&mut self, _run: &SimulationRun, _local_step: usize, _fraction: f64) {}

    /// `run.steps` is the number of steps emitted from the run.
    fn run_finished(&mut self, _run: &SimulationRun) {}
}

/// Reports nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ConversionObserver for NoProgress {}

/// A single conversion, from one log to one sink. Construct, optionally attach an observer,
/// then call [`Converter::run`].
pub struct Converter<R, S, O = NoProgress> {
    cursor: LineCursor<R>,
    sink: S,
    options: ConvertOptions,
    observer: O,
}

impl<R: BufRead, S: TrajectorySink> Converter<R, S, NoProgress> {
    pub fn new(input: R, sink: S, options: ConvertOptions) -> Self {
        Self {
            cursor: LineCursor::new(input),
            sink,
            options,
            observer: NoProgress,
        }
    }
}

impl<R: BufRead, S: TrajectorySink, O: ConversionObserver> Converter<R, S, O> {
    pub fn with_observer<O2: ConversionObserver>(self, observer: O2) -> Converter<R, S, O2> {
        Converter {
            cursor: self.cursor,
            sink: self.sink,
            options: self.options,
            observer,
        }
    }

    /// Read the whole log, or as much of it as the window needs. The returned summary has the
    /// emitted step count for each run.
    pub fn run(&mut self) -> Result<Simulation> {
        let window = self.options.window;
        let mut sim = Simulation::new(self.options.name.as_deref().unwrap_or_default());

        let mut loaded = 0;
        let mut cycle = 0;

        while !window.is_closed(loaded) {
            let Some(RunHeader { mut run, lattice }) = HeaderScanner::scan(&mut self.cursor, cycle)?
            else {
                break;
            };
            let lattice = Rc::new(lattice);

            if sim.lattice.is_none() {
                if self.options.name.is_none() {
                    sim.name = lattice.name.clone();
                }
                sim.lattice = Some(Rc::clone(&lattice));
                self.sink.write_header(&sim, &lattice)?;
            }

            let plan = window.plan(loaded, run.steps);
            log::info!(
                "Run {cycle}: {} steps of {} fs; skipping {}, decoding {} ({:?})",
                run.steps,
                run.step_duration,
                plan.skip.len(),
                plan.emitted(),
                plan.policy,
            );
            self.observer.run_started(&run, &plan);

            let mut ctx = DecodeContext::new(&run, lattice);
            self.run_plan(&plan, &run, loaded, &mut ctx)?;

            loaded += run.steps;
            run.steps = plan.emitted();

            self.observer.run_finished(&run);
            sim.runs.push(run);
            cycle += 1;
        }

        log::info!(
            "Wrote {} steps from {} runs ({:.6} ps); {} lines read",
            sim.total_steps(),
            sim.runs.len(),
            sim.total_time(),
            self.cursor.line_number()
        );

        self.sink.finish(&sim)?;
        Ok(sim)
    }

    fn run_plan(
        &mut self,
        plan: &StepPlan,
        run: &SimulationRun,
        loaded: usize,
        ctx: &mut DecodeContext,
    ) -> Result<()> {
        let fraction = |step: usize| (step - loaded) as f64 / run.steps as f64;

        for step in plan.skip.clone() {
            self.observer.step(run, step - loaded, fraction(step));
            SnapshotDecoder::skip_step(&mut self.cursor)?;
        }

        for step in plan.decode.clone() {
            self.observer.step(run, step - loaded, fraction(step));
            let snapshot = SnapshotDecoder::decode_step(&mut self.cursor, ctx, step)?;
            self.sink.write_snapshot(&snapshot)?;
        }

        Ok(())
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Convert a log to a seekable output, such as a file.
pub fn convert<R: BufRead, W: Write + Seek>(
    input: R,
    output: W,
    options: &ConvertOptions,
) -> Result<Simulation> {
    Converter::new(input, TrajectoryWriter::new(output), options.clone()).run()
}

/// Convert a log to an output that can't seek, e.g. stdout. The trajectory is held in memory
/// until the conversion finishes.
pub fn convert_stream<R: BufRead, W: Write>(
    input: R,
    output: W,
    options: &ConvertOptions,
) -> Result<Simulation> {
    Converter::new(input, BufferedTrajectoryWriter::new(output), options.clone()).run()
}

/// Convert the log at `input` to a trajectory file at `output`, replacing it if it exists.
pub fn convert_file(input: &Path, output: &Path, options: &ConvertOptions) -> Result<Simulation> {
    let input = BufReader::new(File::open(input)?);
    let output = BufWriter::new(File::create(output)?);

    convert(input, output, options)
}
