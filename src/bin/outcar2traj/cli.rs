use std::path::PathBuf;

use clap::{Args, Parser};
use outcar_files::Window;

#[derive(Parser)]
#[command(
    name = "outcar2traj",
    about = "Convert VASP OUTCAR molecular dynamics logs to trajectory files",
    version
)]
pub struct Cli {
    /// OUTCAR to read; may hold several concatenated runs
    #[arg(value_name = "OUTCAR", default_value = "OUTCAR")]
    pub input: PathBuf,

    /// Trajectory file to write, or `-` for stdout [default: OUTCAR path with a .traj extension]
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub window: WindowOptions,

    /// Simulation name [default: SYSTEM from the first run]
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Suppress progress output (for scripting)
    #[arg(short, long)]
    pub quiet: bool,

    /// Log more; repeat for debug output. RUST_LOG overrides this
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Global step window, counted across all runs in the log.
#[derive(Args)]
#[command(next_help_heading = "Step Window")]
pub struct WindowOptions {
    /// First step to write
    #[arg(long, value_name = "STEP", default_value_t = 0)]
    pub initial_step: usize,

    /// Maximum number of steps to write [default: all]
    #[arg(long, value_name = "N")]
    pub n_steps: Option<usize>,
}

impl WindowOptions {
    pub fn window(&self) -> Window {
        Window::new(self.initial_step, self.n_steps)
    }
}

pub enum Output {
    Stdout,
    File(PathBuf),
}

impl Cli {
    pub fn output(&self) -> Output {
        match &self.output {
            Some(p) if p.as_os_str() == "-" => Output::Stdout,
            Some(p) => Output::File(p.clone()),
            None => Output::File(self.input.with_extension("traj")),
        }
    }

    /// `warn` by default; each `-v` lowers the threshold.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
