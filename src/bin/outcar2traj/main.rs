use std::{
    fs::File,
    io::{self, BufReader, BufWriter},
    process::ExitCode,
};

use anyhow::{Context, Result};
use outcar_files::{BufferedTrajectoryWriter, ConvertOptions, Converter, TrajectoryWriter};

mod cli;
mod progress;

use cli::{Cli, Output};
use progress::RunProgress;

fn main() -> ExitCode {
    let cli = cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31merror\x1b[0m: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let options = ConvertOptions {
        window: cli.window.window(),
        name: cli.name.clone(),
    };

    let input = File::open(&cli.input)
        .with_context(|| format!("Failed to open input file: {}", cli.input.display()))?;
    let input = BufReader::new(input);
    let progress = RunProgress::new(!cli.quiet);

    let sim = match cli.output() {
        Output::Stdout => {
            let sink = BufferedTrajectoryWriter::new(io::stdout().lock());
            Converter::new(input, sink, options)
                .with_observer(progress)
                .run()
        }
        Output::File(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            let sink = TrajectoryWriter::new(BufWriter::new(file));
            Converter::new(input, sink, options)
                .with_observer(progress)
                .run()
        }
    }
    .with_context(|| format!("Failed to convert {}", cli.input.display()))?;

    if !cli.quiet {
        progress::print_summary(&sim);
    }

    Ok(())
}
