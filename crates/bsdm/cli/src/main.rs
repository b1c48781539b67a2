// BSDM
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.


//! `bsdm` command line monitor

use anyhow::{Context, Result};
use bsdm_core::error::EXIT_CONFIG;
use bsdm_core::report::{DirectorySink, WriterSink};
use bsdm_core::{BsdmConfig, BsdmError, LineSource, Pipeline, open_source, render_transcript};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bsdm", about = "BIOS debug console DRAM qualification monitor")]
pub struct Cli {
    /// Log file, serial console device or BMC host
    pub source: String,

    /// Path to configuration file (TOML), overrides $BSDM_CONFIG
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Additional result tags, comma separated
    #[arg(short = 'T', long = "tags", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Debug level logging unless RUST_LOG is set
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not write result records to the output directory
    #[arg(long)]
    pub disable_sending: bool,

    /// Directory receiving one JSON file per result
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Print result records as JSON on stdout, the transcript goes to stderr
    #[arg(long)]
    pub json: bool,

    /// Enable the signal integrity (RMT) qualification
    #[arg(long)]
    pub rmt: bool,

    /// Enable the repair (STEP/PPR) qualification
    #[arg(long)]
    pub step: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Exit code of a start-up failure, configuration error unless the core says otherwise
fn startup_exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<BsdmError>().map(BsdmError::exit_code).unwrap_or(EXIT_CONFIG)
}

async fn start(cli: &Cli) -> Result<(Pipeline, Box<dyn LineSource>)> {
    let mut config = BsdmConfig::resolve_config(cli.config.clone()).context("failed to load configuration")?;
    if cli.rmt {
        config = config.with_rmt(true);
    }
    if cli.step {
        config = config.with_step(true);
    }

    let output_dir = cli.output_dir.clone().or_else(|| config.report.output_dir.clone());
    let mut pipeline = Pipeline::new(config.clone()).context("failed to build testplan")?.with_tags(cli.tags.iter().cloned());
    if cli.json {
        pipeline = pipeline.with_sink(Box::new(WriterSink::stdout()));
    }
    match output_dir {
        Some(dir) if !cli.disable_sending => {
            let sink = DirectorySink::new(dir);
            info!(dir = %sink.dir().display(), "results will be written to directory");
            pipeline = pipeline.with_sink(Box::new(sink));
        }
        Some(_) => info!("sending results disabled"),
        None => {}
    }

    let source = open_source(&cli.source, &config)
        .await
        .with_context(|| format!("cannot open data source '{}'", cli.source))?;
    Ok((pipeline, source))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("cannot listen for Ctrl+C, interrupt disabled");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (mut pipeline, mut source) = match start(&cli).await {
        Ok(started) => started,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(startup_exit_code(&e));
        }
    };

    let summary = pipeline.run(source.as_mut(), shutdown_signal()).await;
    let transcript = render_transcript(&summary);
    if cli.json {
        eprint!("{transcript}");
    } else {
        print!("{transcript}");
    }
    ExitCode::from(summary.exit_code)
}
