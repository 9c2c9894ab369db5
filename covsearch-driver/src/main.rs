// SPDX-License-Identifier: Apache-2.0

//! Runs an MIO coverage search against one of the built-in demo SUTs and
//! writes the final report (archive solution plus per-target bests) as
//! JSON.
//!
//! ```text
//! covsearch-driver --demo triangle --max-evaluations 5000 --output report.json
//! ```

mod demo;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use colored::Colorize;
use covsearch::{
    ProgressSink, RandomSampler, SearchConfig, SearchEngine, SearchProgress, SearchReport,
    StoppingCriterion,
};

use crate::demo::Demo;

#[derive(Debug, Parser)]
#[command(name = "covsearch-driver")]
#[command(about = "Many-objective coverage search against a demo SUT")]
struct Args {
    /// Which built-in SUT to search against.
    #[arg(long, value_enum, default_value_t = Demo::Triangle)]
    demo: Demo,

    /// TOML search configuration; command line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// PRNG seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many individual evaluations.
    #[arg(long, conflicts_with = "max_time_secs")]
    max_evaluations: Option<u64>,

    /// Stop after this many seconds of search.
    #[arg(long)]
    max_time_secs: Option<u64>,

    /// Individuals kept per target before the focused phase.
    #[arg(long)]
    archive_target_limit: Option<usize>,

    /// Emit a progress line every N evaluations (and on each archive
    /// improvement). Set to 0 to only report improvements.
    #[arg(long)]
    progress_every: Option<u64>,

    /// Where to write the JSON report; stdout if omitted.
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Prints `headline` with one indented line per detail and exits with
/// status 1.
fn fail(headline: &str, details: &[(&str, String)]) -> ! {
    eprintln!("{} {}", "error:".red().bold(), headline);
    for (key, value) in details {
        eprintln!("    {:<12} {}", format!("{}:", key).dimmed(), value);
    }
    std::process::exit(1);
}

fn load_config(args: &Args) -> SearchConfig {
    let mut config = match &args.config {
        Some(path) => match SearchConfig::from_toml_file(path) {
            Ok(c) => c,
            Err(e) => fail(
                "could not load search config",
                &[("path", path.display().to_string()), ("cause", e.to_string())],
            ),
        },
        None => SearchConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(n) = args.max_evaluations {
        config.stopping_criterion = StoppingCriterion::FitnessEvaluations;
        config.budget = n;
    }
    if let Some(secs) = args.max_time_secs {
        config.stopping_criterion = StoppingCriterion::Time;
        config.budget = secs;
    }
    if let Some(limit) = args.archive_target_limit {
        config.archive_target_limit = limit;
    }
    if let Some(every) = args.progress_every {
        config.progress_every = every;
    }
    if let Err(e) = config.validate() {
        fail("invalid search config", &[("cause", e.to_string())]);
    }
    config
}

struct StderrProgressSink {
    start: Instant,
}

impl ProgressSink for StderrProgressSink {
    fn on_progress(&mut self, p: SearchProgress) {
        let secs = self.start.elapsed().as_secs_f64().max(1e-9);
        eprintln!(
            "{} evaluations={} progress={:.3} phase={} covered={} reached={} archive_size={} evals_per_sec={:.1}",
            if p.last_step_improved {
                "improved"
            } else {
                "progress"
            },
            p.evaluations,
            p.progress,
            p.phase,
            p.covered_targets,
            p.reached_targets,
            p.archive_size,
            p.evaluations as f64 / secs
        );
    }
}

fn write_report(report: &SearchReport, output: Option<&PathBuf>) -> anyhow::Result<()> {
    let json = report.to_json()?;
    match output {
        Some(path) => std::fs::write(path, json + "\n")?,
        None => println!("{}", json),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let args = Args::parse();
    let config = load_config(&args);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        })?;
    }

    let (catalog, driver) = demo::build(args.demo);
    let sampler = RandomSampler::new(catalog, config.max_actions_per_individual);
    let mut engine = SearchEngine::new(config, Box::new(sampler), driver)?;
    engine.set_stop_flag(stop);

    let mut progress = StderrProgressSink {
        start: Instant::now(),
    };
    match engine.run_with_progress(Some(&mut progress)) {
        Ok(report) => {
            eprintln!(
                "done stop_reason={} evaluations={} covered={}/{} solution_size={}",
                report.stop_reason,
                report.evaluations,
                report.covered_targets,
                report.total_targets,
                report.solution.individuals.len()
            );
            write_report(&report, args.output.as_ref())?;
            Ok(())
        }
        Err(e) => {
            let mut details = vec![("cause", e.to_string())];
            if let Some(partial) = e.partial_report() {
                write_report(partial, args.output.as_ref())?;
                let destination = match &args.output {
                    Some(path) => path.display().to_string(),
                    None => "stdout".to_string(),
                };
                details.push(("evaluations", partial.evaluations.to_string()));
                details.push(("covered", format!("{}/{}", partial.covered_targets, partial.total_targets)));
                details.push(("partial report", destination));
            }
            fail(&format!("search against {:?} aborted", args.demo), &details);
        }
    }
}
