//! Runtime, router and bridge shared by the AI commands.
//!
//! The main thread plays the interactive side: it submits work to the
//! bridge and renders the events the workers send back.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use lantern_ai::{AIError, Bridge, BridgeEvent, ProviderRouter, Stage, StageReporter, Ticket};
use miette::IntoDiagnostic;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

/// Concurrent AI requests. Local requests queue on the engine anyway.
const MAX_WORKERS: usize = 2;

/// The final result for one submitted target.
pub(crate) struct Outcome {
    pub target: String,
    pub result: Result<String, AIError>,
}

pub(crate) struct Session {
    runtime: Runtime,
    router: Arc<ProviderRouter>,
    bridge: Bridge,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl Session {
    pub(crate) fn new() -> miette::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .into_diagnostic()?;
        let (bridge, events) = Bridge::new(runtime.handle().clone(), MAX_WORKERS);

        Ok(Self {
            runtime,
            router: Arc::new(ProviderRouter::from_env()),
            bridge,
            events,
        })
    }

    pub(crate) fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    pub(crate) fn submit<F, Fut>(&self, target: &str, work: F) -> miette::Result<Ticket>
    where
        F: FnOnce(StageReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, AIError>> + Send + 'static,
    {
        self.bridge
            .submit(target, work)
            .map_err(|e| miette::miette!("{}", e))
    }

    /// Render progress until every ticket in `tickets` has completed.
    pub(crate) fn wait(&mut self, tickets: &[Ticket]) -> Vec<Outcome> {
        let multi = MultiProgress::new();
        let mut bars: HashMap<u64, (ProgressBar, String)> = tickets
            .iter()
            .map(|t| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(spinner_style());
                bar.enable_steady_tick(Duration::from_millis(120));
                bar.set_message(format!("{}: queued", t.target));
                (t.id, (bar, t.target.clone()))
            })
            .collect();

        let Session {
            runtime, events, ..
        } = self;
        let mut outcomes = Vec::with_capacity(tickets.len());

        runtime.block_on(async {
            while outcomes.len() < tickets.len() {
                let Some(event) = events.recv().await else {
                    break;
                };
                match event {
                    BridgeEvent::Stage { ticket, stage } => {
                        if let Some((bar, target)) = bars.get(&ticket) {
                            bar.set_message(format!("{}: {}", target, stage_label(stage)));
                        }
                    }
                    BridgeEvent::Download {
                        ticket,
                        downloaded,
                        total,
                    } => {
                        if let Some((bar, _)) = bars.get(&ticket) {
                            if bar.length() != Some(total) {
                                bar.set_style(download_style());
                                bar.set_length(total);
                            }
                            bar.set_position(downloaded);
                        }
                    }
                    BridgeEvent::Completed {
                        ticket,
                        target,
                        result,
                    } => {
                        if let Some((bar, _)) = bars.remove(&ticket) {
                            bar.finish_and_clear();
                        }
                        outcomes.push(Outcome { target, result });
                    }
                }
            }
        });

        outcomes
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Prepared => "input ready",
        Stage::Running => "waiting for the model",
        Stage::Formatting => "formatting answer",
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn download_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    )
    .map(|style| style.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Print every outcome; fail if any of them failed.
pub(crate) fn report(outcomes: Vec<Outcome>, with_headings: bool) -> miette::Result<()> {
    let total = outcomes.len();
    let mut failed = 0;

    for outcome in outcomes {
        match outcome.result {
            Ok(text) => {
                if with_headings {
                    println!("── {} ──", outcome.target);
                }
                println!("{}", text);
                println!();
            }
            Err(e) => {
                failed += 1;
                eprintln!("error: {}: {}", outcome.target, e);
            }
        }
    }

    match failed {
        0 => Ok(()),
        n => Err(miette::miette!("{} of {} requests failed", n, total)),
    }
}
