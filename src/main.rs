extern crate clap;

use clap::Parser;
use clap_verbosity_flag::Verbosity;
use colored::Colorize;
use eru_speed::backend::requests::ping::PingRequest;
use eru_speed::backend::requests::status::StatusRequest;
use eru_speed::backend::{DownloadTarget, Endpoints, HttpTransport};
use eru_speed::errors::{
    exit_codes, format_error_for_display, SpeedTestError,
};
use eru_speed::progress::{
    Direction, NoProgress, ProgressCallback, ProgressEvent, TestPhase,
};
use eru_speed::results::{SpeedReport, TestRunResult};
use eru_speed::scoring::{QualityLabel, UseCaseScore};
use eru_speed::speedtest::{RunOutcome, TestConfig, TestEngine};
use log::{debug, warn};
use std::io::Write;
use url::Url;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of a bundled eru-speed backend (serves /api/ping,
    /// /api/download, /api/upload and /api/status).
    #[arg(long, value_name = "URL")]
    server: Option<Url>,

    /// Latency probe target. Repeat to rotate over several.
    #[arg(long = "ping-url", value_name = "URL")]
    ping_urls: Vec<Url>,

    /// Download source taking the size as `?bytes=N`. Repeatable.
    #[arg(long = "download-url", value_name = "URL")]
    download_urls: Vec<Url>,

    /// Fixed-size download resource, fetched whole. Repeatable.
    #[arg(long = "download-file", value_name = "URL")]
    download_files: Vec<Url>,

    /// Upload acceptor for raw POST bodies. Repeatable.
    #[arg(long = "upload-url", value_name = "URL")]
    upload_urls: Vec<Url>,

    /// Number of latency probes.
    #[arg(long, value_name = "N", default_value_t = 20)]
    pings: usize,

    /// Print the results as JSON.
    #[arg(long)]
    json: bool,

    /// Skip the upload phase.
    #[arg(long)]
    no_upload: bool,

    #[command(flatten)]
    verbose: Verbosity,
}

impl Cli {
    fn endpoints(&self) -> Result<Endpoints, SpeedTestError> {
        let mut endpoints = match self.server {
            Some(ref base) => Endpoints::bundled(base).map_err(|e| {
                SpeedTestError::config(format!(
                    "invalid server URL {}: {}",
                    base, e
                ))
            })?,
            None => Endpoints::public(),
        };

        if !self.ping_urls.is_empty() {
            endpoints.ping = self.ping_urls.clone();
        }
        if !self.download_urls.is_empty() || !self.download_files.is_empty() {
            let sized = self
                .download_urls
                .iter()
                .map(|url| DownloadTarget::query(url.clone(), "bytes"));
            let fixed = self
                .download_files
                .iter()
                .map(|url| DownloadTarget::fixed(url.clone()));
            endpoints.download = sized.chain(fixed).collect();
        }
        if !self.upload_urls.is_empty() {
            endpoints.upload = self.upload_urls.clone();
        }

        Ok(endpoints)
    }

    fn config(&self) -> Result<TestConfig, SpeedTestError> {
        if self.pings == 0 {
            return Err(SpeedTestError::config("--pings must be at least 1"));
        }

        let mut config = TestConfig {
            endpoints: self.endpoints()?,
            run_upload: !self.no_upload,
            ..TestConfig::default()
        };
        config.latency.probe_count = self.pings;

        Ok(config)
    }
}

/// Live progress on stderr, rewritten in place.
struct LiveProgress;

impl ProgressCallback for LiveProgress {
    fn on_progress(&self, event: ProgressEvent) {
        let line = match event {
            ProgressEvent::PhaseChange(TestPhase::Complete) => {
                eprint!("\r\x1b[2K");
                return;
            }
            ProgressEvent::PhaseChange(phase) => format!("{:?}...", phase),
            ProgressEvent::LatencyProbe { value_ms, current, total } => {
                let value = value_ms.map_or("discarded".to_string(), |v| {
                    format!("{:.1} ms", v)
                });
                format!("Latency probe {}/{}: {}", current, total, value)
            }
            ProgressEvent::Calibrated {
                direction,
                estimate_mbps,
                connections,
                duration_secs,
            } => format!(
                "{:?}: ~{:.1} Mbps, {} connections for {:.0}s",
                direction, estimate_mbps, connections, duration_secs
            ),
            ProgressEvent::Throughput {
                direction,
                speed_mbps,
                elapsed_secs,
                ..
            } => {
                let label = match direction {
                    Direction::Download => "Download",
                    Direction::Upload => "Upload",
                };
                format!(
                    "{}: {:.2} Mbps ({:.1}s)",
                    label, speed_mbps, elapsed_secs
                )
            }
            ProgressEvent::PhaseComplete { .. } => return,
        };

        eprint!("\r\x1b[2K{}", line.dimmed());
        let _ = std::io::stderr().flush();
    }
}

fn colored_label(label: QualityLabel) -> colored::ColoredString {
    let text = label.description();
    match label {
        QualityLabel::Excellent => text.bright_green(),
        QualityLabel::Good => text.green(),
        QualityLabel::Fair => text.yellow(),
        QualityLabel::Poor => text.red(),
    }
}

fn print_score(name: &str, score: &UseCaseScore) {
    println!(
        "{} {} ({}/100)",
        format!("{:<10}", name).bold().white(),
        colored_label(score.label),
        score.score
    );
}

fn print_human(result: &TestRunResult, report: &SpeedReport) {
    if let Some(ref server) = report.server {
        println!("{} {}", "Server:".bold().white(), server.bright_blue());
    }

    if result.latency_available {
        println!("{} {:.1} ms", "Ping:    ".bold().white(), result.ping_ms);
        println!("{} {:.1} ms", "Jitter:  ".bold().white(), result.jitter_ms);
    } else {
        println!("{} {}", "Ping:    ".bold().white(), "unavailable".red());
    }

    println!(
        "{} {} Mbps ({:.2} MB/s) {}",
        "Download:".bold().white(),
        format!("{:.2}", report.download.speed_mbps).bright_blue(),
        report.download.megabytes_per_second,
        report.download.quality.italic()
    );
    match report.upload {
        Some(ref upload) => println!(
            "{} {} Mbps ({:.2} MB/s) {}",
            "Upload:  ".bold().white(),
            format!("{:.2}", upload.speed_mbps).bright_blue(),
            upload.megabytes_per_second,
            upload.quality.italic()
        ),
        None => {
            println!("{} {}", "Upload:  ".bold().white(), "skipped".dimmed())
        }
    }

    println!();
    print_score("Browsing:", &report.scores.browsing);
    print_score("Gaming:", &report.scores.gaming);
    print_score("Streaming:", &report.scores.streaming);
}

/// Query the bundled backend's descriptor. Failures only lose the display.
async fn server_label(transport: &HttpTransport, base: &Url) -> Option<String> {
    match transport.send(base, PingRequest).await {
        Ok(ping) => debug!(
            "server ping ok, server time {}, simulated ping {:?}",
            ping.server_time, ping.simulated_ping
        ),
        Err(e) => warn!("server ping failed: {}", e),
    }

    match transport.send(base, StatusRequest).await {
        Ok(status) => {
            if !status.is_healthy() {
                warn!("server reports status {:?}", status.status);
            }
            status.server_label()
        }
        Err(e) => {
            warn!("could not read server status: {}", e);
            None
        }
    }
}

async fn run(cli: &Cli) -> Result<i32, SpeedTestError> {
    let config = cli.config()?;
    let transport = HttpTransport::new()?;

    let server = match cli.server {
        Some(ref base) => server_label(&transport, base).await,
        None => None,
    };

    let engine = TestEngine::new(transport, config);
    let live = LiveProgress;
    let progress: &dyn ProgressCallback =
        if cli.json { &NoProgress } else { &live };

    let run = engine.run_with_progress(progress);
    tokio::pin!(run);

    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::signal::ctrl_c() => {
            engine.cancel();
            run.await
        }
    }?;

    let result = match outcome {
        RunOutcome::Completed(result) => result,
        RunOutcome::Cancelled => {
            eprintln!("\r\x1b[2K{}", "Test cancelled".yellow());
            return Ok(exit_codes::CANCELLED);
        }
    };

    let report = SpeedReport::from_result(&result).with_server(server);
    if cli.json {
        let json = serde_json::to_string_pretty(&report).map_err(|e| {
            SpeedTestError::config("could not serialise the results")
                .with_source(e)
        })?;
        println!("{}", json);
    } else {
        print_human(&result, &report);
    }

    Ok(exit_codes::SUCCESS)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("\r\x1b[2K{}", format_error_for_display(&error).red());
            error.exit_code()
        }
    };

    std::process::exit(code);
}
