// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet, and JSON modes; stdout stays free for tunnelled data.

use serde::Serialize;
use sshdial::resolver::PlanSummary;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
///
/// Progress and status go to stderr; only `plan` writes to stdout.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            eprintln!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => match self.duration() {
                Some(elapsed) => eprintln!("{message} ({:.1}s)", elapsed),
                None => eprintln!("{message}"),
            },
            OutputMode::Quiet => eprintln!("{message}"),
            OutputMode::Json => emit_stderr(&JsonEvent {
                event: "success",
                message,
                duration_secs: self.duration(),
            }),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Error: {message}"),
            OutputMode::Json => emit_stderr(&JsonEvent {
                event: "error",
                message,
                duration_secs: self.duration(),
            }),
        }
    }

    /// Print a resolution plan on stdout.
    pub fn plan(&self, plan: &PlanSummary) {
        match self.mode {
            OutputMode::Normal => {
                println!("target:        {}", plan.target);
                println!("user:          {}", plan.user);
                let auth: Vec<String> = plan.auth.iter().map(ToString::to_string).collect();
                println!("auth:          {}", auth.join(","));
                match &plan.known_hosts {
                    Some(path) => println!("host keys:     verified ({})", path.display()),
                    None => println!("host keys:     NOT VERIFIED"),
                }
                println!("transport:     {}", plan.path);
                println!("remote socket: {}", plan.remote_socket);
                for notice in &plan.notices {
                    println!("notice:        {}", notice.message);
                }
            }
            OutputMode::Quiet => println!("{}", plan.path),
            OutputMode::Json => {
                let event = PlanEvent {
                    event: "plan",
                    plan,
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
        }
    }
}

fn emit_stderr<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        eprintln!("{json}");
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct PlanEvent<'a> {
    event: &'a str,
    plan: &'a PlanSummary,
}
