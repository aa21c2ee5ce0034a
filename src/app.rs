use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::capture::{default_link, SharedLink};
use crate::cli::{parse_cli_args, usage_text, version_text};
use crate::command::AppCommand;
use crate::command_handlers::{
    collect_interfaces, mitm_report, monitor_report, resolve_report, scan_report, MitmReport,
    ResolveReport, ScanReport,
};
use crate::models::InterfaceInfo;
use crate::monitor::TrafficSnapshot;
use crate::scanner::CancelToken;

pub type OutputHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type EventHook = Arc<dyn Fn(&AppEvent) + Send + Sync>;

/// Everything a command needs from its surroundings
#[derive(Clone)]
pub struct AppContext {
    link: SharedLink,
    interface: Option<InterfaceInfo>,
    output_hook: OutputHook,
    event_hook: EventHook,
    cancel: CancelToken,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppEvent {
    Info { message: String },
    Warn { message: String },
    Error { message: String },
    Cancelled { stage: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum AppCommandResult {
    HelpText(String),
    VersionText(String),
    Interfaces(Vec<String>),
    Scan(ScanReport),
    Resolve(ResolveReport),
    Mitm(MitmReport),
    Monitor(TrafficSnapshot),
}

impl Default for AppContext {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AppContext {
    pub fn from_env() -> Self {
        Self {
            link: default_link(),
            interface: None,
            output_hook: Arc::new(|line| println!("{}", line)),
            event_hook: Arc::new(log_event),
            cancel: CancelToken::new(),
        }
    }

    /// Use a different link layer (e.g. an in-memory wire)
    pub fn with_link(mut self, link: SharedLink) -> Self {
        self.link = link;
        self
    }

    /// Skip OS interface lookup and always use `interface`
    pub fn with_interface(mut self, interface: InterfaceInfo) -> Self {
        self.interface = Some(interface);
        self
    }

    pub fn with_output_hook(mut self, output_hook: OutputHook) -> Self {
        self.output_hook = output_hook;
        self
    }

    pub fn with_event_hook(mut self, event_hook: EventHook) -> Self {
        self.event_hook = event_hook;
        self
    }

    pub fn link(&self) -> SharedLink {
        Arc::clone(&self.link)
    }

    pub fn interface_override(&self) -> Option<&InterfaceInfo> {
        self.interface.as_ref()
    }

    pub fn emit_line(&self, line: &str) {
        (self.output_hook)(line);
    }

    pub fn emit_event(&self, event: AppEvent) {
        (self.event_hook)(&event);
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn log_event(event: &AppEvent) {
    match event {
        AppEvent::Info { message } => {
            crate::log_stderr!("{}", message);
        }
        AppEvent::Warn { message } => {
            crate::log_warn!("{}", message);
        }
        AppEvent::Error { message } => {
            crate::log_error!("{}", message);
        }
        AppEvent::Cancelled { stage } => {
            crate::log_stderr!("Cancelled during {}", stage);
        }
    }
}

/// Parse `args` and run the command against the real network.
pub async fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let context = AppContext::from_env();
    run_with_context(args, &context).await
}

/// Parse `args` and run the command within `context`.
pub async fn run_with_context<I, S>(args: I, context: &AppContext) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let command = parse_cli_args(args)?;
    execute_command_with_context(command, context).await
}

/// Run with Ctrl+C wired to the context's cancellation.
pub async fn run_with_ctrl_c<I, S>(args: I, context: &AppContext) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let cancel_context = context.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_context.cancel();
            crate::log_stderr!("Cancellation requested (Ctrl+C). Cleaning up...");
        }
    });

    let run_result = run_with_context(args, context).await;
    signal_task.abort();
    run_result
}

/// Run an already-parsed command with a default context.
pub async fn execute_command(command: AppCommand) -> Result<()> {
    let context = AppContext::from_env();
    execute_command_with_context(command, &context).await
}

/// Run an already-parsed command and write its output through `context`.
pub async fn execute_command_with_context(command: AppCommand, context: &AppContext) -> Result<()> {
    let result = execute_command_typed(command, context).await?;
    emit_command_result(&result, context)
}

/// Run an already-parsed command and hand back its result instead of printing it.
pub async fn execute_command_typed(
    command: AppCommand,
    context: &AppContext,
) -> Result<AppCommandResult> {
    match command {
        AppCommand::Help => Ok(AppCommandResult::HelpText(usage_text())),
        AppCommand::Version => Ok(AppCommandResult::VersionText(version_text())),
        AppCommand::Interfaces => Ok(AppCommandResult::Interfaces(collect_interfaces())),
        AppCommand::Scan {
            interface,
            max_hosts,
            timeout_secs,
        } => Ok(AppCommandResult::Scan(
            scan_report(interface, max_hosts, timeout_secs, context).await?,
        )),
        AppCommand::Resolve { ip, interface } => Ok(AppCommandResult::Resolve(
            resolve_report(ip, interface, context).await?,
        )),
        AppCommand::Mitm {
            target,
            gateway,
            interface,
            duration_secs,
            capture,
            interval_secs,
        } => Ok(AppCommandResult::Mitm(
            mitm_report(
                target,
                gateway,
                interface,
                duration_secs,
                capture,
                interval_secs,
                context,
            )
            .await?,
        )),
        AppCommand::Monitor {
            interface,
            replay,
            filter,
            interval_secs,
            reports,
        } => Ok(AppCommandResult::Monitor(
            monitor_report(interface, replay, filter, interval_secs, reports, context).await?,
        )),
    }
}

fn emit_command_result(result: &AppCommandResult, context: &AppContext) -> Result<()> {
    let json = match result {
        AppCommandResult::HelpText(text) | AppCommandResult::VersionText(text) => {
            context.emit_line(text);
            return Ok(());
        }
        AppCommandResult::Interfaces(interfaces) => {
            if interfaces.is_empty() {
                context.emit_line("No valid IPv4 network interfaces found.");
            } else {
                for interface in interfaces {
                    context.emit_line(interface);
                }
            }
            return Ok(());
        }
        AppCommandResult::Scan(report) => {
            serde_json::to_string_pretty(report).context("Failed to serialize scan report")?
        }
        AppCommandResult::Resolve(report) => {
            serde_json::to_string_pretty(report).context("Failed to serialize resolve report")?
        }
        AppCommandResult::Mitm(report) => {
            serde_json::to_string_pretty(report).context("Failed to serialize MITM report")?
        }
        AppCommandResult::Monitor(snapshot) => serde_json::to_string_pretty(snapshot)
            .context("Failed to serialize traffic snapshot")?,
    };
    context.emit_line(&json);
    Ok(())
}
