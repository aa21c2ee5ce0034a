use anyhow::Result;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::command::AppCommand;
use crate::config::{DEFAULT_REPORT_INTERVAL, SCAN_DEADLINE};

pub fn version_text() -> String {
    format!("lanwatch {}", env!("CARGO_PKG_VERSION"))
}

pub fn usage_text() -> String {
    format!(
        "{version}
LAN discovery, ARP interception and traffic analytics

Usage:
  lanwatch [scan] [--interface <NAME>] [--max-hosts <N>] [--timeout <SECS>]
  lanwatch resolve <IP> [--interface <NAME>]
  lanwatch mitm --target <IP> --gateway <IP> [--interface <NAME>] [--duration <SECS>]
                [--interval <SECS>] [--no-capture]
  lanwatch monitor [--interface <NAME>] [--replay <PATH|->] [--filter <EXPR>]
                   [--interval <SECS>] [--reports <N>]
  lanwatch interfaces
  lanwatch --help
  lanwatch --version

Options:
  -i, --interface <NAME>  Select network interface by exact name
      --max-hosts <N>     Scan: probe cap, 0 or negative scans the whole subnet
      --timeout <SECS>    Scan: overall deadline (default: {scan_timeout})
      --target <IP>       MITM: host to intercept
      --gateway <IP>      MITM: gateway the target talks through
      --duration <SECS>   MITM: stop after this long (default: until Ctrl+C)
      --no-capture        MITM: poison only, do not start the dissector
      --replay <PATH|->   Monitor: read dissector output from a file or stdin
      --filter <EXPR>     Monitor: capture filter passed to the dissector
      --interval <SECS>   Seconds between traffic snapshots (default: {interval})
      --reports <N>       Monitor: stop after N snapshots
  -h, --help              Show this help text
  -V, --version           Show version",
        version = version_text(),
        scan_timeout = SCAN_DEADLINE.as_secs(),
        interval = DEFAULT_REPORT_INTERVAL
    )
}

fn invalid(flag: &str, raw: &str, expected: &str) -> anyhow::Error {
    anyhow::anyhow!(
        "Invalid value for {}: '{}'. Expected {}.\n\n{}",
        flag,
        raw,
        expected,
        usage_text()
    )
}

fn parse_positive_u64(flag: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| invalid(flag, raw, "a positive integer"))
}

fn parse_positive_u32(flag: &str, raw: &str) -> Result<u32> {
    raw.parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| invalid(flag, raw, "a positive integer"))
}

fn parse_i64(flag: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| invalid(flag, raw, "an integer"))
}

fn parse_ipv4(flag: &str, raw: &str) -> Result<Ipv4Addr> {
    raw.parse::<Ipv4Addr>()
        .map_err(|_| invalid(flag, raw, "an IPv4 address"))
}

#[derive(Default)]
struct Flags {
    interface: Option<String>,
    max_hosts: Option<i64>,
    timeout: Option<u64>,
    target: Option<Ipv4Addr>,
    gateway: Option<Ipv4Addr>,
    duration: Option<u64>,
    no_capture: bool,
    replay: Option<PathBuf>,
    filter: Option<String>,
    interval: Option<u64>,
    reports: Option<u32>,
    positional: Vec<String>,
}

impl Flags {
    /// Names of flags that were given, for per-command validation
    fn present(&self) -> Vec<&'static str> {
        let mut present = Vec::new();
        let checks = [
            ("--interface", self.interface.is_some()),
            ("--max-hosts", self.max_hosts.is_some()),
            ("--timeout", self.timeout.is_some()),
            ("--target", self.target.is_some()),
            ("--gateway", self.gateway.is_some()),
            ("--duration", self.duration.is_some()),
            ("--no-capture", self.no_capture),
            ("--replay", self.replay.is_some()),
            ("--filter", self.filter.is_some()),
            ("--interval", self.interval.is_some()),
            ("--reports", self.reports.is_some()),
        ];
        for (name, set) in checks {
            if set {
                present.push(name);
            }
        }
        present
    }

    fn only(&self, command: &str, allowed: &[&str]) -> Result<()> {
        if let Some(flag) = self.present().into_iter().find(|f| !allowed.contains(f)) {
            return Err(anyhow::anyhow!(
                "{} is not valid with {}.\n\n{}",
                flag,
                command,
                usage_text()
            ));
        }
        Ok(())
    }

    fn no_positional(&self, command: &str) -> Result<()> {
        match self.positional.first() {
            Some(extra) => Err(anyhow::anyhow!(
                "Unexpected argument '{}' for {}.\n\n{}",
                extra,
                command,
                usage_text()
            )),
            None => Ok(()),
        }
    }
}

const COMMANDS: &[&str] = &["scan", "resolve", "mitm", "monitor", "interfaces"];

pub fn parse_cli_args<I, S>(args: I) -> Result<AppCommand>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut iter = args.into_iter();
    let _program_name = iter.next();

    let mut command: Option<String> = None;
    let mut flags = Flags::default();

    while let Some(arg) = iter.next() {
        let arg = arg.as_ref();

        // --flag=value
        let (name, inline) = match arg.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value.to_string())),
            _ => (arg, None),
        };

        let mut value = |flag: &str| -> Result<String> {
            let raw = match inline.clone() {
                Some(v) => v,
                None => iter
                    .next()
                    .map(|v| v.as_ref().to_string())
                    .unwrap_or_default(),
            };
            if raw.is_empty() {
                return Err(anyhow::anyhow!(
                    "Missing value for {}.\n\n{}",
                    flag,
                    usage_text()
                ));
            }
            Ok(raw)
        };

        match name {
            "-h" | "--help" => return Ok(AppCommand::Help),
            "-V" | "--version" => return Ok(AppCommand::Version),
            "-i" | "--interface" => flags.interface = Some(value("--interface")?),
            "--max-hosts" => flags.max_hosts = Some(parse_i64("--max-hosts", &value("--max-hosts")?)?),
            "--timeout" => flags.timeout = Some(parse_positive_u64("--timeout", &value("--timeout")?)?),
            "--target" => flags.target = Some(parse_ipv4("--target", &value("--target")?)?),
            "--gateway" => flags.gateway = Some(parse_ipv4("--gateway", &value("--gateway")?)?),
            "--duration" => {
                flags.duration = Some(parse_positive_u64("--duration", &value("--duration")?)?)
            }
            "--no-capture" => flags.no_capture = true,
            "--replay" => flags.replay = Some(PathBuf::from(value("--replay")?)),
            "--filter" => flags.filter = Some(value("--filter")?),
            "--interval" => {
                flags.interval = Some(parse_positive_u64("--interval", &value("--interval")?)?)
            }
            "--reports" => flags.reports = Some(parse_positive_u32("--reports", &value("--reports")?)?),
            _ if COMMANDS.contains(&name) && command.is_none() => {
                command = Some(name.to_string());
            }
            _ if COMMANDS.contains(&name) => {
                return Err(anyhow::anyhow!(
                    "Multiple commands provided. Use only one command.\n\n{}",
                    usage_text()
                ));
            }
            _ if !name.starts_with('-') && command.is_some() => {
                flags.positional.push(name.to_string());
            }
            _ => {
                return Err(anyhow::anyhow!(
                    "Unknown argument: {arg}\n\n{}",
                    usage_text()
                ));
            }
        }
    }

    match command.as_deref().unwrap_or("scan") {
        "scan" => {
            flags.only("scan", &["--interface", "--max-hosts", "--timeout"])?;
            flags.no_positional("scan")?;
            Ok(AppCommand::Scan {
                interface: flags.interface,
                max_hosts: flags.max_hosts,
                timeout_secs: flags.timeout.unwrap_or(SCAN_DEADLINE.as_secs()),
            })
        }
        "resolve" => {
            flags.only("resolve", &["--interface"])?;
            let raw = match flags.positional.as_slice() {
                [ip] => ip.clone(),
                [] => {
                    return Err(anyhow::anyhow!(
                        "resolve requires an IPv4 address.\n\n{}",
                        usage_text()
                    ))
                }
                [_, extra, ..] => {
                    return Err(anyhow::anyhow!(
                        "Unexpected argument '{}' for resolve.\n\n{}",
                        extra,
                        usage_text()
                    ))
                }
            };
            Ok(AppCommand::Resolve {
                ip: parse_ipv4("resolve", &raw)?,
                interface: flags.interface,
            })
        }
        "mitm" => {
            flags.only(
                "mitm",
                &[
                    "--interface",
                    "--target",
                    "--gateway",
                    "--duration",
                    "--no-capture",
                    "--interval",
                ],
            )?;
            flags.no_positional("mitm")?;
            let (Some(target), Some(gateway)) = (flags.target, flags.gateway) else {
                return Err(anyhow::anyhow!(
                    "Both --target and --gateway must be specified for mitm.\n\n{}",
                    usage_text()
                ));
            };
            Ok(AppCommand::Mitm {
                target,
                gateway,
                interface: flags.interface,
                duration_secs: flags.duration,
                capture: !flags.no_capture,
                interval_secs: flags.interval.unwrap_or(DEFAULT_REPORT_INTERVAL),
            })
        }
        "monitor" => {
            flags.only(
                "monitor",
                &["--interface", "--replay", "--filter", "--interval", "--reports"],
            )?;
            flags.no_positional("monitor")?;
            if flags.replay.is_some() && flags.filter.is_some() {
                return Err(anyhow::anyhow!(
                    "--filter applies to live capture only, not --replay.\n\n{}",
                    usage_text()
                ));
            }
            Ok(AppCommand::Monitor {
                interface: flags.interface,
                replay: flags.replay,
                filter: flags.filter,
                interval_secs: flags.interval.unwrap_or(DEFAULT_REPORT_INTERVAL),
                reports: flags.reports,
            })
        }
        "interfaces" => {
            flags.only("interfaces", &[])?;
            flags.no_positional("interfaces")?;
            Ok(AppCommand::Interfaces)
        }
        other => Err(anyhow::anyhow!("Unknown command: {other}\n\n{}", usage_text())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_help_flag() {
        let parsed = parse_cli_args(["lanwatch", "--help"]).expect("help args should parse");
        assert_eq!(parsed, AppCommand::Help);
    }

    #[test]
    fn parse_version_flag() {
        let parsed = parse_cli_args(["lanwatch", "-V"]).expect("version args should parse");
        assert_eq!(parsed, AppCommand::Version);
    }

    #[test]
    fn parse_default_scan_command() {
        let parsed = parse_cli_args(["lanwatch"]).expect("default args should parse");
        assert_eq!(
            parsed,
            AppCommand::Scan {
                interface: None,
                max_hosts: None,
                timeout_secs: SCAN_DEADLINE.as_secs(),
            }
        );
    }

    #[test]
    fn parse_scan_with_options() {
        let parsed = parse_cli_args(["lanwatch", "scan", "-i", "eth0", "--max-hosts=-1", "--timeout", "30"])
            .expect("scan with options should parse");
        assert_eq!(
            parsed,
            AppCommand::Scan {
                interface: Some("eth0".to_string()),
                max_hosts: Some(-1),
                timeout_secs: 30,
            }
        );
    }

    #[test]
    fn parse_resolve_positional_ip() {
        let parsed = parse_cli_args(["lanwatch", "resolve", "192.168.1.1", "--interface", "wlan0"])
            .expect("resolve should parse");
        assert_eq!(
            parsed,
            AppCommand::Resolve {
                ip: Ipv4Addr::new(192, 168, 1, 1),
                interface: Some("wlan0".to_string()),
            }
        );
    }

    #[test]
    fn parse_resolve_requires_valid_ip() {
        let err = parse_cli_args(["lanwatch", "resolve"]).expect_err("missing IP should fail");
        assert!(err.to_string().contains("requires an IPv4 address"));

        let err = parse_cli_args(["lanwatch", "resolve", "gateway"]).expect_err("bad IP should fail");
        assert!(err.to_string().contains("Expected an IPv4 address"));
    }

    #[test]
    fn parse_mitm_command() {
        let parsed = parse_cli_args([
            "lanwatch",
            "mitm",
            "--target",
            "192.168.1.20",
            "--gateway=192.168.1.1",
            "--duration",
            "60",
            "--no-capture",
        ])
        .expect("mitm should parse");
        assert_eq!(
            parsed,
            AppCommand::Mitm {
                target: Ipv4Addr::new(192, 168, 1, 20),
                gateway: Ipv4Addr::new(192, 168, 1, 1),
                interface: None,
                duration_secs: Some(60),
                capture: false,
                interval_secs: DEFAULT_REPORT_INTERVAL,
            }
        );
    }

    #[test]
    fn parse_mitm_requires_both_endpoints() {
        let err = parse_cli_args(["lanwatch", "mitm", "--target", "10.0.0.2"])
            .expect_err("gateway missing should fail");
        assert!(err.to_string().contains("Both --target and --gateway"));
    }

    #[test]
    fn parse_monitor_replay() {
        let parsed = parse_cli_args(["lanwatch", "monitor", "--replay", "-", "--reports", "3"])
            .expect("monitor should parse");
        assert_eq!(
            parsed,
            AppCommand::Monitor {
                interface: None,
                replay: Some(PathBuf::from("-")),
                filter: None,
                interval_secs: DEFAULT_REPORT_INTERVAL,
                reports: Some(3),
            }
        );
    }

    #[test]
    fn parse_rejects_flags_for_other_commands() {
        let err = parse_cli_args(["lanwatch", "scan", "--target", "10.0.0.1"])
            .expect_err("scan should reject mitm flags");
        assert!(err.to_string().contains("--target is not valid with scan"));

        let err = parse_cli_args(["lanwatch", "interfaces", "-i", "eth0"])
            .expect_err("interfaces takes no flags");
        assert!(err.to_string().contains("--interface is not valid with interfaces"));
    }

    #[test]
    fn parse_missing_and_invalid_values() {
        let err = parse_cli_args(["lanwatch", "scan", "--interface"]).expect_err("missing value");
        assert!(err.to_string().contains("Missing value for --interface"));

        let err = parse_cli_args(["lanwatch", "monitor", "--interval", "0"]).expect_err("zero interval");
        assert!(err.to_string().contains("Expected a positive integer"));
    }

    #[test]
    fn parse_multiple_commands_errors() {
        let err = parse_cli_args(["lanwatch", "scan", "monitor"]).expect_err("two commands");
        assert!(err.to_string().contains("Multiple commands"));
    }

    #[test]
    fn parse_unknown_argument_errors() {
        let err = parse_cli_args(["lanwatch", "--unknown"]).expect_err("unknown flag should fail");
        assert!(err.to_string().contains("Unknown argument"));
    }
}
