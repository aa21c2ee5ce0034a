use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use lanwatch::network::frames::ArpFrame;
use lanwatch::{
    execute_command_typed, execute_command_with_context, run_with_context, AppCommand,
    AppCommandResult, AppContext, InterfaceInfo, MemoryLink, OutputHook,
};
use pnet::util::MacAddr;

fn local_interface() -> InterfaceInfo {
    InterfaceInfo::detached(
        "mem0",
        Ipv4Addr::new(172, 16, 4, 2),
        MacAddr::new(0x02, 0, 0, 0, 0x04, 0x02),
        28,
    )
}

fn lan() -> MemoryLink {
    MemoryLink::new()
        .with_neighbour(Ipv4Addr::new(172, 16, 4, 1), MacAddr::new(0x02, 0, 0, 0, 0x04, 0x01))
        .with_neighbour(Ipv4Addr::new(172, 16, 4, 9), MacAddr::new(0x02, 0, 0, 0, 0x04, 0x09))
}

fn make_test_context(link: &MemoryLink) -> (AppContext, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let output_hook: OutputHook = Arc::new(move |line| {
        sink.lock()
            .expect("output lock should not be poisoned")
            .push(line.to_string());
    });

    let context = AppContext::from_env()
        .with_link(Arc::new(link.clone()))
        .with_interface(local_interface())
        .with_output_hook(output_hook);
    (context, lines)
}

fn unique_temp_path(prefix: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{}_{}.jsonl", prefix, timestamp))
}

#[tokio::test]
async fn help_command_writes_usage_to_output_hook() {
    let (context, lines) = make_test_context(&MemoryLink::new());

    execute_command_with_context(AppCommand::Help, &context)
        .await
        .expect("help command should succeed");

    let output = lines.lock().expect("output lock").join("\n");
    assert!(output.contains("Usage:"));
    assert!(output.contains("lanwatch mitm"));
}

#[tokio::test]
async fn unknown_argument_is_rejected_before_dispatch() {
    let (context, lines) = make_test_context(&MemoryLink::new());

    let err = run_with_context(["lanwatch", "--frobnicate"], &context)
        .await
        .expect_err("unknown flag should fail");
    assert!(err.to_string().contains("Unknown argument"));
    assert!(lines.lock().expect("output lock").is_empty());
}

#[tokio::test]
async fn scan_command_reports_neighbours_from_context_link() {
    let link = lan();
    let (context, _lines) = make_test_context(&link);

    let result = execute_command_typed(
        AppCommand::Scan {
            interface: None,
            max_hosts: None,
            timeout_secs: 10,
        },
        &context,
    )
    .await
    .expect("scan should succeed");

    let AppCommandResult::Scan(report) = result else {
        panic!("expected scan result");
    };
    assert_eq!(report.interface_name, "mem0");
    assert_eq!(report.subnet, "172.16.4.0/28");
    assert_eq!(report.total_hosts, 2);
    let ips: Vec<Ipv4Addr> = report.hosts.iter().map(|h| h.ip).collect();
    assert_eq!(ips, vec![Ipv4Addr::new(172, 16, 4, 1), Ipv4Addr::new(172, 16, 4, 9)]);
}

#[tokio::test]
async fn scan_command_emits_json_report() {
    let link = lan();
    let (context, lines) = make_test_context(&link);

    run_with_context(["lanwatch", "scan", "--timeout", "10"], &context)
        .await
        .expect("scan should succeed");

    let output = lines.lock().expect("output lock").join("\n");
    let json: serde_json::Value = serde_json::from_str(&output).expect("output is json");
    assert_eq!(json["local_ip"], "172.16.4.2");
    assert_eq!(json["hosts"][1]["mac"], "02:00:00:00:04:09");
}

#[tokio::test]
async fn mitm_without_capture_restores_on_completion() {
    let link = lan();
    let (context, _lines) = make_test_context(&link);

    let result = execute_command_typed(
        AppCommand::Mitm {
            target: Ipv4Addr::new(172, 16, 4, 9),
            gateway: Ipv4Addr::new(172, 16, 4, 1),
            interface: None,
            duration_secs: Some(0),
            capture: false,
            interval_secs: 1,
        },
        &context,
    )
    .await
    .expect("mitm should succeed");

    let AppCommandResult::Mitm(report) = result else {
        panic!("expected mitm result");
    };
    assert!(report.capture_filter.is_none());
    assert!(report.final_snapshot.is_none());
    assert_eq!(report.session.host_mac, local_interface().mac);

    let restored = link
        .sent_arp()
        .into_iter()
        .filter(ArpFrame::is_reply)
        .filter(|frame| frame.sender_mac != local_interface().mac)
        .count();
    assert_eq!(restored, 6);
}

#[tokio::test]
async fn monitor_replay_prints_final_snapshot() {
    let path = unique_temp_path("lanwatch_replay");
    let lines = [
        r#"{"timestamp":"1700000000000","layers":{"frame_len":["300"],"ip_src":["172.16.4.9"],"ip_dst":["172.16.4.1"],"tcp_srcport":["41000"],"tcp_dstport":["21"]}}"#,
        r#"{"timestamp":"1700000000050","layers":{"frame_len":["200"],"ip_src":["172.16.4.1"],"ip_dst":["172.16.4.9"],"udp_srcport":["53"],"udp_dstport":["41001"]}}"#,
    ];
    std::fs::write(&path, lines.join("\n")).expect("write replay file");

    let (context, output) = make_test_context(&MemoryLink::new());
    let result = run_with_context(
        ["lanwatch", "monitor", "--replay", path.to_str().expect("utf-8 path")],
        &context,
    )
    .await;
    let _ = std::fs::remove_file(&path);
    result.expect("replay should succeed");

    let output = output.lock().expect("output lock");
    let last = output.last().expect("final snapshot emitted");
    let json: serde_json::Value = serde_json::from_str(last).expect("snapshot is json");
    assert_eq!(json["total_packets"], 2);
    assert_eq!(json["total_bytes"], 500);
    assert_eq!(json["alerts"][0]["kind"], "UNSECURE_PROTOCOL");
    assert_eq!(json["alerts"][0]["source"], "172.16.4.9");
}
