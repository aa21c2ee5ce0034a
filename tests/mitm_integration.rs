use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use lanwatch::network::frames::ArpFrame;
use lanwatch::{Error, InterfaceInfo, MemoryLink, MitmEngine, MitmState};
use pnet::util::MacAddr;

const TARGET: Ipv4Addr = Ipv4Addr::new(10, 20, 0, 7);
const GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 20, 0, 1);

fn host_mac() -> MacAddr {
    MacAddr::new(0x02, 0xaa, 0, 0, 0, 0x05)
}

fn target_mac() -> MacAddr {
    MacAddr::new(0x02, 0xbb, 0, 0, 0, 0x07)
}

fn gateway_mac() -> MacAddr {
    MacAddr::new(0x02, 0xcc, 0, 0, 0, 0x01)
}

fn interface() -> InterfaceInfo {
    InterfaceInfo::detached("mem0", Ipv4Addr::new(10, 20, 0, 5), host_mac(), 24)
}

fn engine(link: &MemoryLink) -> MitmEngine {
    MitmEngine::with_link(Arc::new(link.clone()))
        .with_resolve_timeout(Duration::from_millis(300))
        .with_poll_interval(Duration::from_millis(10))
        .with_spoof_interval(Duration::from_millis(20))
}

fn replies(link: &MemoryLink) -> Vec<ArpFrame> {
    link.sent_arp().into_iter().filter(ArpFrame::is_reply).collect()
}

#[test]
fn full_session_poisons_then_restores_both_caches() {
    let link = MemoryLink::new()
        .with_neighbour(TARGET, target_mac())
        .with_neighbour(GATEWAY, gateway_mac());
    let mut engine = engine(&link);

    engine
        .initialize(TARGET, GATEWAY, &interface())
        .expect("both endpoints answer");
    engine.start().expect("start after resolution");
    assert_eq!(engine.state(), MitmState::Active);

    std::thread::sleep(Duration::from_millis(150));
    engine.stop();
    assert_eq!(engine.state(), MitmState::Idle);
    assert!(engine.session().is_none());

    let replies = replies(&link);
    assert!(replies.len() >= 2 + 6, "expected poisoning plus restoration, got {}", replies.len());

    let (poison, restore) = replies.split_at(replies.len() - 6);
    assert!(poison.iter().all(|frame| frame.sender_mac == host_mac()));
    assert!(poison
        .iter()
        .any(|frame| frame.sender_ip == GATEWAY && frame.target_mac == target_mac()));
    assert!(poison
        .iter()
        .any(|frame| frame.sender_ip == TARGET && frame.target_mac == gateway_mac()));

    for pair in restore.chunks(2) {
        assert_eq!((pair[0].sender_ip, pair[0].sender_mac), (GATEWAY, gateway_mac()));
        assert_eq!((pair[0].target_ip, pair[0].target_mac), (TARGET, target_mac()));
        assert_eq!((pair[1].sender_ip, pair[1].sender_mac), (TARGET, target_mac()));
        assert_eq!((pair[1].target_ip, pair[1].target_mac), (GATEWAY, gateway_mac()));
    }
}

#[test]
fn silent_target_fails_without_poisoning() {
    let link = MemoryLink::new().with_neighbour(GATEWAY, gateway_mac());
    let mut engine = engine(&link);

    let err = engine
        .initialize(TARGET, GATEWAY, &interface())
        .expect_err("target never answers");
    match err {
        Error::ResolutionFailure { role, ip, .. } => {
            assert_eq!(role, "target");
            assert_eq!(ip, TARGET);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.state(), MitmState::Idle);
    assert!(engine.start().is_err());
    assert!(replies(&link).is_empty());
}

#[test]
fn engine_can_run_a_second_session_after_stop() {
    let link = MemoryLink::new()
        .with_neighbour(TARGET, target_mac())
        .with_neighbour(GATEWAY, gateway_mac());
    let mut engine = engine(&link);

    for _ in 0..2 {
        engine
            .initialize(TARGET, GATEWAY, &interface())
            .expect("endpoints answer");
        engine.start().expect("start");
        engine.stop();
        assert_eq!(engine.state(), MitmState::Idle);
    }
}
