use std::sync::{Arc, Barrier};
use syzygy_api::{ComponentId, MatchTag, ServiceRegistrar};
use syzygy_phleet::*;

const HOST: &str = "cluster-node";

fn lan() -> Vec<String> {
    vec!["lan".into()]
}

fn addrs() -> Vec<String> {
    vec!["10.0.0.2".into()]
}

#[test]
fn concurrent_offers_never_share_ports() {
    syzygy_test_utils::enable_tracing();

    let broker = Arc::new(ConnectionBroker::new());
    let start = Arc::new(Barrier::new(8));

    let mut all = Vec::new();
    for i in 0..8 {
        let broker = broker.clone();
        let start = start.clone();
        all.push(std::thread::spawn(move || {
            let reg = InProcessRegistrar::new(
                broker.clone(),
                ComponentId(i),
                HOST,
                "user",
            )
            .with_port_block(7000, 64)
            .with_channel("default", lan(), addrs());

            start.wait();

            let mut mine = Vec::new();
            for n in 0..4 {
                let name =
                    reg.create_complex_service_name(&format!("svc{i}.{n}"));
                let ports = reg.register_service(&name, "default", 2).unwrap();
                reg.confirm_ports(&name, "default", &ports).unwrap();
                mine.extend(ports);
            }
            mine
        }));
    }

    let mut ports: Vec<u16> = all
        .into_iter()
        .flat_map(|t| t.join().unwrap())
        .collect();
    assert_eq!(64, ports.len());
    ports.sort();
    ports.dedup();
    assert_eq!(64, ports.len());

    let pool = broker.port_pool(HOST).unwrap();
    assert!(pool.available().is_empty());
    assert_eq!(64, pool.used().len());

    // a 65th port cannot be had
    let reg =
        InProcessRegistrar::new(broker.clone(), ComponentId(99), HOST, "user")
            .with_port_block(7000, 64)
            .with_channel("default", lan(), addrs());
    assert!(reg.register_service("late", "default", 1).is_err());

    for i in 0..8 {
        broker.remove_component(ComponentId(i));
    }

    let pool = broker.port_pool(HOST).unwrap();
    assert_eq!(64, pool.available().len());
    assert!(pool.used().is_empty());
    assert!(broker.get_service_names().is_empty());
}

#[test]
fn names_race_has_one_winner() {
    let broker = Arc::new(ConnectionBroker::new());
    let start = Arc::new(Barrier::new(6));

    let mut all = Vec::new();
    for i in 0..6 {
        let broker = broker.clone();
        let start = start.clone();
        all.push(std::thread::spawn(move || {
            start.wait();
            broker
                .request_ports(
                    ComponentId(i),
                    &PortRequest {
                        service_name: "SZG_MASTER".into(),
                        host: HOST.into(),
                        networks: vec!["lan".into()],
                        addresses: vec!["10.0.0.2".into()],
                        port_count: 1,
                        first_port: 7000,
                        block_size: 10,
                    },
                )
                .is_ok()
        }));
    }

    let winners = all
        .into_iter()
        .map(|t| t.join().unwrap())
        .filter(|w| *w)
        .count();
    assert_eq!(1, winners);
    assert_eq!(9, broker.port_pool(HOST).unwrap().available().len());

    let owner = broker.snapshot().temporary_services[0].component;
    broker.confirm_ports(owner, "SZG_MASTER").unwrap();
    assert_eq!(Some(owner), broker.get_service_component_id("SZG_MASTER"));
    assert!(broker
        .request_service(
            ComponentId(50),
            HOST,
            MatchTag(1),
            "SZG_MASTER",
            &["lan".to_string()],
            false
        )
        .is_ok());
}
