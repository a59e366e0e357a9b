use crate::*;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use syzygy_api::{ComponentId, MatchTag};

const TIMEOUT: Duration = Duration::from_secs(5);

struct ChanOutbox(Mutex<mpsc::Sender<(ComponentId, BrokerReply)>>);

impl Outbox for ChanOutbox {
    fn deliver(&self, component: ComponentId, reply: BrokerReply) {
        let _ = self.0.lock().unwrap().send((component, reply));
    }
}

fn srv() -> (BrokerSrv, mpsc::Receiver<(ComponentId, BrokerReply)>) {
    syzygy_test_utils::enable_tracing();
    let (s, r) = mpsc::channel();
    let srv = BrokerSrv::new(
        BrokerSrvConfig::testing(),
        Arc::new(ChanOutbox(Mutex::new(s))),
    );
    (srv, r)
}

fn register(name: &str) -> BrokerRequest {
    BrokerRequest::RegisterService {
        tag: MatchTag(1),
        request: PortRequest {
            service_name: name.to_string(),
            host: "audio1".to_string(),
            networks: vec!["internet".to_string()],
            addresses: vec!["10.1.1.1".to_string()],
            port_count: 1,
            first_port: 6000,
            block_size: 10,
        },
    }
}

fn request(name: &str, tag: i32, is_async: bool) -> BrokerRequest {
    BrokerRequest::RequestService {
        tag: MatchTag(tag),
        host: "render1".to_string(),
        service_name: name.to_string(),
        networks: vec!["internet".to_string()],
        is_async,
    }
}

#[test]
fn async_request_answered_on_confirm() {
    let (srv, r) = srv();
    let owner = ComponentId(1);
    let waiter = ComponentId(2);

    srv.submit(waiter, request("SZG_SOUND", 42, true)).unwrap();

    srv.submit(owner, register("SZG_SOUND")).unwrap();
    let (to, reply) = r.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(owner, to);
    assert_eq!(
        BrokerReply::Ports {
            tag: MatchTag(1),
            service_name: "SZG_SOUND".into(),
            result: Ok(vec![6000]),
        },
        reply
    );

    srv.submit(
        owner,
        BrokerRequest::ConfirmPorts {
            tag: MatchTag(2),
            service_name: "SZG_SOUND".into(),
        },
    )
    .unwrap();

    let mut got = vec![
        r.recv_timeout(TIMEOUT).unwrap(),
        r.recv_timeout(TIMEOUT).unwrap(),
    ];
    got.sort_by_key(|(c, _)| *c);

    assert_eq!(
        vec![
            (
                owner,
                BrokerReply::Confirmed {
                    tag: MatchTag(2),
                    service_name: "SZG_SOUND".into(),
                    result: Ok(()),
                }
            ),
            (
                waiter,
                BrokerReply::ServiceLocation {
                    tag: MatchTag(42),
                    service_name: "SZG_SOUND".into(),
                    result: Ok(ServiceAddress {
                        address: "10.1.1.1".into(),
                        ports: vec![6000],
                    }),
                }
            ),
        ],
        got
    );

    assert!(srv.broker().get_pending_requests().is_empty());
}

#[test]
fn sync_miss_is_answered_immediately() {
    let (srv, r) = srv();

    srv.submit(ComponentId(5), request("nothing", 7, false))
        .unwrap();

    assert_eq!(
        (
            ComponentId(5),
            BrokerReply::ServiceLocation {
                tag: MatchTag(7),
                service_name: "nothing".into(),
                result: Err(BrokerError::NotOffered("nothing".into())),
            }
        ),
        r.recv_timeout(TIMEOUT).unwrap()
    );
}

#[test]
fn watch_release_and_exit() {
    let (srv, r) = srv();
    let owner = ComponentId(1);
    let watcher = ComponentId(2);

    // nothing to watch yet
    srv.submit(
        watcher,
        BrokerRequest::WatchRelease {
            tag: MatchTag(8),
            host: "render1".into(),
            service_name: "SZG_SOUND".into(),
        },
    )
    .unwrap();
    assert_eq!(
        (
            watcher,
            BrokerReply::Released {
                tag: MatchTag(8),
                service_name: "SZG_SOUND".into(),
            }
        ),
        r.recv_timeout(TIMEOUT).unwrap()
    );

    srv.submit(owner, register("SZG_SOUND")).unwrap();
    r.recv_timeout(TIMEOUT).unwrap();
    srv.submit(
        owner,
        BrokerRequest::ConfirmPorts {
            tag: MatchTag(2),
            service_name: "SZG_SOUND".into(),
        },
    )
    .unwrap();
    r.recv_timeout(TIMEOUT).unwrap();

    srv.submit(
        watcher,
        BrokerRequest::WatchRelease {
            tag: MatchTag(9),
            host: "render1".into(),
            service_name: "SZG_SOUND".into(),
        },
    )
    .unwrap();

    // wait until the watch is in place before the owner leaves
    syzygy_test_utils::iter_check!(5000, {
        if let Some(rec) = srv.broker().component_record(watcher) {
            if !rec.release_tags.is_empty() {
                return;
            }
        }
    });

    srv.submit(owner, BrokerRequest::ComponentExited).unwrap();

    assert_eq!(
        (
            watcher,
            BrokerReply::Released {
                tag: MatchTag(9),
                service_name: "SZG_SOUND".into(),
            }
        ),
        r.recv_timeout(TIMEOUT).unwrap()
    );
    assert!(!srv.broker().check_service("SZG_SOUND"));
}

#[test]
fn service_info_round_trip() {
    let (srv, r) = srv();
    let owner = ComponentId(1);

    srv.submit(owner, register("svc")).unwrap();
    r.recv_timeout(TIMEOUT).unwrap();

    srv.submit(
        ComponentId(9),
        BrokerRequest::SetServiceInfo {
            tag: MatchTag(3),
            service_name: "svc".into(),
            info: "stolen".into(),
        },
    )
    .unwrap();
    match r.recv_timeout(TIMEOUT).unwrap() {
        (_, BrokerReply::InfoSet { result, .. }) => {
            assert!(matches!(result, Err(BrokerError::NotOwner { .. })))
        }
        oth => panic!("unexpected {oth:?}"),
    }

    srv.submit(
        owner,
        BrokerRequest::SetServiceInfo {
            tag: MatchTag(4),
            service_name: "svc".into(),
            info: "48kHz".into(),
        },
    )
    .unwrap();
    r.recv_timeout(TIMEOUT).unwrap();

    srv.submit(
        ComponentId(9),
        BrokerRequest::GetServiceInfo {
            tag: MatchTag(5),
            service_name: "svc".into(),
        },
    )
    .unwrap();
    assert_eq!(
        (
            ComponentId(9),
            BrokerReply::ServiceInfo {
                tag: MatchTag(5),
                service_name: "svc".into(),
                info: "48kHz".into(),
            }
        ),
        r.recv_timeout(TIMEOUT).unwrap()
    );
}

#[test]
fn submit_after_shutdown_fails() {
    let (mut srv, _r) = srv();
    srv.shutdown().unwrap();
    assert!(srv
        .submit(ComponentId(1), BrokerRequest::ComponentExited)
        .is_err());
}
