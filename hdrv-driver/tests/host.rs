use std::sync::mpsc;
use std::time::Duration;

use hdrv_common::{encode_args, encode_connect, read_response, CallCommand, ErrorTag, LinkState, RespValue};
use hdrv_driver::{Driver, DriverConfig, MioHost, Notification, Token};
use hdrv_testkit::FakeRedis;

const LIMIT: Duration = Duration::from_secs(2);

fn call<N: hdrv_driver::NotificationSink>(
    host: &mut MioHost<N>,
    port: Token,
    command: CallCommand,
    payload: &[u8],
) -> Result<Vec<u8>, (ErrorTag, String)> {
    let mut output = vec![0u8; 4096];
    let len = host
        .call(port, command.as_u8() as u32, payload, &mut output)
        .expect("call accepted");
    match read_response(&output[..len]).expect("valid frame").body {
        Ok(body) => Ok(body.to_vec()),
        Err((tag, detail)) => Err((tag, detail.to_string())),
    }
}

fn connect<N: hdrv_driver::NotificationSink>(host: &mut MioHost<N>, port: Token, server: &FakeRedis) {
    let mut payload = Vec::new();
    encode_connect(0, &server.addr().to_string(), &mut payload);
    call(host, port, CallCommand::Connect, &payload).expect("connect accepted");
    let opened = host
        .run_until(LIMIT, |h| h.port(port).map(|p| p.state()) == Some(LinkState::Open))
        .unwrap();
    assert!(opened, "connection did not open");
}

fn append<N: hdrv_driver::NotificationSink>(host: &mut MioHost<N>, port: Token, args: &[&[u8]]) {
    let mut payload = Vec::new();
    encode_args(args, &mut payload);
    call(host, port, CallCommand::Append, &payload).expect("append accepted");
}

#[test]
fn round_trip_through_mio() {
    let server = FakeRedis::start().expect("server");
    let mut host: MioHost<Vec<Notification>> = MioHost::new(Driver::init(DriverConfig::default())).unwrap();
    let port = host.open(Vec::new()).unwrap();
    connect(&mut host, port, &server);

    append(&mut host, port, &[b"SET", b"greeting", b"hello"]);
    append(&mut host, port, &[b"GET", b"greeting"]);
    let done = host
        .run_until(LIMIT, |h| h.port(port).map_or(true, |p| p.handle().pending() == 0))
        .unwrap();
    assert!(done);

    assert_eq!(
        host.port(port).unwrap().sink().as_slice(),
        &[
            Notification::Opened,
            Notification::Reply(RespValue::Simple(b"OK".to_vec())),
            Notification::Reply(RespValue::Bulk(Some(b"hello".to_vec()))),
        ]
    );
    assert_eq!(server.commands().len(), 2);
}

#[test]
fn ports_are_independent() {
    let server = FakeRedis::start().expect("server");
    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();
    let mut host = MioHost::new(Driver::init(DriverConfig::default())).unwrap();
    let a = host.open(tx_a).unwrap();
    let b = host.open(tx_b).unwrap();
    assert_eq!(host.len(), 2);

    connect(&mut host, a, &server);
    connect(&mut host, b, &server);
    append(&mut host, a, &[b"ECHO", b"from-a"]);
    append(&mut host, b, &[b"DEBUG", b"GARBLE"]);
    host.run_until(LIMIT, |h| {
        let a_done = h.port(a).map_or(true, |p| p.handle().pending() == 0);
        let b_done = h.port(b).map_or(true, |p| p.state() == LinkState::Closed);
        a_done && b_done
    })
    .unwrap();

    let a_notes: Vec<Notification> = rx_a.try_iter().collect();
    let b_notes: Vec<Notification> = rx_b.try_iter().collect();
    assert_eq!(
        a_notes,
        vec![
            Notification::Opened,
            Notification::Reply(RespValue::Bulk(Some(b"from-a".to_vec())))
        ]
    );
    assert_eq!(b_notes.len(), 2);
    assert!(matches!(b_notes[1], Notification::Error { tag: ErrorTag::Protocol, .. }));
    assert_eq!(host.port(a).unwrap().state(), LinkState::Open);
}

#[test]
fn reply_timer_fires_through_host() {
    let server = FakeRedis::start().expect("server");
    let config = DriverConfig {
        reply_timeout_ms: Some(50),
        ..DriverConfig::default()
    };
    let mut host: MioHost<Vec<Notification>> = MioHost::new(Driver::init(config)).unwrap();
    let port = host.open(Vec::new()).unwrap();
    connect(&mut host, port, &server);

    append(&mut host, port, &[b"DEBUG", b"HANG"]);
    assert!(host.next_deadline().is_some());
    let closed = host
        .run_until(LIMIT, |h| h.port(port).map(|p| p.state()) == Some(LinkState::Closed))
        .unwrap();
    assert!(closed);

    let sink = host.port(port).unwrap().sink();
    assert_eq!(sink.len(), 2);
    assert_eq!(sink[1], Notification::error(ErrorTag::Timeout, "reply deadline elapsed"));
    assert!(host.next_deadline().is_none());
}

#[test]
fn close_and_remove() {
    let server = FakeRedis::start().expect("server");
    let (tx, rx) = mpsc::channel();
    let mut host = MioHost::new(Driver::init(DriverConfig::default())).unwrap();
    let port = host.open(tx).unwrap();
    connect(&mut host, port, &server);

    host.close(port);
    assert!(host.is_empty());
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![Notification::Opened, Notification::Closed]);

    let mut output = [0u8; 16];
    assert!(host.call(port, CallCommand::Status.as_u8() as u32, &[], &mut output).is_err());
}
