//! In-process transport.

use std::thread;
use std::time::Duration;
use tappet::zmq::prelude::*;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn pair_exchange() {
    tappet::dev_tracing::init_tracing();
    let ctx = Context::new().unwrap();
    let mut a = ctx.socket(SocketType::Pair);
    let mut b = ctx.socket(SocketType::Pair);
    a.bind("inproc://pair").unwrap();
    b.connect("inproc://pair").unwrap();

    b.send(Message::new().push_str("x").push_empty().push_str("z"))
        .unwrap();
    assert_eq!(
        a.recv_timeout(TIMEOUT).unwrap(),
        Message::new().push_str("x").push_empty().push_str("z")
    );
    a.send("back").unwrap();
    assert_eq!(b.recv_timeout(TIMEOUT).unwrap(), Message::from("back"));
}

#[test]
fn connect_requires_a_binding() {
    let ctx = Context::new().unwrap();
    let mut push = ctx.socket(SocketType::Push);
    assert!(matches!(
        push.connect("inproc://nobody-home"),
        Err(TappetError::EndpointNotFound(_))
    ));
}

#[test]
fn incompatible_types_are_refused() {
    let ctx = Context::new().unwrap();
    let mut push = ctx.socket(SocketType::Push);
    push.bind("inproc://typed").unwrap();

    let mut publisher = ctx.socket(SocketType::Pub);
    assert!(matches!(
        publisher.connect("inproc://typed"),
        Err(TappetError::IncompatibleSocket { .. })
    ));
}

#[test]
fn fan_in_from_threads() {
    let ctx = Context::new().unwrap();
    let mut pull = ctx.socket(SocketType::Pull);
    pull.bind("inproc://fan-in").unwrap();

    let producers: Vec<_> = (0..4u8)
        .map(|worker| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                let mut push = ctx.socket(SocketType::Push);
                push.connect("inproc://fan-in").unwrap();
                for i in 0..50u8 {
                    push.send(vec![worker, i]).unwrap();
                }
            })
        })
        .collect();

    let mut next = [0u8; 4];
    for _ in 0..200 {
        let msg = pull.recv_timeout(TIMEOUT).unwrap();
        let frame = msg.first().unwrap();
        let worker = usize::from(frame[0]);
        assert_eq!(frame[1], next[worker], "worker {worker} out of order");
        next[worker] += 1;
    }
    for producer in producers {
        producer.join().unwrap();
    }
}

#[test]
fn routing_id_reaches_router() {
    let ctx = Context::new().unwrap();
    let mut router = ctx.socket(SocketType::Router);
    router.bind("inproc://router").unwrap();

    let mut dealer = ctx.socket(SocketType::Dealer);
    dealer
        .set_options(SocketOptions::new().with_routing_id("worker-1"))
        .unwrap();
    dealer.connect("inproc://router").unwrap();
    dealer.send("ready").unwrap();

    let msg = router.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(msg, Message::new().push_str("worker-1").push_str("ready"));

    router
        .send(Message::new().push_str("worker-1").push_str("task"))
        .unwrap();
    assert_eq!(dealer.recv_timeout(TIMEOUT).unwrap(), Message::from("task"));
}

#[test]
fn capacity_is_sum_of_both_hwms() {
    let ctx = Context::new().unwrap();
    let mut pull = ctx.socket(SocketType::Pull);
    pull.set_options(SocketOptions::new().with_recv_hwm(3))
        .unwrap();
    pull.bind("inproc://hwm-sum").unwrap();

    let mut push = ctx.socket(SocketType::Push);
    push.set_options(SocketOptions::new().with_send_hwm(2))
        .unwrap();
    push.connect("inproc://hwm-sum").unwrap();

    for i in 0..5 {
        push.try_send(format!("{i}").as_str()).unwrap();
    }
    assert!(matches!(push.try_send("6"), Err(TappetError::WouldBlock)));
}

#[test]
fn name_is_free_after_unbind() {
    let ctx = Context::new().unwrap();
    let mut first = ctx.socket(SocketType::Pull);
    first.bind("inproc://reused").unwrap();

    let mut second = ctx.socket(SocketType::Pull);
    assert!(matches!(
        second.bind("inproc://reused"),
        Err(TappetError::AddrInUse(_))
    ));

    first.unbind("inproc://reused").unwrap();
    second.bind("inproc://reused").unwrap();
    assert_eq!(ctx.inproc_endpoints(), vec!["reused".to_string()]);
}
