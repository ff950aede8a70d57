/// Socket Monitoring Example
///
/// Prints the lifecycle events of a PUSH socket that connects before its
/// PULL peer exists, then reconnects once the peer binds.
use std::thread;
use std::time::Duration;
use tappet::zmq::prelude::*;

fn main() -> Result<()> {
    tappet::dev_tracing::init_tracing();
    let ctx = Context::new()?;

    // Reserve a port, then release it so the first connect fails
    let port = {
        let mut target = ctx.socket(SocketType::Pull);
        target.bind_random_port("127.0.0.1")?
    };
    let endpoint = format!("tcp://127.0.0.1:{port}");

    let mut push = ctx.socket(SocketType::Push);
    push.set_options(SocketOptions::new().with_reconnect_ivl(Duration::from_millis(200)))?;
    let events = push.monitor();
    let printer = thread::spawn(move || {
        while let Ok(event) = events.recv_timeout(Duration::from_secs(2)) {
            println!("event: {event}");
        }
    });

    push.connect(&endpoint)?;
    push.send("queued while disconnected")?;
    thread::sleep(Duration::from_millis(500));

    let mut pull = ctx.socket(SocketType::Pull);
    pull.bind(&endpoint)?;
    let msg = pull.recv_timeout(Duration::from_secs(5))?;
    println!("received: {}", msg.parse_frame_str(0)?);

    drop(push);
    let _ = printer.join();
    Ok(())
}
