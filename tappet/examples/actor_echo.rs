/// Actor Example
///
/// Runs an echo service on a background thread and talks to it over the
/// actor's PAIR pipe. Dropping the actor stops the thread.
use std::time::Duration;
use tappet::zmq::prelude::*;
use tappet::zmq::is_end_message;

fn main() -> Result<()> {
    tappet::dev_tracing::init_tracing();
    let ctx = Context::new()?;

    let mut actor = Actor::spawn(&ctx, |mut shim| {
        if shim.signal_ok().is_err() {
            return;
        }
        while let Ok(msg) = shim.recv() {
            if is_end_message(&msg) {
                println!("actor: shutting down");
                return;
            }
            let _ = shim.send(msg);
        }
    })?;

    for word in ["Hello", "from", "the", "creator"] {
        actor.send(word)?;
        let echo = actor.recv_timeout(Duration::from_secs(1))?;
        println!("echo: {}", echo.parse_frame_str(0)?);
    }
    Ok(())
}
