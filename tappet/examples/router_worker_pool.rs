/// ROUTER Worker Pool Example
///
/// A ROUTER broker hands tasks to DEALER workers on demand.
///
/// Architecture:
/// - ROUTER binds an ephemeral TCP port
/// - Each worker announces itself with "ready" and asks again after each task
/// - The broker answers every request with the next task, or "done"
use std::thread;
use tappet::zmq::prelude::*;
use tracing::info;

const WORKERS: usize = 3;
const TASKS: usize = 12;

fn worker(ctx: Context, endpoint: String, id: usize) -> Result<usize> {
    let mut dealer = ctx.socket(SocketType::Dealer);
    dealer.set_options(SocketOptions::new().with_routing_id(format!("worker-{id}")))?;
    dealer.connect(&endpoint)?;

    let mut completed = 0;
    dealer.send("ready")?;
    loop {
        let task = dealer.recv()?;
        let body = task.parse_frame_str(0)?;
        if body == "done" {
            return Ok(completed);
        }
        info!("worker-{id} handling {body}");
        completed += 1;
        dealer.send(Message::new().push_str("result").push_str(body))?;
    }
}

fn main() -> Result<()> {
    tappet::dev_tracing::init_tracing();
    let ctx = Context::new()?;
    let mut broker = ctx.socket(SocketType::Router);
    let endpoint = broker.bind("tcp://127.0.0.1:*")?;
    info!("Broker listening on {endpoint}");

    let handles: Vec<_> = (0..WORKERS)
        .map(|id| {
            let ctx = ctx.clone();
            let endpoint = endpoint.clone();
            thread::spawn(move || worker(ctx, endpoint, id))
        })
        .collect();

    let mut sent = 0;
    let mut finished = 0;
    while finished < WORKERS {
        let request = broker.recv()?;
        let Some(identity) = request.first().cloned() else {
            continue;
        };
        let reply = if sent < TASKS {
            sent += 1;
            format!("task #{sent}")
        } else {
            finished += 1;
            "done".to_string()
        };
        broker.send(Message::new().push(identity).push_str(&reply))?;
    }

    for (id, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(count)) => info!("worker-{id} completed {count} tasks"),
            Ok(Err(e)) => info!("worker-{id} failed: {e}"),
            Err(_) => info!("worker-{id} panicked"),
        }
    }
    Ok(())
}
