//! The driver task behind every datagram socket.
//!
//! Each socket spawns one driver on its runtime. The driver owns the send and
//! receive queues, performs all socket I/O, fires completion signals, and is
//! the only task that awaits on the native sockets. Handles talk to it over
//! an unbounded command channel; anything that must take effect immediately
//! (close, the close-after latches) is written to the shared state first and
//! the command only wakes the driver.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket as TokioUdpSocket;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::time::Instant;

use aerogram_core::{Signal, ThreadAffinity};

use crate::error::{AerogramError, Result};
use crate::udp::config::{Datagram, Tag};
use crate::udp::pair::{IpVersion, SocketPair};
use crate::udp::queue::{OperationQueue, ReceiveRequest, SendRequest};
use crate::udp::socket::Inner;
use crate::udp::state::UdpSocketState;

/// Messages a socket handle sends to its driver.
pub(crate) enum Command {
    Send(SendRequest),
    Receive(ReceiveRequest),
    /// Shared state changed outside the command path; re-snapshot it.
    Wake,
    Close,
    Migrate(Handle),
}

/// Everything the driver shares with the socket handles.
pub(crate) struct DriverContext {
    pub inner: Arc<Mutex<Inner>>,
    pub command_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
    pub is_running: Arc<AtomicBool>,
    /// Set by whichever side emits `closed` first; the other side skips it.
    pub closed_emitted: Arc<AtomicBool>,
    pub datagram_sent: Arc<Signal<Tag>>,
    pub send_failed: Arc<Signal<(Tag, AerogramError)>>,
    pub datagram_received: Arc<Signal<(Datagram, Tag)>>,
    pub receive_failed: Arc<Signal<(Tag, AerogramError)>>,
    pub closed: Arc<Signal<()>>,
}

/// Spawn a fresh driver on the given runtime.
pub(crate) fn spawn_driver(
    handle: &Handle,
    ctx: DriverContext,
    rx: mpsc::UnboundedReceiver<Command>,
) {
    let receive_buffer_size = ctx.inner.lock().max_receive_buffer_size;
    handle.spawn(driver_future(
        ctx,
        rx,
        OperationQueue::new(),
        OperationQueue::new(),
        receive_buffer_size,
    ));
}

/// The driver loop as an erased future.
///
/// Boxed so the migration path can respawn the driver on another runtime
/// without producing a recursive future type.
fn driver_future(
    ctx: DriverContext,
    rx: mpsc::UnboundedReceiver<Command>,
    sends: OperationQueue<SendRequest>,
    receives: OperationQueue<ReceiveRequest>,
    receive_buffer_size: usize,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(drive(ctx, rx, sends, receives, receive_buffer_size))
}

async fn drive(
    ctx: DriverContext,
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut sends: OperationQueue<SendRequest>,
    mut receives: OperationQueue<ReceiveRequest>,
    mut receive_buffer_size: usize,
) {
    // Multi-thread runtimes move tasks between workers at await points; the
    // affinity check is only meaningful on a current-thread runtime.
    let affinity = (Handle::current().runtime_flavor() == RuntimeFlavor::CurrentThread)
        .then(ThreadAffinity::current);
    tracing::debug!(target: "aerogram::udp", "datagram driver started");

    let mut stashed: Option<Command> = None;
    loop {
        if let Some(affinity) = &affinity {
            affinity.debug_assert_same_thread_with_msg("udp driver polled off its runtime thread");
        }

        // Ingest every command already submitted before evaluating state, so
        // a close-after latch never races an operation accepted before it.
        loop {
            let command = match stashed.take() {
                Some(command) => command,
                None => match rx.try_recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };
            match command {
                Command::Send(request) => sends.enqueue(request),
                Command::Receive(request) => receives.enqueue(request),
                Command::Wake => {}
                Command::Close => {
                    finish_close(&ctx, &mut sends, &mut receives);
                    return;
                }
                Command::Migrate(new_handle) => {
                    match prepare_migration(&ctx, &new_handle) {
                        Ok(()) => {
                            tracing::info!(target: "aerogram::udp", "migrated to new runtime");
                            new_handle.spawn(driver_future(
                                ctx,
                                rx,
                                sends,
                                receives,
                                receive_buffer_size,
                            ));
                        }
                        Err(e) => {
                            tracing::error!(
                                target: "aerogram::udp",
                                error = %e,
                                "runtime migration failed; closing socket"
                            );
                            finish_close(&ctx, &mut sends, &mut receives);
                        }
                    }
                    return;
                }
            }
        }

        let (state, close_after_sends, close_after_receives) = {
            let inner = ctx.inner.lock();
            (inner.state, inner.close_after_sends, inner.close_after_receives)
        };
        if state == UdpSocketState::Closed {
            finish_close(&ctx, &mut sends, &mut receives);
            return;
        }
        if (close_after_sends || close_after_receives)
            && (!close_after_sends || sends.is_idle())
            && (!close_after_receives || receives.is_idle())
        {
            tracing::debug!(target: "aerogram::udp", "deferred close complete");
            finish_close(&ctx, &mut sends, &mut receives);
            return;
        }

        // Overdue operations are failed before any new work is picked up,
        // even while the select below has a branch continuously ready. A
        // fired timeout can satisfy a close-after latch, so re-evaluate.
        if expire(&ctx, &mut sends, &mut receives) {
            continue;
        }

        sends.promote();
        // The receive buffer size is sampled when an operation becomes
        // current; later changes apply from the next promotion on.
        if receives.current().is_none() && receives.promote() {
            receive_buffer_size = ctx.inner.lock().max_receive_buffer_size;
        }

        // Resolve the socket the current send needs. A missing socket fails
        // the operation now instead of stalling the queue behind it.
        let current_send: Option<(Option<SocketAddr>, Bytes)> = sends
            .current()
            .map(|request| (request.target, request.payload.clone()));
        let send_ready = match current_send {
            None => None,
            Some((target, payload)) => {
                let lookup = {
                    let inner = ctx.inner.lock();
                    match target {
                        Some(addr) => inner
                            .sockets
                            .for_target(&addr)
                            .ok_or_else(|| IpVersion::of(&addr).unavailable()),
                        None => match inner.pin {
                            Some(version) => inner
                                .sockets
                                .get(version)
                                .cloned()
                                .ok_or_else(|| version.unavailable()),
                            None => Err(AerogramError::NotConnected),
                        },
                    }
                };
                match lookup {
                    Ok(socket) => Some((socket, target, payload)),
                    Err(e) => {
                        if let Some(request) = sends.take_current() {
                            ctx.send_failed.emit((request.tag, e));
                        }
                        continue;
                    }
                }
            }
        };

        let recv_active = receives.current().is_some();
        let (v4_sock, v6_sock) = if recv_active {
            let inner = ctx.inner.lock();
            (inner.sockets.v4.clone(), inner.sockets.v6.clone())
        } else {
            (None, None)
        };

        let next_deadline = match (sends.deadline(), receives.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        // Branches are polled in random order; a send backlog against an
        // always-writable socket cannot starve a ready receive, and commands
        // are drained at the top of every iteration regardless.
        tokio::select! {
            command = rx.recv() => match command {
                Some(command) => stashed = Some(command),
                None => return,
            },

            result = async {
                let (socket, target, payload) = send_ready.as_ref().unwrap();
                send_when_writable(socket, *target, payload).await
            }, if send_ready.is_some() => {
                let Some(request) = sends.take_current() else { continue };
                match result {
                    Ok(sent) if sent == request.payload.len() => {
                        let (socket, _, _) = send_ready.as_ref().unwrap();
                        let mut inner = ctx.inner.lock();
                        if inner.local_addr.is_none() {
                            inner.local_addr = socket.local_addr().ok();
                        }
                        drop(inner);
                        tracing::trace!(
                            target: "aerogram::udp",
                            tag = request.tag,
                            bytes = sent,
                            queued_ms = request.queued_at.elapsed().as_millis() as u64,
                            "datagram sent"
                        );
                        ctx.datagram_sent.emit(request.tag);
                    }
                    Ok(sent) => {
                        ctx.send_failed.emit((
                            request.tag,
                            AerogramError::Io(format!(
                                "partial send of {sent} of {} bytes",
                                request.payload.len()
                            )),
                        ));
                    }
                    Err(e) => {
                        ctx.send_failed.emit((request.tag, e.into()));
                    }
                }
            },

            ready = async { v4_sock.as_ref().unwrap().readable().await },
                if recv_active && v4_sock.is_some() =>
            {
                receive_on(
                    v4_sock.as_ref().unwrap(),
                    receive_buffer_size,
                    &ctx,
                    &mut receives,
                    ready,
                );
            },

            ready = async { v6_sock.as_ref().unwrap().readable().await },
                if recv_active && v6_sock.is_some() =>
            {
                receive_on(
                    v6_sock.as_ref().unwrap(),
                    receive_buffer_size,
                    &ctx,
                    &mut receives,
                    ready,
                );
            },

            // Waking is enough; the overdue operation is failed at the top
            // of the next iteration.
            _ = async { tokio::time::sleep_until(next_deadline.unwrap()).await },
                if next_deadline.is_some() => {},
        }
    }
}

/// Send the payload once the socket reports writable, retrying on a spurious
/// readiness wakeup.
async fn send_when_writable(
    socket: &TokioUdpSocket,
    target: Option<SocketAddr>,
    payload: &Bytes,
) -> std::io::Result<usize> {
    loop {
        socket.writable().await?;
        let attempt = match target {
            Some(addr) => socket.try_send_to(payload, addr),
            None => socket.try_send(payload),
        };
        match attempt {
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            other => return other,
        }
    }
}

/// Read one datagram off a readable socket and route it to the current
/// receive operation.
fn receive_on(
    socket: &TokioUdpSocket,
    buffer_size: usize,
    ctx: &DriverContext,
    receives: &mut OperationQueue<ReceiveRequest>,
    readiness: std::io::Result<()>,
) {
    if let Err(e) = readiness {
        if let Some(request) = receives.take_current() {
            ctx.receive_failed.emit((request.tag, e.into()));
        }
        return;
    }
    let mut buffer = vec![0u8; buffer_size];
    match socket.try_recv_from(&mut buffer) {
        Ok((len, source)) => {
            buffer.truncate(len);
            deliver(ctx, receives, Datagram::new(buffer, source));
        }
        // Another readiness pass will retry.
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        Err(e) => {
            if let Some(request) = receives.take_current() {
                ctx.receive_failed.emit((request.tag, e.into()));
            }
        }
    }
}

/// Hand a datagram to the current receive operation, or drop it if the
/// connected-peer check or the receive filter rejects it. A rejected datagram
/// leaves the operation current with its deadline untouched.
fn deliver(
    ctx: &DriverContext,
    receives: &mut OperationQueue<ReceiveRequest>,
    datagram: Datagram,
) {
    let Some(current) = receives.current() else {
        return;
    };
    let tag = current.tag;
    let (peer, filter) = {
        let inner = ctx.inner.lock();
        (inner.peer_addr, inner.receive_filter.clone())
    };
    if let Some(peer) = peer
        && datagram.source != peer
    {
        tracing::trace!(
            target: "aerogram::udp",
            source = %datagram.source,
            "dropping datagram from foreign peer"
        );
        return;
    }
    if let Some(filter) = filter
        && !filter(&datagram, tag)
    {
        tracing::trace!(target: "aerogram::udp", tag, "datagram rejected by receive filter");
        return;
    }
    let Some(request) = receives.take_current() else {
        return;
    };
    tracing::trace!(
        target: "aerogram::udp",
        tag = request.tag,
        bytes = datagram.data.len(),
        source = %datagram.source,
        "datagram received"
    );
    ctx.datagram_received.emit((datagram, request.tag));
}

/// Fail whichever current operations have passed their deadline.
///
/// Returns `true` if any operation was failed.
fn expire(
    ctx: &DriverContext,
    sends: &mut OperationQueue<SendRequest>,
    receives: &mut OperationQueue<ReceiveRequest>,
) -> bool {
    let now = Instant::now();
    let mut fired = false;
    if let Some(deadline) = sends.deadline()
        && deadline <= now
        && let Some(request) = sends.take_current()
    {
        tracing::debug!(target: "aerogram::udp", tag = request.tag, "send timed out");
        ctx.send_failed.emit((request.tag, AerogramError::SendTimeout));
        fired = true;
    }
    if let Some(deadline) = receives.deadline()
        && deadline <= now
        && let Some(request) = receives.take_current()
    {
        tracing::debug!(target: "aerogram::udp", tag = request.tag, "receive timed out");
        ctx.receive_failed.emit((request.tag, AerogramError::ReceiveTimeout));
        fired = true;
    }
    fired
}

/// Deregister the sockets from this runtime and register them on the new
/// one. Queued operations and armed deadlines carry over untouched.
fn prepare_migration(ctx: &DriverContext, new_handle: &Handle) -> Result<()> {
    let mut inner = ctx.inner.lock();
    let detached = inner.sockets.detach(&Handle::current())?;
    inner.sockets = SocketPair::attach_detached(detached, new_handle)?;
    inner.runtime = Some(new_handle.clone());
    Ok(())
}

/// Discard everything still queued, tear the sockets down, and fire `closed`.
fn finish_close(
    ctx: &DriverContext,
    sends: &mut OperationQueue<SendRequest>,
    receives: &mut OperationQueue<ReceiveRequest>,
) {
    let discarded_sends = sends.clear();
    let discarded_receives = receives.clear();
    if discarded_sends + discarded_receives > 0 {
        tracing::debug!(
            target: "aerogram::udp",
            discarded_sends,
            discarded_receives,
            "discarding queued operations on close"
        );
    }
    {
        let mut inner = ctx.inner.lock();
        inner.state = UdpSocketState::Closed;
        inner.sockets.teardown();
    }
    *ctx.command_tx.lock() = None;
    ctx.is_running.store(false, Ordering::SeqCst);
    tracing::debug!(target: "aerogram::udp", "datagram driver stopped");
    // A concurrent close() on the handle may have emitted already.
    if !ctx.closed_emitted.swap(true, Ordering::SeqCst) {
        ctx.closed.emit(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::udp::{UdpSocket, UdpSocketConfig};

    fn context() -> (UdpSocket, DriverContext) {
        let socket = UdpSocket::new(UdpSocketConfig::new());
        let ctx = socket.driver_context();
        (socket, ctx)
    }

    fn send(tag: Tag, timeout: Option<Duration>) -> SendRequest {
        SendRequest {
            payload: Bytes::from_static(b"payload"),
            target: Some("127.0.0.1:4000".parse().unwrap()),
            timeout,
            tag,
            queued_at: Instant::now(),
        }
    }

    #[test]
    fn test_expire_fails_timed_out_send() {
        let (socket, ctx) = context();
        let failures: Arc<Mutex<Vec<(Tag, AerogramError)>>> = Arc::new(Mutex::new(Vec::new()));
        let failures_clone = failures.clone();
        socket.send_failed.connect(move |failure| {
            failures_clone.lock().push(failure.clone());
        });

        let mut sends = OperationQueue::new();
        let mut receives: OperationQueue<ReceiveRequest> = OperationQueue::new();
        sends.enqueue(send(42, Some(Duration::from_millis(5))));
        sends.promote();
        std::thread::sleep(Duration::from_millis(30));

        assert!(expire(&ctx, &mut sends, &mut receives));
        {
            let failures = failures.lock();
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, 42);
            assert!(matches!(failures[0].1, AerogramError::SendTimeout));
        }
        assert!(sends.is_idle());

        // The operation is gone; a second pass has nothing left to fail.
        assert!(!expire(&ctx, &mut sends, &mut receives));
        assert_eq!(failures.lock().len(), 1);
    }

    #[test]
    fn test_expire_spares_unexpired_and_infinite_operations() {
        let (socket, ctx) = context();
        let send_failures = Arc::new(AtomicUsize::new(0));
        let send_failures_clone = send_failures.clone();
        socket.send_failed.connect(move |_| {
            send_failures_clone.fetch_add(1, Ordering::SeqCst);
        });
        let receive_failures = Arc::new(AtomicUsize::new(0));
        let receive_failures_clone = receive_failures.clone();
        socket.receive_failed.connect(move |_| {
            receive_failures_clone.fetch_add(1, Ordering::SeqCst);
        });

        let mut sends = OperationQueue::new();
        let mut receives = OperationQueue::new();
        sends.enqueue(send(1, Some(Duration::from_secs(3600))));
        receives.enqueue(ReceiveRequest { timeout: None, tag: 2 });
        sends.promote();
        receives.promote();

        assert!(!expire(&ctx, &mut sends, &mut receives));
        assert_eq!(send_failures.load(Ordering::SeqCst), 0);
        assert_eq!(receive_failures.load(Ordering::SeqCst), 0);
        assert!(sends.current().is_some());
        assert!(receives.current().is_some());
    }
}
