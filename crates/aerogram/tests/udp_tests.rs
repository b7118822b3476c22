//! Datagram socket integration tests over loopback.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use aerogram::AerogramError;
use aerogram::udp::{UdpSocket, UdpSocketConfig};

/// Poll `cond` until it holds or `timeout_ms` elapses.
async fn wait_until(timeout_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn loopback_target(socket: &UdpSocket) -> SocketAddr {
    let port = socket.local_addr().expect("socket should be bound").port();
    SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
}

type ReceivedLog = Arc<Mutex<Vec<(Vec<u8>, SocketAddr, i64)>>>;

fn capture_received(socket: &UdpSocket) -> ReceivedLog {
    let log: ReceivedLog = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();
    socket.datagram_received.connect(move |(datagram, tag)| {
        log_clone
            .lock()
            .push((datagram.data.clone(), datagram.source, *tag));
    });
    log
}

fn capture_count(signal: &aerogram_core::Signal<i64>) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    signal.connect(move |_| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[tokio::test]
async fn test_bind_assigns_local_addr() {
    let socket = UdpSocket::new(UdpSocketConfig::new());
    socket.bind(0).expect("bind should succeed");

    let local = socket.local_addr().expect("bound socket has a local addr");
    assert_ne!(local.port(), 0);
    assert!(local.is_ipv4(), "dual bind reports the IPv4 address");
}

#[tokio::test]
async fn test_bind_twice_rejected() {
    let socket = UdpSocket::new(UdpSocketConfig::new());
    socket.bind(0).unwrap();
    assert!(matches!(
        socket.bind(0),
        Err(AerogramError::AlreadyBound)
    ));
}

#[tokio::test]
async fn test_send_and_receive_over_loopback() {
    let receiver = UdpSocket::new(UdpSocketConfig::new());
    receiver.bind(0).unwrap();
    let received = capture_received(&receiver);
    receiver.receive(None, 7).unwrap();

    let sender = UdpSocket::new(UdpSocketConfig::new());
    let sent = capture_count(&sender.datagram_sent);
    sender
        .send_to_addr(b"hello aerogram".to_vec(), loopback_target(&receiver), None, 3)
        .unwrap();

    assert!(wait_until(2000, || sent.load(Ordering::SeqCst) == 1).await);
    assert!(wait_until(2000, || !received.lock().is_empty()).await);

    let log = received.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, b"hello aerogram");
    assert_eq!(log[0].2, 7);
}

#[tokio::test]
async fn test_receive_timeout_fires() {
    let socket = UdpSocket::new(UdpSocketConfig::new());
    socket.bind(0).unwrap();

    let failures: Arc<Mutex<Vec<(i64, AerogramError)>>> = Arc::new(Mutex::new(Vec::new()));
    let failures_clone = failures.clone();
    socket.receive_failed.connect(move |(tag, error)| {
        failures_clone.lock().push((*tag, error.clone()));
    });

    socket.receive(Some(Duration::from_millis(100)), 9).unwrap();

    assert!(wait_until(2000, || !failures.lock().is_empty()).await);
    let log = failures.lock();
    assert_eq!(log[0].0, 9);
    assert!(matches!(log[0].1, AerogramError::ReceiveTimeout));
}

#[tokio::test]
async fn test_receive_timeout_fires_while_sends_drain() {
    // A peer that never reads; its address just absorbs the send backlog.
    let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = peer.local_addr().unwrap();

    let socket = UdpSocket::new(UdpSocketConfig::new());
    socket.bind(0).unwrap();

    let sent = capture_count(&socket.datagram_sent);
    let timeouts = Arc::new(AtomicUsize::new(0));
    let sent_at_timeout = Arc::new(AtomicUsize::new(usize::MAX));
    {
        let sent = sent.clone();
        let timeouts = timeouts.clone();
        let sent_at_timeout = sent_at_timeout.clone();
        socket.receive_failed.connect(move |(_, error)| {
            if matches!(error, AerogramError::ReceiveTimeout) {
                sent_at_timeout.store(sent.load(Ordering::SeqCst), Ordering::SeqCst);
                timeouts.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    socket.receive(Some(Duration::from_millis(50)), 1).unwrap();
    // Enough queued sends to keep the driver busy well past the receive
    // deadline.
    const BACKLOG: usize = 100_000;
    for i in 0..BACKLOG {
        socket
            .send_to_addr(b"x".to_vec(), target, None, i as i64 + 2)
            .unwrap();
    }

    assert!(wait_until(5000, || timeouts.load(Ordering::SeqCst) == 1).await);
    // The timeout must fire while the backlog is still draining, not once
    // the send queue happens to empty.
    assert!(sent_at_timeout.load(Ordering::SeqCst) < BACKLOG);
    socket.close();
}

#[tokio::test]
async fn test_send_order_preserved_across_failures() {
    let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let client = UdpSocket::new(UdpSocketConfig::new());
    client.connect_to_addr(peer.local_addr().unwrap()).unwrap();

    // Merge successes and failures into one log to observe completion order.
    let outcomes: Arc<Mutex<Vec<(i64, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let outcomes_clone = outcomes.clone();
    client.datagram_sent.connect(move |tag| {
        outcomes_clone.lock().push((*tag, true));
    });
    let outcomes_clone = outcomes.clone();
    client.send_failed.connect(move |(tag, _)| {
        outcomes_clone.lock().push((*tag, false));
    });

    client.send(b"fits".to_vec(), None, 1).unwrap();
    // Larger than any UDP datagram; the OS rejects it at send time.
    client.send(vec![0u8; 70_000], None, 2).unwrap();
    client.send(b"also fits".to_vec(), None, 3).unwrap();

    assert!(wait_until(2000, || outcomes.lock().len() == 3).await);
    assert_eq!(
        *outcomes.lock(),
        vec![(1, true), (2, false), (3, true)],
        "completion order must match submission order across a failure"
    );
}

#[tokio::test]
async fn test_receive_completes_while_sends_drain() {
    // A peer that never reads; its address just absorbs the send backlog.
    let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = peer.local_addr().unwrap();

    let socket = UdpSocket::new(UdpSocketConfig::new());
    socket.bind(0).unwrap();
    let local = socket.local_addr().unwrap();

    let sent = capture_count(&socket.datagram_sent);
    let sent_at_delivery = Arc::new(AtomicUsize::new(usize::MAX));
    {
        let sent = sent.clone();
        let sent_at_delivery = sent_at_delivery.clone();
        socket.datagram_received.connect(move |_| {
            sent_at_delivery.store(sent.load(Ordering::SeqCst), Ordering::SeqCst);
        });
    }

    socket.receive(None, 1).unwrap();
    const BACKLOG: usize = 100_000;
    for i in 0..BACKLOG {
        socket
            .send_to_addr(b"x".to_vec(), target, None, i as i64 + 2)
            .unwrap();
    }

    let outsider = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    outsider.send_to(b"incoming", local).unwrap();

    assert!(wait_until(5000, || sent_at_delivery.load(Ordering::SeqCst) != usize::MAX).await);
    // The datagram must be delivered while the backlog is still draining,
    // not once the send queue happens to empty.
    assert!(sent_at_delivery.load(Ordering::SeqCst) < BACKLOG);
    socket.close();
}

#[tokio::test]
async fn test_receive_order_is_fifo() {
    let receiver = UdpSocket::new(UdpSocketConfig::new());
    receiver.bind(0).unwrap();
    let received = capture_received(&receiver);
    receiver.receive(None, 1).unwrap();
    receiver.receive(None, 2).unwrap();

    let sender = UdpSocket::new(UdpSocketConfig::new());
    let target = loopback_target(&receiver);
    sender.send_to_addr(b"first".to_vec(), target, None, 0).unwrap();
    assert!(wait_until(2000, || received.lock().len() == 1).await);
    sender.send_to_addr(b"second".to_vec(), target, None, 0).unwrap();
    assert!(wait_until(2000, || received.lock().len() == 2).await);

    let log = received.lock();
    assert_eq!((log[0].0.as_slice(), log[0].2), (b"first".as_slice(), 1));
    assert_eq!((log[1].0.as_slice(), log[1].2), (b"second".as_slice(), 2));
}

#[tokio::test]
async fn test_connected_send_and_reply() {
    let server = UdpSocket::new(UdpSocketConfig::new());
    server.bind(0).unwrap();
    let server_received = capture_received(&server);
    server.receive(None, 1).unwrap();

    let client = UdpSocket::new(UdpSocketConfig::new());
    let target = loopback_target(&server);
    client.connect_to_addr(target).unwrap();
    assert!(client.is_connected());
    assert_eq!(client.peer_addr(), Some(target));
    assert!(client.local_addr().is_some());
    let client_received = capture_received(&client);

    client.send(b"ping".to_vec(), None, 10).unwrap();
    assert!(wait_until(2000, || !server_received.lock().is_empty()).await);
    let client_addr = server_received.lock()[0].1;

    server
        .send_to_addr(b"pong".to_vec(), client_addr, None, 2)
        .unwrap();
    client.receive(None, 11).unwrap();

    assert!(wait_until(2000, || !client_received.lock().is_empty()).await);
    let log = client_received.lock();
    assert_eq!(log[0].0, b"pong");
    assert_eq!(log[0].1, target);
    assert_eq!(log[0].2, 11);
}

#[tokio::test]
async fn test_connected_socket_ignores_foreign_peers() {
    let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let client = UdpSocket::new(UdpSocketConfig::new());
    client.connect_to_addr(peer_addr).unwrap();
    let received = capture_received(&client);
    let failures = Arc::new(AtomicUsize::new(0));
    let failures_clone = failures.clone();
    client.receive_failed.connect(move |(_, error)| {
        if matches!(error, AerogramError::ReceiveTimeout) {
            failures_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    client.receive(Some(Duration::from_millis(300)), 5).unwrap();
    let client_addr = client.local_addr().unwrap();

    let foreign = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    foreign.send_to(b"intruder", client_addr).unwrap();

    assert!(wait_until(2000, || failures.load(Ordering::SeqCst) == 1).await);
    assert!(received.lock().is_empty());
}

#[tokio::test]
async fn test_send_to_rejected_when_connected() {
    let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let client = UdpSocket::new(UdpSocketConfig::new());
    client.connect_to_addr(peer.local_addr().unwrap()).unwrap();

    assert!(matches!(
        client.send_to_addr(b"x".to_vec(), "127.0.0.1:9".parse().unwrap(), None, 0),
        Err(AerogramError::AlreadyConnected)
    ));
}

#[tokio::test]
async fn test_family_mismatch_rejected() {
    let socket = UdpSocket::ipv4_only(UdpSocketConfig::new());
    assert!(matches!(
        socket.send_to_addr(b"x".to_vec(), "[::1]:9".parse().unwrap(), None, 0),
        Err(AerogramError::Ipv6Unavailable)
    ));

    let socket = UdpSocket::ipv6_only(UdpSocketConfig::new());
    assert!(matches!(
        socket.send_to_addr(b"x".to_vec(), "127.0.0.1:9".parse().unwrap(), None, 0),
        Err(AerogramError::Ipv4Unavailable)
    ));
}

#[tokio::test]
async fn test_receive_filter_drops_rejected_datagrams() {
    let receiver = UdpSocket::new(UdpSocketConfig::new());
    receiver.bind(0).unwrap();
    receiver.set_receive_filter(|datagram, _tag| datagram.data.as_slice() != b"drop".as_slice());
    let received = capture_received(&receiver);
    receiver.receive(None, 1).unwrap();

    let sender = UdpSocket::new(UdpSocketConfig::new());
    let sent = capture_count(&sender.datagram_sent);
    let target = loopback_target(&receiver);

    sender.send_to_addr(b"drop".to_vec(), target, None, 0).unwrap();
    assert!(wait_until(2000, || sent.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(received.lock().is_empty());

    sender.send_to_addr(b"keep".to_vec(), target, None, 0).unwrap();
    assert!(wait_until(2000, || !received.lock().is_empty()).await);
    let log = received.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, b"keep");
}

#[tokio::test]
async fn test_receive_buffer_caps_datagram() {
    let receiver = UdpSocket::new(UdpSocketConfig::new());
    receiver.bind(0).unwrap();
    receiver.set_max_receive_buffer_size(4);
    let received = capture_received(&receiver);
    receiver.receive(None, 1).unwrap();

    let sender = UdpSocket::new(UdpSocketConfig::new());
    sender
        .send_to_addr(b"0123456789".to_vec(), loopback_target(&receiver), None, 0)
        .unwrap();

    assert!(wait_until(2000, || !received.lock().is_empty()).await);
    assert_eq!(received.lock()[0].0, b"0123");
}

#[tokio::test]
async fn test_close_discards_pending_receive_silently() {
    let socket = UdpSocket::new(UdpSocketConfig::new());
    socket.bind(0).unwrap();

    let failures = Arc::new(AtomicUsize::new(0));
    let failures_clone = failures.clone();
    socket.receive_failed.connect(move |_| {
        failures_clone.fetch_add(1, Ordering::SeqCst);
    });
    let closed = Arc::new(AtomicUsize::new(0));
    let closed_clone = closed.clone();
    socket.closed.connect(move |_| {
        closed_clone.fetch_add(1, Ordering::SeqCst);
    });

    socket.receive(None, 1).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    socket.close();
    assert!(wait_until(2000, || closed.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(failures.load(Ordering::SeqCst), 0);

    assert!(socket.is_closed());
    assert!(matches!(
        socket.receive(None, 2),
        Err(AerogramError::Closed)
    ));
}

#[tokio::test]
async fn test_close_after_sending_drains_queue() {
    let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let client = UdpSocket::new(UdpSocketConfig::new());
    client.connect_to_addr(peer.local_addr().unwrap()).unwrap();

    let sent_tags: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let sent_clone = sent_tags.clone();
    client.datagram_sent.connect(move |tag| {
        sent_clone.lock().push(*tag);
    });
    let closed = Arc::new(AtomicUsize::new(0));
    let closed_clone = closed.clone();
    client.closed.connect(move |_| {
        closed_clone.fetch_add(1, Ordering::SeqCst);
    });

    client.send(b"one".to_vec(), None, 1).unwrap();
    client.send(b"two".to_vec(), None, 2).unwrap();
    client.send(b"three".to_vec(), None, 3).unwrap();
    client.close_after_sending();

    assert!(wait_until(2000, || closed.load(Ordering::SeqCst) == 1).await);
    assert_eq!(*sent_tags.lock(), vec![1, 2, 3]);
    assert!(matches!(
        client.send(b"late".to_vec(), None, 4),
        Err(AerogramError::SendsClosed | AerogramError::Closed)
    ));
}

#[tokio::test]
async fn test_close_after_both_directions_drains_everything() {
    let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let client = UdpSocket::new(UdpSocketConfig::new());
    client.connect_to_addr(peer.local_addr().unwrap()).unwrap();

    let sent = capture_count(&client.datagram_sent);
    let receive_timeouts = Arc::new(AtomicUsize::new(0));
    let receive_timeouts_clone = receive_timeouts.clone();
    client.receive_failed.connect(move |(_, error)| {
        if matches!(error, AerogramError::ReceiveTimeout) {
            receive_timeouts_clone.fetch_add(1, Ordering::SeqCst);
        }
    });
    // Snapshot how much had drained at the moment closed fired.
    let drained_at_close: Arc<Mutex<Option<(usize, usize)>>> = Arc::new(Mutex::new(None));
    {
        let sent = sent.clone();
        let receive_timeouts = receive_timeouts.clone();
        let drained_at_close = drained_at_close.clone();
        client.closed.connect(move |_| {
            *drained_at_close.lock() = Some((
                sent.load(Ordering::SeqCst),
                receive_timeouts.load(Ordering::SeqCst),
            ));
        });
    }

    client.send(b"one".to_vec(), None, 1).unwrap();
    client.send(b"two".to_vec(), None, 2).unwrap();
    client.receive(Some(Duration::from_millis(100)), 3).unwrap();
    client.close_after_sending_and_receiving();

    assert!(wait_until(2000, || drained_at_close.lock().is_some()).await);
    // Both sends and the timed-out receive reported before closed fired.
    assert_eq!(*drained_at_close.lock(), Some((2, 1)));
    assert!(matches!(
        client.send(b"late".to_vec(), None, 4),
        Err(AerogramError::SendsClosed | AerogramError::Closed)
    ));
    assert!(matches!(
        client.receive(None, 5),
        Err(AerogramError::ReceivesClosed | AerogramError::Closed)
    ));
}

#[tokio::test]
async fn test_set_broadcast() {
    let socket = UdpSocket::new(UdpSocketConfig::new());
    socket.set_broadcast(true).expect("broadcast opt-in");
    socket.set_broadcast(false).expect("broadcast opt-out");
}

#[test]
fn test_close_emits_closed_after_runtime_shutdown() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let socket = UdpSocket::new(UdpSocketConfig::new().runtime(rt.handle().clone()));
    socket.bind(0).unwrap();

    let closed = Arc::new(AtomicUsize::new(0));
    let closed_clone = closed.clone();
    socket.closed.connect(move |_| {
        closed_clone.fetch_add(1, Ordering::SeqCst);
    });

    socket.receive(None, 1).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    // The driver dies with its runtime; the terminal signal must still be
    // delivered, and only once.
    drop(rt);

    socket.close();
    socket.close();
    assert!(socket.is_closed());
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_migration_preserves_pending_receive() {
    let rt1 = tokio::runtime::Runtime::new().unwrap();
    let rt2 = tokio::runtime::Runtime::new().unwrap();

    let socket = UdpSocket::new(UdpSocketConfig::new().runtime(rt1.handle().clone()));
    socket.bind(0).unwrap();
    let port = socket.local_addr().unwrap().port();

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    socket.datagram_received.connect(move |_| {
        received_clone.fetch_add(1, Ordering::SeqCst);
    });

    socket.receive(None, 1).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    socket.move_to_runtime(rt2.handle().clone()).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    drop(rt1);

    let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    probe.send_to(b"after move", ("127.0.0.1", port)).unwrap();

    let mut waited = Duration::ZERO;
    while received.load(Ordering::SeqCst) == 0 && waited < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(20));
        waited += Duration::from_millis(20);
    }
    assert_eq!(received.load(Ordering::SeqCst), 1);

    socket.close();
}

#[cfg(feature = "integration-tests")]
mod networked {
    use super::*;

    #[tokio::test]
    async fn test_multicast_roundtrip() {
        let receiver = UdpSocket::ipv4_only(UdpSocketConfig::new());
        receiver.bind(0).unwrap();
        let port = receiver.local_addr().unwrap().port();
        receiver.join_multicast_group("239.255.42.99").unwrap();
        let received = capture_received(&receiver);
        receiver.receive(None, 1).unwrap();

        let sender = UdpSocket::ipv4_only(UdpSocketConfig::new());
        sender
            .send_to(b"multi".to_vec(), "239.255.42.99", port, None, 0)
            .unwrap();

        assert!(wait_until(2000, || !received.lock().is_empty()).await);
        assert_eq!(received.lock()[0].0, b"multi");

        receiver.leave_multicast_group("239.255.42.99").unwrap();
    }

    #[tokio::test]
    async fn test_dual_stack_receives_ipv6() {
        let receiver = UdpSocket::new(UdpSocketConfig::new());
        receiver.bind(0).unwrap();
        let port = receiver.local_addr().unwrap().port();
        let received = capture_received(&receiver);
        receiver.receive(None, 1).unwrap();

        let sender = UdpSocket::ipv6_only(UdpSocketConfig::new());
        let target: SocketAddr = format!("[::1]:{port}").parse().unwrap();
        sender.send_to_addr(b"via six".to_vec(), target, None, 0).unwrap();

        assert!(wait_until(2000, || !received.lock().is_empty()).await);
        let log = received.lock();
        assert_eq!(log[0].0, b"via six");
        assert!(log[0].1.is_ipv6());
    }
}
