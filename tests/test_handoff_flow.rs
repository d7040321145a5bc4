// ABOUTME: End-to-end tests for the credential handoff between the opener and the session window
// Runs both sides over loopback TCP and feeds the received credentials into a bridge

use pretty_assertions::assert_eq;
use ratatui::layout::Rect;
use serde_json::json;
use ssh_bridge_console::bridge::{
    ConnectionStatus, Credentials, LoopbackConnector, TerminalBridge,
};
use ssh_bridge_console::handoff::{
    HandoffError, MessageLink, OpenerEndpoint, OpenerNotice, OpenerReport, PopupEndpoint,
    PopupState, RetryPolicy, WindowMessage,
};
use ssh_bridge_console::terminal::resize::ResizeEvents;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

fn test_credentials() -> Credentials {
    Credentials::new("10.0.0.5", "ec2-user", "PEM...")
}

fn policy(max_attempts: u32, interval_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        interval: Duration::from_millis(interval_ms),
    }
}

struct RunningOpener {
    addr: SocketAddr,
    origin: String,
    notices: mpsc::UnboundedReceiver<OpenerNotice>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<OpenerReport, HandoffError>>,
}

impl RunningOpener {
    async fn start(policy: RetryPolicy, reload_grace: Duration) -> Self {
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let endpoint = OpenerEndpoint::bind(test_credentials(), policy, reload_grace)
            .await
            .expect("bind handoff endpoint")
            .with_notices(notice_tx);
        let addr = endpoint.local_addr().unwrap();
        let origin = endpoint.origin().to_string();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(endpoint.run(async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            origin,
            notices,
            stop,
            task,
        }
    }

    async fn next_notice(&mut self) -> OpenerNotice {
        timeout(Duration::from_secs(5), self.notices.recv())
            .await
            .expect("notice in time")
            .expect("notice channel open")
    }

    async fn wait_for(&mut self, wanted: fn(&OpenerNotice) -> bool) -> OpenerNotice {
        loop {
            let notice = self.next_notice().await;
            if wanted(&notice) {
                return notice;
            }
        }
    }

    async fn finish(self) -> OpenerReport {
        let _ = self.stop.send(());
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("opener stops in time")
            .expect("opener task")
            .expect("opener run")
    }
}

async fn raw_window(opener: &RunningOpener) -> MessageLink {
    let stream = TcpStream::connect(opener.addr).await.unwrap();
    MessageLink::new(stream)
}

async fn next_message(link: &mut MessageLink) -> WindowMessage {
    timeout(Duration::from_secs(5), link.next())
        .await
        .expect("message in time")
        .expect("link healthy")
        .expect("link open")
}

/// What the relay between a session window and its opener saw
#[derive(Default)]
struct RelayLog {
    posts: AtomicU32,
    acks_from_window: AtomicU32,
    dropped_acks: AtomicU32,
}

/// Relay a single session window to the opener, losing its first `lose_acks` acknowledgments
async fn lossy_relay(opener_addr: SocketAddr, lose_acks: u32) -> (SocketAddr, Arc<RelayLog>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(RelayLog::default());
    let relay_log = Arc::clone(&log);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut window = MessageLink::new(stream);
        let mut opener = MessageLink::new(TcpStream::connect(opener_addr).await.unwrap());

        loop {
            tokio::select! {
                from_window = window.next() => {
                    let Ok(Some(message)) = from_window else { break };
                    if matches!(message, WindowMessage::Ack { .. }) {
                        relay_log.acks_from_window.fetch_add(1, Ordering::SeqCst);
                        if relay_log.dropped_acks.load(Ordering::SeqCst) < lose_acks {
                            relay_log.dropped_acks.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }
                    }
                    if opener.send(&message).await.is_err() {
                        break;
                    }
                }
                from_opener = opener.next() => {
                    let Ok(Some(message)) = from_opener else { break };
                    relay_log.posts.fetch_add(1, Ordering::SeqCst);
                    if window.send(&message).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    (addr, log)
}

#[tokio::test]
async fn test_window_acks_after_two_retries_and_bridge_sends_init() {
    let mut opener = RunningOpener::start(policy(10, 20), Duration::from_secs(5)).await;
    let (relay_addr, relay) = lossy_relay(opener.addr, 2).await;

    let mut popup = PopupEndpoint::connect(relay_addr, opener.origin.clone(), Duration::from_secs(5))
        .await
        .unwrap();
    let credentials = popup.receive().await.unwrap();
    assert_eq!(credentials, test_credentials());

    // Retried posts keep arriving after the first ack was lost
    let serving = tokio::spawn(popup.serve());

    assert_eq!(
        opener.wait_for(|n| matches!(n, OpenerNotice::Delivered)).await,
        OpenerNotice::Delivered
    );
    assert_eq!(relay.dropped_acks.load(Ordering::SeqCst), 2);
    assert!(relay.posts.load(Ordering::SeqCst) >= 3);
    assert!(relay.acks_from_window.load(Ordering::SeqCst) >= 3);

    let report = opener.finish().await;
    assert!(report.posts >= 3);
    assert_eq!(report.acknowledgments, 1);
    assert_eq!(report.exhausted_rounds, 0);

    // Opener hangup ends the relay and then the window's link
    timeout(Duration::from_secs(5), serving)
        .await
        .expect("window link closes")
        .unwrap()
        .unwrap();

    let connector = LoopbackConnector::new();
    let (mut bridge, mut events) = TerminalBridge::initialize(
        credentials,
        "ws://bridge.test/ssh",
        connector.clone(),
        &ResizeEvents::new(),
        Rect::new(0, 0, 122, 42),
    )
    .unwrap();
    bridge.connect();
    connector.accept(bridge.generation());
    while let Ok(message) = events.try_recv() {
        bridge.handle_transport_event(message);
    }

    assert_eq!(bridge.status(), ConnectionStatus::Connected);
    assert_eq!(
        connector.sent_json(bridge.generation()),
        vec![json!({
            "host": "10.0.0.5",
            "username": "ec2-user",
            "privateKey": "PEM...",
            "columns": 120,
            "rows": 40,
        })]
    );
}

#[tokio::test]
async fn test_popup_endpoint_receives_credentials_from_opener() {
    let mut opener = RunningOpener::start(policy(10, 20), Duration::from_secs(5)).await;

    let mut popup = PopupEndpoint::connect(opener.addr, opener.origin.clone(), Duration::from_secs(5))
        .await
        .unwrap();
    let credentials = popup.receive().await.unwrap();

    assert_eq!(credentials, test_credentials());
    assert_eq!(popup.state(), &PopupState::Received(test_credentials()));
    assert!(matches!(
        opener.wait_for(|n| matches!(n, OpenerNotice::Delivered)).await,
        OpenerNotice::Delivered
    ));

    drop(popup);
    let report = opener.finish().await;
    assert_eq!(report.acknowledgments, 1);
    assert_eq!(report.rerequests, 1);
}

#[tokio::test]
async fn test_foreign_window_never_receives_credentials() {
    let opener = RunningOpener::start(policy(10, 20), Duration::from_secs(5)).await;

    let mut popup = PopupEndpoint::connect(opener.addr, "not-the-origin", Duration::from_millis(200))
        .await
        .unwrap();
    let result = popup.receive().await;

    assert!(matches!(result, Err(HandoffError::TimedOut(_))));
    assert!(matches!(popup.state(), PopupState::Failed(_)));

    drop(popup);
    let report = opener.finish().await;
    assert_eq!(report.posts, 0);
    assert_eq!(report.acknowledgments, 0);
}

#[tokio::test]
async fn test_unacknowledged_round_is_exhausted_then_reload_recovers() {
    let mut opener = RunningOpener::start(policy(3, 50), Duration::from_secs(5)).await;
    let mut window = raw_window(&opener).await;

    window
        .send(&WindowMessage::request_credentials(&opener.origin))
        .await
        .unwrap();

    let exhausted = opener
        .wait_for(|n| matches!(n, OpenerNotice::Exhausted { .. }))
        .await;
    assert_eq!(exhausted, OpenerNotice::Exhausted { attempts: 3 });

    // Reloading the window asks again and starts a fresh round
    window
        .send(&WindowMessage::request_credentials(&opener.origin))
        .await
        .unwrap();
    let message = loop {
        let message = next_message(&mut window).await;
        if matches!(message, WindowMessage::Credentials { .. }) {
            break message;
        }
    };
    assert_eq!(message.to_credentials(), Some(test_credentials()));
    window.send(&WindowMessage::ack(&opener.origin)).await.unwrap();
    opener
        .wait_for(|n| matches!(n, OpenerNotice::Delivered))
        .await;

    drop(window);
    let report = opener.finish().await;
    assert_eq!(report.exhausted_rounds, 1);
    assert_eq!(report.rerequests, 2);
    assert_eq!(report.acknowledgments, 1);
}

#[tokio::test]
async fn test_opener_stops_after_reload_grace_without_window() {
    let opener = RunningOpener::start(policy(10, 20), Duration::from_millis(100)).await;

    let report = timeout(Duration::from_secs(5), opener.task)
        .await
        .expect("opener gives up on its own")
        .unwrap()
        .unwrap();
    assert_eq!(report.posts, 0);
}

#[tokio::test]
async fn test_window_detach_is_reported() {
    let mut opener = RunningOpener::start(policy(10, 20), Duration::from_secs(5)).await;
    let mut window = raw_window(&opener).await;
    window
        .send(&WindowMessage::request_credentials(&opener.origin))
        .await
        .unwrap();

    assert!(matches!(
        opener.next_notice().await,
        OpenerNotice::WindowAttached(_)
    ));
    drop(window);
    assert_eq!(opener.next_notice().await, OpenerNotice::WindowDetached);

    opener.finish().await;
}

#[tokio::test]
async fn test_unverified_connections_do_not_displace_the_window() {
    let mut opener = RunningOpener::start(policy(10, 20), Duration::from_secs(5)).await;
    let mut window = raw_window(&opener).await;
    window
        .send(&WindowMessage::request_credentials(&opener.origin))
        .await
        .unwrap();
    assert!(matches!(
        next_message(&mut window).await,
        WindowMessage::Credentials { .. }
    ));

    // One stranger stays silent, another only knows a wrong origin
    let mut silent = raw_window(&opener).await;
    let mut foreign = raw_window(&opener).await;
    foreign
        .send(&WindowMessage::request_credentials("guessed-origin"))
        .await
        .unwrap();

    // The session window keeps receiving retries on its original link
    let retry = next_message(&mut window).await;
    assert_eq!(retry.to_credentials(), Some(test_credentials()));
    window.send(&WindowMessage::ack(&opener.origin)).await.unwrap();
    assert_eq!(
        opener.wait_for(|n| matches!(n, OpenerNotice::Delivered)).await,
        OpenerNotice::Delivered
    );

    assert!(timeout(Duration::from_millis(100), silent.next()).await.is_err());
    assert!(timeout(Duration::from_millis(100), foreign.next()).await.is_err());

    let report = opener.finish().await;
    assert!(report.posts >= 2);
    assert_eq!(report.acknowledgments, 1);
    assert_eq!(report.rerequests, 1);
}

#[tokio::test]
async fn test_slow_window_start_does_not_exhaust_the_round() {
    let mut opener = RunningOpener::start(policy(2, 50), Duration::from_secs(5)).await;

    // Far longer than max_attempts * interval before the window shows up
    tokio::time::sleep(Duration::from_millis(400)).await;

    let mut popup = PopupEndpoint::connect(opener.addr, opener.origin.clone(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(popup.receive().await.unwrap(), test_credentials());
    opener
        .wait_for(|n| matches!(n, OpenerNotice::Delivered))
        .await;

    drop(popup);
    let report = opener.finish().await;
    assert_eq!(report.exhausted_rounds, 0);
    assert!(report.posts >= 1);
}

#[tokio::test]
async fn test_popup_times_out_when_opener_stays_silent() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(stream);
    });

    let mut popup = PopupEndpoint::connect(addr, "origin", Duration::from_millis(100))
        .await
        .unwrap();
    let result = popup.receive().await;

    assert!(matches!(result, Err(HandoffError::TimedOut(waited)) if waited == Duration::from_millis(100)));
    assert!(matches!(popup.state(), PopupState::Failed(_)));
    silent.abort();
}

#[tokio::test]
async fn test_popup_reports_closed_opener() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let mut popup = PopupEndpoint::connect(addr, "origin", Duration::from_secs(5))
        .await
        .unwrap();

    // Depending on timing the hangup surfaces on the request or on the read
    assert!(matches!(
        popup.receive().await,
        Err(HandoffError::PeerClosed | HandoffError::Io(_))
    ));
}
