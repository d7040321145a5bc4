// ABOUTME: Opener side of the credential handoff: bounded retry of credential posts until acknowledged
// Keeps listening for re-requests from a reloaded session window while that window stays around

use crate::bridge::protocol::Credentials;
use crate::handoff::error::HandoffError;
use crate::handoff::launcher::{LaunchRequest, WindowLauncher};
use crate::handoff::message::{MessageLink, WindowMessage};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long a new connection has to prove the origin before it is dropped
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// How often and how many times credentials are posted before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenerState {
    /// No session window has asked for credentials yet
    Idle,
    /// Posting credentials on every tick
    Sending { attempts: u32 },
    /// Session window confirmed receipt; nothing more is posted
    Acknowledged,
    /// Every attempt of the round went unanswered
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenerReaction {
    Ignored,
    Acknowledged,
    /// A new bounded round started; post right away
    Resend,
}

/// Retry/ack state machine for one session window
#[derive(Debug)]
pub struct OpenerHandoff {
    origin: String,
    credentials: Credentials,
    policy: RetryPolicy,
    state: OpenerState,
}

impl OpenerHandoff {
    pub fn new(origin: impl Into<String>, credentials: Credentials, policy: RetryPolicy) -> Self {
        Self {
            origin: origin.into(),
            credentials,
            policy,
            state: OpenerState::Idle,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn state(&self) -> OpenerState {
        self.state
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Advance the retry timer; returns the message to post this tick, if any.
    ///
    /// Ticks before the first request do not count as attempts.
    ///
    /// The round is declared exhausted on the tick after the last post, so
    /// the final attempt still gets a full interval to be acknowledged.
    pub fn on_tick(&mut self) -> Option<WindowMessage> {
        let OpenerState::Sending { attempts } = self.state else {
            return None;
        };

        if attempts >= self.policy.max_attempts {
            warn!("Credential handoff exhausted after {} attempts", attempts);
            self.state = OpenerState::Exhausted { attempts };
            return None;
        }

        self.state = OpenerState::Sending {
            attempts: attempts + 1,
        };
        debug!("Posting credentials, attempt {}", attempts + 1);
        Some(WindowMessage::credentials(&self.origin, &self.credentials))
    }

    pub fn on_message(&mut self, message: &WindowMessage) -> OpenerReaction {
        if message.origin() != self.origin {
            warn!("Ignoring {} message from foreign origin", message.kind());
            return OpenerReaction::Ignored;
        }

        match message {
            WindowMessage::Ack { .. } => match self.state {
                OpenerState::Sending { attempts } => {
                    info!("Credentials acknowledged after {} attempt(s)", attempts);
                    self.state = OpenerState::Acknowledged;
                    OpenerReaction::Acknowledged
                }
                _ => {
                    debug!("Duplicate acknowledgment ignored");
                    OpenerReaction::Ignored
                }
            },
            WindowMessage::RequestCredentials { .. } => {
                info!("Session window requested credentials, starting a new round");
                self.state = OpenerState::Sending { attempts: 0 };
                OpenerReaction::Resend
            }
            WindowMessage::Credentials { .. } => OpenerReaction::Ignored,
        }
    }
}

/// Progress notices for whoever launched the handoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenerNotice {
    WindowAttached(SocketAddr),
    Delivered,
    Exhausted { attempts: u32 },
    WindowDetached,
}

/// Summary of a finished handoff run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenerReport {
    pub posts: u32,
    pub acknowledgments: u32,
    pub rerequests: u32,
    pub exhausted_rounds: u32,
}

/// Loopback endpoint the session window connects back to
pub struct OpenerEndpoint {
    listener: TcpListener,
    handoff: OpenerHandoff,
    reload_grace: Duration,
    notices: Option<mpsc::UnboundedSender<OpenerNotice>>,
}

impl OpenerEndpoint {
    /// Bind to an ephemeral loopback port with a fresh origin token
    pub async fn bind(
        credentials: Credentials,
        policy: RetryPolicy,
        reload_grace: Duration,
    ) -> Result<Self, HandoffError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let origin = Uuid::new_v4().to_string();
        info!("Handoff endpoint listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handoff: OpenerHandoff::new(origin, credentials, policy),
            reload_grace,
            notices: None,
        })
    }

    pub fn with_notices(mut self, notices: mpsc::UnboundedSender<OpenerNotice>) -> Self {
        self.notices = Some(notices);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, HandoffError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn origin(&self) -> &str {
        self.handoff.origin()
    }

    pub fn launch_request(&self, bridge_url: &str) -> Result<LaunchRequest, HandoffError> {
        Ok(LaunchRequest {
            handoff_addr: self.local_addr()?,
            origin: self.origin().to_string(),
            bridge_url: bridge_url.to_string(),
        })
    }

    /// Open the session window pointed back at this endpoint
    pub fn launch(&self, launcher: &dyn WindowLauncher, bridge_url: &str) -> Result<(), HandoffError> {
        let request = self.launch_request(bridge_url)?;
        launcher.launch(&request)
    }

    fn notify(&self, notice: OpenerNotice) {
        if let Some(notices) = &self.notices {
            let _ = notices.send(notice);
        }
    }

    /// Serve the session window until `shutdown` resolves, or until the
    /// window has been gone for longer than the reload grace period.
    ///
    /// New connections stay pending until they send a same-origin message.
    /// Only then do they replace the current link, so a connection that never
    /// proves the origin cannot displace the session window or receive
    /// credentials.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<OpenerReport, HandoffError> {
        let mut report = OpenerReport::default();
        let mut peer: Option<MessageLink> = None;
        let mut pending: JoinSet<Option<VerifiedLink>> = JoinSet::new();
        let mut grace_deadline: Option<Instant> = Some(Instant::now() + self.reload_grace);

        let mut ticker = tokio::time::interval(self.handoff.policy().interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Handoff endpoint shutting down");
                    break;
                }

                () = wait_until(grace_deadline) => {
                    info!("Session window gone, closing handoff endpoint");
                    break;
                }

                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted?;
                    debug!("Connection from {}, waiting for it to prove the origin", addr);
                    pending.spawn(verify(stream, addr, self.handoff.origin().to_string()));
                }

                Some(joined) = pending.join_next(), if !pending.is_empty() => {
                    let Ok(Some(VerifiedLink { link, addr, first })) = joined else {
                        continue;
                    };
                    if peer.is_some() {
                        info!("Session window reconnected from {}, replacing previous link", addr);
                    } else {
                        info!("Session window attached from {}", addr);
                    }
                    peer = Some(link);
                    grace_deadline = None;
                    self.notify(OpenerNotice::WindowAttached(addr));
                    self.apply(&first, &mut report, &mut ticker);
                }

                received = next_message(&mut peer) => {
                    match received {
                        Ok(Some(message)) => self.apply(&message, &mut report, &mut ticker),
                        Ok(None) => {
                            info!("Session window disconnected");
                            peer = None;
                            grace_deadline = Some(Instant::now() + self.reload_grace);
                            self.notify(OpenerNotice::WindowDetached);
                        }
                        Err(e) => {
                            warn!("Handoff link failed: {}", e);
                            peer = None;
                            grace_deadline = Some(Instant::now() + self.reload_grace);
                            self.notify(OpenerNotice::WindowDetached);
                        }
                    }
                }

                _ = ticker.tick() => {
                    let before = self.handoff.state();
                    let Some(message) = self.handoff.on_tick() else {
                        if let (OpenerState::Sending { .. }, OpenerState::Exhausted { attempts }) =
                            (before, self.handoff.state())
                        {
                            error!("Session window never acknowledged credentials ({} attempts)", attempts);
                            report.exhausted_rounds += 1;
                            self.notify(OpenerNotice::Exhausted { attempts });
                            if peer.is_none() && grace_deadline.is_none() {
                                grace_deadline = Some(Instant::now() + self.reload_grace);
                            }
                        }
                        continue;
                    };

                    match peer.as_mut() {
                        Some(link) => {
                            if let Err(e) = link.send(&message).await {
                                warn!("Failed to post credentials: {}", e);
                            } else {
                                report.posts += 1;
                            }
                        }
                        None => debug!("Session window detached, attempt dropped"),
                    }
                }
            }
        }

        Ok(report)
    }

    fn apply(
        &mut self,
        message: &WindowMessage,
        report: &mut OpenerReport,
        ticker: &mut tokio::time::Interval,
    ) {
        match self.handoff.on_message(message) {
            OpenerReaction::Acknowledged => {
                report.acknowledgments += 1;
                self.notify(OpenerNotice::Delivered);
            }
            OpenerReaction::Resend => {
                report.rerequests += 1;
                ticker.reset_immediately();
            }
            OpenerReaction::Ignored => {}
        }
    }
}

/// Connection that has sent at least one same-origin message
struct VerifiedLink {
    link: MessageLink,
    addr: SocketAddr,
    first: WindowMessage,
}

/// Read until the connection proves the origin. Foreign-origin messages are
/// skipped; hangups, read errors and silence past the timeout drop it.
async fn verify(stream: TcpStream, addr: SocketAddr, origin: String) -> Option<VerifiedLink> {
    let mut link = MessageLink::new(stream);
    let proven = timeout(VERIFY_TIMEOUT, async {
        loop {
            match link.next().await {
                Ok(Some(message)) if message.origin() == origin => return Some(message),
                Ok(Some(message)) => {
                    warn!("Ignoring {} message from foreign origin at {}", message.kind(), addr);
                }
                Ok(None) => return None,
                Err(e) => {
                    debug!("Unverified connection {} failed: {}", addr, e);
                    return None;
                }
            }
        }
    })
    .await;

    match proven {
        Ok(Some(first)) => Some(VerifiedLink { link, addr, first }),
        Ok(None) => None,
        Err(_) => {
            debug!("Connection {} never proved the origin, dropping it", addr);
            None
        }
    }
}

async fn next_message(peer: &mut Option<MessageLink>) -> Result<Option<WindowMessage>, HandoffError> {
    match peer {
        Some(link) => link.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
