//! Per-endpoint background polling task.
//!
//! One task per remote endpoint runs the request/response state
//! machine: wait until the next poll deadline, send a request stamped
//! with the local time, and hand any response's four timestamps to
//! the estimator, which decides when to poll next. The task only ever
//! blocks on the socket receive (with an explicit deadline) and on
//! the cancellation token; estimator arithmetic is synchronous.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::error::PacketError;
use crate::protocol::{NtpPacket, ProtocolVariant, SimplePacket, Timestamp};

use super::estimator::{Estimator, Observation, SharedEstimator};

/// Receive buffer size; both wire variants fit with room to spare.
const RECV_BUF_SIZE: usize = 256;

/// Fixed backoff after a transient socket error. The loop never gives
/// up on a configured endpoint.
const IO_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// The polling loop for one remote endpoint.
pub(crate) struct Transport {
    socket: UdpSocket,
    variant: ProtocolVariant,
    shared: Arc<SharedEstimator>,
    estimator: Estimator,
}

enum Step {
    /// Keep waiting for a response until the current deadline.
    Continue,
    /// Wait until the given local time, then send the next request.
    PollAt(Timestamp),
    /// Fatal condition; the loop must exit permanently.
    Shutdown,
}

impl Transport {
    /// Create a transport over an already-connected UDP socket.
    pub(crate) fn new(socket: UdpSocket, variant: ProtocolVariant, shared: Arc<SharedEstimator>) -> Self {
        let estimator = Estimator::new(shared.poll_timeout());
        Self {
            socket,
            variant,
            shared,
            estimator,
        }
    }

    /// Run until cancelled or fatally refused by the server.
    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        let clock = self.shared.clock();
        let mut buf = [0u8; RECV_BUF_SIZE];
        // First request goes out immediately.
        let mut next_poll = clock.now();

        loop {
            let wait = next_poll.saturating_since(clock.now());
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("polling loop cancelled");
                    return;
                }
                result = tokio::time::timeout(wait, self.socket.recv(&mut buf)) => {
                    match result {
                        // Deadline reached: send the next request.
                        Err(_elapsed) => {
                            match self.send_request(clock.now()).await {
                                Ok(()) => {
                                    // Fallback deadline in case the response
                                    // never arrives.
                                    next_poll =
                                        clock.now().saturating_add(self.shared.poll_timeout());
                                }
                                Err(error) => {
                                    tracing::warn!(%error, "failed to send time request");
                                    if Self::backoff(&cancel).await {
                                        return;
                                    }
                                    // Retry directly after the backoff.
                                    next_poll = clock.now();
                                }
                            }
                        }
                        Ok(Ok(len)) => {
                            // Stamp receipt before any parsing so parse
                            // latency is not attributed to the network.
                            let local_receive = clock.now();
                            match self.handle_response(&buf[..len], local_receive) {
                                Step::Continue => {}
                                Step::PollAt(deadline) => next_poll = deadline,
                                Step::Shutdown => return,
                            }
                        }
                        Ok(Err(error)) => {
                            tracing::warn!(%error, "socket receive failed, backing off");
                            if Self::backoff(&cancel).await {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn send_request(&self, now: Timestamp) -> std::io::Result<()> {
        match self.variant {
            ProtocolVariant::Simple => {
                self.socket.send(&SimplePacket::request(now).encode()).await?;
            }
            ProtocolVariant::Ntp => {
                self.socket.send(&NtpPacket::request(now).encode()).await?;
            }
        }
        Ok(())
    }

    fn handle_response(&mut self, data: &[u8], local_receive: Timestamp) -> Step {
        let observation = match self.variant {
            ProtocolVariant::Simple => match SimplePacket::decode(data) {
                Ok(packet) => {
                    if packet.local_time.is_none() || packet.remote_time.is_none() {
                        tracing::debug!("ignoring simple packet with unset fields");
                        return Step::Continue;
                    }
                    Observation {
                        local_send: packet.local_time,
                        remote_receive: packet.remote_time,
                        remote_send: packet.remote_time,
                        local_receive,
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "ignoring malformed simple packet");
                    return Step::Continue;
                }
            },
            ProtocolVariant::Ntp => match NtpPacket::decode(data) {
                Ok(packet) => Observation {
                    local_send: packet.origin_time,
                    remote_receive: packet.receive_time,
                    remote_send: packet.transmit_time,
                    local_receive,
                },
                Err(PacketError::KodRate { poll_interval }) => {
                    if self.shared.apply_rate_penalty(poll_interval) {
                        tracing::warn!(
                            ?poll_interval,
                            "server sent RATE kiss-of-death, doubling minimum update interval"
                        );
                    } else {
                        tracing::debug!("ignoring repeated RATE kiss-of-death");
                    }
                    // Back off a full poll timeout before the next send.
                    return Step::PollAt(local_receive.saturating_add(self.shared.poll_timeout()));
                }
                Err(error) if error.is_fatal() => {
                    tracing::error!(%error, "server refused service, stopping polling loop");
                    self.shared.mark_corrupted();
                    return Step::Shutdown;
                }
                Err(error) => {
                    tracing::warn!(%error, "ignoring malformed NTP packet");
                    return Step::Continue;
                }
            },
        };

        let limits = self.shared.effective_limits();
        let report = self.estimator.observe(observation, &limits);
        let next_timeout = report.next_timeout;
        self.shared.publish(&report, &self.estimator);
        Step::PollAt(local_receive.saturating_add(next_timeout))
    }

    /// Sleep through the error backoff; returns true when cancelled.
    async fn backoff(cancel: &CancellationToken) -> bool {
        tokio::select! {
            () = cancel.cancelled() => true,
            () = tokio::time::sleep(IO_ERROR_BACKOFF) => false,
        }
    }
}
