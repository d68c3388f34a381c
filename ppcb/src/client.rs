//! Client session state machine.
//!
//! A [`Client`] drives one [`Transfer`] over one [`Transport`]:
//!
//! ```text
//!  CONN ──▶ CONNACC ──▶ DATA(0) [ACC(0)] ──▶ … ──▶ DATA(n-1) [ACC(n-1)] ──▶ RCVD
//! ```
//!
//! The bracketed ACCs exist only on UDPR, which is also the only mode that
//! retransmits: when a wait expires the last package goes out again until
//! the [`crate::timer::Retransmitter`] budget is spent.  Plain UDP fires its
//! chunks without waiting and TCP relies on the stream for delivery.
//!
//! Acknowledgements for chunks already confirmed (and a repeated CONNACC) are
//! stale: they are dropped without restarting the wait window or resetting
//! the retry budget.

use std::net::SocketAddr;

use tokio::time::Instant;

use crate::error::PpcbError;
use crate::packet::Package;
use crate::sender::Transfer;
use crate::socket::TransportError;
use crate::state::{ClientState, Mode};
use crate::timer::{RetransmitConfig, Retry};
use crate::transport::Transport;

/// How a transfer that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The server confirmed the whole payload with RCVD.
    Delivered,
    /// The server refused the transfer.
    Rejected(Rejection),
}

/// Which refusal the server sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// CONNRJT: the server is busy or does not serve the requested protocol.
    Connection,
    /// RJT: the server lost sync at `pack_id` and dropped the session.
    Data { pack_id: u64 },
}

/// One client transfer bound to its transport.
pub struct Client {
    transport: Transport,
    transfer: Transfer,
    config: RetransmitConfig,
    state: ClientState,
}

impl Client {
    /// Open the transport for `transfer.mode()` towards `server`.
    pub async fn connect(
        server: SocketAddr,
        transfer: Transfer,
        config: RetransmitConfig,
    ) -> Result<Self, PpcbError> {
        let transport = Transport::open(transfer.mode(), server, &config).await?;
        Ok(Self {
            transport,
            transfer,
            config,
            state: ClientState::Idle,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn session_id(&self) -> u64 {
        self.transfer.session_id()
    }

    /// Run the transfer to a terminal state.
    ///
    /// `Ok` covers both delivery and a refusal by the server; every other
    /// ending is an `Err` and leaves the client in [`ClientState::Failed`].
    pub async fn run(&mut self) -> Result<Outcome, PpcbError> {
        let result = self.drive().await;
        self.state = match result {
            Ok(_) => ClientState::Done,
            Err(_) => ClientState::Failed,
        };
        result
    }

    async fn drive(&mut self) -> Result<Outcome, PpcbError> {
        let conn = self.transfer.conn_package();
        self.state = ClientState::AwaitingConnAck;
        if let Some(rejection) = self.handshake(&conn).await? {
            return Ok(Outcome::Rejected(rejection));
        }

        self.state = ClientState::Sending;
        let mut last = conn;
        while let Some(data) = self.transfer.current_package() {
            self.send(&data).await?;
            if self.transfer.mode().retransmits() {
                if let Some(outcome) = self.await_acc(&data).await? {
                    return Ok(outcome);
                }
            }
            self.transfer.advance();
            last = data;
        }

        self.state = ClientState::AwaitingReceived;
        self.await_received(&last).await
    }

    async fn handshake(&mut self, conn: &Package) -> Result<Option<Rejection>, PpcbError> {
        self.send(conn).await?;
        let mut deadline = self.config.deadline();
        let reply = self.recv_or_retransmit(conn, &mut deadline).await?;
        self.check_session(&reply)?;
        match reply {
            Package::ConnAcc { .. } => {
                self.transfer.retries.on_progress();
                Ok(None)
            }
            Package::ConnRjt { .. } => {
                log::info!("[client] server refused session {}", self.session_id());
                Ok(Some(Rejection::Connection))
            }
            other => Err(PpcbError::violation(format!(
                "expected CONNACC or CONNRJT, got {}",
                other.name()
            ))),
        }
    }

    /// Wait for ACC of the chunk carried by `data` (UDPR only).
    ///
    /// Returns `Some` when the transfer ended early: an RJT, or an RCVD that
    /// overtook the ACC of the final chunk.
    async fn await_acc(&mut self, data: &Package) -> Result<Option<Outcome>, PpcbError> {
        let pack = self.transfer.current_pack_id();
        let mut deadline = self.config.deadline();
        loop {
            let reply = self.recv_or_retransmit(data, &mut deadline).await?;
            self.check_session(&reply)?;
            match reply {
                Package::Acc { pack_id, .. } if pack_id == pack => {
                    log::debug!("[client] ← ACC pack_id={pack_id}");
                    self.transfer.retries.on_progress();
                    return Ok(None);
                }
                Package::Acc { pack_id, .. } if pack_id < pack => {
                    log::debug!("[client] ← stale ACC pack_id={pack_id} (waiting for {pack})");
                }
                Package::Acc { pack_id, .. } => {
                    return Err(PpcbError::violation(format!(
                        "ACC for pack {pack_id} which was never sent (last sent {pack})"
                    )));
                }
                Package::ConnAcc { .. } => {
                    log::debug!("[client] ← stale CONNACC");
                }
                Package::Rjt { pack_id, .. } => {
                    log::info!("[client] server rejected pack {pack_id}");
                    return Ok(Some(Outcome::Rejected(Rejection::Data { pack_id })));
                }
                Package::Rcvd { .. } if self.transfer.is_last() => {
                    log::debug!("[client] ← RCVD before final ACC");
                    return Ok(Some(Outcome::Delivered));
                }
                other => {
                    return Err(PpcbError::violation(format!(
                        "expected ACC for pack {pack}, got {}",
                        other.name()
                    )));
                }
            }
        }
    }

    /// Wait for RCVD after every chunk is out.  `last` is what a UDPR client
    /// resends if the confirmation does not come.
    async fn await_received(&mut self, last: &Package) -> Result<Outcome, PpcbError> {
        let retransmits = self.transfer.mode().retransmits();
        let sent = self.transfer.current_pack_id();
        let mut deadline = self.config.deadline();
        loop {
            let reply = self.recv_or_retransmit(last, &mut deadline).await?;
            self.check_session(&reply)?;
            match reply {
                Package::Rcvd { .. } => {
                    log::debug!("[client] ← RCVD");
                    return Ok(Outcome::Delivered);
                }
                Package::Rjt { pack_id, .. } => {
                    log::info!("[client] server rejected pack {pack_id}");
                    return Ok(Outcome::Rejected(Rejection::Data { pack_id }));
                }
                Package::Acc { pack_id, .. } if retransmits && pack_id < sent => {
                    log::debug!("[client] ← stale ACC pack_id={pack_id} while awaiting RCVD");
                }
                Package::ConnAcc { .. } if retransmits => {
                    log::debug!("[client] ← stale CONNACC while awaiting RCVD");
                }
                other => {
                    return Err(PpcbError::violation(format!(
                        "expected RCVD, got {}",
                        other.name()
                    )));
                }
            }
        }
    }

    /// Receive the next package, resending `last` each time the wait window
    /// expires while the retry budget allows.
    async fn recv_or_retransmit(
        &mut self,
        last: &Package,
        deadline: &mut Instant,
    ) -> Result<Package, PpcbError> {
        loop {
            match self.transport.recv_until(*deadline).await {
                Ok(package) => return Ok(package),
                Err(TransportError::Timeout) => match self.transfer.retries.on_timeout() {
                    Retry::Retransmit => {
                        log::debug!(
                            "[client] timeout #{} in {}; retransmitting {}",
                            self.transfer.retries.timeouts(),
                            self.state,
                            last.name()
                        );
                        self.transport.send(last).await?;
                        *deadline = self.config.deadline();
                    }
                    Retry::GiveUp => {
                        let timeouts = self.transfer.retries.timeouts();
                        return Err(PpcbError::Timeout {
                            retransmits: if self.transfer.mode().retransmits() {
                                timeouts.saturating_sub(1)
                            } else {
                                0
                            },
                        });
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn send(&mut self, package: &Package) -> Result<(), PpcbError> {
        match package {
            Package::Data { pack_id, payload, .. } => {
                log::debug!("[client] → DATA pack_id={pack_id} len={}", payload.len())
            }
            other => log::debug!("[client] → {} session={}", other.name(), other.session_id()),
        }
        self.transport.send(package).await?;
        Ok(())
    }

    fn check_session(&self, reply: &Package) -> Result<(), PpcbError> {
        if reply.session_id() != self.session_id() {
            return Err(PpcbError::violation(format!(
                "{} carries session {} but ours is {}",
                reply.name(),
                reply.session_id(),
                self.session_id()
            )));
        }
        Ok(())
    }
}

/// Convenience wrapper: prepare, connect and run one transfer.
pub async fn send_payload(
    mode: Mode,
    server: SocketAddr,
    payload: Vec<u8>,
    config: RetransmitConfig,
) -> Result<Outcome, PpcbError> {
    let transfer = Transfer::new(payload, mode, &config)?;
    Client::connect(server, transfer, config).await?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Socket;
    use std::time::Duration;

    fn quick() -> RetransmitConfig {
        RetransmitConfig {
            max_wait: Duration::from_millis(100),
            max_retransmits: 3,
        }
    }

    async fn scripted_server() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    async fn client(server: &Socket, mode: Mode, payload: &[u8], session_id: u64) -> Client {
        let transfer =
            Transfer::with_session_id(payload.to_vec(), mode, &quick(), session_id).unwrap();
        Client::connect(server.local_addr, transfer, quick())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connrjt_is_a_rejection_not_an_error() {
        let server = scripted_server().await;
        let mut c = client(&server, Mode::Udp, b"abc", 5).await;

        let run = tokio::spawn(async move { (c.run().await, c.state()) });
        let (conn, from) = server.recv_from_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(conn.id(), crate::packet::ids::CONN);
        server
            .send_to(&Package::ConnRjt { session_id: 5 }, from)
            .await
            .unwrap();

        let (result, state) = run.await.unwrap();
        assert_eq!(result.unwrap(), Outcome::Rejected(Rejection::Connection));
        assert_eq!(state, ClientState::Done);
    }

    #[tokio::test]
    async fn wrong_session_in_reply_is_a_violation() {
        let server = scripted_server().await;
        let mut c = client(&server, Mode::Udp, b"abc", 5).await;

        let run = tokio::spawn(async move { (c.run().await, c.state()) });
        let (_, from) = server.recv_from_timeout(Duration::from_secs(2)).await.unwrap();
        server
            .send_to(&Package::ConnAcc { session_id: 6 }, from)
            .await
            .unwrap();

        let (result, state) = run.await.unwrap();
        assert!(matches!(result, Err(PpcbError::ProtocolViolation(_))));
        assert_eq!(state, ClientState::Failed);
    }

    #[tokio::test]
    async fn plain_udp_single_timeout_is_fatal() {
        let server = scripted_server().await;
        let mut c = client(&server, Mode::Udp, b"abc", 1).await;

        let err = c.run().await.unwrap_err();
        assert!(matches!(err, PpcbError::Timeout { retransmits: 0 }));
        // Exactly one CONN went out.
        assert!(server.recv_from_timeout(Duration::from_millis(100)).await.is_ok());
        assert!(server
            .recv_from_timeout(Duration::from_millis(100))
            .await
            .unwrap_err()
            .is_timeout());
    }

    #[tokio::test]
    async fn udpr_stale_ack_is_ignored_and_future_ack_is_fatal() {
        let server = scripted_server().await;
        let payload = vec![1u8; crate::packet::MAX_CHUNK + 1];
        let mut c = client(&server, Mode::Udpr, &payload, 9).await;
        let run = tokio::spawn(async move { c.run().await });

        let wait = Duration::from_secs(2);
        let (_, from) = server.recv_from_timeout(wait).await.unwrap();
        server.send_to(&Package::ConnAcc { session_id: 9 }, from).await.unwrap();

        let (first, _) = server.recv_from_timeout(wait).await.unwrap();
        assert!(matches!(first, Package::Data { pack_id: 0, .. }));
        server
            .send_to(&Package::Acc { session_id: 9, pack_id: 0 }, from)
            .await
            .unwrap();

        let (second, _) = server.recv_from_timeout(wait).await.unwrap();
        assert!(matches!(second, Package::Data { pack_id: 1, .. }));
        // A duplicate of the old ACC is dropped; an ACC from the future is not.
        server
            .send_to(&Package::Acc { session_id: 9, pack_id: 0 }, from)
            .await
            .unwrap();
        server
            .send_to(&Package::Acc { session_id: 9, pack_id: 2 }, from)
            .await
            .unwrap();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, PpcbError::ProtocolViolation(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn udpr_rjt_is_a_rejection() {
        let server = scripted_server().await;
        let mut c = client(&server, Mode::Udpr, b"abcdef", 3).await;
        let run = tokio::spawn(async move { c.run().await });

        let wait = Duration::from_secs(2);
        let (_, from) = server.recv_from_timeout(wait).await.unwrap();
        server.send_to(&Package::ConnAcc { session_id: 3 }, from).await.unwrap();
        let _ = server.recv_from_timeout(wait).await.unwrap();
        server
            .send_to(&Package::Rjt { session_id: 3, pack_id: 0 }, from)
            .await
            .unwrap();

        assert_eq!(
            run.await.unwrap().unwrap(),
            Outcome::Rejected(Rejection::Data { pack_id: 0 })
        );
    }

    #[tokio::test]
    async fn udpr_rcvd_may_overtake_final_acc() {
        let server = scripted_server().await;
        let mut c = client(&server, Mode::Udpr, b"xyz", 4).await;
        let run = tokio::spawn(async move { c.run().await });

        let wait = Duration::from_secs(2);
        let (_, from) = server.recv_from_timeout(wait).await.unwrap();
        server.send_to(&Package::ConnAcc { session_id: 4 }, from).await.unwrap();
        let _ = server.recv_from_timeout(wait).await.unwrap();
        server.send_to(&Package::Rcvd { session_id: 4 }, from).await.unwrap();

        assert_eq!(run.await.unwrap().unwrap(), Outcome::Delivered);
    }

    #[tokio::test]
    async fn udpr_stale_acknowledgements_are_drained() {
        let server = scripted_server().await;
        let payload = vec![2u8; crate::packet::MAX_CHUNK + 1];
        let mut c = client(&server, Mode::Udpr, &payload, 6).await;
        let run = tokio::spawn(async move { (c.run().await, c.state()) });

        let wait = Duration::from_secs(2);
        let conn_acc = Package::ConnAcc { session_id: 6 };
        let acc = |pack_id| Package::Acc { session_id: 6, pack_id };

        let (_, from) = server.recv_from_timeout(wait).await.unwrap();
        server.send_to(&conn_acc, from).await.unwrap();
        let (first, _) = server.recv_from_timeout(wait).await.unwrap();
        assert!(matches!(first, Package::Data { pack_id: 0, .. }));
        server.send_to(&acc(0), from).await.unwrap();

        // While sending: a repeated CONNACC is stale.
        let (second, _) = server.recv_from_timeout(wait).await.unwrap();
        assert!(matches!(second, Package::Data { pack_id: 1, .. }));
        server.send_to(&conn_acc, from).await.unwrap();
        server.send_to(&acc(1), from).await.unwrap();

        // While awaiting RCVD: old CONNACC and ACC are drained.
        server.send_to(&conn_acc, from).await.unwrap();
        server.send_to(&acc(0), from).await.unwrap();
        server.send_to(&Package::Rcvd { session_id: 6 }, from).await.unwrap();

        let (result, state) = run.await.unwrap();
        assert_eq!(result.unwrap(), Outcome::Delivered);
        assert_eq!(state, ClientState::Done);
    }

    #[tokio::test]
    async fn stale_acknowledgements_do_not_extend_the_wait() {
        let server = scripted_server().await;
        let mut c = client(&server, Mode::Udpr, b"quiet", 2).await;
        let run = tokio::spawn(async move { c.run().await });

        let (_, from) = server.recv_from_timeout(Duration::from_secs(2)).await.unwrap();
        let conn_acc = Package::ConnAcc { session_id: 2 };
        server.send_to(&conn_acc, from).await.unwrap();

        // Repeat the CONNACC at half the wait window; DATA(0) is never
        // acknowledged, so the budget still runs out.
        let give_up = Instant::now() + Duration::from_secs(3);
        while !run.is_finished() && Instant::now() < give_up {
            tokio::time::sleep(quick().max_wait / 2).await;
            server.send_to(&conn_acc, from).await.unwrap();
        }

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, PpcbError::Timeout { retransmits: 3 }), "got {err:?}");
    }

    #[tokio::test]
    async fn udpr_conn_is_resent_three_times() {
        let server = scripted_server().await;
        let mut c = client(&server, Mode::Udpr, b"hello", 12).await;

        let err = c.run().await.unwrap_err();
        assert!(matches!(err, PpcbError::Timeout { retransmits: 3 }), "got {err:?}");
        let mut conns = 0;
        while server.recv_from_timeout(Duration::from_millis(50)).await.is_ok() {
            conns += 1;
        }
        assert_eq!(conns, 4);
    }

    #[tokio::test]
    async fn udpr_retransmits_data_after_timeout() {
        let server = scripted_server().await;
        let mut c = client(&server, Mode::Udpr, b"retry", 8).await;
        let run = tokio::spawn(async move { c.run().await });

        let wait = Duration::from_secs(2);
        let (_, from) = server.recv_from_timeout(wait).await.unwrap();
        server.send_to(&Package::ConnAcc { session_id: 8 }, from).await.unwrap();

        // Ignore the first DATA; the retransmission must be identical.
        let (first, _) = server.recv_from_timeout(wait).await.unwrap();
        let (again, _) = server.recv_from_timeout(wait).await.unwrap();
        assert_eq!(first, again);

        server
            .send_to(&Package::Acc { session_id: 8, pack_id: 0 }, from)
            .await
            .unwrap();
        server.send_to(&Package::Rcvd { session_id: 8 }, from).await.unwrap();
        assert_eq!(run.await.unwrap().unwrap(), Outcome::Delivered);
    }
}
