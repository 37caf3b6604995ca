//! Recover the live client version after the server reports ours as outdated.
//!
//! The server answers a hello with [`codes::TOO_HIGH`] when the major (or the
//! build within the right major) is ahead of the live one, and with
//! [`codes::FINGERPRINT`] once both match. Walking each number upward one
//! step at a time therefore finds the live version.

use log::{debug, info, warn};
use tokio::sync::mpsc;

use super::{Handshake, HandshakeInfo, ProtocolError, codes};
use crate::engine::models::VersionState;
use crate::engine::state::Event;

pub const DEFAULT_MAX_STEPS: usize = 10_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub version: VersionState,
    /// Asset host and fingerprint from the final, accepted handshake.
    pub info: Option<HandshakeInfo>,
}

pub struct VersionProber<'a, H> {
    oracle: &'a H,
    events: &'a mpsc::UnboundedSender<Event>,
    max_steps: usize,
    steps: usize,
}

impl<'a, H: Handshake> VersionProber<'a, H> {
    pub fn new(oracle: &'a H, events: &'a mpsc::UnboundedSender<Event>) -> Self {
        Self {
            oracle,
            events,
            max_steps: DEFAULT_MAX_STEPS,
            steps: 0,
        }
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub async fn probe(mut self, start: VersionState) -> Result<ProbeOutcome, ProtocolError> {
        info!(
            "probe: searching live version from major {} build {}",
            start.major, start.build
        );
        let mut version = VersionState {
            major: start.major,
            build: 0,
        };

        // A build that is too high would also answer TOO_HIGH, so search the
        // major with build 0 first.
        loop {
            version.major = self.step(version.major)?;
            if self.attempt(version).await?.code == codes::TOO_HIGH {
                break;
            }
        }
        version.major -= 1;

        version.build = start.build;
        let restored = self.attempt(version).await?;
        let accepted = if restored.code == codes::FINGERPRINT {
            restored
        } else {
            if restored.code == codes::TOO_HIGH {
                debug!("probe: build {} too high for major {}", start.build, version.major);
                version.build = 0;
            }
            loop {
                version.build = self.step(version.build)?;
                let reply = self.attempt(version).await?;
                if reply.code == codes::FINGERPRINT {
                    break reply;
                }
            }
        };

        let info = match accepted.into_result() {
            Ok(info) => Some(info),
            Err(err) => {
                warn!("probe: accepted handshake carried no usable assets ({err})");
                None
            }
        };
        info!(
            "probe: live version is major {} build {} ({} handshakes)",
            version.major, version.build, self.steps
        );
        let _ = self.events.send(Event::VersionProbed {
            major: version.major,
            build: version.build,
        });
        Ok(ProbeOutcome { version, info })
    }

    /// The next number to try; running off the end of `u32` ends the search.
    fn step(&self, value: u32) -> Result<u32, ProtocolError> {
        value
            .checked_add(1)
            .ok_or(ProtocolError::ProbeExhausted(self.steps))
    }

    async fn attempt(&mut self, version: VersionState) -> Result<super::LoginFailed, ProtocolError> {
        if self.steps >= self.max_steps {
            return Err(ProtocolError::ProbeExhausted(self.steps));
        }
        self.steps += 1;
        let _ = self.events.send(Event::ProbeAttempt {
            major: version.major,
            build: version.build,
        });
        let reply = self.oracle.login(version).await?;
        debug!(
            "probe: major {} build {} -> code {}",
            version.major, version.build, reply.code
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::protocol::tests::login_failed_payload;
    use crate::protocol::{LoginFailed, ServerMessage};

    /// Live version is (5, 3); anything ahead answers TOO_HIGH.
    struct StubServer {
        live: VersionState,
        seen: Mutex<Vec<VersionState>>,
    }

    impl StubServer {
        fn new(major: u32, build: u32) -> Self {
            Self {
                live: VersionState { major, build },
                seen: Mutex::new(Vec::new()),
            }
        }

        fn code_for(&self, version: VersionState) -> i32 {
            if version.major > self.live.major
                || (version.major == self.live.major && version.build > self.live.build)
            {
                codes::TOO_HIGH
            } else if version == self.live {
                codes::FINGERPRINT
            } else {
                codes::OUTDATED
            }
        }
    }

    impl Handshake for StubServer {
        async fn login(&self, version: VersionState) -> Result<LoginFailed, ProtocolError> {
            self.seen.lock().unwrap().push(version);
            let code = self.code_for(version);
            LoginFailed::parse(ServerMessage {
                id: 20103,
                payload: login_failed_payload(code, Some("{}"), &["https://assets.example"]),
            })
        }
    }

    #[tokio::test]
    async fn finds_live_version_from_below() {
        let server = StubServer::new(5, 3);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = VersionProber::new(&server, &tx)
            .probe(VersionState { major: 1, build: 1 })
            .await
            .unwrap();

        assert_eq!(outcome.version, VersionState { major: 5, build: 3 });
        let info = outcome.info.unwrap();
        assert_eq!(info.asset_host, "https://assets.example");

        let seen = server.seen.lock().unwrap().clone();
        assert_eq!(
            seen.first(),
            Some(&VersionState { major: 2, build: 0 })
        );
        assert_eq!(seen.last(), Some(&VersionState { major: 5, build: 3 }));

        drop(tx);
        let mut probed = 0;
        let mut attempts = 0;
        while let Some(event) = rx.recv().await {
            match event {
                Event::VersionProbed { major, build } => {
                    probed += 1;
                    assert_eq!((major, build), (5, 3));
                }
                Event::ProbeAttempt { .. } => attempts += 1,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(probed, 1);
        assert_eq!(attempts, seen.len());
    }

    #[tokio::test]
    async fn resets_build_when_known_build_is_too_high() {
        let server = StubServer::new(5, 3);
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = VersionProber::new(&server, &tx)
            .probe(VersionState { major: 4, build: 40 })
            .await
            .unwrap();
        assert_eq!(outcome.version, VersionState { major: 5, build: 3 });

        let seen = server.seen.lock().unwrap().clone();
        assert!(seen.contains(&VersionState { major: 5, build: 40 }));
        assert!(seen.contains(&VersionState { major: 5, build: 1 }));
    }

    #[tokio::test]
    async fn keeps_known_build_when_it_is_live() {
        let server = StubServer::new(5, 3);
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = VersionProber::new(&server, &tx)
            .probe(VersionState { major: 4, build: 3 })
            .await
            .unwrap();
        assert_eq!(outcome.version, VersionState { major: 5, build: 3 });
        assert_eq!(
            server.seen.lock().unwrap().last(),
            Some(&VersionState { major: 5, build: 3 })
        );
    }

    #[tokio::test]
    async fn gives_up_after_step_ceiling() {
        let server = StubServer::new(500, 3);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = VersionProber::new(&server, &tx)
            .with_max_steps(10)
            .probe(VersionState { major: 1, build: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ProbeExhausted(10)));
    }

    /// Answers TOO_HIGH on the major alone and accepts exactly (5, 3).
    struct MajorCeilingServer {
        seen: Mutex<Vec<VersionState>>,
    }

    impl Handshake for MajorCeilingServer {
        async fn login(&self, version: VersionState) -> Result<LoginFailed, ProtocolError> {
            self.seen.lock().unwrap().push(version);
            let code = match (version.major, version.build) {
                (major, _) if major > 5 => codes::TOO_HIGH,
                (5, 3) => codes::FINGERPRINT,
                _ => codes::OUTDATED,
            };
            LoginFailed::parse(ServerMessage {
                id: 20103,
                payload: login_failed_payload(code, Some("{}"), &["https://assets.example"]),
            })
        }
    }

    #[tokio::test]
    async fn finds_version_against_major_only_ceiling() {
        let server = MajorCeilingServer {
            seen: Mutex::new(Vec::new()),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = VersionProber::new(&server, &tx)
            .probe(VersionState { major: 1, build: 1 })
            .await
            .unwrap();
        assert_eq!(outcome.version, VersionState { major: 5, build: 3 });

        let seen = server.seen.lock().unwrap().clone();
        assert!(seen.contains(&VersionState { major: 6, build: 0 }));
        assert_eq!(seen.last(), Some(&VersionState { major: 5, build: 3 }));

        drop(tx);
        let mut found = Vec::new();
        while let Some(event) = rx.recv().await {
            if let Event::VersionProbed { major, build } = event {
                found.push((major, build));
            }
        }
        assert_eq!(found, [(5, 3)]);
    }

    /// Never accepts and never says TOO_HIGH below major 6.
    struct NeverLiveServer;

    impl Handshake for NeverLiveServer {
        async fn login(&self, version: VersionState) -> Result<LoginFailed, ProtocolError> {
            let code = if version.major > 5 {
                codes::TOO_HIGH
            } else {
                codes::OUTDATED
            };
            LoginFailed::parse(ServerMessage {
                id: 20103,
                payload: login_failed_payload(code, None, &[]),
            })
        }
    }

    #[tokio::test]
    async fn major_overflow_ends_search_with_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = VersionProber::new(&NeverLiveServer, &tx)
            .probe(VersionState {
                major: u32::MAX,
                build: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ProbeExhausted(0)));
    }

    #[tokio::test]
    async fn build_overflow_ends_search_with_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = VersionProber::new(&NeverLiveServer, &tx)
            .probe(VersionState {
                major: 4,
                build: u32::MAX - 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ProbeExhausted(_)));
    }
}
