use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::codec::{CodecError, Reader, Writer};
use crate::engine::models::VersionState;

pub mod prober;

pub const DEFAULT_ENDPOINT: &str = "game.clashroyaleapp.com:9339";
pub const CLIENT_HELLO_ID: u16 = 10100;
pub const HEADER_LEN: usize = 7;
/// Payload length is carried in three bytes.
pub const MAX_PAYLOAD_LEN: usize = 0x00FF_FFFF;

const PROTOCOL_MAJOR: u32 = 3;
const PROTOCOL_MINOR: u32 = 27;
const HELLO_TRAILER: [u32; 2] = [2, 2];
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Classification codes carried by the login failed message.
pub mod codes {
    pub const FINGERPRINT: i32 = 7;
    pub const OUTDATED: i32 = 8;
    pub const TOO_HIGH: i32 = 9;
    pub const MAINTENANCE: i32 = 10;
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("client version is outdated")]
    VersionOutdated,
    #[error("server is in maintenance")]
    ServerMaintenance,
    #[error("server did not advertise any asset host")]
    NoAssetHost,
    #[error("unknown login failed code {0}")]
    UnknownErrorCode(i32),
    #[error("malformed server message: {0}")]
    Codec(#[from] CodecError),
    #[error("connection to {endpoint} failed: {source}")]
    Io {
        endpoint: String,
        source: std::io::Error,
    },
    #[error("timed out talking to {0}")]
    Timeout(String),
    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLarge(usize),
    #[error("version probe gave up after {0} handshakes")]
    ProbeExhausted(usize),
}

/// One framed message as exchanged over the game connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerMessage {
    pub id: u16,
    pub payload: Vec<u8>,
}

impl ServerMessage {
    /// Frame layout: id (2 BE), payload length (3 BE), two reserved bytes, payload.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge(len));
        }
        let mut frame = Vec::with_capacity(HEADER_LEN + len);
        frame.extend_from_slice(&self.id.to_be_bytes());
        frame.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }

    /// Split a header into message id and payload length.
    #[must_use]
    pub fn parse_header(header: &[u8; HEADER_LEN]) -> (u16, usize) {
        let id = u16::from_be_bytes([header[0], header[1]]);
        let len = u32::from_be_bytes([0, header[2], header[3], header[4]]) as usize;
        (id, len)
    }
}

/// Build the version handshake for the given client version.
#[must_use]
pub fn client_hello(version: VersionState) -> ServerMessage {
    let mut writer = Writer::new();
    writer.write_u32_be(PROTOCOL_MAJOR);
    writer.write_u32_be(PROTOCOL_MINOR);
    writer.write_u32_be(version.major);
    writer.write_u32_be(0);
    writer.write_u32_be(version.build);
    writer.write_string(Some(""));
    for value in HELLO_TRAILER {
        writer.write_u32_be(value);
    }
    ServerMessage {
        id: CLIENT_HELLO_ID,
        payload: writer.into_bytes(),
    }
}

/// Where to download assets from, as announced by the game server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Fingerprint JSON of the live patch, when the server sent one.
    pub fingerprint: Option<String>,
    pub asset_host: String,
}

/// The server's answer to a client hello, with its code already read.
#[derive(Debug, Clone)]
pub struct LoginFailed {
    pub code: i32,
    body: Reader,
}

impl LoginFailed {
    pub fn parse(message: ServerMessage) -> Result<Self, ProtocolError> {
        let mut body = Reader::new(message.payload);
        let code = body.read_varint()?;
        debug!("login failed: message {} carries code {}", message.id, code);
        Ok(Self { code, body })
    }

    /// Classify the response, extracting the asset host on success.
    pub fn into_result(mut self) -> Result<HandshakeInfo, ProtocolError> {
        match self.code {
            codes::FINGERPRINT => self.read_assets(),
            codes::OUTDATED => Err(ProtocolError::VersionOutdated),
            codes::MAINTENANCE => Err(ProtocolError::ServerMaintenance),
            other => Err(ProtocolError::UnknownErrorCode(other)),
        }
    }

    fn read_assets(&mut self) -> Result<HandshakeInfo, ProtocolError> {
        let body = &mut self.body;
        let mut fingerprint = body.read_string()?;
        for _ in 0..3 {
            body.read_string()?;
        }
        body.read_varint()?;
        body.read_u8()?;
        body.read_string()?;

        let host_count = body.read_varint()?;
        if host_count <= 0 {
            return Err(ProtocolError::NoAssetHost);
        }
        let mut hosts = Vec::with_capacity((host_count as usize).min(16));
        for _ in 0..host_count {
            if let Some(host) = body.read_string()? {
                hosts.push(host);
            }
        }
        let asset_host = hosts.into_iter().next().ok_or(ProtocolError::NoAssetHost)?;

        if body.remaining() > 0 {
            match read_trailing_fingerprint(body) {
                Ok(Some(compressed)) => fingerprint = Some(compressed),
                Ok(None) => {}
                Err(err) => debug!("login failed: ignoring trailing block ({err})"),
            }
        }

        Ok(HandshakeInfo {
            fingerprint,
            asset_host,
        })
    }
}

fn read_trailing_fingerprint(body: &mut Reader) -> Result<Option<String>, CodecError> {
    body.read_string()?;
    body.read_u8()?;
    body.read_compressed_string()
}

/// Something that can answer a client hello for a given version.
pub trait Handshake {
    fn login(
        &self,
        version: VersionState,
    ) -> impl Future<Output = Result<LoginFailed, ProtocolError>> + Send;
}

#[derive(Clone, Debug)]
pub struct ProtocolClient {
    endpoint: String,
    timeout: Duration,
}

impl Default for ProtocolClient {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl ProtocolClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one message and wait for the single reply.
    pub async fn round_trip(&self, request: &ServerMessage) -> Result<ServerMessage, ProtocolError> {
        let frame = request.encode()?;
        let endpoint = self.endpoint.clone();
        timeout(self.timeout, self.exchange(&frame))
            .await
            .map_err(|_| {
                warn!("handshake: no answer from {endpoint} within {:?}", self.timeout);
                ProtocolError::Timeout(endpoint)
            })?
    }

    async fn exchange(&self, frame: &[u8]) -> Result<ServerMessage, ProtocolError> {
        let io_err = |source| ProtocolError::Io {
            endpoint: self.endpoint.clone(),
            source,
        };
        let mut stream = TcpStream::connect(&self.endpoint).await.map_err(io_err)?;
        stream.write_all(frame).await.map_err(io_err)?;

        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await.map_err(io_err)?;
        let (id, len) = ServerMessage::parse_header(&header);

        // read_exact keeps reading until the declared length is satisfied.
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.map_err(io_err)?;
        debug!("handshake: received message {id} ({len} bytes)");
        Ok(ServerMessage { id, payload })
    }

    /// Handshake and classify the answer.
    pub async fn fetch_info(&self, version: VersionState) -> Result<HandshakeInfo, ProtocolError> {
        self.login(version).await?.into_result()
    }
}

impl Handshake for ProtocolClient {
    async fn login(&self, version: VersionState) -> Result<LoginFailed, ProtocolError> {
        debug!(
            "handshake: client hello to {} with major {} build {}",
            self.endpoint, version.major, version.build
        );
        let reply = self.round_trip(&client_hello(version)).await?;
        LoginFailed::parse(reply)
    }
}
