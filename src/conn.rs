//! Connection FSM (spec §3, §4.2, §4.5): owns the socket, drives the
//! startup handshake and SCRAM authentication, and executes queries via
//! [`crate::query::flow`]. Grounded on the teacher's `src/pg/conn.rs`
//! (`Connection::connect`/`startup`/`authenticate`), generalized from
//! Postgres's auth-method menu to this protocol's SASL-only handshake and
//! promoted from panics to typed `Protocol` errors per §7.

use std::collections::BTreeMap;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net;
use tracing::{debug, trace};
use url::Url;

use crate::error::ClientError;
use crate::protocol::frame::{FrameReader, FrameWriter};
use crate::protocol::message::{self, AuthStatus, Capabilities, Cardinality, ClientHandshake, IoFormat, ServerHandshake, TransactionState};
use crate::protocol::scram::ScramClient;
use crate::protocol::tags;
use crate::query::flow::{QueryCaches, QueryOutcome, QueryRequest, QueryTransport};
use crate::stream::Stream;
use crate::value::Value;

type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
  pub user: String,
  pub password: Option<String>,
  pub database: Option<String>,
  pub connect_timeout: Option<Duration>,
  pub read_timeout: Option<Duration>,
  pub write_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    Self {
      user: "edgedb".to_string(),
      password: None,
      database: Some("edgedb".to_string()),
      connect_timeout: None,
      read_timeout: None,
      write_timeout: None,
    }
  }
}

impl TryFrom<&Url> for ConnectionOptions {
  type Error = ClientError;

  fn try_from(url: &Url) -> Result<Self> {
    let user = match url.username() {
      "" => "edgedb".to_string(),
      user => user.to_string(),
    };
    let password = url.password().map(ToString::to_string);
    let query_pairs = url.query_pairs().collect::<BTreeMap<_, _>>();
    let database = Some(
      query_pairs
        .get("database")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "edgedb".to_string()),
    );

    let millis = |key: &str| query_pairs.get(key).and_then(|v| v.parse().ok()).map(Duration::from_millis);

    Ok(Self {
      user,
      password,
      database,
      connect_timeout: millis("connect_timeout_ms"),
      read_timeout: millis("read_timeout_ms"),
      write_timeout: millis("write_timeout_ms"),
    })
  }
}

/// Connection FSM states (spec §3). A connection rejects operations that
/// don't fit its current state with `ClientError::Protocol` rather than
/// panicking — the teacher's `panic!("Unexpected backend message...")`
/// becomes a typed, catchable error here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Dialing,
  Handshaking,
  Authenticating,
  Ready,
  InTransaction,
  Busy,
  Closed,
  Unusable,
}

#[derive(Debug)]
pub struct Connection {
  stream: Stream,
  options: ConnectionOptions,
  state: ConnectionState,
  reader: FrameReader,
  server_pid: Option<i32>,
  server_secret_key: Option<[u8; 32]>,
  params: BTreeMap<String, Vec<u8>>,
}

impl Connection {
  pub async fn connect_from_url(url: &Url) -> Result<Self> {
    match url.scheme() {
      "tcp" | "edgedb" | "gel" => {
        let port = url.port().unwrap_or(5656);
        let addrs = match url.host() {
          Some(url::Host::Domain(domain)) => net::lookup_host(format!("{domain}:{port}"))
            .await
            .map_err(ClientError::from)
            .map(|v| v.collect::<Vec<_>>())?,
          Some(url::Host::Ipv4(ip)) => vec![SocketAddrV4::new(ip, port).into()],
          Some(url::Host::Ipv6(ip)) => vec![SocketAddrV6::new(ip, port, 0, 0).into()],
          None => vec![format!("[::1]:{port}").parse().unwrap()],
        };
        let options = url.try_into()?;
        Self::connect_tcp(addrs, options).await
      }
      "unix" => {
        let options = url.try_into()?;
        Self::connect_unix(url.path(), options).await
      }
      scheme => Err(ClientError::Protocol(format!("unsupported connection scheme {scheme:?}"))),
    }
  }

  pub async fn connect_tcp(addrs: impl Into<Vec<SocketAddr>>, options: ConnectionOptions) -> Result<Self> {
    let stream = Self::with_connect_timeout(&options, Stream::connect_tcp(addrs)).await?;
    Self::connect(stream, options).await
  }

  pub async fn connect_unix(path: impl Into<PathBuf>, options: ConnectionOptions) -> Result<Self> {
    let stream = Self::with_connect_timeout(&options, Stream::connect_unix(path)).await?;
    Self::connect(stream, options).await
  }

  async fn with_connect_timeout(options: &ConnectionOptions, fut: impl std::future::Future<Output = std::io::Result<Stream>>) -> Result<Stream> {
    match options.connect_timeout {
      Some(timeout) => tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ClientError::ConnectionTimeout)
        .and_then(|r| r.map_err(ClientError::from)),
      None => fut.await.map_err(ClientError::from),
    }
  }

  async fn connect(stream: Stream, options: ConnectionOptions) -> Result<Self> {
    let mut conn = Self {
      stream,
      options,
      state: ConnectionState::Dialing,
      reader: FrameReader::new(),
      server_pid: None,
      server_secret_key: None,
      params: BTreeMap::new(),
    };
    conn.handshake().await?;
    Ok(conn)
  }

  pub fn state(&self) -> ConnectionState {
    self.state
  }

  pub fn is_usable(&self) -> bool {
    !matches!(self.state, ConnectionState::Closed | ConnectionState::Unusable)
  }

  /// Marks the connection unusable without touching the socket, used by
  /// the pool after observing a caller-side timeout on an operation it was
  /// driving (spec §4.6: "a timeout marks the connection unusable").
  pub fn mark_unusable(&mut self) {
    self.state = ConnectionState::Unusable;
  }

  async fn handshake(&mut self) -> Result<()> {
    self.state = ConnectionState::Handshaking;

    let handshake = ClientHandshake::new(&self.options.user, self.options.database.as_deref().unwrap_or("edgedb"));
    let mut w = FrameWriter::new();
    handshake.encode(&mut w);
    self.write_frame(w.unwrap()).await?;

    let (tag, mut body) = self.read_packet().await?;
    match tag {
      tags::server::SERVER_HANDSHAKE => {
        let server_handshake = ServerHandshake::decode(&mut body)?;
        if !server_handshake.is_compatible() {
          return self.fail(ClientError::Protocol(format!(
            "server protocol major version {} is incompatible with client {}",
            server_handshake.major,
            message::PROTOCOL_MAJOR
          )));
        }
        let (tag, body) = self.read_packet().await?;
        self.authenticate(tag, body).await
      }
      tags::server::AUTHENTICATION => self.authenticate(tag, body).await,
      tags::server::ERROR_RESPONSE => {
        let detail = message::decode_error_response(&mut body)?;
        self.fail(ClientError::Authentication(detail.to_string()))
      }
      other => self.fail(ClientError::Protocol(format!("unexpected message {other:#04x} during handshake"))),
    }
  }

  async fn authenticate(&mut self, mut tag: u8, mut body: Bytes) -> Result<()> {
    self.state = ConnectionState::Authenticating;
    let mut scram: Option<ScramClient> = None;

    loop {
      match tag {
        tags::server::AUTHENTICATION => match AuthStatus::decode(&mut body)? {
          AuthStatus::Ok => break,
          AuthStatus::SaslRequired { mechanisms } => {
            if !mechanisms.iter().any(|m| m == crate::protocol::scram::MECHANISM) {
              return self.fail(ClientError::Authentication(format!(
                "server does not support {}",
                crate::protocol::scram::MECHANISM
              )));
            }
            let client = ScramClient::new();
            let mut w = FrameWriter::new();
            w.begin_message(tags::client::AUTH_SASL_INITIAL_RESPONSE);
            w.put_string(crate::protocol::scram::MECHANISM);
            w.put_string(&client.client_first_message());
            w.end_message();
            self.write_frame(w.unwrap()).await?;
            scram = Some(client);
          }
          AuthStatus::SaslContinue { data } => {
            let client = scram
              .as_mut()
              .ok_or_else(|| ClientError::Protocol("SASLContinue before SASLInitialResponse".into()))?;
            let server_first = String::from_utf8(data).map_err(|err| ClientError::Protocol(format!("invalid SCRAM utf8: {err}")))?;
            let password = self
              .options
              .password
              .as_deref()
              .ok_or_else(|| ClientError::Authentication("password is required".into()))?;
            let client_final = client.client_final_message(&server_first, password.as_bytes())?;
            let mut w = FrameWriter::new();
            w.begin_message(tags::client::AUTH_SASL_RESPONSE);
            w.put_string(&client_final);
            w.end_message();
            self.write_frame(w.unwrap()).await?;
          }
          AuthStatus::SaslFinal { data } => {
            let client = scram
              .as_ref()
              .ok_or_else(|| ClientError::Protocol("SASLFinal before SASLInitialResponse".into()))?;
            let server_final = String::from_utf8(data).map_err(|err| ClientError::Protocol(format!("invalid SCRAM utf8: {err}")))?;
            client.verify_server_final(&server_final)?;
          }
        },
        tags::server::ERROR_RESPONSE => {
          let detail = message::decode_error_response(&mut body)?;
          return self.fail(ClientError::Authentication(detail.to_string()));
        }
        other => return self.fail(ClientError::Protocol(format!("unexpected message {other:#04x} during authentication"))),
      }
      let next = self.read_packet().await?;
      tag = next.0;
      body = next.1;
    }

    self.drain_startup().await
  }

  /// Consumes ParameterStatus/ServerKeyData frames until ReadyForCommand,
  /// which promotes the connection to `Ready`.
  async fn drain_startup(&mut self) -> Result<()> {
    loop {
      let (tag, mut body) = self.read_packet().await?;
      match tag {
        tags::server::PARAMETER_STATUS => {
          let (name, value) = message::decode_parameter_status(&mut body)?;
          trace!(name, "received ParameterStatus");
          self.params.insert(name, value);
        }
        tags::server::SERVER_KEY_DATA => {
          self.server_secret_key = Some(message::decode_server_key_data(&mut body)?);
        }
        tags::server::READY_FOR_COMMAND => {
          let txn_state = message::decode_ready_for_command(&mut body)?;
          self.state = Self::state_for(txn_state);
          debug!(?txn_state, "connection ready");
          return Ok(());
        }
        tags::server::ERROR_RESPONSE => {
          let detail = message::decode_error_response(&mut body)?;
          return self.fail(ClientError::Authentication(detail.to_string()));
        }
        other => return self.fail(ClientError::Protocol(format!("unexpected message {other:#04x} during startup"))),
      }
    }
  }

  fn state_for(txn_state: TransactionState) -> ConnectionState {
    match txn_state {
      TransactionState::Idle => ConnectionState::Ready,
      TransactionState::InTransaction | TransactionState::InTransactionError => ConnectionState::InTransaction,
    }
  }

  fn fail<T>(&mut self, err: ClientError) -> Result<T> {
    if err.poisons_connection() {
      self.state = ConnectionState::Unusable;
    }
    Err(err)
  }

  async fn write_frame(&mut self, frame: Bytes) -> Result<()> {
    let fut = async {
      self.stream.write_all(&frame).await?;
      self.stream.flush().await
    };
    let result = match self.options.write_timeout {
      Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| std::io::ErrorKind::TimedOut.into()).and_then(|r| r),
      None => fut.await,
    };
    result.map_err(|err| self.poison_from_io(err))
  }

  async fn read_packet(&mut self) -> Result<(u8, Bytes)> {
    loop {
      match self.reader.next() {
        Ok(true) => {
          let body = std::mem::take(&mut self.reader.body);
          return Ok((self.reader.msg_type, body));
        }
        Ok(false) => {}
        Err(err) => {
          self.state = ConnectionState::Unusable;
          return Err(err);
        }
      }

      let fut = async {
        let mut buf = [0u8; 8192];
        let n = self.stream.read(&mut buf).await?;
        Ok::<_, std::io::Error>((buf, n))
      };
      let read = match self.options.read_timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| std::io::ErrorKind::TimedOut.into()).and_then(|r| r),
        None => fut.await,
      };

      match read {
        Ok((_buf, 0)) => {
          self.reader.poison();
          self.state = ConnectionState::Unusable;
          return Err(ClientError::ConnectionClosed(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "server closed the connection",
          )));
        }
        Ok((buf, n)) => self.reader.feed(&buf[..n]),
        Err(err) => return Err(self.poison_from_io(err)),
      }
    }
  }

  fn poison_from_io(&mut self, err: std::io::Error) -> ClientError {
    self.state = ConnectionState::Unusable;
    ClientError::from(err)
  }

  /// Runs one query through the granular flow (spec §4.5). `caches` is
  /// shared across every connection drawing from the same pool.
  pub async fn query(&mut self, caches: &QueryCaches, req: QueryRequest<'_>) -> Result<QueryOutcome> {
    if !matches!(self.state, ConnectionState::Ready | ConnectionState::InTransaction) {
      return Err(ClientError::Protocol(format!(
        "cannot issue a query while the connection is in state {:?}",
        self.state
      )));
    }

    self.state = ConnectionState::Busy;
    let outcome = crate::query::flow::execute(self, caches, req).await;
    match &outcome {
      Ok(_) => self.state = ConnectionState::Ready,
      Err(err) if err.poisons_connection() => self.state = ConnectionState::Unusable,
      Err(_) => self.state = ConnectionState::Ready,
    }
    outcome
  }

  pub async fn close(mut self) -> Result<()> {
    let mut w = FrameWriter::new();
    message::encode_terminate(&mut w);
    let result = self.write_frame(w.unwrap()).await;
    self.state = ConnectionState::Closed;
    result
  }

  /// Convenience used by §4.6's pool factory: a fresh physical connection
  /// to the same peer with the same options.
  pub async fn duplicate(&self) -> Result<Self> {
    let stream = Self::with_connect_timeout(&self.options, async { self.stream.duplicate().await }).await?;
    Self::connect(stream, self.options.clone()).await
  }
}

impl QueryTransport for Connection {
  async fn send(&mut self, frame: Bytes) -> Result<()> {
    self.write_frame(frame).await
  }

  async fn recv(&mut self) -> Result<(u8, Bytes)> {
    self.read_packet().await
  }
}

/// Convenience wrapper issuing a query and marshaling every row into `T`
/// (spec §4.7), with the cardinality already enforced by the flow.
pub async fn query_rows<T: crate::marshal::FromRow>(
  conn: &mut Connection,
  caches: &QueryCaches,
  command: &str,
  io_format: IoFormat,
  expected_cardinality: Cardinality,
  arguments: Value,
  capabilities: Capabilities,
) -> Result<Vec<T>> {
  let outcome = conn
    .query(
      caches,
      QueryRequest {
        command,
        io_format,
        expected_cardinality,
        arguments,
        capabilities,
      },
    )
    .await?;
  crate::marshal::marshal_rows(outcome.rows)
}
