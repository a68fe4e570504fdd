//! ARFF network stream client.
//!
//! A long-lived, handshake-based protocol client that declares a typed
//! relation schema once per connection and then streams comma-separated
//! attribute rows, one blank line between records. The remote peer is a
//! machine-learning classifier reading the stream as an ARFF document.

use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

/// Stream protocol errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Transport-level connect/send/close failure
    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),
    /// Malformed or out-of-order protocol response
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Operation attempted on a disconnected client
    #[error("client is not connected")]
    NotConnected,
}

/// ARFF attribute type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrType {
    /// `numeric`
    Numeric,
    /// `string`
    Text,
    /// Enumerated set, rendered `{a,b,...}`
    Nominal(Vec<String>),
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrType::Numeric => write!(f, "numeric"),
            AttrType::Text => write!(f, "string"),
            AttrType::Nominal(values) => write!(f, "{{{}}}", values.join(",")),
        }
    }
}

/// One named, typed attribute of the relation schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Attribute type
    pub ty: AttrType,
}

impl Attribute {
    /// Numeric attribute
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: AttrType::Numeric,
        }
    }

    /// String attribute
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: AttrType::Text,
        }
    }

    /// Enumerated attribute
    pub fn nominal(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            ty: AttrType::Nominal(values.iter().map(|v| v.to_string()).collect()),
        }
    }
}

struct Connection<S> {
    io: BufStream<S>,
    header_sent: bool,
}

/// Framed ARFF stream client, one per logical channel.
///
/// States: `Disconnected -> Connected(header unsent) -> Connected(header
/// sent) -> Disconnected`. The schema header goes out exactly once per
/// connection lifetime, lazily before the first row.
pub struct ArffStreamClient<S = TcpStream> {
    relation: String,
    attributes: Vec<Attribute>,
    line_ending: char,
    conn: Option<Connection<S>>,
}

impl<S> ArffStreamClient<S> {
    /// Create a disconnected client for the given relation schema.
    pub fn new(relation: impl Into<String>, attributes: Vec<Attribute>, line_ending: char) -> Self {
        Self {
            relation: relation.into(),
            attributes,
            line_ending,
            conn: None,
        }
    }

    /// Whether a transport is currently attached.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn header_text(&self) -> String {
        use std::fmt::Write;
        let eol = self.line_ending;
        let mut s = String::new();
        let _ = write!(s, "@relation {}{eol}{eol}", self.relation);
        for attr in &self.attributes {
            let _ = write!(s, "@attribute {} {}{eol}", attr.name, attr.ty);
        }
        let _ = write!(s, "{eol}@data{eol}{eol}");
        s
    }

    fn row_text(&self, row: &[String]) -> String {
        let eol = self.line_ending;
        format!("{}{eol}{eol}", row.join(","))
    }
}

impl ArffStreamClient<TcpStream> {
    /// Open a TCP connection and perform the handshake: schema header
    /// followed by one dummy row, priming the peer's input reader.
    ///
    /// On any failure the client is left `Disconnected` with no partial
    /// state.
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        dummy_row: &[String],
    ) -> Result<(), StreamError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(StreamError::Connection)?;
        self.attach(stream);
        if let Err(e) = self.send(dummy_row).await {
            self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ArffStreamClient<S> {
    /// Attach an already-open transport (header not yet sent).
    pub fn attach(&mut self, io: S) {
        self.conn = Some(Connection {
            io: BufStream::new(io),
            header_sent: false,
        });
    }

    /// Serialize one attribute row and send it, emitting the schema
    /// header first if this connection has not sent it yet.
    pub async fn send(&mut self, row: &[String]) -> Result<(), StreamError> {
        let header = if self.conn.as_ref().is_some_and(|c| !c.header_sent) {
            Some(self.header_text())
        } else {
            None
        };
        let line = self.row_text(row);
        let conn = self.conn.as_mut().ok_or(StreamError::NotConnected)?;
        if let Some(header) = header {
            conn.io
                .write_all(header.as_bytes())
                .await
                .map_err(StreamError::Connection)?;
            conn.header_sent = true;
        }
        conn.io
            .write_all(line.as_bytes())
            .await
            .map_err(StreamError::Connection)?;
        conn.io.flush().await.map_err(StreamError::Connection)?;
        Ok(())
    }

    /// Read a textual boolean reply: the line `1` means true, anything
    /// else false. Off the critical path; defined by the protocol.
    pub async fn receive_boolean(&mut self) -> Result<bool, StreamError> {
        let conn = self.conn.as_mut().ok_or(StreamError::NotConnected)?;
        let mut line = String::new();
        let n = conn
            .io
            .read_line(&mut line)
            .await
            .map_err(StreamError::Connection)?;
        if n == 0 {
            return Err(StreamError::Protocol("peer closed before reply".into()));
        }
        Ok(line.trim_end() == "1")
    }

    /// Read a fixed-width big-endian i32 reply.
    pub async fn receive_int(&mut self) -> Result<i32, StreamError> {
        let conn = self.conn.as_mut().ok_or(StreamError::NotConnected)?;
        conn.io.read_i32().await.map_err(StreamError::Connection)
    }

    /// Tear down the transport. Idempotent; safe on a never-connected
    /// client.
    pub async fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.io.flush().await;
            let _ = conn.io.get_mut().shutdown().await;
        }
    }
}
