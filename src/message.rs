use std::fmt;
use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Reply sent for every recognized request.
pub const ACK: &str = "OK";

/// Requests exchanged between bullies. Every request carries the sender's
/// listening port, which doubles as its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// The sender is running an election and asks higher ids to suppress it.
    Election { port: u64 },
    /// The sender claims leadership.
    Leader { port: u64 },
    /// Liveness probe.
    Ping { port: u64 },
}

impl Request {
    /// Parses one trimmed wire line. Returns `None` for anything that is not
    /// a well-formed request, including a recognized prefix with a port that
    /// does not parse.
    pub fn parse(line: &str) -> Option<Self> {
        let (prefix, rest) = line.split_once(' ')?;
        let port = rest.parse::<u64>().ok()?;
        match prefix {
            "ELECTION" => Some(Request::Election { port }),
            "LEADER" => Some(Request::Leader { port }),
            "PING" => Some(Request::Ping { port }),
            _ => None,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Election { port } => write!(f, "ELECTION {port}"),
            Request::Leader { port } => write!(f, "LEADER {port}"),
            Request::Ping { port } => write!(f, "PING {port}"),
        }
    }
}

/// Reads one line and strips the trailing newline. `Ok(None)` means the peer
/// closed the connection before sending anything.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

/// Writes `line` with a newline delimiter and flushes so the peer sees it
/// before the connection closes.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
