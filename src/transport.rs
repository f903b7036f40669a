//! One-shot request/response exchanges with peers.
//!
//! Every exchange opens a fresh connection, writes one line, waits for one
//! reply line, and closes. There is no pooling; at a ping per second per
//! node the connection setup cost is irrelevant.

use std::io;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::message;

/// Outcome of an exchange. Callers treat a refused connection differently
/// from a failure after the connection was up (a failed connect marks the
/// peer inactive, anything later leaves the flag alone), so the stages are
/// kept apart.
#[derive(Debug)]
pub enum Outcome {
    /// The peer answered; the reply line, trimmed.
    Reply(String),
    /// Could not connect within the deadline.
    Unreachable(io::Error),
    /// Connected, but the write failed or no reply arrived in time.
    NoReply(io::Error),
}

/// Sends `line` to `endpoint` and waits for a single reply line. The same
/// deadline bounds the connect and the reply read.
pub async fn exchange(endpoint: &str, line: &str, deadline: Duration) -> Outcome {
    let stream = match timeout(deadline, TcpStream::connect(endpoint)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return Outcome::Unreachable(err),
        Err(_) => {
            return Outcome::Unreachable(io::Error::new(
                io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    if let Err(err) = message::write_line(&mut writer, line).await {
        return Outcome::NoReply(err);
    }

    match timeout(deadline, message::read_line(&mut reader)).await {
        Ok(Ok(Some(reply))) => Outcome::Reply(reply),
        Ok(Ok(None)) => Outcome::NoReply(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed without replying",
        )),
        Ok(Err(err)) => Outcome::NoReply(err),
        Err(_) => Outcome::NoReply(io::Error::new(io::ErrorKind::TimedOut, "reply timed out")),
    }
}
