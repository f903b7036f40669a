//! Wire-level behavior of a live listener: one request line in, one `OK`
//! out, connection closed, and the documented handling of junk input.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bully::{config::Settings, node::BullyNode};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    time::{sleep, timeout, Instant},
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Grabs a free loopback port by binding an ephemeral listener and dropping it.
async fn reserve_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// A node whose monitor is effectively frozen, so tests observe dispatcher
/// effects without the health check interfering.
async fn spawn_quiet_node(listen_port: u16, peer_port: u16) -> Result<Arc<BullyNode>> {
    let settings = Settings {
        listen: format!("127.0.0.1:{listen_port}"),
        peers: vec![format!("127.0.0.1:{peer_port}")],
        ping_interval: Duration::from_secs(600),
        response_timeout: Duration::from_millis(200),
    };
    let node = Arc::new(BullyNode::new(settings)?);
    Arc::clone(&node).spawn().await?;
    Ok(node)
}

async fn send_request(addr: &str, line: &str) -> Result<Option<String>> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut reply = String::new();
    let bytes = timeout(READ_TIMEOUT, reader.read_line(&mut reply)).await??;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(reply.trim_end_matches(['\r', '\n']).to_string()))
}

#[tokio::test]
async fn ping_is_always_acknowledged() -> Result<()> {
    let listen = reserve_port().await?;
    let peer = reserve_port().await?;
    let node = spawn_quiet_node(listen, peer).await?;
    let addr = format!("127.0.0.1:{listen}");

    assert_eq!(send_request(&addr, "PING 1").await?.as_deref(), Some("OK"));

    // Still acknowledged once the node considers itself leader.
    node.announce_election(bully::node::Trigger::SelfInitiated)
        .await;
    assert!(node.is_leader().await);
    assert_eq!(send_request(&addr, "PING 1").await?.as_deref(), Some("OK"));

    Ok(())
}

#[tokio::test]
async fn invalid_line_gets_no_reply_and_listener_survives() -> Result<()> {
    let listen = reserve_port().await?;
    let peer = reserve_port().await?;
    let node = spawn_quiet_node(listen, peer).await?;
    let addr = format!("127.0.0.1:{listen}");

    // Unknown prefix, bare prefix, and a bad port: all dropped silently.
    assert_eq!(send_request(&addr, "HELLO 123").await?, None);
    assert_eq!(send_request(&addr, "PING").await?, None);
    assert_eq!(send_request(&addr, "LEADER notaport").await?, None);

    // No registry flag moved.
    assert!(!node.is_leader().await);
    assert_eq!(node.leader_id().await, None);

    // And the listener keeps serving.
    assert_eq!(send_request(&addr, "PING 1").await?.as_deref(), Some("OK"));

    Ok(())
}

#[tokio::test]
async fn leader_claim_is_acknowledged_and_committed() -> Result<()> {
    let listen = reserve_port().await?;
    let peer = reserve_port().await?;
    let node = spawn_quiet_node(listen, peer).await?;
    let addr = format!("127.0.0.1:{listen}");

    let claim = format!("LEADER {peer}");
    assert_eq!(send_request(&addr, &claim).await?.as_deref(), Some("OK"));

    // The dispatcher commits the claim on a spawned task; poll briefly.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if node.leader_id().await == Some(peer as u64) {
            break;
        }
        assert!(Instant::now() < deadline, "leader claim was not committed");
        sleep(Duration::from_millis(20)).await;
    }
    assert!(!node.is_leader().await);

    Ok(())
}

#[tokio::test]
async fn election_from_lower_id_does_not_suppress() -> Result<()> {
    let listen = reserve_port().await?;
    let peer = reserve_port().await?;
    let node = spawn_quiet_node(listen, peer).await?;
    let addr = format!("127.0.0.1:{listen}");

    // A node with id 1 announces an election. Lower ids are skipped in the
    // suppression scan, and no live higher id exists, so this node claims
    // leadership for itself.
    assert_eq!(send_request(&addr, "ELECTION 1").await?.as_deref(), Some("OK"));

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if node.is_leader().await {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "node never claimed leadership after a lower-id election"
        );
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(node.leader_id().await, Some(listen as u64));

    Ok(())
}

#[tokio::test]
async fn starting_without_peers_is_a_configuration_error() -> Result<()> {
    let listen = reserve_port().await?;
    // The only configured peer is the node itself, so the registry is empty.
    let settings = Settings {
        listen: format!("127.0.0.1:{listen}"),
        peers: vec![format!("localhost:{listen}")],
        ping_interval: Duration::from_secs(1),
        response_timeout: Duration::from_secs(1),
    };
    let node = Arc::new(BullyNode::new(settings)?);
    assert!(Arc::clone(&node).spawn().await.is_err());
    Ok(())
}
