//! TCP accept loop: one host endpoint per connection.

use postbridge::{Endpoint, EndpointRole, StreamTransport};
use postbridge_chat::{ChatSession, ChatViewClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

/// Start accepting bridge connections.
///
/// Returns the actual address the listener is bound to (useful when port=0).
pub async fn start_server(
    session: Arc<ChatSession>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the accept loop in the background
    tokio::spawn(accept_loop(listener, session));

    Ok(actual_addr)
}

async fn accept_loop(listener: TcpListener, session: Arc<ChatSession>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(serve_connection(stream, peer, session.clone()));
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Serve `chat` to one view until it disconnects.
async fn serve_connection(stream: TcpStream, peer: SocketAddr, session: Arc<ChatSession>) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let host = Endpoint::connect(StreamTransport::from_tcp(stream), EndpointRole::Host);
    let view_id = session.attach_view(ChatViewClient::new(host.handle()));

    let registered = session
        .service(view_id)
        .and_then(|service| host.register_service(service));
    if let Err(e) = registered {
        error!("Failed to register chat service for {}: {}", peer, e);
        session.detach_view(view_id);
        return;
    }

    info!("Serving {} as {}", peer, view_id);
    host.closed().await;

    session.detach_view(view_id);
    info!("{} disconnected", peer);
}
