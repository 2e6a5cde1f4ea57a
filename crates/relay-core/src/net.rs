//! TCP helpers shared by the proxy and the bridge.

use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{RelayError, RelayResult};

/// Disable Nagle and enable keep-alive on an established stream.
pub fn tune_stream(stream: &TcpStream) -> RelayResult<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)?;
    Ok(())
}

/// Dial `addr` within `timeout` and tune the resulting stream.
///
/// Refusal and other connect errors map to [`RelayError::BackendUnavailable`];
/// an expired deadline maps to [`RelayError::Timeout`].
pub async fn dial(addr: &str, timeout: Duration) -> RelayResult<TcpStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(RelayError::BackendUnavailable(format!("{addr}: {e}"))),
        Err(_) => return Err(RelayError::Timeout),
    };
    tune_stream(&stream)?;
    debug!(addr, "dialed");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dial_connects_and_tunes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let stream = dial(&addr, Duration::from_secs(5)).await.unwrap();
        assert!(stream.nodelay().unwrap());
        assert!(SockRef::from(&stream).keepalive().unwrap());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn dial_refused_is_backend_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = dial(&addr, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, RelayError::BackendUnavailable(_)));
    }
}
