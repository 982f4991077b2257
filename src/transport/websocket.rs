//! WebSocket transport
//!
//! Each connection runs as two tokio tasks: a reader that reports inbound
//! frames through the event sink, and a writer fed by an unbounded mpsc so
//! outbound frames keep their send order.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{Connector, InboundFrame, Transport, TransportEvent, TransportSink};
use crate::error::TransportError;

/// Writer commands
enum Outbound {
    Frame(String),
    Close,
}

/// Opens WebSocket connections to a fixed URL
pub struct WsConnector {
    url: String,
    runtime: tokio::runtime::Handle,
}

impl WsConnector {
    /// Must be called from within a tokio runtime
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            runtime: tokio::runtime::Handle::current(),
        }
    }
}

impl Connector for WsConnector {
    fn connect(&mut self, events: TransportSink) {
        let url = self.url.clone();
        self.runtime.spawn(run_connection(url, events));
    }
}

/// Outbound handle of an open WebSocket
pub struct WsTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Transport for WsTransport {
    fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::SendFailed("connection writer has stopped".to_string()))
    }

    fn close(&mut self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

async fn run_connection(url: String, events: TransportSink) {
    tracing::info!("Connecting to {}", url);

    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::error!("Failed to connect to {}: {}", url, e);
            events(TransportEvent::Failed(TransportError::ConnectionFailed(e.to_string())));
            return;
        }
    };
    tracing::info!("Connected to {}", url);

    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    events(TransportEvent::Opened(Box::new(WsTransport { tx })));

    let writer_events = events.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                Outbound::Frame(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        tracing::error!("WebSocket send failed: {}", e);
                        writer_events(TransportEvent::Failed(TransportError::SendFailed(e.to_string())));
                        return;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = write.send(Message::Close(None)).await;
        let _ = write.close().await;
        tracing::debug!("WebSocket writer closed");
    });

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    events(TransportEvent::Frame(InboundFrame::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    events(TransportEvent::Frame(InboundFrame::Binary(data)));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("Server closed the connection: {:?}", frame);
                    events(TransportEvent::Closed);
                    break;
                }
                // Ping/pong is answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("WebSocket receive failed: {}", e);
                    events(TransportEvent::Failed(TransportError::ReceiveFailed(e.to_string())));
                    break;
                }
                None => {
                    events(TransportEvent::Failed(TransportError::AbruptClose));
                    break;
                }
            },
            // Local close or a failed send ends the connection
            _ = &mut writer => return,
        }
    }

    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn recorder() -> (TransportSink, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: TransportSink = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("transport event in time")
            .expect("sink still alive")
    }

    async fn local_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn open(
        url: String,
        events: TransportSink,
        rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Box<dyn Transport> {
        WsConnector::new(url).connect(events);
        match next_event(rx).await {
            TransportEvent::Opened(transport) => transport,
            other => panic!("expected Opened, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_outbound_frames_keep_order() {
        let (listener, url) = local_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Text(text) => received.push(text),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            received
        });

        let (sink, mut events) = recorder();
        let mut transport = open(url, sink, &mut events).await;
        for i in 0..3 {
            transport.send(format!("f{}", i)).unwrap();
        }
        transport.close();

        let received = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server finished")
            .unwrap();
        assert_eq!(received, vec!["f0", "f1", "f2"]);
    }

    #[tokio::test]
    async fn test_inbound_frames_then_clean_close() {
        let (listener, url) = local_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"type":"text","data":"hi"}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
            ws.close(None).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let (sink, mut events) = recorder();
        // Dropping the transport would stop the writer and end the connection
        let _transport = open(url, sink, &mut events).await;

        match next_event(&mut events).await {
            TransportEvent::Frame(InboundFrame::Text(text)) => {
                assert_eq!(text, r#"{"type":"text","data":"hi"}"#)
            }
            other => panic!("expected text frame, got {:?}", other),
        }
        match next_event(&mut events).await {
            TransportEvent::Frame(InboundFrame::Binary(data)) => assert_eq!(data, vec![1, 2, 3]),
            other => panic!("expected binary frame, got {:?}", other),
        }
        assert!(matches!(next_event(&mut events).await, TransportEvent::Closed));
    }

    #[tokio::test]
    async fn test_dropped_socket_reports_failure() {
        let (listener, url) = local_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            drop(ws);
        });

        let (sink, mut events) = recorder();
        let _transport = open(url, sink, &mut events).await;

        assert!(matches!(next_event(&mut events).await, TransportEvent::Failed(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_reports_failure() {
        let (listener, url) = local_server().await;
        drop(listener);

        let (sink, mut events) = recorder();
        WsConnector::new(url).connect(sink);

        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Failed(TransportError::ConnectionFailed(_))
        ));
    }
}
