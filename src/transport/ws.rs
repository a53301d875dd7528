use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, handshake::client::Request, Message};

use super::{Connection, Connector, Transport, TransportEvent, CLOSE_ABNORMAL};
use crate::error::TransportError;

/// WebSocket client transport backed by `tokio-tungstenite`.
///
/// `open` validates the URL synchronously and hands the handshake to a
/// background task, so it must be called from within a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &str) -> Result<Connection, TransportError> {
        let request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let (event_tx, events) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(request, out_rx, event_tx));

        Ok(Connection {
            transport: Box::new(WsTransport { outbound: Some(out_tx) }),
            events,
        })
    }
}

struct WsTransport {
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Transport for WsTransport {
    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let tx = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame.to_string()).map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        // socket task sends a close frame once the outbound side hangs up
        self.outbound = None;
    }
}

async fn run_socket(
    request: Request,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let ws = tokio::select! {
        res = tokio_tungstenite::connect_async(request) => match res {
            Ok((ws, _resp)) => ws,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                let _ = events.send(TransportEvent::Close {
                    code: CLOSE_ABNORMAL,
                    reason: "handshake failed".to_string(),
                });
                return;
            }
        },
        _ = events.closed() => return,
    };

    let (mut sink, mut stream) = ws.split();
    if events.send(TransportEvent::Open).is_err() {
        let _ = sink.close().await;
        return;
    }

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        let _ = events.send(TransportEvent::Close {
                            code: CLOSE_ABNORMAL,
                            reason: "write failed".to_string(),
                        });
                        return;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text.as_str().to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = events.send(TransportEvent::Message(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((1005, String::new()));
                    let _ = events.send(TransportEvent::Close { code, reason });
                    return;
                }
                // protocol-level ping/pong is answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    let _ = events.send(TransportEvent::Close {
                        code: CLOSE_ABNORMAL,
                        reason: "read failed".to_string(),
                    });
                    return;
                }
                None => {
                    let _ = events.send(TransportEvent::Close {
                        code: CLOSE_ABNORMAL,
                        reason: "stream ended".to_string(),
                    });
                    return;
                }
            },
            _ = events.closed() => {
                let _ = sink.close().await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_url_synchronously() {
        let err = WsConnector.open("not a url").err().unwrap();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn unreachable_host_reports_error_then_close() {
        // port 9 on loopback is closed on any sane test host
        let mut conn = WsConnector.open("ws://127.0.0.1:9/ws").unwrap();
        let first = conn.events.recv().await.unwrap();
        assert!(matches!(first, TransportEvent::Error(_)));
        let second = conn.events.recv().await.unwrap();
        assert!(matches!(second, TransportEvent::Close { code: CLOSE_ABNORMAL, .. }));
    }
}
