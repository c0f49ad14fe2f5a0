//! [`Transport`] implementation over an accepted WebSocket.
//!
//! Writes go through an unbounded queue drained by a writer task that owns
//! the socket sink, so this transport queues overlapping writes instead of
//! refusing them; the core's retry path never triggers here.

use fanout_core::{CloseCode, Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Commands handed to the writer task.
#[derive(Debug)]
pub enum WsCommand {
    /// Write one text frame.
    Text(String),
    /// Send a close frame and stop writing.
    Close(CloseCode, String),
}

/// Write half of one accepted WebSocket connection.
#[derive(Debug)]
pub struct WsTransport {
    tx: mpsc::UnboundedSender<WsCommand>,
    open: AtomicBool,
}

impl WsTransport {
    /// Create a transport and the command receiver its writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WsCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                open: AtomicBool::new(true),
            },
            rx,
        )
    }
}

impl Transport for WsTransport {
    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(WsCommand::Text(text.to_string()))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        // Only the first close reaches the wire.
        if self.open.swap(false, Ordering::AcqRel) {
            self.tx
                .send(WsCommand::Close(code, reason.to_string()))
                .map_err(|_| TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_queues_text() {
        let (transport, mut rx) = WsTransport::new();
        transport.send_text("hello").unwrap();

        match rx.try_recv().unwrap() {
            WsCommand::Text(text) => assert_eq!(text, "hello"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_close_queues_close_frame() {
        let (transport, mut rx) = WsTransport::new();
        transport.close(CloseCode::Normal, "Expired").unwrap();

        match rx.try_recv().unwrap() {
            WsCommand::Close(code, reason) => {
                assert_eq!(code, CloseCode::Normal);
                assert_eq!(reason, "Expired");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_send_after_close_fails() {
        let (transport, _rx) = WsTransport::new();
        transport.close(CloseCode::Normal, "done").unwrap();
        assert!(matches!(
            transport.send_text("late"),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (transport, mut rx) = WsTransport::new();
        transport.close(CloseCode::Normal, "first").unwrap();
        transport.close(CloseCode::Normal, "second").unwrap();

        assert!(matches!(rx.try_recv(), Ok(WsCommand::Close(_, _))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_to_dropped_receiver_fails() {
        let (transport, rx) = WsTransport::new();
        drop(rx);
        assert!(matches!(
            transport.send_text("hello"),
            Err(TransportError::Closed)
        ));
    }
}
