//! Request/response correlation over a single RIO stream
//!
//! RIO replies carry no request id. The only way to match an `S` or `E` line
//! to its command is position: the device answers commands in order and never
//! interleaves replies. The multiplexer therefore keeps exactly one command
//! on the wire and queues everything else behind it.

use crate::connection::CommandSink;
use crate::error::{Result, RussoundError};
use crate::protocol::{MessageKind, WireMessage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;

type Reply = Result<Option<String>>;

/// A command waiting for its reply
struct PendingRequest {
    command: String,
    responder: oneshot::Sender<Reply>,
}

impl PendingRequest {
    fn complete(self, reply: Reply) {
        // The caller may have timed out and dropped its receiver
        let _ = self.responder.send(reply);
    }
}

#[derive(Default)]
struct MuxState {
    queue: VecDeque<PendingRequest>,
    in_flight: Option<PendingRequest>,
    sink: Option<CommandSink>,
}

impl MuxState {
    /// Put the next queued command on the wire if nothing is in flight
    fn pump(&mut self) {
        while self.in_flight.is_none() {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            let sent = match &self.sink {
                Some(sink) => sink.send(next.command.clone()).is_ok(),
                None => false,
            };
            if sent {
                tracing::debug!("Sent command '{}'", next.command);
                self.in_flight = Some(next);
            } else {
                next.complete(Err(RussoundError::ConnectionClosed));
            }
        }
    }
}

/// Serializes commands and hands replies back to their callers
pub(crate) struct Multiplexer {
    state: Mutex<MuxState>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MuxState::default()),
        }
    }

    /// Start writing commands into a freshly opened connection
    pub fn attach(&self, sink: CommandSink) {
        let mut state = self.state.lock();
        state.sink = Some(sink);
        state.pump();
    }

    /// Forget the connection and fail everything queued or in flight
    pub fn detach(&self) {
        let (in_flight, queued) = {
            let mut state = self.state.lock();
            state.sink = None;
            (state.in_flight.take(), std::mem::take(&mut state.queue))
        };

        let cancelled = in_flight.iter().count() + queued.len();
        if cancelled > 0 {
            tracing::debug!("Cancelling {} pending request(s)", cancelled);
        }
        for pending in in_flight.into_iter().chain(queued) {
            pending.complete(Err(RussoundError::ConnectionClosed));
        }
    }

    /// Send `command` once every earlier command has been answered, then
    /// wait for the reply
    pub async fn request(&self, command: String) -> Reply {
        let (responder, reply) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.sink.is_none() {
                return Err(RussoundError::NotConnected);
            }
            tracing::debug!("Queueing command '{}'", command);
            state.queue.push_back(PendingRequest { command, responder });
            state.pump();
        }
        reply.await.unwrap_or(Err(RussoundError::ConnectionClosed))
    }

    /// Complete the in-flight request with a status or error line
    ///
    /// Returns `false` for notifications, which never touch the queue, and
    /// for replies that arrive with nothing in flight.
    pub fn handle_message(&self, msg: &WireMessage) -> bool {
        let reply = match msg.kind {
            MessageKind::Notification => return false,
            MessageKind::Status => Ok(msg.value.clone()),
            MessageKind::Error => Err(RussoundError::Command(
                msg.value.clone().unwrap_or_default(),
            )),
        };

        let mut state = self.state.lock();
        let Some(pending) = state.in_flight.take() else {
            tracing::debug!("Ignoring {:?} reply with no request in flight", msg.kind);
            return false;
        };
        tracing::debug!("Reply for '{}': {:?}", pending.command, reply);
        pending.complete(reply);
        state.pump();
        true
    }

    #[cfg(test)]
    fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    #[cfg(test)]
    fn in_flight_command(&self) -> Option<String> {
        self.state
            .lock()
            .in_flight
            .as_ref()
            .map(|p| p.command.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_line;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn line(raw: &str) -> WireMessage {
        parse_line(raw.as_bytes()).unwrap()
    }

    async fn wait_for_queue(mux: &Multiplexer, len: usize) {
        while mux.queued_len() != len {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_not_connected() {
        let mux = Multiplexer::new();
        let result = mux.request("VERSION".into()).await;
        assert!(matches!(result, Err(RussoundError::NotConnected)));
    }

    #[tokio::test]
    async fn test_reply_skips_interleaved_notifications() {
        let mux = Arc::new(Multiplexer::new());
        let (sink, mut wire) = mpsc::unbounded_channel();
        mux.attach(sink);

        let m = mux.clone();
        let request = tokio::spawn(async move { m.request("GET C[1].Z[1].name".into()).await });
        assert_eq!(wire.recv().await.unwrap(), "GET C[1].Z[1].name");

        assert!(!mux.handle_message(&line("N C[1].Z[4].volume=\"12\"")));
        assert!(!mux.handle_message(&line("N S[2].songName=\"Other\"")));
        assert!(mux.handle_message(&line("S C[1].Z[1].name=\"Kitchen\"")));

        assert_eq!(request.await.unwrap().unwrap().as_deref(), Some("Kitchen"));
        assert!(mux.in_flight_command().is_none());
    }

    #[tokio::test]
    async fn test_single_command_in_flight() {
        let mux = Arc::new(Multiplexer::new());
        let (sink, mut wire) = mpsc::unbounded_channel();
        mux.attach(sink);

        let m = mux.clone();
        let first = tokio::spawn(async move { m.request("GET C[1].Z[1].name".into()).await });
        assert_eq!(wire.recv().await.unwrap(), "GET C[1].Z[1].name");

        let m = mux.clone();
        let second = tokio::spawn(async move { m.request("GET C[1].Z[2].name".into()).await });
        wait_for_queue(&mux, 1).await;

        // Second command stays queued until the first is answered
        assert!(wire.try_recv().is_err());
        assert_eq!(mux.in_flight_command().as_deref(), Some("GET C[1].Z[1].name"));

        mux.handle_message(&line("S C[1].Z[1].name=\"Kitchen\""));
        assert_eq!(wire.recv().await.unwrap(), "GET C[1].Z[2].name");
        mux.handle_message(&line("E Invalid zone"));

        assert_eq!(first.await.unwrap().unwrap().as_deref(), Some("Kitchen"));
        match second.await.unwrap() {
            Err(RussoundError::Command(payload)) => assert_eq!(payload, "Invalid zone"),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bare_status_resolves_to_none() {
        let mux = Arc::new(Multiplexer::new());
        let (sink, mut wire) = mpsc::unbounded_channel();
        mux.attach(sink);

        let m = mux.clone();
        let request = tokio::spawn(async move { m.request("WATCH System ON".into()).await });
        wire.recv().await.unwrap();
        mux.handle_message(&line("S"));

        assert_eq!(request.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_reply_without_request_is_ignored() {
        let mux = Multiplexer::new();
        let (sink, _wire) = mpsc::unbounded_channel();
        mux.attach(sink);
        assert!(!mux.handle_message(&line("S VERSION=\"1.14.01\"")));
        assert!(!mux.handle_message(&line("E stray")));
    }

    #[tokio::test]
    async fn test_detach_cancels_queued_and_in_flight() {
        let mux = Arc::new(Multiplexer::new());
        let (sink, mut wire) = mpsc::unbounded_channel();
        mux.attach(sink);

        let m = mux.clone();
        let first = tokio::spawn(async move { m.request("VERSION".into()).await });
        wire.recv().await.unwrap();
        let m = mux.clone();
        let second = tokio::spawn(async move { m.request("GET S[1].name".into()).await });
        wait_for_queue(&mux, 1).await;

        mux.detach();

        assert!(matches!(first.await.unwrap(), Err(RussoundError::ConnectionClosed)));
        assert!(matches!(second.await.unwrap(), Err(RussoundError::ConnectionClosed)));
        assert!(matches!(
            mux.request("VERSION".into()).await,
            Err(RussoundError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_abandoned_request_keeps_its_slot() {
        let mux = Arc::new(Multiplexer::new());
        let (sink, mut wire) = mpsc::unbounded_channel();
        mux.attach(sink);

        let m = mux.clone();
        let abandoned = tokio::spawn(async move { m.request("GET S[1].name".into()).await });
        wire.recv().await.unwrap();
        abandoned.abort();
        let _ = abandoned.await;

        let m = mux.clone();
        let next = tokio::spawn(async move { m.request("GET S[2].name".into()).await });
        wait_for_queue(&mux, 1).await;

        // The late reply still belongs to the abandoned command
        mux.handle_message(&line("S S[1].name=\"Tuner\""));
        assert_eq!(wire.recv().await.unwrap(), "GET S[2].name");
        mux.handle_message(&line("S S[2].name=\"Streamer\""));
        assert_eq!(next.await.unwrap().unwrap().as_deref(), Some("Streamer"));
    }

    #[tokio::test]
    async fn test_closed_sink_fails_request() {
        let mux = Multiplexer::new();
        let (sink, wire) = mpsc::unbounded_channel();
        mux.attach(sink);
        drop(wire);

        let result = mux.request("VERSION".into()).await;
        assert!(matches!(result, Err(RussoundError::ConnectionClosed)));
    }
}
