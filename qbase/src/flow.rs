use std::sync::{Arc, Mutex};

use crate::{
    error::{ErrorKind, QuicError},
    frame::{BlockedFrame, MaxDataFrame, MaxStreamDataFrame, StreamBlockedFrame},
    sid::StreamId,
};

/// The accounting both levels of flow control share.
///
/// Sending is bounded by the window the peer advertised, receiving by the
/// window advertised to the peer. Offsets are absolute byte counts.
#[derive(Debug, Clone)]
struct BaseController {
    bytes_sent: u64,
    send_window: u64,

    bytes_read: u64,
    highest_received: u64,
    receive_window: u64,
    receive_window_size: u64,
    update_threshold: f64,
}

impl BaseController {
    fn new(send_window: u64, receive_window: u64, update_threshold: f64) -> Self {
        Self {
            bytes_sent: 0,
            send_window,
            bytes_read: 0,
            highest_received: 0,
            receive_window,
            receive_window_size: receive_window,
            update_threshold,
        }
    }

    fn send_window_size(&self) -> u64 {
        // a reset may account more than the window allowed
        self.send_window.saturating_sub(self.bytes_sent)
    }

    fn update_send_window(&mut self, limit: u64) -> bool {
        if limit > self.send_window {
            self.send_window = limit;
            true
        } else {
            false
        }
    }

    fn window_update(&mut self) -> Option<u64> {
        let remaining = self.receive_window - self.bytes_read;
        let keep = (self.receive_window_size as f64 * (1.0 - self.update_threshold)) as u64;
        if remaining >= keep {
            return None;
        }
        self.receive_window = self.bytes_read + self.receive_window_size;
        Some(self.receive_window)
    }

    fn received_too_much(&self) -> bool {
        self.highest_received > self.receive_window
    }
}

/// Flow control of the whole connection, shared by all streams.
#[derive(Debug, Clone)]
pub struct ArcConnectionFlowController(Arc<Mutex<BaseController>>);

impl ArcConnectionFlowController {
    pub fn new(send_window: u64, receive_window: u64, update_threshold: f64) -> Self {
        Self(Arc::new(Mutex::new(BaseController::new(
            send_window,
            receive_window,
            update_threshold,
        ))))
    }

    pub fn add_bytes_sent(&self, n: u64) {
        self.0.lock().unwrap().bytes_sent += n;
    }

    pub fn add_bytes_read(&self, n: u64) {
        self.0.lock().unwrap().bytes_read += n;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.0.lock().unwrap().bytes_sent
    }

    pub fn send_window_size(&self) -> u64 {
        self.0.lock().unwrap().send_window_size()
    }

    pub fn is_blocked(&self) -> bool {
        self.send_window_size() == 0
    }

    /// The BLOCKED frame to tell the peer about, if the window is used up.
    pub fn blocked_frame(&self) -> Option<BlockedFrame> {
        self.is_blocked().then_some(BlockedFrame)
    }

    /// Raise the send window, a lower limit than the current one is ignored.
    pub fn update_send_window(&self, limit: u64) -> bool {
        self.0.lock().unwrap().update_send_window(limit)
    }

    pub fn recv_max_data_frame(&self, frame: &MaxDataFrame) -> bool {
        self.update_send_window(frame.max_data)
    }

    /// The new receive limit, if enough has been read that the peer should
    /// learn about it.
    pub fn get_window_update(&self) -> Option<u64> {
        self.0.lock().unwrap().window_update()
    }

    pub fn window_update_frame(&self) -> Option<MaxDataFrame> {
        self.get_window_update()
            .map(|max_data| MaxDataFrame { max_data })
    }

    /// Account newly received bytes of any stream.
    pub fn increment_highest_received(&self, increment: u64) -> Result<(), QuicError> {
        let mut guard = self.0.lock().unwrap();
        guard.highest_received += increment;
        if guard.received_too_much() {
            return Err(QuicError::with_default_fty(
                ErrorKind::FlowControlReceivedTooMuchData,
                format!(
                    "received {} bytes on the connection, allowed {} bytes",
                    guard.highest_received, guard.receive_window
                ),
            ));
        }
        Ok(())
    }
}

/// Flow control of a single stream.
///
/// All bytes a stream sends or reads also count against the connection,
/// except for the crypto stream which is not flow limited at all.
#[derive(Debug)]
pub struct StreamFlowController {
    stream_id: StreamId,
    base: BaseController,
    received_final_offset: bool,
    connection: Option<ArcConnectionFlowController>,
}

impl StreamFlowController {
    pub fn new(
        stream_id: StreamId,
        connection: ArcConnectionFlowController,
        send_window: u64,
        receive_window: u64,
        update_threshold: f64,
    ) -> Self {
        Self {
            stream_id,
            base: BaseController::new(send_window, receive_window, update_threshold),
            received_final_offset: false,
            connection: Some(connection),
        }
    }

    /// A controller that never limits sending and leaves the connection out.
    pub fn for_crypto_stream(stream_id: StreamId, receive_window: u64, update_threshold: f64) -> Self {
        Self {
            stream_id,
            base: BaseController::new(u64::MAX, receive_window, update_threshold),
            received_final_offset: false,
            connection: None,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Account `n` bytes sent on this stream, and on the connection in the same step.
    pub fn add_bytes_sent(&mut self, n: u64) {
        if let Some(connection) = &self.connection {
            let mut conn = connection.0.lock().unwrap();
            conn.bytes_sent += n;
            self.base.bytes_sent += n;
        } else {
            self.base.bytes_sent += n;
        }
    }

    /// Consume up to `max` bytes of the send window and return how many
    /// were granted. The connection window is checked and consumed under
    /// one lock, so streams sending concurrently never overrun it together.
    pub fn take_send_capacity(&mut self, max: u64) -> u64 {
        let n = match &self.connection {
            Some(connection) => {
                let mut conn = connection.0.lock().unwrap();
                let n = max
                    .min(self.base.send_window_size())
                    .min(conn.send_window_size());
                conn.bytes_sent += n;
                n
            }
            None => max.min(self.base.send_window_size()),
        };
        self.base.bytes_sent += n;
        n
    }

    pub fn add_bytes_read(&mut self, n: u64) {
        self.base.bytes_read += n;
        if let Some(connection) = &self.connection {
            connection.add_bytes_read(n);
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.base.bytes_sent
    }

    pub fn highest_received(&self) -> u64 {
        self.base.highest_received
    }

    /// What this stream may still send, the smaller of its own window and the
    /// connection's.
    pub fn send_window_size(&self) -> u64 {
        let window = self.base.send_window_size();
        match &self.connection {
            Some(connection) => window.min(connection.send_window_size()),
            None => window,
        }
    }

    /// Whether the stream's own window is used up.
    pub fn is_blocked(&self) -> bool {
        self.base.send_window_size() == 0
    }

    pub fn blocked_frame(&self) -> Option<StreamBlockedFrame> {
        self.is_blocked().then_some(StreamBlockedFrame {
            stream_id: self.stream_id,
        })
    }

    pub fn update_send_window(&mut self, limit: u64) -> bool {
        self.base.update_send_window(limit)
    }

    pub fn get_window_update(&mut self) -> Option<u64> {
        self.base.window_update()
    }

    pub fn window_update_frame(&mut self) -> Option<MaxStreamDataFrame> {
        let stream_id = self.stream_id;
        self.get_window_update()
            .map(|max_stream_data| MaxStreamDataFrame {
                stream_id,
                max_stream_data,
            })
    }

    /// Account data received up to `offset`, which is the final size of the
    /// stream if `is_final`.
    ///
    /// Data beyond a known final offset, a second final offset that differs
    /// from the first, and data beyond the receive window are violations.
    pub fn update_highest_received(&mut self, offset: u64, is_final: bool) -> Result<(), QuicError> {
        let highest = self.base.highest_received;
        if self.received_final_offset {
            if is_final && offset != highest {
                return Err(self.after_termination(format!(
                    "received inconsistent final offset {offset}, was {highest}"
                )));
            }
            if offset > highest {
                return Err(self.after_termination(format!(
                    "received offset {offset} beyond the final offset {highest}"
                )));
            }
        }
        if offset <= highest {
            if is_final && offset < highest {
                return Err(self.after_termination(format!(
                    "received final offset {offset}, but already received offset {highest}"
                )));
            }
            self.received_final_offset |= is_final;
            return Ok(());
        }

        let increment = offset - highest;
        self.base.highest_received = offset;
        if self.base.received_too_much() {
            return Err(QuicError::with_default_fty(
                ErrorKind::FlowControlReceivedTooMuchData,
                format!(
                    "received {offset} bytes on stream {}, allowed {} bytes",
                    self.stream_id, self.base.receive_window
                ),
            ));
        }
        if let Some(connection) = &self.connection {
            connection.increment_highest_received(increment)?;
        }
        self.received_final_offset |= is_final;
        Ok(())
    }

    fn after_termination(&self, reason: String) -> QuicError {
        tracing::warn!(target: "quic", stream_id = %self.stream_id, "{reason}");
        QuicError::with_default_fty(ErrorKind::StreamDataAfterTermination, reason)
    }
}
