use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use qbase::{
    config::Config,
    error::{ErrorKind, QuicError},
    flow::{ArcConnectionFlowController, StreamFlowController},
    frame::{
        Frame, MaxStreamDataFrame, MaxStreamIdFrame, RstStreamFrame, StreamFrame,
    },
    role::Role,
    sid::StreamId,
    version::Version,
};
use thiserror::Error;

mod stream;

pub use stream::ArcStream;

/// Why the application could not use a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream is closed for writing")]
    Closed,
    #[error("stream was reset with error code {0}")]
    Reset(u32),
    #[error("too many open streams")]
    TooManyOpenStreams,
}

#[derive(Debug)]
struct StreamsMapInner {
    role: Role,
    connection: ArcConnectionFlowController,
    stream_send_window: u64,
    stream_receive_window: u64,
    update_threshold: f64,

    crypto: ArcStream,
    streams: HashMap<StreamId, ArcStream>,
    // registration order, the round robin walks this
    order: Vec<StreamId>,
    round_robin_index: usize,

    next_outgoing: Option<StreamId>,
    max_outgoing: StreamId,
    next_incoming: StreamId,
    max_incoming: StreamId,
    accept_queue: VecDeque<ArcStream>,
}

impl StreamsMapInner {
    fn new_stream(&self, stream_id: StreamId) -> ArcStream {
        ArcStream::new(StreamFlowController::new(
            stream_id,
            self.connection.clone(),
            self.stream_send_window,
            self.stream_receive_window,
            self.update_threshold,
        ))
    }

    fn insert(&mut self, stream: ArcStream) {
        let stream_id = stream.stream_id();
        self.order.push(stream_id);
        self.streams.insert(stream_id, stream);
    }

    fn is_local(&self, stream_id: StreamId) -> bool {
        stream_id.initiator() == self.role
    }

    /// The stream the peer refers to, opening it and every lower stream of
    /// the peer if it is new. `None` if the stream is gone already.
    fn get_or_open(&mut self, stream_id: StreamId) -> Result<Option<ArcStream>, QuicError> {
        if let Some(stream) = self.streams.get(&stream_id) {
            return Ok(Some(stream.clone()));
        }
        if self.is_local(stream_id) {
            if self.next_outgoing.is_none_or(|next| stream_id >= next) {
                return Err(QuicError::with_default_fty(
                    ErrorKind::InvalidStreamData,
                    format!("peer used stream {stream_id} which was never opened"),
                ));
            }
            return Ok(None);
        }
        if stream_id < self.next_incoming {
            return Ok(None);
        }
        if stream_id > self.max_incoming {
            tracing::warn!(target: "quic", %stream_id, max = %self.max_incoming, "peer opened too many streams");
            return Err(QuicError::with_default_fty(
                ErrorKind::TooManyOpenStreams,
                format!("peer opened stream {stream_id}, allowed up to {}", self.max_incoming),
            ));
        }
        let mut opened = None;
        while self.next_incoming <= stream_id {
            let stream = self.new_stream(self.next_incoming);
            self.insert(stream.clone());
            self.accept_queue.push_back(stream.clone());
            opened = Some(stream);
            match self.next_incoming.next() {
                Some(next) => self.next_incoming = next,
                None => break,
            }
        }
        tracing::debug!(target: "quic", %stream_id, "peer opened stream");
        Ok(opened)
    }
}

/// All streams of a connection, keyed by their ID.
///
/// The crypto stream is kept apart, it neither counts against the stream
/// limits nor takes part in the round robin.
#[derive(Debug, Clone)]
pub struct StreamsMap(Arc<Mutex<StreamsMapInner>>);

impl StreamsMap {
    pub fn new(
        role: Role,
        version: Version,
        config: &Config,
        connection: ArcConnectionFlowController,
    ) -> Self {
        let crypto_stream_id = version.crypto_stream_id();
        let crypto = ArcStream::new(StreamFlowController::for_crypto_stream(
            crypto_stream_id,
            config.initial_stream_receive_window(),
            config.window_update_threshold(),
        ));
        let first_client = if crypto_stream_id.id() == 1 {
            StreamId::from(3)
        } else {
            StreamId::from(1)
        };
        let first_server = StreamId::from(2);
        let (first_outgoing, first_incoming) = match role {
            Role::Client => (first_client, first_server),
            Role::Server => (first_server, first_client),
        };
        let limit = |first: StreamId| {
            let streams = config.max_outgoing_streams().max(1) as u32;
            StreamId::from(first.id().saturating_add(2 * (streams - 1)))
        };

        Self(Arc::new(Mutex::new(StreamsMapInner {
            role,
            connection,
            stream_send_window: config.initial_stream_send_window(),
            stream_receive_window: config.initial_stream_receive_window(),
            update_threshold: config.window_update_threshold(),
            crypto,
            streams: HashMap::new(),
            order: Vec::new(),
            round_robin_index: 0,
            next_outgoing: Some(first_outgoing),
            max_outgoing: limit(first_outgoing),
            next_incoming: first_incoming,
            max_incoming: limit(first_incoming),
            accept_queue: VecDeque::new(),
        })))
    }

    fn lock(&self) -> MutexGuard<'_, StreamsMapInner> {
        self.0.lock().unwrap()
    }

    pub fn crypto_stream(&self) -> ArcStream {
        self.lock().crypto.clone()
    }

    pub fn connection_flow_controller(&self) -> ArcConnectionFlowController {
        self.lock().connection.clone()
    }

    /// Open a new outgoing stream, as long as the peer allows another one.
    pub fn open_stream(&self) -> Result<ArcStream, StreamError> {
        let mut inner = self.lock();
        let stream_id = match inner.next_outgoing {
            Some(stream_id) if stream_id <= inner.max_outgoing => stream_id,
            _ => return Err(StreamError::TooManyOpenStreams),
        };
        let stream = inner.new_stream(stream_id);
        inner.insert(stream.clone());
        inner.next_outgoing = stream_id.next();
        tracing::trace!(target: "quic", %stream_id, "open stream");
        Ok(stream)
    }

    /// Take the oldest stream the peer opened that the application has not
    /// seen yet.
    pub fn accept_stream(&self) -> Option<ArcStream> {
        self.lock().accept_queue.pop_front()
    }

    pub fn get(&self, stream_id: StreamId) -> Option<ArcStream> {
        let inner = self.lock();
        if stream_id == inner.crypto.stream_id() {
            return Some(inner.crypto.clone());
        }
        inner.streams.get(&stream_id).cloned()
    }

    /// Number of streams besides the crypto stream.
    pub fn len(&self) -> usize {
        self.lock().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_or_open(&self, stream_id: StreamId) -> Result<Option<ArcStream>, QuicError> {
        let mut inner = self.lock();
        if stream_id == inner.crypto.stream_id() {
            return Ok(Some(inner.crypto.clone()));
        }
        inner.get_or_open(stream_id)
    }

    /// Deliver a STREAM frame. Frames for streams that are gone are dropped.
    pub fn recv_stream_frame(&self, frame: &StreamFrame) -> Result<(), QuicError> {
        match self.get_or_open(frame.stream_id)? {
            Some(stream) => stream.recv_stream_frame(frame),
            None => Ok(()),
        }
    }

    pub fn recv_rst_stream_frame(&self, frame: &RstStreamFrame) -> Result<(), QuicError> {
        match self.get_or_open(frame.stream_id)? {
            Some(stream) => stream.recv_rst_stream_frame(frame),
            None => Ok(()),
        }
    }

    pub fn recv_max_stream_data_frame(&self, frame: &MaxStreamDataFrame) -> Result<(), QuicError> {
        if let Some(stream) = self.get_or_open(frame.stream_id)? {
            stream.update_send_window(frame.max_stream_data);
        }
        Ok(())
    }

    /// The peer allows more outgoing streams. Lowering the limit is ignored.
    pub fn recv_max_stream_id_frame(&self, frame: &MaxStreamIdFrame) {
        let mut inner = self.lock();
        if frame.stream_id > inner.max_outgoing {
            inner.max_outgoing = frame.stream_id;
        }
    }

    /// Visit the streams in turn, starting after the one that was visited
    /// last time. Stops early once `f` returns `false`.
    ///
    /// `f` runs without the map locked, so it may lock the streams freely.
    pub fn round_robin(&self, mut f: impl FnMut(&ArcStream) -> bool) {
        let (streams, start) = {
            let inner = self.lock();
            let streams = inner
                .order
                .iter()
                .filter_map(|stream_id| inner.streams.get(stream_id).cloned())
                .collect::<Vec<_>>();
            (streams, inner.round_robin_index)
        };
        let len = streams.len();
        let mut visited = 0;
        for i in 0..len {
            visited += 1;
            if !f(&streams[(start + i) % len]) {
                break;
            }
        }
        if len > 0 {
            let mut inner = self.lock();
            inner.round_robin_index = (start + visited) % len;
        }
    }

    /// Forget the streams that are done in both directions.
    pub fn delete_closed_streams(&self) {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let before = inner.order.len();
        let streams = &mut inner.streams;
        let mut index = 0;
        let mut round_robin_index = inner.round_robin_index;
        inner.order.retain(|stream_id| {
            let keep = streams.get(stream_id).is_some_and(|stream| !stream.is_finished());
            if !keep {
                streams.remove(stream_id);
                if index < round_robin_index {
                    round_robin_index -= 1;
                }
                tracing::trace!(target: "quic", %stream_id, "delete closed stream");
            } else {
                index += 1;
            }
            keep
        });
        if inner.order.len() != before {
            inner.round_robin_index = if inner.order.is_empty() {
                0
            } else {
                round_robin_index % inner.order.len()
            };
        }
    }

    /// Window updates due on the connection and on every stream.
    pub fn window_update_frames(&self) -> Vec<Frame> {
        let inner = self.lock();
        let mut frames = Vec::new();
        if let Some(frame) = inner.connection.window_update_frame() {
            frames.push(Frame::MaxData(frame));
        }
        let streams = std::iter::once(&inner.crypto).chain(
            inner
                .order
                .iter()
                .filter_map(|stream_id| inner.streams.get(stream_id)),
        );
        frames.extend(
            streams
                .filter_map(ArcStream::window_update_frame)
                .map(Frame::MaxStreamData),
        );
        frames
    }
}
