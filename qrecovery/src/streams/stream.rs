use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use bytes::{Buf, Bytes, BytesMut};
use qbase::{
    error::{ErrorKind, QuicError},
    flow::StreamFlowController,
    frame::{FrameType, MaxStreamDataFrame, RstStreamFrame, StreamFrame},
    sid::StreamId,
};

use super::StreamError;

/// The sending half: data written by the application waits here until the
/// framer takes it.
#[derive(Debug, Default)]
struct SendState {
    pending: BytesMut,
    write_offset: u64,
    fin_queued: bool,
    fin_sent: bool,
    reset: Option<u32>,
}

/// The receiving half: out of order frames wait in `frames` until the gap
/// in front of them is filled.
#[derive(Debug, Default)]
struct RecvState {
    frames: BTreeMap<u64, Bytes>,
    read_offset: u64,
    final_offset: Option<u64>,
    reset_by_peer: Option<u32>,
}

impl RecvState {
    fn insert(&mut self, offset: u64, mut data: Bytes) {
        // drop what has been read already
        if offset + (data.len() as u64) <= self.read_offset {
            return;
        }
        let mut offset = offset;
        if offset < self.read_offset {
            data.advance((self.read_offset - offset) as usize);
            offset = self.read_offset;
        }
        match self.frames.get(&offset) {
            Some(existing) if existing.len() >= data.len() => {}
            _ => {
                self.frames.insert(offset, data);
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut read = 0;
        while read < buf.len() {
            let Some(mut entry) = self.frames.first_entry() else {
                break;
            };
            let offset = *entry.key();
            if offset > self.read_offset {
                break;
            }
            let skip = (self.read_offset - offset) as usize;
            let data = entry.get_mut();
            if skip >= data.len() {
                entry.remove();
                continue;
            }
            let n = (data.len() - skip).min(buf.len() - read);
            buf[read..read + n].copy_from_slice(&data[skip..skip + n]);
            read += n;
            self.read_offset += n as u64;
            if skip + n == data.len() {
                entry.remove();
            }
        }
        read
    }

    fn is_finished(&self) -> bool {
        self.reset_by_peer.is_some() || self.final_offset == Some(self.read_offset)
    }
}

#[derive(Debug)]
struct Stream {
    send: SendState,
    recv: RecvState,
    flow_control: StreamFlowController,
}

/// A stream shared by the application and the framer.
///
/// Every access goes through the stream's mutex, the application may write
/// from any thread while the send task frames the data.
#[derive(Debug, Clone)]
pub struct ArcStream(Arc<Mutex<Stream>>);

impl ArcStream {
    pub fn new(flow_control: StreamFlowController) -> Self {
        Self(Arc::new(Mutex::new(Stream {
            send: SendState::default(),
            recv: RecvState::default(),
            flow_control,
        })))
    }

    fn lock(&self) -> MutexGuard<'_, Stream> {
        self.0.lock().unwrap()
    }

    pub fn stream_id(&self) -> StreamId {
        self.lock().flow_control.stream_id()
    }

    /// Queue `data` for sending. Everything is taken, flow control only
    /// limits how fast the framer hands it out.
    pub fn write(&self, data: &[u8]) -> Result<usize, StreamError> {
        let mut stream = self.lock();
        if let Some(error_code) = stream.send.reset {
            return Err(StreamError::Reset(error_code));
        }
        if stream.send.fin_queued {
            return Err(StreamError::Closed);
        }
        stream.send.pending.extend_from_slice(data);
        Ok(data.len())
    }

    /// Finish the sending half, the fin goes out with the last data.
    pub fn close(&self) {
        self.lock().send.fin_queued = true;
    }

    /// Abandon the sending half. Returns the RST_STREAM frame to send, or
    /// `None` if the stream was reset before or all data including the fin
    /// is out already.
    pub fn reset(&self, error_code: u32) -> Option<RstStreamFrame> {
        let mut stream = self.lock();
        if stream.send.reset.is_some() || stream.send.fin_sent {
            return None;
        }
        stream.send.reset = Some(error_code);
        stream.send.pending.clear();
        Some(RstStreamFrame {
            stream_id: stream.flow_control.stream_id(),
            error_code,
            final_offset: stream.send.write_offset,
        })
    }

    /// Take in a STREAM frame from the peer.
    pub fn recv_stream_frame(&self, frame: &StreamFrame) -> Result<(), QuicError> {
        let Some(end) = frame.checked_end() else {
            return Err(QuicError::new(
                ErrorKind::InvalidStreamData,
                FrameType::Stream(0),
                format!(
                    "stream frame at offset {} with {} bytes overflows the stream",
                    frame.offset,
                    frame.data.len()
                ),
            ));
        };
        let mut stream = self.lock();
        stream.flow_control.update_highest_received(end, frame.fin)?;
        if frame.fin {
            stream.recv.final_offset = Some(end);
        }
        if stream.recv.reset_by_peer.is_none() && !frame.data.is_empty() {
            stream.recv.insert(frame.offset, frame.data.clone());
        }
        Ok(())
    }

    /// Take in a RST_STREAM frame, the final offset counts against flow control.
    pub fn recv_rst_stream_frame(&self, frame: &RstStreamFrame) -> Result<(), QuicError> {
        let mut stream = self.lock();
        stream
            .flow_control
            .update_highest_received(frame.final_offset, true)?;
        stream.recv.final_offset = Some(frame.final_offset);
        stream.recv.reset_by_peer = Some(frame.error_code);
        stream.recv.frames.clear();
        Ok(())
    }

    /// Read contiguous data into `buf`. Returns 0 at the end of the stream or
    /// if nothing is ready yet, [`ArcStream::is_finished_reading`] tells which.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut stream = self.lock();
        if let Some(error_code) = stream.recv.reset_by_peer {
            return Err(StreamError::Reset(error_code));
        }
        let n = stream.recv.read(buf);
        stream.flow_control.add_bytes_read(n as u64);
        Ok(n)
    }

    pub fn is_finished_reading(&self) -> bool {
        self.lock().recv.is_finished()
    }

    /// Both halves are done, the stream can be forgotten.
    pub fn is_finished(&self) -> bool {
        let stream = self.lock();
        let send_done = stream.send.fin_sent || stream.send.reset.is_some();
        send_done && stream.recv.is_finished()
    }

    pub fn update_send_window(&self, limit: u64) -> bool {
        self.lock().flow_control.update_send_window(limit)
    }

    pub fn window_update_frame(&self) -> Option<MaxStreamDataFrame> {
        let mut stream = self.lock();
        if stream.recv.is_finished() {
            return None;
        }
        stream.flow_control.window_update_frame()
    }

    pub fn len_of_data_for_writing(&self) -> usize {
        let stream = self.lock();
        if stream.send.reset.is_some() {
            return 0;
        }
        stream.send.pending.len()
    }

    /// Take up to `max_len` bytes to send, bounded by the send window as well.
    pub fn data_for_writing(&self, max_len: usize) -> Option<Bytes> {
        let mut stream = self.lock();
        if stream.send.reset.is_some() || stream.send.pending.is_empty() {
            return None;
        }
        let wanted = stream.send.pending.len().min(max_len) as u64;
        // at most `wanted`, which is a usize
        let n = stream.flow_control.take_send_capacity(wanted) as usize;
        if n == 0 {
            return None;
        }
        let data = stream.send.pending.split_to(n).freeze();
        stream.send.write_offset += n as u64;
        Some(data)
    }

    pub fn write_offset(&self) -> u64 {
        self.lock().send.write_offset
    }

    pub fn send_window_size(&self) -> u64 {
        self.lock().flow_control.send_window_size()
    }

    /// Whether the fin is due: the stream is closed and everything else is out.
    pub fn should_send_fin(&self) -> bool {
        let stream = self.lock();
        stream.send.fin_queued
            && !stream.send.fin_sent
            && stream.send.reset.is_none()
            && stream.send.pending.is_empty()
    }

    pub fn sent_fin(&self) {
        self.lock().send.fin_sent = true;
    }

    pub fn is_flow_control_blocked(&self) -> bool {
        self.lock().flow_control.is_blocked()
    }
}
