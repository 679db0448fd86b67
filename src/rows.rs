//! Row buffer for the programmatic (`Data::Data`) load path.
//!
//! Rows are encoded straight into a packet buffer that starts with the
//! reserved header. Once the buffer grows past the flush threshold the
//! caller sends it as one packet and the buffer starts over.

use bytes::BytesMut;

use crate::config::InfileConfig;
use crate::encoder::write_row;
use crate::error::{InfileError, InfileResult};
use crate::protocol::HEADER_SIZE;
use crate::value::Value;

/// 16 KiB: small enough for disk readahead, large enough for TCP.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024;

/// Flush threshold for a connection's maximum write size.
pub fn flush_threshold(max_write_size: usize) -> usize {
    MAX_CHUNK_SIZE.min(max_write_size / 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Accumulating,
}

/// Buffered rows of the load in progress.
#[derive(Debug)]
pub struct RowBuffer {
    buf: BytesMut,
    threshold: usize,
    state: LoadState,
}

impl Default for RowBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RowBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            threshold: MAX_CHUNK_SIZE,
            state: LoadState::Idle,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Accumulating
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Buffered bytes, reserved header included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= HEADER_SIZE
    }

    /// Enter `Accumulating`: size the threshold and reserve the header.
    pub fn begin(&mut self, max_write_size: usize) {
        self.threshold = flush_threshold(max_write_size);
        self.buf.clear();
        self.buf.reserve(self.threshold + HEADER_SIZE);
        self.buf.extend_from_slice(&[0; HEADER_SIZE]);
        self.state = LoadState::Accumulating;
    }

    /// Encode and append one row. Returns `true` once the buffer is past
    /// the flush threshold.
    ///
    /// With `strict_values`, a row holding an unsupported value is rejected
    /// before any of it is buffered.
    pub fn push_row(&mut self, values: &[Value], config: &InfileConfig) -> InfileResult<bool> {
        if !self.is_loading() {
            return Err(InfileError::Protocol("no LOAD DATA in progress".into()));
        }
        if config.strict_values
            && let Some(value) = values.iter().find(|v| matches!(v, Value::Unsupported(_)))
        {
            return Err(InfileError::UnsupportedValue(value.kind().to_string()));
        }

        write_row(&mut self.buf, values, &config.location);
        Ok(self.buf.len() > self.threshold)
    }

    /// Current packet (header included); the buffer restarts with a fresh
    /// reserved header.
    pub fn take_packet(&mut self) -> BytesMut {
        let packet = self.buf.split();
        self.buf.extend_from_slice(&[0; HEADER_SIZE]);
        packet
    }

    /// Back to `Idle`, dropping anything still buffered.
    pub fn finish(&mut self) {
        self.buf.clear();
        self.state = LoadState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_threshold_bounds() {
        assert_eq!(flush_threshold(64 << 20), MAX_CHUNK_SIZE);
        assert_eq!(flush_threshold(20_000), 10_000);
        assert_eq!(flush_threshold(1023), 511);
        assert_eq!(flush_threshold(0), 0);

        for max in [0usize, 1, 100, 4095, 32_767, 32_768, 32_769, 1 << 30] {
            let threshold = flush_threshold(max);
            assert!(threshold <= MAX_CHUNK_SIZE);
            assert!(threshold <= max / 2);
        }
    }

    #[test]
    fn test_begin_reserves_header() {
        let mut rows = RowBuffer::new();
        assert_eq!(rows.state(), LoadState::Idle);

        rows.begin(1 << 20);
        assert!(rows.is_loading());
        assert_eq!(rows.len(), HEADER_SIZE);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_push_row_signals_flush() {
        let config = InfileConfig::default().max_allowed_packet(41);
        let mut rows = RowBuffer::new();
        rows.begin(config.max_write_size());
        assert_eq!(rows.threshold(), 20);

        assert!(!rows.push_row(&[Value::Int(1), Value::from("a")], &config).unwrap());
        assert_eq!(rows.len(), HEADER_SIZE + 4);
        assert!(rows.push_row(&[Value::from("0123456789abcdef")], &config).unwrap());

        let packet = rows.take_packet();
        assert_eq!(&packet[HEADER_SIZE..], b"1\ta\n0123456789abcdef\n");
        assert_eq!(rows.len(), HEADER_SIZE);
        assert!(rows.is_loading());
    }

    #[test]
    fn test_push_row_requires_load() {
        let mut rows = RowBuffer::new();
        let err = rows
            .push_row(&[Value::Int(1)], &InfileConfig::default())
            .unwrap_err();
        assert!(matches!(err, InfileError::Protocol(_)));
    }

    #[test]
    fn test_strict_values_rejects_whole_row() {
        let config = InfileConfig::default().strict_values(true);
        let mut rows = RowBuffer::new();
        rows.begin(config.max_write_size());

        let err = rows
            .push_row(&[Value::Int(1), Value::Unsupported("decimal".into())], &config)
            .unwrap_err();
        assert!(matches!(err, InfileError::UnsupportedValue(kind) if kind == "decimal"));
        assert_eq!(rows.len(), HEADER_SIZE);
    }

    #[test]
    fn test_lenient_values_send_empty_field() {
        let config = InfileConfig::default();
        let mut rows = RowBuffer::new();
        rows.begin(config.max_write_size());

        rows.push_row(&[Value::Int(1), Value::Unsupported("decimal".into())], &config)
            .unwrap();
        assert_eq!(&rows.take_packet()[HEADER_SIZE..], b"1\t\n");
    }

    #[test]
    fn test_finish_resets() {
        let config = InfileConfig::default();
        let mut rows = RowBuffer::new();
        rows.begin(config.max_write_size());
        rows.push_row(&[Value::Int(1)], &config).unwrap();

        rows.finish();
        assert_eq!(rows.state(), LoadState::Idle);
        assert_eq!(rows.len(), 0);
    }
}
