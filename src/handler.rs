//! LOCAL INFILE request handling for one connection.
//!
//! `InfileConnection` answers the server's LOCAL INFILE requests:
//! - `Reader::<name>` streams a registered reader
//! - `Data::Data` starts a programmatic load driven by `write_row`
//! - anything else is a file path, streamed if whitelisted
//!
//! Every request ends with an empty packet followed by the server's
//! completion, so the connection stays usable after a failed request.

use std::io;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::config::InfileConfig;
use crate::error::{InfileError, InfileResult};
use crate::protocol::{DATA_SENTINEL, HEADER_SIZE, OkPacket, ResultHeader, encode_query, reader_name};
use crate::registry::{InfileRegistry, normalize_path};
use crate::rows::{MAX_CHUNK_SIZE, RowBuffer};
use crate::source::LocalSource;
use crate::transport::PacketIo;
use crate::value::Value;

/// Keep the first error; a cleanup error only surfaces when nothing failed
/// before it.
fn first_error<T>(result: InfileResult<T>, cleanup: io::Result<()>) -> InfileResult<T> {
    match (result, cleanup) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(InfileError::Close(e)),
        (Ok(value), Ok(())) => Ok(value),
    }
}

/// A connection's LOCAL INFILE state on top of a packet transport.
pub struct InfileConnection<T> {
    io: T,
    registry: Arc<InfileRegistry>,
    config: InfileConfig,
    rows: RowBuffer,
}

impl<T: PacketIo> InfileConnection<T> {
    /// Wrap `io`. The transport's `max_allowed_packet` is set from `config`
    /// so chunk sizing and the outgoing packet limit agree.
    pub fn new(mut io: T, registry: Arc<InfileRegistry>, config: InfileConfig) -> Self {
        io.set_max_allowed_packet(config.max_allowed_packet);
        Self {
            io,
            registry,
            config,
            rows: RowBuffer::new(),
        }
    }

    pub fn registry(&self) -> &Arc<InfileRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &InfileConfig {
        &self.config
    }

    pub fn io_mut(&mut self) -> &mut T {
        &mut self.io
    }

    pub fn into_inner(self) -> T {
        self.io
    }

    /// Whether a `Data::Data` load is waiting for rows.
    pub fn is_loading(&self) -> bool {
        self.rows.is_loading()
    }

    /// Answer a LOCAL INFILE request for `name`.
    ///
    /// Returns the server's completion, or `None` when `name` started a
    /// programmatic load; rows then go through `write_row` and the load ends
    /// with `finish_load`.
    pub async fn handle_request(&mut self, name: &str) -> InfileResult<Option<OkPacket>> {
        let mut chunk_size = MAX_CHUNK_SIZE.min(self.config.max_write_size());

        if name == DATA_SENTINEL {
            self.rows.begin(self.config.max_write_size());
            tracing::debug!("LOAD DATA started, flush threshold {}", self.rows.threshold());
            return Ok(None);
        }

        let (mut source, resolved) = match self.resolve(name, &mut chunk_size).await {
            Ok(source) => (Some(source), Ok(())),
            Err(e) => (None, Err(e)),
        };

        let result = self.exchange(source.as_mut(), resolved, chunk_size).await;

        let closed = match source {
            Some(source) => source.close().await,
            None => Ok(()),
        };
        first_error(result, closed).map(Some)
    }

    /// Map a request name onto an open source, shrinking `chunk_size` for
    /// files smaller than one chunk.
    async fn resolve(&self, name: &str, chunk_size: &mut usize) -> InfileResult<LocalSource> {
        if let Some(reader) = reader_name(name) {
            let handler = self
                .registry
                .lookup_reader(reader)
                .ok_or_else(|| InfileError::ReaderNotRegistered(reader.to_string()))?;
            let stream = handler
                .open()
                .ok_or_else(|| InfileError::ReaderUnavailable(reader.to_string()))?;
            tracing::debug!("LOCAL INFILE streaming reader '{}'", reader);
            return Ok(LocalSource::Reader(stream));
        }

        let path = normalize_path(name);
        if !self
            .registry
            .is_file_allowed(path, self.config.allow_all_files)
        {
            tracing::warn!("LOCAL INFILE request for unregistered file '{}'", path);
            return Err(InfileError::FileNotAllowed(path.to_string()));
        }

        let open_err = |source| InfileError::Open {
            path: path.to_string(),
            source,
        };
        let file = File::open(path).await.map_err(open_err)?;
        let size = file.metadata().await.map_err(open_err)?.len();
        if size < *chunk_size as u64 {
            *chunk_size = size as usize;
        }
        tracing::debug!(
            "LOCAL INFILE streaming '{}' ({} bytes, chunk {})",
            path,
            size,
            chunk_size
        );
        Ok(LocalSource::File(file))
    }

    /// Stream the source, send the terminator, then read the completion, or
    /// drain it when resolution or streaming failed.
    async fn exchange(
        &mut self,
        source: Option<&mut LocalSource>,
        resolved: InfileResult<()>,
        chunk_size: usize,
    ) -> InfileResult<OkPacket> {
        let mut outcome = resolved;

        if outcome.is_ok()
            && chunk_size > 0
            && let Some(source) = source
        {
            let mut data = vec![0u8; HEADER_SIZE + chunk_size];
            loop {
                match source.read(&mut data[HEADER_SIZE..]).await {
                    Ok(0) => break,
                    Ok(n) => self.io.write_packet(&mut data[..HEADER_SIZE + n]).await?,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        outcome = Err(InfileError::Read(e));
                        break;
                    }
                }
            }
        }

        let mut terminator = [0u8; HEADER_SIZE];
        self.io.write_packet(&mut terminator).await?;

        match outcome {
            Ok(()) => self.io.read_result_ok().await,
            Err(e) => {
                if let Err(drain_err) = self.io.drain_packet().await {
                    tracing::warn!("failed to drain LOCAL INFILE reply: {}", drain_err);
                }
                Err(e)
            }
        }
    }

    /// Append one row to the programmatic load. An empty row ends the load
    /// and returns the server's completion.
    pub async fn write_row(&mut self, values: &[Value]) -> InfileResult<Option<OkPacket>> {
        if values.is_empty() {
            return self.finish_load().await.map(Some);
        }

        if self.rows.push_row(values, &self.config)? {
            tracing::debug!("LOAD DATA flushing {} bytes", self.rows.len() - HEADER_SIZE);
            let mut packet = self.rows.take_packet();
            self.io.write_packet(&mut packet).await?;
        }
        Ok(None)
    }

    /// End the programmatic load: flush what is buffered (at least one data
    /// packet), send the terminator and read the completion. The load is
    /// over afterwards even if this fails.
    pub async fn finish_load(&mut self) -> InfileResult<OkPacket> {
        if !self.rows.is_loading() {
            return Err(InfileError::Protocol("no LOAD DATA in progress".into()));
        }
        let result = self.terminate_load().await;
        self.rows.finish();
        result
    }

    async fn terminate_load(&mut self) -> InfileResult<OkPacket> {
        let mut packet = self.rows.take_packet();
        self.io.write_packet(&mut packet).await?;

        let mut terminator = [0u8; HEADER_SIZE];
        self.io.write_packet(&mut terminator).await?;

        self.io.read_result_ok().await
    }

    /// Run a statement that may trigger LOCAL INFILE.
    ///
    /// Returns the completion, or `None` if the statement named `Data::Data`
    /// and a programmatic load is now in progress.
    pub async fn execute(&mut self, sql: &str) -> InfileResult<Option<OkPacket>> {
        if self.rows.is_loading() {
            return Err(InfileError::Protocol(
                "LOAD DATA in progress, finish it first".into(),
            ));
        }

        let query = encode_query(sql);
        self.io.write_command(&query).await?;

        let packet = self.io.read_packet().await?;
        match ResultHeader::parse(&packet)? {
            ResultHeader::Ok(ok) => Ok(Some(ok)),
            ResultHeader::LocalInfile(name) => self.handle_request(&name).await,
            ResultHeader::ResultSet(columns) => Err(InfileError::Protocol(format!(
                "statement returned a result set ({} columns)",
                columns
            ))),
        }
    }

    /// Load `rows` with a statement reading from `'Data::Data'`, e.g.
    /// `LOAD DATA LOCAL INFILE 'Data::Data' INTO TABLE t`.
    ///
    /// With `strict_values`, every row is checked before the statement is
    /// sent, so a batch holding an unsupported value sends nothing.
    pub async fn load_rows<I, R>(&mut self, sql: &str, rows: I) -> InfileResult<OkPacket>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[Value]>,
    {
        let rows: Vec<R> = rows.into_iter().collect();
        if self.config.strict_values
            && let Some(value) = rows
                .iter()
                .flat_map(|row| row.as_ref())
                .find(|v| matches!(v, Value::Unsupported(_)))
        {
            return Err(InfileError::UnsupportedValue(value.kind().to_string()));
        }

        let Some(started) = self.execute(sql).await.transpose() else {
            // programmatic load is waiting for rows
            for row in rows {
                let row = row.as_ref();
                if row.is_empty() {
                    continue;
                }
                if let Err(e) = self.write_row(row).await {
                    if !e.is_fatal() {
                        // keep the protocol in sync before reporting
                        let _ = self.finish_load().await;
                    }
                    self.rows.finish();
                    return Err(e);
                }
            }
            return self.finish_load().await;
        };

        let ok = started?;
        tracing::warn!("load_rows statement did not request 'Data::Data'");
        Ok(ok)
    }
}
