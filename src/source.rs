//! Data sources a LOCAL INFILE request can resolve to.
//!
//! Registered readers hand out a `LocalStream`, which is either a plain
//! `AsyncRead` or one with an explicit async close. The handler closes every
//! source exactly once, after the request's protocol exchange is over.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};

/// A reader that must be closed explicitly when the request finishes.
#[async_trait]
pub trait CloseableReader: AsyncRead + Send + Unpin {
    async fn close(&mut self) -> io::Result<()>;
}

enum StreamKind {
    Plain(Box<dyn AsyncRead + Send + Unpin>),
    Closeable(Box<dyn CloseableReader>),
}

/// Stream produced by a `ReaderHandler`.
pub struct LocalStream {
    kind: StreamKind,
}

impl LocalStream {
    /// Wrap a reader that needs no explicit close.
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            kind: StreamKind::Plain(Box::new(reader)),
        }
    }

    /// Wrap a reader whose `close` runs when the request completes or fails.
    pub fn closeable<R>(reader: R) -> Self
    where
        R: CloseableReader + 'static,
    {
        Self {
            kind: StreamKind::Closeable(Box::new(reader)),
        }
    }

    /// In-memory stream over owned bytes.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(io::Cursor::new(data.into()))
    }

    pub fn is_closeable(&self) -> bool {
        matches!(self.kind, StreamKind::Closeable(_))
    }

    pub async fn close(&mut self) -> io::Result<()> {
        match &mut self.kind {
            StreamKind::Plain(_) => Ok(()),
            StreamKind::Closeable(reader) => reader.close().await,
        }
    }
}

impl AsyncRead for LocalStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().kind {
            StreamKind::Plain(reader) => Pin::new(reader).poll_read(cx, buf),
            StreamKind::Closeable(reader) => Pin::new(reader).poll_read(cx, buf),
        }
    }
}

/// Factory for a named reader, registered under `Reader::<name>`.
///
/// `open` is called once per request, never at registration. Returning
/// `None` fails the request.
pub trait ReaderHandler: Send + Sync {
    fn open(&self) -> Option<LocalStream>;
}

impl<F> ReaderHandler for F
where
    F: Fn() -> Option<LocalStream> + Send + Sync,
{
    fn open(&self) -> Option<LocalStream> {
        self()
    }
}

/// A resolved request source.
pub(crate) enum LocalSource {
    File(File),
    Reader(LocalStream),
}

impl LocalSource {
    /// Release the source. Files close on drop; readers run their close.
    pub(crate) async fn close(self) -> io::Result<()> {
        match self {
            LocalSource::File(file) => {
                drop(file);
                Ok(())
            }
            LocalSource::Reader(mut stream) => stream.close().await,
        }
    }
}

impl AsyncRead for LocalSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            LocalSource::File(file) => Pin::new(file).poll_read(cx, buf),
            LocalSource::Reader(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}
