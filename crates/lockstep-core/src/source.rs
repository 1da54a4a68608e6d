//! Element sources for pipeline inputs.
//!
//! A source hands the engine elements in chunks; it never has to hold the
//! whole collection. The engine decides whether to stream or to materialize
//! up front based on [`ElementSource::size_hint`] and the caller's
//! streaming-mode override.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::error::Result;
use crate::value::Value;

/// An abstract finite-or-unbounded element source supporting chunked pull.
#[async_trait]
pub trait ElementSource: Send {
    /// Pulls the next chunk of elements.
    ///
    /// Returns `Ok(None)` once the source is exhausted. Chunks may be of
    /// any non-zero length; callers must not assume a fixed chunk size.
    async fn next_chunk(&mut self) -> Result<Option<Vec<Value>>>;

    /// Returns the total number of elements, when known up front.
    ///
    /// Unbounded or unknown-length sources return `None`.
    fn size_hint(&self) -> Option<usize> {
        None
    }
}

/// An in-memory collection source.
///
/// Yields the collection in fixed-size chunks to exercise the same pull
/// path as external sources.
#[derive(Debug)]
pub struct VecSource {
    items: std::vec::IntoIter<Value>,
    chunk_size: usize,
    len: usize,
}

impl VecSource {
    /// Default number of elements per pulled chunk.
    pub const DEFAULT_CHUNK_SIZE: usize = 256;

    /// Creates a source over an in-memory collection.
    pub fn new(items: Vec<Value>) -> Self {
        Self::with_chunk_size(items, Self::DEFAULT_CHUNK_SIZE)
    }

    /// Creates a source with an explicit chunk size.
    pub fn with_chunk_size(items: Vec<Value>, chunk_size: usize) -> Self {
        let len = items.len();
        Self {
            items: items.into_iter(),
            chunk_size: chunk_size.max(1),
            len,
        }
    }
}

#[async_trait]
impl ElementSource for VecSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<Value>>> {
        let chunk: Vec<Value> = self.items.by_ref().take(self.chunk_size).collect();
        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.len)
    }
}

/// A file-backed source reading one JSON value per line.
///
/// The file is opened lazily on the first pull, so constructing the source
/// never touches the filesystem.
pub struct JsonLinesSource {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    chunk_size: usize,
}

impl JsonLinesSource {
    /// Creates a source over a JSON-lines file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: None,
            chunk_size: VecSource::DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the number of elements pulled per chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait]
impl ElementSource for JsonLinesSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<Value>>> {
        if self.lines.is_none() {
            let file = File::open(&self.path).await?;
            self.lines = Some(BufReader::new(file).lines());
        }
        let lines = self.lines.as_mut().expect("lines reader just initialized");

        let mut chunk = Vec::with_capacity(self.chunk_size);
        while chunk.len() < self.chunk_size {
            match lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => chunk.push(serde_json::from_str(&line)?),
                None => break,
            }
        }

        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }
}

impl std::fmt::Debug for JsonLinesSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSource")
            .field("path", &self.path)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn test_vec_source_chunks() {
        let items: Vec<Value> = (0..10).map(Value::Int).collect();
        let mut source = VecSource::with_chunk_size(items, 4);
        assert_eq!(source.size_hint(), Some(10));

        let mut pulled = Vec::new();
        let mut chunks = 0;
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            chunks += 1;
            pulled.extend(chunk);
        }
        assert_eq!(chunks, 3);
        assert_eq!(pulled, (0..10).map(Value::Int).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_vec_source_empty() {
        let mut source = VecSource::new(Vec::new());
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_lines_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "\"two\"").unwrap();
        writeln!(file, "[3, 4]").unwrap();
        file.flush().unwrap();

        let mut source = JsonLinesSource::new(file.path()).with_chunk_size(2);
        let mut pulled = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            pulled.extend(chunk);
        }
        assert_eq!(
            pulled,
            vec![
                Value::Int(1),
                Value::Text("two".into()),
                Value::List(vec![Value::Int(3), Value::Int(4)]),
            ]
        );
    }
}
