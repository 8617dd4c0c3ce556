//! Out-of-process embedding service on a Unix socket.
//!
//! Every message is a little-endian `u32` length followed by that many
//! bytes. A request is a JSON header message; `detect` headers are followed
//! by one raw grayscale pixel message. Each request gets one JSON response.

use crate::provider::{EmbeddingProvider, ProviderError, ProviderSource};
use crate::types::{DetectedFace, Embedding, Region, EMBEDDING_DIM};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on any single message (a 4K grayscale frame is ~8 MiB).
const MAX_MESSAGE_LEN: usize = 32 * 1024 * 1024;

/// A stalled service fails the cycle instead of hanging the engine.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum RequestHeader {
    Ping,
    Detect { width: u32, height: u32 },
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    faces: Vec<WireFace>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFace {
    region: Region,
    embedding: Vec<f32>,
    confidence: f32,
    #[serde(default)]
    landmarks: Vec<[f32; 2]>,
}

impl WireFace {
    fn into_face(self) -> Result<DetectedFace, ProviderError> {
        if self.embedding.len() != EMBEDDING_DIM {
            return Err(ProviderError::Protocol(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                self.embedding.len()
            )));
        }
        Ok(DetectedFace {
            region: self.region,
            embedding: Embedding::new(self.embedding),
            confidence: self.confidence,
            landmarks: self.landmarks.into_iter().map(|[x, y]| (x, y)).collect(),
        })
    }
}

fn write_message<W: Write>(w: &mut W, bytes: &[u8]) -> Result<(), ProviderError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| ProviderError::Protocol(format!("message too large: {} bytes", bytes.len())))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_message<R: Read>(r: &mut R) -> Result<Vec<u8>, ProviderError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(ProviderError::Protocol(format!(
            "response of {len} bytes exceeds limit"
        )));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Provider backed by a connected embedding service stream.
pub struct SocketProvider<S = UnixStream> {
    stream: S,
}

impl<S: Read + Write> SocketProvider<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    fn request(&mut self, header: &RequestHeader, pixels: Option<&[u8]>) -> Result<Response, ProviderError> {
        let header = serde_json::to_vec(header)
            .map_err(|e| ProviderError::Protocol(format!("encode request: {e}")))?;
        write_message(&mut self.stream, &header)?;
        if let Some(pixels) = pixels {
            write_message(&mut self.stream, pixels)?;
        }
        self.stream.flush()?;

        let raw = read_message(&mut self.stream)?;
        let response: Response = serde_json::from_slice(&raw)
            .map_err(|e| ProviderError::Protocol(format!("decode response: {e}")))?;
        if let Some(error) = response.error {
            return Err(ProviderError::InferenceFailed(error));
        }
        Ok(response)
    }

    /// Round-trip a `ping` to confirm the service answers.
    pub fn ping(&mut self) -> Result<(), ProviderError> {
        self.request(&RequestHeader::Ping, None).map(|_| ())
    }
}

impl<S: Read + Write + Send> EmbeddingProvider for SocketProvider<S> {
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, ProviderError> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(ProviderError::Protocol(format!(
                "frame is {} bytes, expected {expected} for {width}x{height}",
                pixels.len()
            )));
        }

        let response = self.request(&RequestHeader::Detect { width, height }, Some(pixels))?;
        response.faces.into_iter().map(WireFace::into_face).collect()
    }
}

/// Provider for the service at `path` that survives service restarts.
///
/// A connection is dropped after an I/O or protocol failure. The next
/// `detect` reconnects and pings before sending the frame; a failure seen on
/// a live connection is retried once on a fresh one.
pub struct ServiceProvider {
    path: PathBuf,
    conn: Option<SocketProvider<UnixStream>>,
}

impl ServiceProvider {
    /// Connect and ping once so a dead service fails the load.
    pub fn connect(path: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let path = path.into();
        let conn = open_connection(&path)?;
        Ok(Self {
            path,
            conn: Some(conn),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

fn open_connection(path: &Path) -> Result<SocketProvider<UnixStream>, ProviderError> {
    let stream = UnixStream::connect(path)
        .map_err(|e| ProviderError::Unavailable(format!("connect {}: {e}", path.display())))?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    let mut conn = SocketProvider::new(stream);
    conn.ping()?;
    Ok(conn)
}

/// Whether the stream is still in a known state after `result`.
fn connection_usable<T>(result: &Result<T, ProviderError>) -> bool {
    !matches!(result, Err(ProviderError::Io(_) | ProviderError::Protocol(_)))
}

impl EmbeddingProvider for ServiceProvider {
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, ProviderError> {
        let (mut conn, fresh) = match self.conn.take() {
            Some(conn) => (conn, false),
            None => {
                tracing::debug!(path = %self.path.display(), "reconnecting to embedding service");
                (open_connection(&self.path)?, true)
            }
        };

        let mut result = conn.detect(pixels, width, height);
        if !fresh {
            if let Err(ProviderError::Io(e)) = &result {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "embedding service connection lost; reconnecting"
                );
                conn = open_connection(&self.path)?;
                result = conn.detect(pixels, width, height);
            }
        }

        if connection_usable(&result) {
            self.conn = Some(conn);
        }
        result
    }
}

/// Connects to an embedding service listening on `path`.
pub struct SocketSource {
    pub path: PathBuf,
}

impl SocketSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProviderSource for SocketSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Box<dyn EmbeddingProvider>, ProviderError> {
        Ok(Box::new(ServiceProvider::connect(self.path.clone())?))
    }
}
