//! Request and response payloads.
//!
//! A [`Body`] is either buffered (in memory, re-readable) or unbuffered (a
//! single-pass stream, usually a live connection). Both variants share one
//! read/write contract and are safe to use from concurrent tasks:
//!
//! - buffered bodies sit behind a read-write lock, so reads run in parallel
//!   and every write swaps the whole buffer at once;
//! - unbuffered bodies sit behind an async mutex because reading drains the
//!   stream.
//!
//! Writes always *replace* the current contents.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::BoxError;
use crate::{mime, Error, Result};

/// Byte stream backing an unbuffered body.
pub type BodyStream = BoxStream<'static, std::result::Result<Bytes, BoxError>>;

/// A request or response payload.
pub enum Body {
    Buffered(BufferedBody),
    Unbuffered(UnbufferedBody),
}

impl Body {
    /// An empty buffered body.
    pub fn empty() -> Self {
        Body::Buffered(BufferedBody::new())
    }

    /// An in-memory body holding `bytes`.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Body::Buffered(BufferedBody::from_bytes(bytes))
    }

    /// A single-pass body over `stream`.
    pub fn from_stream(stream: BodyStream) -> Self {
        Body::Unbuffered(UnbufferedBody::new(stream))
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self, Body::Buffered(_))
    }

    /// Length of a buffered body; unknown for streams.
    pub fn content_length(&self) -> Option<usize> {
        match self {
            Body::Buffered(body) => Some(body.len()),
            Body::Unbuffered(_) => None,
        }
    }

    /// Reads the whole payload. A drained unbuffered body reads empty.
    pub async fn read_bytes(&self) -> Result<Bytes> {
        match self {
            Body::Buffered(body) => Ok(body.bytes()),
            Body::Unbuffered(body) => body.read_bytes().await,
        }
    }

    pub async fn read_string(&self) -> Result<String> {
        decode_string(self.read_bytes().await?)
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.read_bytes().await?)?)
    }

    pub async fn read_xml<T: DeserializeOwned>(&self) -> Result<T> {
        decode_xml(self.read_bytes().await?)
    }

    /// Replaces the contents. Concurrent writes never interleave.
    pub async fn write_bytes(&self, bytes: impl Into<Bytes>) {
        match self {
            Body::Buffered(body) => body.replace(bytes),
            Body::Unbuffered(body) => body.replace(bytes).await,
        }
    }

    pub async fn write_string(&self, text: impl Into<String>) {
        self.write_bytes(text.into()).await;
    }

    /// Replaces the contents with `value` as JSON.
    ///
    /// On an encode error the previous contents are kept.
    pub async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let encoded = encode_json(value)?;
        self.write_bytes(encoded).await;
        Ok(())
    }

    pub async fn write_xml<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let encoded = encode_xml(value)?;
        self.write_bytes(encoded).await;
        Ok(())
    }

    /// Encodes `fields` as `multipart/form-data` and returns the content type
    /// carrying the generated boundary.
    pub async fn write_form_data<I, K, V>(&self, fields: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let (encoded, content_type) = encode_form_data(fields)?;
        self.write_bytes(encoded).await;
        Ok(content_type)
    }

    /// Replaces the contents with `stream`.
    ///
    /// A buffered body drains the stream into memory first.
    pub async fn set(&self, stream: BodyStream) -> Result<()> {
        match self {
            Body::Buffered(body) => body.set(stream).await,
            Body::Unbuffered(body) => {
                body.set(stream).await;
                Ok(())
            }
        }
    }

    /// Hands out a readable stream.
    ///
    /// A buffered body yields a fresh view over its current bytes. An
    /// unbuffered body gives up its stream and is empty afterwards.
    pub async fn stream(&self) -> BodyStream {
        match self {
            Body::Buffered(body) => body.stream(),
            Body::Unbuffered(body) => body.take_stream().await,
        }
    }

    /// Releases the underlying source. A no-op for buffered bodies.
    pub async fn close(&self) {
        if let Body::Unbuffered(body) = self {
            body.close().await;
        }
    }

    /// Produces the payload handed to reqwest for one attempt.
    pub(crate) async fn to_wire(&self) -> Option<reqwest::Body> {
        match self {
            Body::Buffered(body) => {
                let bytes = body.bytes();
                (!bytes.is_empty()).then(|| reqwest::Body::from(bytes))
            }
            Body::Unbuffered(body) => body
                .try_take_stream()
                .await
                .map(reqwest::Body::wrap_stream),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Buffered(body) => f.debug_tuple("Buffered").field(body).finish(),
            Body::Unbuffered(body) => f.debug_tuple("Unbuffered").field(body).finish(),
        }
    }
}

/// In-memory body; every read sees the last write.
#[derive(Debug, Default)]
pub struct BufferedBody {
    buf: RwLock<Bytes>,
}

impl BufferedBody {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            buf: RwLock::new(bytes.into()),
        }
    }

    /// Cheap handle to the current contents.
    pub fn bytes(&self) -> Bytes {
        self.buf.read().clone()
    }

    pub fn len(&self) -> usize {
        self.buf.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.read().is_empty()
    }

    pub fn read_string(&self) -> Result<String> {
        decode_string(self.bytes())
    }

    pub fn read_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.bytes())?)
    }

    pub fn read_xml<T: DeserializeOwned>(&self) -> Result<T> {
        decode_xml(self.bytes())
    }

    /// Swaps the whole buffer in one step.
    pub fn replace(&self, bytes: impl Into<Bytes>) {
        *self.buf.write() = bytes.into();
    }

    pub fn write_string(&self, text: impl Into<String>) {
        self.replace(text.into());
    }

    /// Encodes before taking the lock, so a failed encode keeps the old bytes.
    pub fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let encoded = encode_json(value)?;
        self.replace(encoded);
        Ok(())
    }

    pub fn write_xml<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let encoded = encode_xml(value)?;
        self.replace(encoded);
        Ok(())
    }

    pub fn write_form_data<I, K, V>(&self, fields: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let (encoded, content_type) = encode_form_data(fields)?;
        self.replace(encoded);
        Ok(content_type)
    }

    pub async fn set(&self, stream: BodyStream) -> Result<()> {
        let drained = drain(stream).await?;
        self.replace(drained);
        Ok(())
    }

    /// A fresh one-chunk stream over the current contents.
    pub fn stream(&self) -> BodyStream {
        single_chunk(self.bytes())
    }
}

/// Single-pass body backed by a stream.
///
/// Each byte can be read once; reads after the end return empty results.
pub struct UnbufferedBody {
    source: tokio::sync::Mutex<Option<BodyStream>>,
    closed: AtomicBool,
}

impl UnbufferedBody {
    /// Wraps `stream`; nothing is read until the first read call.
    pub fn new(stream: BodyStream) -> Self {
        Self {
            source: tokio::sync::Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
        }
    }

    /// Wraps the remaining payload of a live response.
    pub(crate) fn from_response(response: reqwest::Response) -> Self {
        Self::new(
            response
                .bytes_stream()
                .map_err(|err| Box::new(err) as BoxError)
                .boxed(),
        )
    }

    /// Drains whatever is left of the stream.
    ///
    /// A fully drained stream is dropped so it is never polled past its end;
    /// on a chunk error the stream is kept.
    pub async fn read_bytes(&self) -> Result<Bytes> {
        let mut source = self.source.lock().await;
        let Some(stream) = source.as_mut() else {
            return Ok(Bytes::new());
        };
        let drained = drain(stream).await?;
        *source = None;
        Ok(drained)
    }

    pub async fn read_string(&self) -> Result<String> {
        decode_string(self.read_bytes().await?)
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.read_bytes().await?)?)
    }

    pub async fn read_xml<T: DeserializeOwned>(&self) -> Result<T> {
        decode_xml(self.read_bytes().await?)
    }

    /// Swaps in a new in-memory source, dropping the previous stream.
    pub async fn replace(&self, bytes: impl Into<Bytes>) {
        self.set(single_chunk(bytes.into())).await;
    }

    /// Replaces the stream and reopens a closed body.
    pub async fn set(&self, stream: BodyStream) {
        let mut source = self.source.lock().await;
        *source = Some(stream);
        self.closed.store(false, Ordering::Release);
    }

    /// Takes the stream out, leaving an empty body behind.
    pub async fn take_stream(&self) -> BodyStream {
        self.try_take_stream()
            .await
            .unwrap_or_else(|| stream::empty().boxed())
    }

    pub(crate) async fn try_take_stream(&self) -> Option<BodyStream> {
        self.source.lock().await.take()
    }

    /// Drops the stream and with it the connection. Later calls do nothing.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.source.lock().await.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for UnbufferedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnbufferedBody")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn single_chunk(bytes: Bytes) -> BodyStream {
    stream::once(async move { Ok::<_, BoxError>(bytes) }).boxed()
}

async fn drain<S>(mut stream: S) -> Result<Bytes>
where
    S: futures_util::Stream<Item = std::result::Result<Bytes, BoxError>> + Unpin,
{
    let mut collected = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.map_err(Error::Body)?);
    }
    Ok(collected.freeze())
}

fn decode_string(bytes: Bytes) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|err| Error::Decode(format!("body is not valid utf-8: {err}")))
}

fn decode_xml<T: DeserializeOwned>(bytes: Bytes) -> Result<T> {
    let text = decode_string(bytes)?;
    Ok(quick_xml::de::from_str(&text)?)
}

pub(crate) fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

pub(crate) fn encode_xml<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(quick_xml::se::to_string(value)?))
}

/// Encodes `fields` as one multipart part each.
pub(crate) fn encode_form_data<I, K, V>(fields: I) -> Result<(Bytes, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let boundary = random_boundary();
    let mut encoded = Vec::new();
    write_form_data(&mut encoded, &boundary, fields).map_err(Error::Form)?;
    let content_type = format!("{}; boundary={boundary}", mime::MULTIPART_FORM_DATA);
    Ok((Bytes::from(encoded), content_type))
}

fn write_form_data<W, I, K, V>(out: &mut W, boundary: &str, fields: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    for (name, value) in fields {
        write!(out, "--{boundary}\r\n")?;
        write!(
            out,
            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
            escape_quotes(name.as_ref())
        )?;
        out.write_all(value.as_ref().as_bytes())?;
        out.write_all(b"\r\n")?;
    }
    write!(out, "--{boundary}--\r\n")?;
    out.flush()
}

fn escape_quotes(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

fn random_boundary() -> String {
    let raw: [u8; 16] = rand::thread_rng().gen();
    raw.iter().map(|byte| format!("{byte:02x}")).collect()
}
