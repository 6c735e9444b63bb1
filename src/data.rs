use futures::stream::MapErr;
use futures::TryStreamExt;
use tokio::io::{AsyncReadExt, AsyncWrite, Take};
use tokio_util::io::StreamReader;

use crate::TrellisError;

/// The default cap on how many body bytes a [`crate::Context`] will buffer,
/// when the transfer encoding does not announce a smaller size.
pub(crate) const DEFAULT_BODY_LIMIT: u64 = 3_000_000;

/// The data stream of a request body.
///
/// This should be used to read data out of the body.  There are always
/// implicit limits to streaming data; the only difference is whether or not
/// your code is prepared to handle that limit.  This wraps the transport
/// body with a hard byte cap so that reading can never buffer an unbounded
/// payload.
#[derive(Debug)]
#[must_use = "this consumes the body of the request regardless of whether it is used"]
pub struct DataStream {
    stream: Take<StreamReader<HttpStream, hyper::body::Bytes>>,
}

type HttpStream = MapErr<hyper::Body, fn(hyper::Error) -> std::io::Error>;

#[derive(Debug, Copy, Clone)]
/// Information about a data transfer.  This is the result of
/// [`DataStream::into`], and provides information about the state of the
/// stream after the transfer.
pub struct DataTransfer {
    /// The number of bytes that were transferred.  This may be less than the
    /// number of bytes requested if the stream ended.
    pub count: u64,
    /// Whether or not the stream ended before or as a result of the
    /// transfer, not including the limit - if the limit was reached, and
    /// there was still pending data, this will be `false`.
    pub complete: bool,
}

impl DataStream {
    /// Create a new data stream from a hyper body.
    pub(crate) fn new(body: hyper::Body, limit: u64) -> Self {
        Self {
            stream: StreamReader::new(body.map_err(map_hyper_error as fn(_) -> _)).take(limit + 1),
        }
    }

    // note: this is destructive on the stream, so it should only be used
    // once.
    fn limit_exceeded(&mut self) -> bool {
        self.stream.limit() == 0
    }

    /// Read data from the stream.
    ///
    /// This streams from the body into the provided writer, and returns the
    /// number of bytes read and whether or not the stream is complete.
    ///
    /// # Errors
    /// This returns an error if the underlying stream cannot be written to
    /// the given writer.  It does not return an error if the stream is
    /// incomplete, as that is expected to be handled by the caller.
    pub async fn into<W: AsyncWrite + Unpin>(
        mut self,
        writer: &mut W,
    ) -> Result<DataTransfer, TrellisError> {
        let count = tokio::io::copy(&mut self.stream, writer)
            .await
            .map_err(TrellisError::ReadBody)?;
        let complete = !self.limit_exceeded();
        Ok(DataTransfer { count, complete })
    }

    /// Read data from the stream into a byte array.
    ///
    /// # Errors
    /// This returns an error if the underlying stream cannot be read, or if
    /// the body exceeds the stream's byte limit.
    pub async fn into_bytes(self) -> Result<Vec<u8>, TrellisError> {
        let mut buf = Vec::new();
        let transfer = self.into(&mut buf).await?;

        if transfer.complete {
            Ok(buf)
        } else {
            Err(TrellisError::PayloadTooLarge(anyhow::anyhow!(
                "body too large"
            )))
        }
    }

    /// Read data from the stream into a string.
    ///
    /// # Errors
    /// Errors for the same reasons as [`DataStream::into_bytes`], and also
    /// returns an error if the body is not valid UTF-8.
    pub async fn into_text(self) -> Result<String, TrellisError> {
        let bytes = self.into_bytes().await?;
        String::from_utf8(bytes).map_err(TrellisError::TextDeserialization)
    }

    /// Parses the contents of the body as JSON, deserializing it into the
    /// given value.  JSON has strict limits on the bytes/characters allowed
    /// for serialization/deserialization, so the charset should not matter.
    ///
    /// # Examples
    /// ```rust
    /// # use trellis::DataStream;
    /// # #[tokio::main] async fn main() -> Result<(), anyhow::Error> {
    /// let stream = DataStream::from(r#"{"hello": "world"}"#);
    /// let body = stream.into_json::<serde_json::Value>().await?;
    /// assert_eq!(body, serde_json::json!({ "hello": "world" }));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn into_json<T: serde::de::DeserializeOwned>(self) -> Result<T, TrellisError> {
        let bytes = self.into_bytes().await?;
        serde_json::from_slice(&bytes[..]).map_err(TrellisError::JsonDeserialization)
    }
}

impl<T> From<T> for DataStream
where
    T: Into<hyper::Body>,
{
    fn from(body: T) -> Self {
        use hyper::body::HttpBody;
        let body = body.into();
        let size_hint = body.size_hint();
        let limit = size_hint
            .upper()
            .unwrap_or_else(|| size_hint.lower())
            .min(DEFAULT_BODY_LIMIT);
        Self::new(body, limit)
    }
}

fn map_hyper_error(e: hyper::Error) -> std::io::Error {
    if e.is_closed() || e.is_incomplete_message() || e.is_canceled() {
        std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e)
    } else {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_into_bytes() {
        let stream = DataStream::from("hello");
        assert_eq!(stream.into_bytes().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_body_exactly_at_limit_is_complete() {
        let stream = DataStream::new(hyper::Body::from("0123"), 4);
        assert_eq!(stream.into_bytes().await.unwrap(), b"0123");
    }

    #[tokio::test]
    async fn test_limit_enforced() {
        let stream = DataStream::new(hyper::Body::from("0123456789"), 4);
        let result = stream.into_bytes().await;
        assert!(matches!(result, Err(TrellisError::PayloadTooLarge(_))));
    }

    #[tokio::test]
    async fn test_into_text_rejects_invalid_utf8() {
        let stream = DataStream::from(&[0xff, 0xfe][..]);
        let result = stream.into_text().await;
        assert!(matches!(result, Err(TrellisError::TextDeserialization(_))));
    }
}
