#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
/// Errors generated specifically from this library, and not its interactions
/// with user code.
pub enum TrellisError {
    #[error("could not parse the given string ({:?}) as an address", .0)]
    /// Generated when attempting to parse an address (during
    /// [`crate::App::listen`]), but the address was invalid.
    InvalidAddress(String),
    /// Generated when attempting to bind the listen socket.
    #[error("could not bind the listen socket")]
    Bind(#[source] std::io::Error),
    /// Generated when attempting to read the body of a request, and failing.
    #[error("could not read the body of a request")]
    ReadBody(#[source] std::io::Error),
    /// Generated when attempting to deserialize the body of a request from
    /// JSON.
    #[error("could not deserialize the body of a request from JSON")]
    JsonDeserialization(#[source] serde_json::Error),
    /// Generated when attempting to deserialize the body of a request from
    /// text.
    #[error("could not deserialize the body of a request from utf-8")]
    TextDeserialization(#[source] std::string::FromUtf8Error),
    /// Generated when attempting to deserialize the query string of a
    /// request.
    #[error("could not deserialize the query string of a request")]
    QueryDeserialization(#[source] serde_qs::Error),
    /// Generated when attempting to sniff the request of its content type.
    #[error("the content-type of the request was invalid")]
    UnsupportedMediaType(Option<mime::Mime>),
    /// Generated when the request body of the request (if not provided with
    /// a Content-Length header) is too large.
    #[error("the request body of the request was too long, and was cut off")]
    PayloadTooLarge(#[source] anyhow::Error),
    /// Generated when a matched path parameter contains a malformed
    /// percent-escape, or decodes to invalid UTF-8.  This is a fault of the
    /// client, not the route.
    #[error("the path parameter {:?} was not properly percent-encoded", .0)]
    MalformedParameter(String),
}

impl TrellisError {
    /// The HTTP status that this error maps to.  Client-caused failures map
    /// into the 4xx range; everything else is a 500.
    pub fn status(&self) -> http::StatusCode {
        match self {
            TrellisError::ReadBody(_)
            | TrellisError::JsonDeserialization(_)
            | TrellisError::TextDeserialization(_)
            | TrellisError::QueryDeserialization(_)
            | TrellisError::MalformedParameter(_) => http::StatusCode::BAD_REQUEST,
            TrellisError::UnsupportedMediaType(_) => http::StatusCode::UNSUPPORTED_MEDIA_TYPE,
            TrellisError::PayloadTooLarge(_) => http::StatusCode::PAYLOAD_TOO_LARGE,
            TrellisError::InvalidAddress(_) | TrellisError::Bind(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// A failure that carries an explicit HTTP status, optionally wrapping the
/// failure that caused it.  Application code can return this from a
/// middleware or endpoint to control the status the default error handler
/// responds with; the wrapped cause stays available through
/// [`std::error::Error::source`] for diagnostics.
///
/// # Examples
/// ```rust
/// use trellis::HttpError;
///
/// let denied = HttpError::new(http::StatusCode::FORBIDDEN);
/// assert_eq!(denied.status(), http::StatusCode::FORBIDDEN);
/// ```
#[derive(thiserror::Error, Debug)]
#[error("http error: {}", .status)]
pub struct HttpError {
    status: http::StatusCode,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl HttpError {
    /// Creates an error carrying only a status.
    pub fn new(status: http::StatusCode) -> Self {
        HttpError {
            status,
            source: None,
        }
    }

    /// Creates an error carrying a status and the failure that caused it.
    pub fn with_cause<E>(status: http::StatusCode, cause: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        HttpError {
            status,
            source: Some(cause.into()),
        }
    }

    /// Get the status this error maps to.
    pub fn status(&self) -> http::StatusCode {
        self.status
    }
}

/// Maps an arbitrary chain failure to the HTTP status it should respond
/// with.  Known error kinds carry their own status; anything unrecognized is
/// a server fault, and maps to 500.
pub(crate) fn classify(error: &anyhow::Error) -> http::StatusCode {
    if let Some(http) = error.downcast_ref::<HttpError>() {
        return http.status();
    }
    if let Some(own) = error.downcast_ref::<TrellisError>() {
        return own.status();
    }
    http::StatusCode::INTERNAL_SERVER_ERROR
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_classify_own_errors() {
        let error = anyhow::Error::new(TrellisError::MalformedParameter("id".into()));
        assert_eq!(classify(&error), http::StatusCode::BAD_REQUEST);
        let error = anyhow::Error::new(TrellisError::UnsupportedMediaType(None));
        assert_eq!(classify(&error), http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_classify_http_error() {
        let error = anyhow::Error::new(HttpError::new(http::StatusCode::IM_A_TEAPOT));
        assert_eq!(classify(&error), http::StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn test_classify_unknown_is_server_fault() {
        let error = anyhow::anyhow!("something happened");
        assert_eq!(classify(&error), http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_http_error_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let error = HttpError::with_cause(http::StatusCode::SERVICE_UNAVAILABLE, io);
        let source = std::error::Error::source(&error).expect("cause preserved");
        assert!(source.to_string().contains("disk on fire"));
    }
}
