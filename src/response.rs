/// An HTTP response.
///
/// This is a thin wrapper over [`http::Response`] with a [`hyper::Body`],
/// providing shortcuts for constructing responses for common use-cases.  A
/// response is installed onto a [`crate::Context`] with
/// [`crate::Context::respond`], and finalized by the application dispatcher
/// once the middleware chain unwinds.
#[derive(Debug)]
pub struct Response(http::Response<hyper::Body>);

impl Response {
    /// Creates an empty response with a 200 OK status.
    ///
    /// # Examples
    /// ```rust
    /// # use trellis::Response;
    /// let response = Response::empty_200();
    /// assert_eq!(response.status(), http::StatusCode::OK);
    /// ```
    pub fn empty_200() -> Self {
        Self::empty_status(http::StatusCode::OK)
    }

    /// Creates an empty response with a 204 No Content status.
    pub fn empty_204() -> Self {
        Self::empty_status(http::StatusCode::NO_CONTENT)
    }

    /// Creates an empty response with a 404 Not Found status.
    ///
    /// # Examples
    /// ```rust
    /// # use trellis::Response;
    /// let response = Response::empty_404();
    /// assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    /// ```
    pub fn empty_404() -> Self {
        Self::empty_status(http::StatusCode::NOT_FOUND)
    }

    /// Creates an empty response with a 500 Internal Server Error status.
    pub fn empty_500() -> Self {
        Self::empty_status(http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Creates an empty response with the given status.
    ///
    /// # Examples
    /// ```rust
    /// # use trellis::Response;
    /// let response = Response::empty_status(http::StatusCode::IM_A_TEAPOT);
    /// assert_eq!(response.status(), http::StatusCode::IM_A_TEAPOT);
    /// ```
    pub fn empty_status(status: http::StatusCode) -> Self {
        let mut response = http::Response::new(hyper::Body::empty());
        *response.status_mut() = status;
        Response(response)
    }

    /// Creates a 303 See Other response pointing to the given location.
    ///
    /// # Errors
    /// Errors if the given location cannot be converted into a header value.
    pub fn see_other<T>(location: T) -> Result<Self, http::Error>
    where
        http::HeaderValue: TryFrom<T>,
        <http::HeaderValue as TryFrom<T>>::Error: Into<http::Error>,
    {
        http::Response::builder()
            .status(http::StatusCode::SEE_OTHER)
            .header(http::header::LOCATION, location)
            .body(hyper::Body::empty())
            .map(Response)
    }

    /// Creates a 307 Temporary Redirect response pointing to the given
    /// location.
    ///
    /// # Errors
    /// Errors if the given location cannot be converted into a header value.
    pub fn temporary_redirect<T>(location: T) -> Result<Self, http::Error>
    where
        http::HeaderValue: TryFrom<T>,
        <http::HeaderValue as TryFrom<T>>::Error: Into<http::Error>,
    {
        http::Response::builder()
            .status(http::StatusCode::TEMPORARY_REDIRECT)
            .header(http::header::LOCATION, location)
            .body(hyper::Body::empty())
            .map(Response)
    }

    /// Creates a 200 OK response with a `text/plain` body.
    ///
    /// # Examples
    /// ```rust
    /// # use trellis::Response;
    /// let response = Response::text("hello, world!");
    /// assert_eq!(response.status(), http::StatusCode::OK);
    /// ```
    pub fn text<V: Into<String>>(body: V) -> Self {
        let mut response = http::Response::new(hyper::Body::from(body.into()));
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Response(response)
    }

    /// Creates a 200 OK response with an `application/json` body serialized
    /// from the given value.
    ///
    /// # Errors
    /// Errors if the value fails to serialize.
    ///
    /// # Examples
    /// ```rust
    /// # use trellis::Response;
    /// let response = Response::json(&serde_json::json!({ "ok": true })).unwrap();
    /// assert_eq!(
    ///     response.headers()[http::header::CONTENT_TYPE],
    ///     "application/json; charset=utf-8"
    /// );
    /// ```
    pub fn json<V: serde::Serialize>(body: &V) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(body)?;
        let mut response = http::Response::new(hyper::Body::from(body));
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json; charset=utf-8"),
        );
        Ok(Response(response))
    }

    /// The status of the response.
    pub fn status(&self) -> http::StatusCode {
        self.0.status()
    }

    /// Sets the status of the response.
    pub fn set_status<S: Into<http::StatusCode>>(&mut self, status: S) {
        *self.0.status_mut() = status.into();
    }

    /// Sets the status of the response, consuming and returning it.  Useful
    /// for builder-style construction.
    ///
    /// # Examples
    /// ```rust
    /// # use trellis::Response;
    /// let response = Response::text("created").with_status(http::StatusCode::CREATED);
    /// assert_eq!(response.status(), http::StatusCode::CREATED);
    /// ```
    #[must_use]
    pub fn with_status<S: Into<http::StatusCode>>(mut self, status: S) -> Self {
        self.set_status(status);
        self
    }

    /// The headers of the response.
    pub fn headers(&self) -> &http::HeaderMap<http::HeaderValue> {
        self.0.headers()
    }

    /// A mutable reference to the headers of the response.
    pub fn headers_mut(&mut self) -> &mut http::HeaderMap<http::HeaderValue> {
        self.0.headers_mut()
    }

    /// Replaces the body of the response.
    pub fn set_body<B: Into<hyper::Body>>(&mut self, body: B) {
        *self.0.body_mut() = body.into();
    }

    /// Unwraps into the underlying [`http::Response`].
    pub fn into_inner(self) -> http::Response<hyper::Body> {
        self.0
    }
}

impl Default for Response {
    fn default() -> Self {
        Response::empty_200()
    }
}

impl From<http::Response<hyper::Body>> for Response {
    fn from(response: http::Response<hyper::Body>) -> Self {
        Response(response)
    }
}

impl From<Response> for http::Response<hyper::Body> {
    fn from(response: Response) -> Self {
        response.0
    }
}
