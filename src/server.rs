use crate::app::App;
use crate::shutdown::{ConnGuard, ConnSignal, ShutdownManager};
use crate::TrellisError;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// The peer address of the connection a request arrived on.  The server
/// seeds this into the item store of every context, so any middleware can
/// retrieve it with [`crate::Context::get`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteAddress(pub SocketAddr);

impl App {
    /// Binds the given address and serves the application on it.
    ///
    /// This completes only once [`ShutdownManager::shutdown`] stops the
    /// accept loop (or binding fails).
    ///
    /// # Errors
    /// Errors if the address cannot be parsed as a socket address, or the
    /// socket cannot be bound.
    pub async fn listen(self, address: impl Into<String>) -> crate::Result<()> {
        let address = address.into();
        let address: SocketAddr = address
            .parse()
            .map_err(|_| TrellisError::InvalidAddress(address))?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(TrellisError::Bind)?;
        log::info!("listen({})", address);
        self.serve(listener).await
    }

    /// Serves the application on an already-bound listener.  Useful when
    /// the caller needs the bound address first, e.g. after binding port 0.
    pub async fn serve(self, listener: TcpListener) -> crate::Result<()> {
        let app = Arc::new(self);
        let manager = app.shutdown_ref().clone();
        let mut accept_closed = manager.accept_closed();

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        log::warn!("accept failed: {}", error);
                        continue;
                    }
                },
                _ = accept_closed.changed() => break,
            };
            let (guard, signal) = manager.register();
            let service = AppService {
                app: app.clone(),
                manager: manager.clone(),
                conn: guard.id(),
                peer,
            };
            tokio::spawn(drive_connection(stream, service, guard, signal));
        }

        log::info!("accept loop stopped");
        Ok(())
    }
}

// Runs one connection to completion, obeying the shutdown signal: Drain
// finishes the in-flight exchange and closes, Force severs outright.
async fn drive_connection(
    stream: TcpStream,
    service: AppService,
    guard: ConnGuard,
    mut signal: watch::Receiver<ConnSignal>,
) {
    let conn = hyper::server::conn::Http::new().serve_connection(stream, service);
    tokio::pin!(conn);
    let mut signal_open = true;
    loop {
        tokio::select! {
            finished = conn.as_mut() => {
                if let Err(error) = finished {
                    log::debug!("connection closed with error: {}", error);
                }
                break;
            }
            changed = signal.changed(), if signal_open => match changed {
                Err(_) => signal_open = false,
                Ok(()) => match *signal.borrow_and_update() {
                    ConnSignal::Run => {}
                    ConnSignal::Drain => conn.as_mut().graceful_shutdown(),
                    ConnSignal::Force => break,
                },
            },
        }
    }
    drop(guard);
}

// The hyper-facing face of the application: one service per connection.
// Dispatch never fails; errors become responses before they reach here.
struct AppService {
    app: Arc<App>,
    manager: ShutdownManager,
    conn: u64,
    peer: SocketAddr,
}

impl tower::Service<http::Request<hyper::Body>> for AppService {
    type Response = http::Response<hyper::Body>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut request: http::Request<hyper::Body>) -> Self::Future {
        self.manager.request_started(self.conn);
        request.extensions_mut().insert(RemoteAddress(self.peer));
        let app = self.app.clone();
        let manager = self.manager.clone();
        let conn = self.conn;
        Box::pin(async move {
            let response = app.handle(request).await;
            manager.request_finished(conn);
            Ok(response.into_inner())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Context, Next, Response};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn serve_app(app: App) -> (SocketAddr, ShutdownManager, tokio::task::JoinHandle<()>) {
        let manager = app.shutdown_manager();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            app.serve(listener).await.unwrap();
        });
        (address, manager, handle)
    }

    async fn raw_request(address: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        String::from_utf8(raw).unwrap()
    }

    #[tokio::test]
    async fn test_serves_a_request_end_to_end() {
        let mut app = App::new();
        app.with(|cx: Context, _next: Next| async move {
            cx.respond(Response::text("pong"));
            Ok(())
        });
        let (address, manager, handle) = serve_app(app).await;

        let raw = raw_request(
            address,
            "GET /ping HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n",
        )
        .await;
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "got: {}", raw);
        assert!(raw.ends_with("pong"), "got: {}", raw);

        assert!(!manager.shutdown(Duration::from_secs(1)).await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_address_is_seeded() {
        let mut app = App::new();
        app.with(|cx: Context, _next: Next| async move {
            let peer = cx.get::<RemoteAddress>();
            cx.respond(Response::text(format!("{:?}", peer.map(|p| p.0.ip()))));
            Ok(())
        });
        let (address, manager, handle) = serve_app(app).await;

        let raw = raw_request(
            address,
            "GET / HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n",
        )
        .await;
        assert!(raw.contains("127.0.0.1"), "got: {}", raw);

        assert!(!manager.shutdown(Duration::from_secs(1)).await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_rejects_bad_address() {
        let app = App::new();
        let error = app.listen("not-an-address").await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<TrellisError>(),
            Some(TrellisError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_drains_idle_keep_alive_connection() {
        let mut app = App::new();
        app.with(|cx: Context, _next: Next| async move {
            cx.respond(Response::empty_204());
            Ok(())
        });
        let (address, manager, handle) = serve_app(app).await;

        // keep-alive: the connection stays open after the exchange
        let mut stream = TcpStream::connect(address).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nhost: test\r\n\r\n")
            .await
            .unwrap();
        let mut buffer = [0u8; 1024];
        let read = stream.read(&mut buffer).await.unwrap();
        assert!(read > 0);

        // the drain closes it without waiting out the grace period
        assert!(!manager.shutdown(Duration::from_secs(5)).await);
        let read = stream.read(&mut buffer).await.unwrap();
        assert_eq!(read, 0, "connection was not closed by the drain");
        handle.await.unwrap();
    }
}
