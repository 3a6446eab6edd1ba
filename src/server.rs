//! 监听器生命周期：就绪、收到终止信号后排空、限时停止。

use axum::Router;
use axum_server::Handle;
use hyper_util::rt::TokioTimer;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{READ_TIMEOUT, SHUTDOWN_GRACE_PERIOD, WRITE_TIMEOUT};
use crate::health::Health;
use crate::timeout::WriteTimeoutAcceptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Ready(SocketAddr),
    Draining,
    Stopped,
}

#[derive(Debug)]
pub enum ServeError {
    Io(io::Error),
    ShutdownTimeout(Duration),
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::Io(err) => write!(f, "server error: {err}"),
            ServeError::ShutdownTimeout(grace) => {
                write!(f, "could not gracefully shut down within {grace:?}")
            }
        }
    }
}

impl std::error::Error for ServeError {}

impl From<io::Error> for ServeError {
    fn from(err: io::Error) -> Self {
        ServeError::Io(err)
    }
}

pub struct Server {
    addr: SocketAddr,
    health: Arc<Health>,
    grace_period: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    handle: Handle,
    state: watch::Sender<ServerState>,
}

impl Server {
    pub fn new(addr: SocketAddr, health: Arc<Health>) -> Self {
        let (state, _) = watch::channel(ServerState::Starting);
        Self {
            addr,
            health,
            grace_period: SHUTDOWN_GRACE_PERIOD,
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            handle: Handle::new(),
            state,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// 请求头读取与连接写入的时限，不限制处理器执行时间。
    pub fn with_io_timeouts(mut self, read_timeout: Duration, write_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }

    /// 生命周期状态的订阅端。
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// 运行到 `shutdown` 完成并排空连接为止。
    ///
    /// 排空超过宽限期时返回 [`ServeError::ShutdownTimeout`]，由调用方决定终止进程。
    pub async fn run<F>(self, app: Router, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        let mut server = axum_server::bind(self.addr)
            .acceptor(WriteTimeoutAcceptor::new(self.write_timeout))
            .handle(self.handle.clone());
        server
            .http_builder()
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.read_timeout);
        let mut serving =
            tokio::spawn(server.serve(app.into_make_service_with_connect_info::<SocketAddr>()));

        let listening = tokio::select! {
            addr = self.handle.listening() => addr,
            result = &mut serving => {
                self.state.send_replace(ServerState::Stopped);
                return flatten(result);
            }
        };
        let Some(local_addr) = listening else {
            self.state.send_replace(ServerState::Stopped);
            return flatten(serving.await);
        };

        self.health.mark_ready();
        self.state.send_replace(ServerState::Ready(local_addr));
        info!("Server is ready to handle requests at {}", local_addr);

        tokio::pin!(shutdown);
        tokio::select! {
            result = &mut serving => {
                self.health.mark_not_ready();
                self.state.send_replace(ServerState::Stopped);
                return flatten(result);
            }
            _ = &mut shutdown => {}
        }

        self.health.mark_not_ready();
        self.state.send_replace(ServerState::Draining);
        info!(grace_period = ?self.grace_period, "Server is shutting down");
        self.handle.graceful_shutdown(None);

        let drained = match tokio::time::timeout(self.grace_period, &mut serving).await {
            Ok(result) => flatten(result),
            Err(_) => {
                serving.abort();
                Err(ServeError::ShutdownTimeout(self.grace_period))
            }
        };
        self.state.send_replace(ServerState::Stopped);
        if drained.is_ok() {
            info!("Server exiting");
        }
        drained
    }
}

fn flatten(result: Result<io::Result<()>, tokio::task::JoinError>) -> Result<(), ServeError> {
    match result {
        Ok(inner) => inner.map_err(ServeError::Io),
        Err(err) => Err(ServeError::Io(io::Error::other(err.to_string()))),
    }
}

/// 等待 Ctrl+C 或 SIGTERM。
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Extension;
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use crate::health::healthz;

    async fn slow(Extension(delay): Extension<Duration>) -> &'static str {
        tokio::time::sleep(delay).await;
        "done"
    }

    fn app(health: Arc<Health>, delay: Duration) -> Router {
        Router::new()
            .route("/slow", get(slow))
            .route("/healthz", get(healthz))
            .layer(Extension(health))
            .layer(Extension(delay))
    }

    async fn raw_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write request");
        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .await
            .expect("read response");
        response
    }

    struct Running {
        addr: SocketAddr,
        health: Arc<Health>,
        states: watch::Receiver<ServerState>,
        trigger: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<Result<(), ServeError>>,
    }

    async fn start(delay: Duration, grace: Duration) -> Running {
        start_with(delay, |server| server.with_grace_period(grace)).await
    }

    async fn start_with(delay: Duration, configure: impl FnOnce(Server) -> Server) -> Running {
        let health = Arc::new(Health::new());
        let server = configure(Server::new(
            "127.0.0.1:0".parse().expect("addr"),
            health.clone(),
        ));
        let mut states = server.subscribe();
        assert_eq!(*states.borrow(), ServerState::Starting);
        assert!(health.uptime().is_none());

        let (trigger, shutdown) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(app(health.clone(), delay), async {
            let _ = shutdown.await;
        }));
        let addr = match *states
            .wait_for(|state| matches!(state, ServerState::Ready(_)))
            .await
            .expect("ready")
        {
            ServerState::Ready(addr) => addr,
            other => panic!("unexpected state {other:?}"),
        };
        Running {
            addr,
            health,
            states,
            trigger,
            task,
        }
    }

    #[tokio::test]
    async fn health_follows_lifecycle() {
        let running = start(Duration::from_millis(10), Duration::from_secs(2)).await;
        assert!(running.health.uptime().is_some());
        let response = raw_get(running.addr, "/healthz").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("uptime: "));

        running.trigger.send(()).expect("trigger shutdown");
        let result = running.task.await.expect("join");
        assert!(result.is_ok());
        assert!(running.health.uptime().is_none());
        assert_eq!(*running.states.borrow(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn in_flight_request_finishes_within_grace_period() {
        let mut running = start(Duration::from_millis(300), Duration::from_secs(3)).await;
        let addr = running.addr;
        let request = tokio::spawn(async move { raw_get(addr, "/slow").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        running.trigger.send(()).expect("trigger shutdown");
        running
            .states
            .wait_for(|state| *state == ServerState::Draining)
            .await
            .expect("draining");
        assert!(running.health.uptime().is_none());

        let response = request.await.expect("join request");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("done"));
        assert!(running.task.await.expect("join").is_ok());
    }

    #[tokio::test]
    async fn drain_exceeding_grace_period_times_out() {
        let running = start(Duration::from_secs(5), Duration::from_millis(200)).await;
        let addr = running.addr;
        let _request = tokio::spawn(async move { raw_get(addr, "/slow").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        running.trigger.send(()).expect("trigger shutdown");
        let result = running.task.await.expect("join");
        assert!(matches!(result, Err(ServeError::ShutdownTimeout(_))));
        assert!(running.health.uptime().is_none());
        assert_eq!(*running.states.borrow(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn stalled_request_headers_close_the_connection() {
        let running = start_with(Duration::from_millis(10), |server| {
            server.with_io_timeouts(Duration::from_millis(200), Duration::from_secs(2))
        })
        .await;

        let mut stream = TcpStream::connect(running.addr).await.expect("connect");
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\n")
            .await
            .expect("write partial headers");
        let mut response = Vec::new();
        let closed =
            tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
        assert!(closed.is_ok(), "connection with stalled headers stayed open");

        running.trigger.send(()).expect("trigger shutdown");
        assert!(running.task.await.expect("join").is_ok());
    }

    #[tokio::test]
    async fn complete_requests_are_unaffected_by_io_timeouts() {
        let running = start_with(Duration::from_millis(400), |server| {
            server.with_io_timeouts(Duration::from_millis(200), Duration::from_millis(200))
        })
        .await;

        let response = raw_get(running.addr, "/slow").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("done"));

        running.trigger.send(()).expect("trigger shutdown");
        assert!(running.task.await.expect("join").is_ok());
    }
}
