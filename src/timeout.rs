//! 连接级写超时：写操作持续挂起超过时限即以 `TimedOut` 失败，hyper 随后关闭连接。

use axum_server::accept::Accept;
use std::future::{Future, Ready, ready};
use std::io::{self, IoSlice};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Sleep, sleep};

/// 为每个接受的连接套上 [`WriteTimeoutStream`]。
#[derive(Clone, Copy, Debug)]
pub struct WriteTimeoutAcceptor {
    write_timeout: Duration,
}

impl WriteTimeoutAcceptor {
    pub fn new(write_timeout: Duration) -> Self {
        Self { write_timeout }
    }
}

impl<I, S> Accept<I, S> for WriteTimeoutAcceptor {
    type Stream = WriteTimeoutStream<I>;
    type Service = S;
    type Future = Ready<io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        ready(Ok((WriteTimeoutStream::new(stream, self.write_timeout), service)))
    }
}

/// 计时只在写端挂起期间进行，任何一次写入取得进展都会清除计时。
pub struct WriteTimeoutStream<S> {
    inner: S,
    write_timeout: Duration,
    stalled_since: Option<Pin<Box<Sleep>>>,
}

impl<S> WriteTimeoutStream<S> {
    pub fn new(inner: S, write_timeout: Duration) -> Self {
        Self {
            inner,
            write_timeout,
            stalled_since: None,
        }
    }

    fn track<T>(&mut self, cx: &mut Context<'_>, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        if poll.is_ready() {
            self.stalled_since = None;
            return poll;
        }
        let write_timeout = self.write_timeout;
        let deadline = self
            .stalled_since
            .get_or_insert_with(|| Box::pin(sleep(write_timeout)));
        if deadline.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }
        self.stalled_since = None;
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "connection write timed out",
        )))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for WriteTimeoutStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for WriteTimeoutStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.track(cx, poll)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        this.track(cx, poll)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        this.track(cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        this.track(cx, poll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn stalled_write_times_out() {
        let (client, _server) = duplex(8);
        let mut stream = WriteTimeoutStream::new(client, Duration::from_millis(50));

        let result = tokio::time::timeout(Duration::from_secs(5), stream.write_all(&[0u8; 64]))
            .await
            .expect("write should fail before the outer timeout");
        let err = result.expect_err("peer never reads");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn write_completes_while_peer_reads() {
        let (client, mut server) = duplex(8);
        let mut stream = WriteTimeoutStream::new(client, Duration::from_millis(200));

        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            server.read_to_end(&mut received).await.expect("read");
            received
        });
        stream.write_all(&[7u8; 64]).await.expect("write");
        stream.shutdown().await.expect("shutdown");
        drop(stream);

        assert_eq!(reader.await.expect("join"), vec![7u8; 64]);
    }

    #[tokio::test]
    async fn reads_pass_through() {
        let (client, mut server) = duplex(64);
        let mut stream = WriteTimeoutStream::new(client, Duration::from_millis(50));
        server.write_all(b"ping").await.expect("write");

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"ping");
    }
}
