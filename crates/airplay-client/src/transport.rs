//! Stream transport to a receiver.
//!
//! Pairing bodies travel as RTSP `POST /pair-setup` and `POST /pair-verify`
//! requests. Once pairing is over the stream carries raw control frames, or
//! plain RTSP messages when the receiver needs no pairing.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use airplay_core::error::{Error, Result, TransportError};
use airplay_pairing::{parse_frame_length, Exchange, Transport};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Largest response body accepted.
const MAX_BODY_LEN: usize = 64 * 1024;

/// Largest status line plus headers accepted.
const MAX_HEAD_LEN: usize = 8 * 1024;

const USER_AGENT: &str = "AirPlay/745.83";

/// [`Transport`] over any async byte stream.
pub struct StreamTransport<S> {
    stream: BufReader<S>,
    exchange: Exchange,
    cseq: u32,
}

/// Transport over a TCP connection.
pub type TcpTransport = StreamTransport<TcpStream>;

impl TcpTransport {
    /// Connect to `addr`, giving up after `timeout`.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        info!("Connecting to {}", addr);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(TransportError::ConnectionRefused(addr.to_string()).into());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TransportError::Timeout.into()),
        };
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            exchange: Exchange::Control,
            cseq: 0,
        }
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    /// Read one RTSP message and return its head and body.
    ///
    /// The head is capped at [`MAX_HEAD_LEN`] bytes and the body at
    /// [`MAX_BODY_LEN`].
    async fn read_message(&mut self) -> Result<(String, Vec<u8>)> {
        let mut head = String::new();
        let mut remaining = MAX_HEAD_LEN;
        let mut content_length = 0usize;
        loop {
            let start = head.len();
            if self.read_head_line(&mut head, &mut remaining).await? == 0 {
                return Err(TransportError::Closed.into());
            }
            let line = &head[start..];
            if start > 0 && line.trim_end().is_empty() {
                break;
            }
            if start > 0 {
                if let Some(length) = content_length_header(line)? {
                    content_length = length;
                }
            }
        }

        if content_length > MAX_BODY_LEN {
            return Err(invalid(format!(
                "body of {} bytes exceeds {}",
                content_length, MAX_BODY_LEN
            )));
        }
        let mut body = vec![0u8; content_length];
        self.stream.read_exact(&mut body).await.map_err(read_error)?;
        Ok((head, body))
    }

    /// Append one line to `head`, reading at most `remaining` bytes.
    async fn read_head_line(&mut self, head: &mut String, remaining: &mut usize) -> Result<usize> {
        if *remaining == 0 {
            return Err(invalid(format!("response head exceeds {} bytes", MAX_HEAD_LEN)));
        }
        let n = (&mut self.stream)
            .take(*remaining as u64)
            .read_line(head)
            .await?;
        *remaining -= n;
        if *remaining == 0 && !head.ends_with('\n') {
            return Err(invalid(format!("response head exceeds {} bytes", MAX_HEAD_LEN)));
        }
        Ok(n)
    }

    async fn read_response(&mut self) -> Result<Vec<u8>> {
        let (head, body) = self.read_message().await?;
        let status = parse_status_line(head.lines().next().unwrap_or_default())?;
        if !(200..300).contains(&status) {
            return Err(invalid(format!("RTSP status {}", status)));
        }
        debug!("RTSP {} with {} byte body", status, body.len());
        Ok(body)
    }

    /// Whole unencrypted message, head and body, as received.
    async fn read_plain(&mut self) -> Result<Vec<u8>> {
        let (head, body) = self.read_message().await?;
        let mut message = head.into_bytes();
        message.extend_from_slice(&body);
        Ok(message)
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.stream.read_exact(&mut header).await.map_err(read_error)?;
        let total = parse_frame_length(&header).ok_or(TransportError::Closed)?;

        let mut frame = vec![0u8; total];
        frame[..2].copy_from_slice(&header);
        self.stream
            .read_exact(&mut frame[2..])
            .await
            .map_err(read_error)?;
        Ok(frame)
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let path = match self.exchange {
            Exchange::PairSetup => Some("/pair-setup"),
            Exchange::PairVerify => Some("/pair-verify"),
            Exchange::Control | Exchange::Plain => None,
        };

        let stream = self.stream.get_mut();
        match path {
            Some(path) => {
                self.cseq += 1;
                let request = build_request(path, self.cseq, data);
                stream.write_all(&request).await?;
            }
            None => stream.write_all(data).await?,
        }
        stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        match self.exchange {
            Exchange::PairSetup | Exchange::PairVerify => self.read_response().await,
            Exchange::Control => self.read_frame().await,
            Exchange::Plain => self.read_plain().await,
        }
    }

    async fn begin_exchange(&mut self, exchange: Exchange) -> Result<()> {
        debug!("Transport exchange: {:?}", exchange);
        self.exchange = exchange;
        Ok(())
    }
}

/// Serialize an RTSP pairing request.
pub fn build_request(path: &str, cseq: u32, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "POST {} RTSP/1.0\r\n\
         CSeq: {}\r\n\
         Content-Length: {}\r\n\
         Content-Type: application/octet-stream\r\n\
         User-Agent: {}\r\n\
         X-Apple-HKP: 3\r\n\
         \r\n",
        path,
        cseq,
        body.len(),
        USER_AGENT
    );
    let mut out = Vec::with_capacity(head.len() + body.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(body);
    out
}

/// Status code from `RTSP/1.0 200 OK`.
pub fn parse_status_line(line: &str) -> Result<u16> {
    let mut parts = line.trim_end().splitn(3, ' ');
    let protocol = parts.next().unwrap_or_default();
    if !protocol.starts_with("RTSP/") && !protocol.starts_with("HTTP/") {
        return Err(invalid(format!("bad status line {:?}", line.trim_end())));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| invalid(format!("bad status line {:?}", line.trim_end())))
}

fn content_length_header(line: &str) -> Result<Option<usize>> {
    let Some((key, value)) = line.split_once(':') else {
        return Ok(None);
    };
    if !key.trim().eq_ignore_ascii_case("Content-Length") {
        return Ok(None);
    }
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| invalid(format!("bad Content-Length {:?}", value.trim())))
}

fn invalid(message: String) -> Error {
    TransportError::InvalidResponse(message).into()
}

fn read_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        TransportError::Closed.into()
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    mod request_format {
        use super::*;

        #[test]
        fn pair_setup_request_layout() {
            let request = build_request("/pair-setup", 1, &[0x06, 0x01, 0x01]);
            let text = String::from_utf8_lossy(&request);

            assert!(text.starts_with("POST /pair-setup RTSP/1.0\r\nCSeq: 1\r\n"));
            assert!(text.contains("Content-Length: 3\r\n"));
            assert!(text.contains("Content-Type: application/octet-stream\r\n"));
            assert!(request.ends_with(b"\r\n\r\n\x06\x01\x01"));
        }

        #[test]
        fn status_line_parsing() {
            assert_eq!(parse_status_line("RTSP/1.0 200 OK\r\n").unwrap(), 200);
            assert_eq!(parse_status_line("HTTP/1.1 470 Connection Authorization Required\r\n").unwrap(), 470);
            assert!(parse_status_line("garbage\r\n").is_err());
            assert!(parse_status_line("RTSP/1.0 abc\r\n").is_err());
        }

        #[test]
        fn content_length_is_case_insensitive() {
            assert_eq!(content_length_header("content-length: 12\r\n").unwrap(), Some(12));
            assert_eq!(content_length_header("CSeq: 1\r\n").unwrap(), None);
            assert!(content_length_header("Content-Length: x\r\n").is_err());
        }
    }

    mod pairing_exchange {
        use super::*;

        #[tokio::test]
        async fn posts_body_and_reads_response() {
            let (client, mut server) = duplex(4096);
            let mut transport = StreamTransport::new(client);
            transport.begin_exchange(Exchange::PairVerify).await.unwrap();
            transport.send(&[1, 2, 3]).await.unwrap();

            let mut buf = vec![0u8; 4096];
            let n = server.read(&mut buf).await.unwrap();
            assert!(buf[..n].starts_with(b"POST /pair-verify RTSP/1.0\r\n"));

            server
                .write_all(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 2\r\n\r\n\x06\x02")
                .await
                .unwrap();
            assert_eq!(transport.receive().await.unwrap(), vec![0x06, 0x02]);
        }

        #[tokio::test]
        async fn error_status_is_invalid_response() {
            let (client, mut server) = duplex(4096);
            let mut transport = StreamTransport::new(client);
            transport.begin_exchange(Exchange::PairSetup).await.unwrap();

            server
                .write_all(b"RTSP/1.0 470 Connection Authorization Required\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            let err = transport.receive().await.unwrap_err();
            assert!(matches!(err, Error::Transport(TransportError::InvalidResponse(_))));
        }

        #[tokio::test]
        async fn closed_stream_is_closed() {
            let (client, server) = duplex(64);
            let mut transport = StreamTransport::new(client);
            transport.begin_exchange(Exchange::PairSetup).await.unwrap();
            drop(server);

            let err = transport.receive().await.unwrap_err();
            assert!(matches!(err, Error::Transport(TransportError::Closed)));
        }

        #[tokio::test]
        async fn endless_status_line_is_invalid_response() {
            let (client, mut server) = duplex(32 * 1024);
            let mut transport = StreamTransport::new(client);
            transport.begin_exchange(Exchange::PairSetup).await.unwrap();

            server.write_all(&vec![b'R'; MAX_HEAD_LEN + 512]).await.unwrap();
            let err = transport.receive().await.unwrap_err();
            assert!(matches!(err, Error::Transport(TransportError::InvalidResponse(_))));
        }

        #[tokio::test]
        async fn too_many_headers_is_invalid_response() {
            let (client, mut server) = duplex(32 * 1024);
            let mut transport = StreamTransport::new(client);
            transport.begin_exchange(Exchange::PairVerify).await.unwrap();

            let mut response = b"RTSP/1.0 200 OK\r\n".to_vec();
            for i in 0..1000 {
                response.extend_from_slice(format!("X-Pad-{}: padding\r\n", i).as_bytes());
            }
            server.write_all(&response).await.unwrap();
            let err = transport.receive().await.unwrap_err();
            assert!(matches!(err, Error::Transport(TransportError::InvalidResponse(_))));
        }
    }

    mod plain_messages {
        use super::*;

        #[tokio::test]
        async fn passes_rtsp_through_unchanged() {
            let (client, mut server) = duplex(4096);
            let mut transport = StreamTransport::new(client);
            transport.begin_exchange(Exchange::Plain).await.unwrap();

            let request = b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n";
            transport.send(request).await.unwrap();
            let mut buf = vec![0u8; request.len()];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, request);

            let first = b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n".to_vec();
            let second = b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 4\r\n\r\npong".to_vec();
            server.write_all(&[first.clone(), second.clone()].concat()).await.unwrap();

            let received = tokio::time::timeout(Duration::from_millis(500), transport.receive())
                .await
                .expect("plain response should not be read as a frame")
                .unwrap();
            assert_eq!(received, first);
            assert_eq!(transport.receive().await.unwrap(), second);
        }
    }

    mod control_frames {
        use super::*;

        #[tokio::test]
        async fn reads_one_frame_at_a_time() {
            let (client, mut server) = duplex(4096);
            let mut transport = StreamTransport::new(client);

            let mut first = vec![3, 0, b'a', b'b', b'c'];
            first.extend_from_slice(&[0xEE; 16]);
            let mut second = vec![1, 0, b'z'];
            second.extend_from_slice(&[0xDD; 16]);
            server.write_all(&[first.clone(), second.clone()].concat()).await.unwrap();

            assert_eq!(transport.receive().await.unwrap(), first);
            assert_eq!(transport.receive().await.unwrap(), second);
        }

        #[tokio::test]
        async fn sends_raw_bytes() {
            let (client, mut server) = duplex(64);
            let mut transport = StreamTransport::new(client);
            transport.send(&[9, 8, 7]).await.unwrap();

            let mut buf = [0u8; 3];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, [9, 8, 7]);
        }

        #[tokio::test]
        async fn truncated_frame_is_closed() {
            let (client, mut server) = duplex(64);
            let mut transport = StreamTransport::new(client);
            server.write_all(&[10, 0, 1, 2]).await.unwrap();
            drop(server);

            let err = transport.receive().await.unwrap_err();
            assert!(matches!(err, Error::Transport(TransportError::Closed)));
        }
    }
}
