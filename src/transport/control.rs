// ABOUTME: Client for an OpenSSH control master in mux proxy mode.
// ABOUTME: Opens a direct-tcpip channel through the master and exposes it as a byte stream.

use super::Target;
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

const MUX_MSG_HELLO: u32 = 0x0000_0001;
const MUX_C_PROXY: u32 = 0x1000_000F;
const MUX_S_PERMISSION_DENIED: u32 = 0x8000_0002;
const MUX_S_FAILURE: u32 = 0x8000_0003;
const MUX_S_PROXY: u32 = 0x8000_000F;
const MUX_PROTOCOL_VERSION: u32 = 4;
const MUX_REQUEST_ID: u32 = 1;

/// SSH connection-layer message numbers (RFC 4254).
mod msg {
    pub const GLOBAL_REQUEST: u8 = 80;
    pub const REQUEST_FAILURE: u8 = 82;
    pub const CHANNEL_OPEN: u8 = 90;
    pub const CHANNEL_OPEN_CONFIRMATION: u8 = 91;
    pub const CHANNEL_OPEN_FAILURE: u8 = 92;
    pub const CHANNEL_WINDOW_ADJUST: u8 = 93;
    pub const CHANNEL_DATA: u8 = 94;
    pub const CHANNEL_EXTENDED_DATA: u8 = 95;
    pub const CHANNEL_EOF: u8 = 96;
    pub const CHANNEL_CLOSE: u8 = 97;
    pub const CHANNEL_REQUEST: u8 = 98;
    pub const CHANNEL_FAILURE: u8 = 100;
}

const LOCAL_CHANNEL_ID: u32 = 0;
const LOCAL_WINDOW: u32 = 2 * 1024 * 1024;
const LOCAL_MAX_PACKET: u32 = 32 * 1024;
const PIPE_CAPACITY: usize = 64 * 1024;

type MuxFramed<S> = Framed<S, LengthDelimitedCodec>;

/// Parameters the master reported for the opened channel.
#[derive(Debug, Clone, Copy)]
struct RemoteChannel {
    id: u32,
    window: u32,
    max_packet: u32,
}

/// Connect to the control socket and open a `direct-tcpip` channel to `target`.
pub(crate) async fn open_direct_tcpip(socket: &Path, target: &Target) -> Result<DuplexStream> {
    let stream = UnixStream::connect(socket)
        .await
        .map_err(|source| Error::DialFailed {
            address: socket.display().to_string(),
            source,
        })?;
    tracing::debug!("connected to control master at {}", socket.display());
    establish(stream, target).await
}

/// Run the mux handshake over `stream`, open the channel, and hand back the
/// near end of a pipe whose far end is pumped by a background task.
pub(crate) async fn establish<S>(stream: S, target: &Target) -> Result<DuplexStream>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    handshake(&mut framed).await?;
    let remote = open_channel(&mut framed, target).await?;
    tracing::debug!(
        "control channel {} open to {} (window {}, max packet {})",
        remote.id,
        target,
        remote.window,
        remote.max_packet
    );

    let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::spawn(async move {
        if let Err(e) = pump(framed, remote, far).await {
            tracing::debug!("control channel pump ended: {}", e);
        }
    });
    Ok(near)
}

async fn handshake<S>(framed: &mut MuxFramed<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut hello = BytesMut::with_capacity(8);
    hello.put_u32(MUX_MSG_HELLO);
    hello.put_u32(MUX_PROTOCOL_VERSION);
    send(framed, hello).await?;

    let reply = recv(framed).await?;
    let mut r = Reader::new(&reply);
    let kind = r.u32()?;
    if kind != MUX_MSG_HELLO {
        return Err(protocol(format!("expected hello, got message {:#x}", kind)));
    }
    let version = r.u32()?;
    if version != MUX_PROTOCOL_VERSION {
        return Err(protocol(format!("unsupported mux protocol version {}", version)));
    }

    let mut proxy = BytesMut::with_capacity(8);
    proxy.put_u32(MUX_C_PROXY);
    proxy.put_u32(MUX_REQUEST_ID);
    send(framed, proxy).await?;

    let reply = recv(framed).await?;
    let mut r = Reader::new(&reply);
    let kind = r.u32()?;
    let request_id = r.u32()?;
    if request_id != MUX_REQUEST_ID {
        return Err(protocol(format!("reply for unknown request {}", request_id)));
    }
    match kind {
        MUX_S_PROXY => Ok(()),
        MUX_S_PERMISSION_DENIED => Err(Error::ControlChannelFailed(format!(
            "permission denied: {}",
            r.text()?
        ))),
        MUX_S_FAILURE => Err(Error::ControlChannelFailed(r.text()?)),
        other => Err(protocol(format!("unexpected proxy reply {:#x}", other))),
    }
}

async fn open_channel<S>(framed: &mut MuxFramed<S>, target: &Target) -> Result<RemoteChannel>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut open = BytesMut::new();
    open.put_u8(msg::CHANNEL_OPEN);
    put_string(&mut open, b"direct-tcpip");
    open.put_u32(LOCAL_CHANNEL_ID);
    open.put_u32(LOCAL_WINDOW);
    open.put_u32(LOCAL_MAX_PACKET);
    put_string(&mut open, target.host.as_bytes());
    open.put_u32(u32::from(target.port));
    put_string(&mut open, b"127.0.0.1");
    open.put_u32(0);
    send(framed, open).await?;

    loop {
        let packet = recv(framed).await?;
        let mut r = Reader::new(&packet);
        match r.u8()? {
            msg::CHANNEL_OPEN_CONFIRMATION => {
                let _recipient = r.u32()?;
                return Ok(RemoteChannel {
                    id: r.u32()?,
                    window: r.u32()?,
                    max_packet: r.u32()?,
                });
            }
            msg::CHANNEL_OPEN_FAILURE => {
                let _recipient = r.u32()?;
                let code = r.u32()?;
                let description = r.text()?;
                return Err(Error::ControlChannelFailed(format!(
                    "channel to {} refused (code {}): {}",
                    target, code, description
                )));
            }
            msg::GLOBAL_REQUEST => reject_global_request(framed, &mut r).await?,
            other => tracing::debug!("ignoring message {} while opening channel", other),
        }
    }
}

/// Shuttle bytes between the pipe and the channel until either side closes.
async fn pump<S>(mut framed: MuxFramed<S>, remote: RemoteChannel, pipe: DuplexStream) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut pipe_rd, mut pipe_wr) = tokio::io::split(pipe);
    let mut buf = vec![0u8; LOCAL_MAX_PACKET as usize];
    let mut remote_window = u64::from(remote.window);
    let mut consumed: u32 = 0;
    let mut local_eof = false;
    let mut remote_eof = false;
    let mut close_sent = false;

    loop {
        let limit = remote_window
            .min(u64::from(remote.max_packet))
            .min(buf.len() as u64) as usize;

        tokio::select! {
            r = pipe_rd.read(&mut buf[..limit]), if limit > 0 && !local_eof => {
                match r {
                    Ok(n) if n > 0 => {
                        let mut data = BytesMut::with_capacity(9 + n);
                        data.put_u8(msg::CHANNEL_DATA);
                        data.put_u32(remote.id);
                        put_string(&mut data, &buf[..n]);
                        send(&mut framed, data).await?;
                        remote_window -= n as u64;
                    }
                    _ => {
                        local_eof = true;
                        send(&mut framed, channel_only(msg::CHANNEL_EOF, remote.id)).await?;
                        if remote_eof && !close_sent {
                            send(&mut framed, channel_only(msg::CHANNEL_CLOSE, remote.id)).await?;
                            close_sent = true;
                        }
                    }
                }
            }

            frame = framed.next() => {
                let packet = match frame {
                    Some(Ok(packet)) => packet.freeze(),
                    Some(Err(e)) => return Err(protocol(format!("read: {}", e))),
                    None => break,
                };
                let mut r = Reader::new(&packet);
                match r.u8()? {
                    msg::CHANNEL_DATA => {
                        let _recipient = r.u32()?;
                        let data = r.string()?;
                        if pipe_wr.write_all(data).await.is_err() {
                            if !close_sent {
                                send(&mut framed, channel_only(msg::CHANNEL_CLOSE, remote.id)).await?;
                            }
                            break;
                        }
                        consumed += data.len() as u32;
                        if consumed >= LOCAL_WINDOW / 2 {
                            let mut adjust = BytesMut::with_capacity(9);
                            adjust.put_u8(msg::CHANNEL_WINDOW_ADJUST);
                            adjust.put_u32(remote.id);
                            adjust.put_u32(consumed);
                            send(&mut framed, adjust).await?;
                            consumed = 0;
                        }
                    }
                    msg::CHANNEL_EXTENDED_DATA => {
                        let _recipient = r.u32()?;
                        let _code = r.u32()?;
                        consumed += r.string()?.len() as u32;
                    }
                    msg::CHANNEL_WINDOW_ADJUST => {
                        let _recipient = r.u32()?;
                        remote_window += u64::from(r.u32()?);
                    }
                    msg::CHANNEL_EOF => {
                        remote_eof = true;
                        pipe_wr.shutdown().await.ok();
                        if local_eof && !close_sent {
                            send(&mut framed, channel_only(msg::CHANNEL_CLOSE, remote.id)).await?;
                            close_sent = true;
                        }
                    }
                    msg::CHANNEL_CLOSE => {
                        if !close_sent {
                            send(&mut framed, channel_only(msg::CHANNEL_CLOSE, remote.id)).await?;
                        }
                        break;
                    }
                    msg::CHANNEL_REQUEST => {
                        let _recipient = r.u32()?;
                        let request = r.text()?;
                        if r.bool()? {
                            send(&mut framed, channel_only(msg::CHANNEL_FAILURE, remote.id)).await?;
                        }
                        tracing::debug!("declined channel request {}", request);
                    }
                    msg::GLOBAL_REQUEST => reject_global_request(&mut framed, &mut r).await?,
                    other => tracing::debug!("ignoring message {} on control channel", other),
                }
            }
        }
    }

    pipe_wr.shutdown().await.ok();
    Ok(())
}

async fn reject_global_request<S>(framed: &mut MuxFramed<S>, r: &mut Reader<'_>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = r.text()?;
    if r.bool()? {
        let mut failure = BytesMut::with_capacity(1);
        failure.put_u8(msg::REQUEST_FAILURE);
        send(framed, failure).await?;
    }
    tracing::debug!("declined global request {}", name);
    Ok(())
}

fn channel_only(kind: u8, channel: u32) -> BytesMut {
    let mut packet = BytesMut::with_capacity(5);
    packet.put_u8(kind);
    packet.put_u32(channel);
    packet
}

fn put_string(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

async fn send<S>(framed: &mut MuxFramed<S>, packet: BytesMut) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(packet.freeze())
        .await
        .map_err(|e| protocol(format!("write: {}", e)))
}

async fn recv<S>(framed: &mut MuxFramed<S>) -> Result<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(Ok(packet)) => Ok(packet.freeze()),
        Some(Err(e)) => Err(protocol(format!("read: {}", e))),
        None => Err(protocol("control master closed the connection".to_string())),
    }
}

fn protocol(reason: String) -> Error {
    Error::ControlChannelFailed(reason)
}

/// Bounds-checked reader for SSH wire encodings.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(protocol("truncated message".to_string()));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn text(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.string()?).into_owned())
    }
}
