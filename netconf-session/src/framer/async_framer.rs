use crate::error::{NetconfClientError, NetconfClientResult};
use crate::framer::{FrameRead, FrameWrite, FramingMode, NETCONF_1_0_TERMINATOR};
use async_trait::async_trait;
use log::{debug, trace};
use memmem::{Searcher, TwoWaySearcher};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Splits a duplex stream into framed read and write halves sharing one
/// [`FramingMode`].
/// See [RFC6242](https://tools.ietf.org/html/rfc6242#section-4.1)
pub fn split<S>(stream: S) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let mode = FramingMode::default();
    let (read, write) = tokio::io::split(stream);
    (
        FrameReader::new(read, mode.clone()),
        FrameWriter::new(write, mode),
    )
}

pub struct FrameReader<R> {
    read_buffer: Vec<u8>,
    mode: FramingMode,

    channel: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(channel: R, mode: FramingMode) -> Self {
        FrameReader {
            read_buffer: Vec::new(),
            mode,
            channel,
        }
    }

    pub fn mode(&self) -> &FramingMode {
        &self.mode
    }

    /// Reads a chunk header. `None` is a clean end of stream between messages.
    async fn read_header(&mut self) -> NetconfClientResult<Option<u32>> {
        let mut buffer = [0u8; 2];
        match self.channel.read_exact(&mut buffer).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                if self.read_buffer.is_empty() {
                    return Ok(None);
                }
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        }
        if buffer[0] != b'\n' {
            return Err(NetconfClientError::MalformedChunk {
                expected: '\n',
                actual: buffer[0].into(),
            });
        }

        if buffer[1] != b'#' {
            return Err(NetconfClientError::MalformedChunk {
                expected: '#',
                actual: buffer[1].into(),
            });
        }

        let mut chunk_size: u32 = 0;
        let mut last_read: u8;
        loop {
            let mut buffer = [0u8; 1];
            self.channel.read_exact(&mut buffer).await?;
            last_read = buffer[0];
            if last_read == b'#' {
                continue;
            }
            if last_read == b'\n' {
                return Ok(Some(chunk_size));
            }
            if !last_read.is_ascii_digit() {
                return Err(NetconfClientError::MalformedChunk {
                    expected: '0',
                    actual: last_read.into(),
                });
            }
            chunk_size = chunk_size
                .checked_mul(10)
                .and_then(|size| size.checked_add(u32::from(last_read - b'0')))
                .ok_or(NetconfClientError::MalformedChunk {
                    expected: '\n',
                    actual: last_read.into(),
                })?;
        }
    }

    async fn read_chunked(&mut self) -> NetconfClientResult<Option<String>> {
        loop {
            let chunk_size = match self.read_header().await? {
                Some(size) => size,
                None => return Ok(None),
            };
            if chunk_size == 0 {
                break;
            }
            let mut buffer = vec![0u8; chunk_size as usize];
            self.channel.read_exact(&mut buffer).await?;
            self.read_buffer.extend(&buffer);
        }
        let message = String::from_utf8_lossy(&self.read_buffer)
            .trim()
            .to_string();
        self.read_buffer.clear();
        Ok(Some(message))
    }

    async fn read_end_of_message(&mut self) -> NetconfClientResult<Option<String>> {
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        let terminator = NETCONF_1_0_TERMINATOR.as_bytes();
        let search = TwoWaySearcher::new(terminator);
        // bytes before `searched` hold no complete terminator
        let mut searched = 0;
        let pos = loop {
            if let Some(pos) = search.search_in(&self.read_buffer[searched..]) {
                break searched + pos;
            }
            searched = self
                .read_buffer
                .len()
                .saturating_sub(terminator.len() - 1);
            let bytes = self.channel.read(&mut buffer).await?;
            if bytes == 0 {
                if self.read_buffer.iter().all(u8::is_ascii_whitespace) {
                    self.read_buffer.clear();
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel closed inside a message",
                )
                .into());
            }
            self.read_buffer.extend(&buffer[..bytes]);
        };
        let message = String::from_utf8_lossy(&self.read_buffer[..pos])
            .trim()
            .to_string();
        self.read_buffer.drain(0..(pos + terminator.len()));
        Ok(Some(message))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameRead for FrameReader<R> {
    async fn read_frame(&mut self) -> NetconfClientResult<Option<String>> {
        let message = if self.mode.is_chunked() {
            self.read_chunked().await?
        } else {
            self.read_end_of_message().await?
        };
        if let Some(message) = &message {
            trace!("Received:\n{}", message);
        }
        Ok(message)
    }
}

pub struct FrameWriter<W> {
    mode: FramingMode,

    channel: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(channel: W, mode: FramingMode) -> Self {
        FrameWriter { mode, channel }
    }

    pub fn mode(&self) -> &FramingMode {
        &self.mode
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameWrite for FrameWriter<W> {
    async fn write_frame(&mut self, message: &str) -> NetconfClientResult<()> {
        debug!("Sending:\n{}", message);
        let bytes = message.as_bytes();
        if self.mode.is_chunked() {
            self.channel
                .write_all(format!("\n#{}\n", bytes.len()).as_bytes())
                .await?;
            self.channel.write_all(bytes).await?;
            self.channel.write_all("\n##\n".as_bytes()).await?;
        } else {
            self.channel.write_all(bytes).await?;
            self.channel
                .write_all(NETCONF_1_0_TERMINATOR.as_bytes())
                .await?;
        }
        self.channel.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> NetconfClientResult<()> {
        self.channel.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    const RPC_ERROR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rpc-reply message-id="7" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
    <rpc-error>
        <error-type>protocol</error-type>
        <error-tag>bad-element</error-tag>
        <error-severity>error</error-severity>
        <error-message>
            Element is not valid in the specified context.
        </error-message>
        <error-info>
            <bad-element>startu</bad-element>
        </error-info>
    </rpc-error>
</rpc-reply>"#;

    #[tokio::test]
    async fn test_chunked_framer() {
        let chunked = r#"
#38
<?xml version="1.0" encoding="UTF-8"?>
#1


#10
<rpc-reply
#15
 message-id="7"
#48
 xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"
#1
>
#1


#14
    <rpc-error
#1
>
#1


#41
        <error-type>protocol</error-type>
#1


#42
        <error-tag>bad-element</error-tag>
#1


#46
        <error-severity>error</error-severity>
#1


#22
        <error-message
#1
>
#1


#58
            Element is not valid in the specified context.
#1


#24
        </error-message>
#1


#19
        <error-info
#1
>
#1


#45
            <bad-element>startu</bad-element>
#1


#21
        </error-info>
#1


#16
    </rpc-error>
#1


#12
</rpc-reply>
##
"#
        .to_string();
        let channel = Cursor::new(chunked.into_bytes());
        let mut framer = FrameReader::new(channel, FramingMode::default());
        framer.mode().upgrade();

        let resp = framer.read_frame().await.unwrap();
        assert_eq!(resp.as_deref(), Some(RPC_ERROR));
        assert!(framer.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_framer() {
        let framed = format!("{RPC_ERROR}]]>]]>\n<ok/>]]>]]>");
        let channel = Cursor::new(framed.into_bytes());
        let mut framer = FrameReader::new(channel, FramingMode::default());

        assert_eq!(framer.read_frame().await.unwrap().as_deref(), Some(RPC_ERROR));
        assert_eq!(framer.read_frame().await.unwrap().as_deref(), Some("<ok/>"));
        assert!(framer.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_message() {
        let channel = Cursor::new(b"<rpc-reply message-id=\"1\">".to_vec());
        let mut framer = FrameReader::new(channel, FramingMode::default());
        let err = framer.read_frame().await.unwrap_err();
        assert!(matches!(err, NetconfClientError::Transport(_)));
    }

    /// A terminator split across reads, behind a large body, is found once.
    #[tokio::test]
    async fn test_large_eof_frame() {
        let body = format!(
            "<rpc-reply message-id=\"1\"><data>{}</data></rpc-reply>",
            "x".repeat(4 << 20)
        );
        let (client, mut server) = tokio::io::duplex(READ_BUFFER_SIZE);
        let mut framer = FrameReader::new(client, FramingMode::default());
        let writer = tokio::spawn({
            let body = body.clone();
            async move {
                server.write_all(body.as_bytes()).await.unwrap();
                server.write_all(b"]]>").await.unwrap();
                server.flush().await.unwrap();
                server.write_all(b"]]>\n<ok/>]]>]]>").await.unwrap();
            }
        });

        let started = std::time::Instant::now();
        let frame = framer.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.len(), body.len());
        assert!(frame == body);
        assert_eq!(framer.read_frame().await.unwrap().as_deref(), Some("<ok/>"));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_chunk_header() {
        let channel = Cursor::new(b"\n#12x\n".to_vec());
        let mut framer = FrameReader::new(channel, FramingMode::default());
        framer.mode().upgrade();
        let err = framer.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            NetconfClientError::MalformedChunk {
                expected: '0',
                actual: 'x'
            }
        ));
    }

    #[tokio::test]
    async fn test_writer_follows_shared_mode() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut writer) = split(client);
        let (mut reader, _) = split(server);

        writer.write_frame("<hello/>").await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap().as_deref(), Some("<hello/>"));

        writer.mode().upgrade();
        reader.mode().upgrade();
        writer.write_frame("<rpc/>").await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap().as_deref(), Some("<rpc/>"));
    }
}
