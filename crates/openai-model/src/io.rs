#[cfg(test)]
use std::collections::VecDeque;
use std::mem;

use bytes::Bytes;
use reqwest::Response;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Transport,
    InvalidUtf8,
}

/// A source of raw byte chunks, either a live HTTP response body or a
/// canned sequence for tests.
pub enum ByteSource {
    Response(Response),
    #[cfg(test)]
    Preset(VecDeque<Bytes>),
}

impl ByteSource {
    #[inline]
    pub fn from_response(response: Response) -> Self {
        ByteSource::Response(response)
    }

    #[cfg(test)]
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        ByteSource::Preset(chunks.into_iter().collect())
    }

    #[inline]
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self {
            ByteSource::Response(response) => {
                response.chunk().await.map_err(|_| Error::Transport)
            }
            #[cfg(test)]
            ByteSource::Preset(chunks) => Ok(chunks.pop_front()),
        }
    }
}

/// A reader that reassembles `data:` payload lines from a chunked
/// server-sent-event stream.
///
/// Only `data` fields carry payloads. Comment lines, heartbeats, blank
/// separators and any other field are skipped rather than rejected, so
/// a chatty endpoint cannot break the stream.
pub struct Sse {
    buf: String,
    source: ByteSource,
}

impl Sse {
    #[inline]
    pub fn new(source: ByteSource) -> Self {
        Self {
            buf: String::new(),
            source,
        }
    }

    /// Returns the payload of the next `data:` line, or `None` once the
    /// stream is exhausted.
    pub async fn next_data(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Drain complete lines already sitting in the buffer first.
            while let Some(line) = self.take_line() {
                if let Some(payload) = data_payload(&line) {
                    return Ok(Some(payload.to_owned()));
                }
            }

            let Some(bytes) = self.source.next_chunk().await? else {
                // The stream ended; the final line may lack a newline.
                let line = mem::take(&mut self.buf);
                let line = line.trim_end_matches('\r');
                if let Some(payload) = data_payload(line) {
                    return Ok(Some(payload.to_owned()));
                }
                return Ok(None);
            };
            let Ok(s) = str::from_utf8(&bytes) else {
                return Err(Error::InvalidUtf8);
            };
            self.buf.push_str(s);
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let eol = self.buf.find('\n')?;
        let line: String = self.buf.drain(..=eol).collect();
        Some(line.trim_end_matches(['\n', '\r']).to_owned())
    }
}

fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
