//! XMPP stream framing: stream headers and stanza boundary extraction.
//!
//! A client-to-server XMPP connection is one long XML document. The server's
//! `<stream:stream>` opening tag never closes until the session ends, so
//! stanzas have to be cut out of the byte stream by tracking element depth.

use quick_xml::errors::SyntaxError;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::error;

pub const STREAM_CLOSE: &str = "</stream:stream>";

/// Opening tag for a client stream to `domain`.
pub fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' version='1.0' xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>",
        escape(domain)
    )
}

/// State machine for stanza boundary detection.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    /// Waiting for a stanza to start (between stanzas, or before stream open).
    Idle,
    /// Inside a top-level stanza, collecting events.
    InStanza,
}

/// Convert a byte slice to a String, trying zero-copy UTF-8 first.
fn bytes_to_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn is_stream_element(name: &[u8], local_name: &[u8]) -> bool {
    local_name == b"stream" || name == b"stream:stream"
}

/// Extract a single complete XMPP stanza from the given buffer slice.
///
/// Returns `Some((stanza_string, bytes_consumed))` if a complete stanza was found,
/// or `None` if the buffer doesn't contain a complete stanza yet.
/// The caller is responsible for advancing past the consumed bytes.
///
/// The server's stream opening tag and `</stream:stream>` are returned as
/// stanzas of their own.
pub fn extract_stanza(buffer: &[u8]) -> Option<(String, usize)> {
    // The closing tag appears alone, without its opening tag in the buffer
    let trimmed = buffer.iter().position(|&b| !b.is_ascii_whitespace());
    if let Some(start) = trimmed {
        if buffer[start..].starts_with(STREAM_CLOSE.as_bytes()) {
            return Some((STREAM_CLOSE.to_string(), start + STREAM_CLOSE.len()));
        }
    }

    let mut reader = Reader::from_reader(buffer);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;

    let mut depth: u32 = 0;
    let mut state = ParserState::Idle;
    let mut stanza_start: usize = 0;

    loop {
        let pos = reader.buffer_position() as usize;

        match reader.read_event() {
            Ok(Event::Decl(_)) | Ok(Event::PI(_)) | Ok(Event::Comment(_)) | Ok(Event::DocType(_)) => {
                continue;
            }
            Ok(Event::Start(e)) => {
                if state == ParserState::Idle
                    && is_stream_element(e.name().as_ref(), e.local_name().as_ref())
                {
                    let tag_end = reader.buffer_position() as usize;
                    return Some((bytes_to_string(&buffer[0..tag_end]), tag_end));
                }

                depth += 1;

                // Start of a new top-level stanza (depth goes from 0 to 1)
                if state == ParserState::Idle && depth == 1 {
                    state = ParserState::InStanza;
                    stanza_start = pos;
                }
            }
            Ok(Event::Empty(e)) => {
                if state == ParserState::Idle
                    && is_stream_element(e.name().as_ref(), e.local_name().as_ref())
                {
                    let tag_end = reader.buffer_position() as usize;
                    return Some((bytes_to_string(&buffer[0..tag_end]), tag_end));
                }

                // Self-closing top-level stanza (e.g., <presence/>, <success/>)
                if state == ParserState::Idle && depth == 0 {
                    let tag_end = reader.buffer_position() as usize;
                    return Some((bytes_to_string(&buffer[pos..tag_end]), tag_end));
                }
            }
            Ok(Event::Text(_)) | Ok(Event::CData(_)) => {}
            Ok(Event::End(e)) => {
                if depth == 0 && is_stream_element(e.name().as_ref(), e.local_name().as_ref()) {
                    let tag_end = reader.buffer_position() as usize;
                    return Some((STREAM_CLOSE.to_string(), tag_end));
                }

                depth = depth.saturating_sub(1);

                if state == ParserState::InStanza && depth == 0 {
                    let tag_end = reader.buffer_position() as usize;
                    return Some((bytes_to_string(&buffer[stanza_start..tag_end]), tag_end));
                }
            }
            Ok(Event::Eof) => {
                return None;
            }
            Err(quick_xml::Error::Syntax(SyntaxError::UnclosedTag)) => {
                // Partial stanza; the next read completes it.
                return None;
            }
            Err(e) => {
                error!(error = ?e, "XML parsing error");
                return None;
            }
        }
    }
}

/// Accumulates bytes read from the socket and splits off complete stanzas.
#[derive(Debug, Default)]
pub struct StanzaBuffer {
    bytes: Vec<u8>,
}

impl StanzaBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Remove and return every complete stanza currently buffered.
    pub fn drain_stanzas(&mut self) -> Vec<String> {
        let mut stanzas = Vec::new();
        // Track consumed offset and compact once at the end.
        let mut consumed = 0;
        while let Some((stanza, bytes_used)) = extract_stanza(&self.bytes[consumed..]) {
            consumed += bytes_used;
            stanzas.push(stanza);
        }
        if consumed > 0 {
            self.bytes.drain(..consumed);
        }
        stanzas
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}
