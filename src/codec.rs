//! Frame codec for the line-oriented wire protocol.
//!
//! A frame is `<header><id><delim><arg1><delim>...<term>` in plain ASCII,
//! default `delim=','` and `term=';'`. [`FrameCodec`] renders and parses
//! complete frames; [`StreamDecoder`] cuts a continuous byte stream into
//! frames by scanning for the terminator.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::error::{CmdLinkError, Result};

/// Default argument delimiter.
pub const DEFAULT_DELIMITER: char = ',';

/// Default frame terminator.
pub const DEFAULT_TERMINATOR: char = ';';

/// Default decimal precision for floating-point arguments.
pub const DEFAULT_DECIMALS: usize = 2;

/// Framing parameters shared by link configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramingConfig {
    /// Character separating arguments in a frame.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Character ending a frame.
    #[serde(default = "default_terminator")]
    pub terminator: char,
    /// Decimal precision used when rendering float arguments.
    #[serde(default = "default_decimals")]
    pub decimals: usize,
}

fn default_delimiter() -> char {
    DEFAULT_DELIMITER
}

fn default_terminator() -> char {
    DEFAULT_TERMINATOR
}

fn default_decimals() -> usize {
    DEFAULT_DECIMALS
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            terminator: DEFAULT_TERMINATOR,
            decimals: DEFAULT_DECIMALS,
        }
    }
}

impl FramingConfig {
    /// Build a header-less codec from these parameters.
    pub fn codec(&self) -> Result<FrameCodec> {
        FrameCodec::new(self.delimiter, self.terminator, self.decimals)
    }
}

/// One positional frame argument.
///
/// Floats are rendered with the codec's fixed decimal precision; booleans go
/// on the wire as `1`/`0` (what the peripherals' firmware expects).
#[derive(Debug, Clone, PartialEq)]
pub enum CmdArg {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl From<i64> for CmdArg {
    fn from(v: i64) -> Self {
        CmdArg::Int(v)
    }
}

impl From<i32> for CmdArg {
    fn from(v: i32) -> Self {
        CmdArg::Int(v as i64)
    }
}

impl From<u32> for CmdArg {
    fn from(v: u32) -> Self {
        CmdArg::Int(v as i64)
    }
}

impl From<f64> for CmdArg {
    fn from(v: f64) -> Self {
        CmdArg::Float(v)
    }
}

impl From<f32> for CmdArg {
    fn from(v: f32) -> Self {
        CmdArg::Float(v as f64)
    }
}

impl From<bool> for CmdArg {
    fn from(v: bool) -> Self {
        CmdArg::Bool(v)
    }
}

impl From<&str> for CmdArg {
    fn from(v: &str) -> Self {
        CmdArg::Text(v.to_string())
    }
}

impl From<String> for CmdArg {
    fn from(v: String) -> Self {
        CmdArg::Text(v)
    }
}

/// A parsed frame: identifier plus positional argument tokens.
///
/// Type coercion of the tokens is the receiving handler's responsibility,
/// not the codec's.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    /// Command identifier (first token).
    pub id: String,
    /// Remaining tokens, in wire order.
    pub args: Vec<String>,
    /// The whole frame, trimmed and terminator-stripped.
    pub text: String,
}

/// Encoder/parser for one framing dialect (delimiter, terminator, decimal
/// precision) plus an optional per-device command header.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    delimiter: char,
    terminator: char,
    decimals: usize,
    header: String,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            terminator: DEFAULT_TERMINATOR,
            decimals: DEFAULT_DECIMALS,
            header: String::new(),
        }
    }
}

impl FrameCodec {
    /// Create a codec, validating the framing characters.
    pub fn new(delimiter: char, terminator: char, decimals: usize) -> Result<Self> {
        if !delimiter.is_ascii() || !terminator.is_ascii() {
            return Err(CmdLinkError::config(
                "delimiter and terminator must be ASCII characters",
            ));
        }
        if delimiter == terminator {
            return Err(CmdLinkError::config(
                "delimiter and terminator must differ",
            ));
        }
        Ok(Self {
            delimiter,
            terminator,
            decimals,
            header: String::new(),
        })
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn terminator(&self) -> char {
        self.terminator
    }

    pub fn decimals(&self) -> usize {
        self.decimals
    }

    /// Set the identifier prefix carried by every encoded frame. The
    /// delimiter is appended, so a header `M1` yields frames `M1,<id>...`.
    pub fn set_command_header(&mut self, header: &str) {
        self.header = format!("{header}{}", self.delimiter);
    }

    /// The current header, delimiter included; empty at top level.
    pub fn command_header(&self) -> &str {
        &self.header
    }

    /// Override the decimal precision used for float arguments.
    pub fn set_decimals(&mut self, decimals: usize) {
        self.decimals = decimals;
    }

    /// Render a complete frame.
    ///
    /// Protocol invariant: there is no escaping mechanism, so identifier and
    /// argument text must not contain the delimiter or terminator character.
    pub fn encode(&self, id: &str, args: &[CmdArg]) -> String {
        let mut out = String::with_capacity(self.header.len() + id.len() + 8 * args.len() + 1);
        out.push_str(&self.header);
        out.push_str(id);
        for arg in args {
            out.push(self.delimiter);
            match arg {
                CmdArg::Int(v) => out.push_str(&v.to_string()),
                CmdArg::Float(v) => out.push_str(&format!("{v:.prec$}", prec = self.decimals)),
                CmdArg::Bool(v) => out.push(if *v { '1' } else { '0' }),
                CmdArg::Text(s) => out.push_str(s),
            }
        }
        out.push(self.terminator);
        out
    }

    /// Split a frame into identifier and argument tokens. Leading/trailing
    /// whitespace and terminator remnants are trimmed first.
    pub fn parse(&self, frame: &str) -> ParsedFrame {
        let text = frame
            .trim()
            .trim_matches(self.terminator)
            .to_string();
        let mut tokens = text.split(self.delimiter);
        let id = tokens.next().unwrap_or_default().to_string();
        let args: Vec<String> = tokens.map(str::to_string).collect();
        ParsedFrame { id, args, text }
    }

    /// Reassemble everything after the identifier into a terminated frame,
    /// for relaying into another dispatch scope.
    pub fn build_remaining(&self, args: &[String]) -> String {
        let mut out = args.join(&self.delimiter.to_string());
        out.push(self.terminator);
        out
    }
}

/// Incremental frame cutter over a raw byte stream.
///
/// Bytes accumulate until the terminator is seen; the buffer (terminator
/// excluded) is then emitted as one frame. The buffer is owned exclusively by
/// the session read loop; a connection dropped mid-frame simply leaves a
/// partial buffer that dies with the session.
#[derive(Debug)]
pub struct StreamDecoder {
    terminator: u8,
    buffer: BytesMut,
}

impl StreamDecoder {
    pub fn new(terminator: char) -> Self {
        Self {
            terminator: terminator as u8,
            buffer: BytesMut::new(),
        }
    }

    /// Feed one byte; returns a complete frame when the terminator arrives.
    pub fn push_byte(&mut self, byte: u8) -> Option<String> {
        if byte == self.terminator {
            let frame = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            Some(frame)
        } else {
            self.buffer.extend_from_slice(&[byte]);
            None
        }
    }

    /// Feed a chunk; returns every frame completed by it, in order.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        bytes.iter().filter_map(|b| self.push_byte(*b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_parse_round_trip() {
        let codec = FrameCodec::default();
        let frame = codec.encode("MOVE", &[42i64.into(), "fast".into(), true.into()]);
        assert_eq!(frame, "MOVE,42,fast,1;");

        let parsed = codec.parse(&frame);
        assert_eq!(parsed.id, "MOVE");
        assert_eq!(parsed.args, vec!["42", "fast", "1"]);
    }

    #[test]
    fn test_float_precision() {
        let codec = FrameCodec::default();
        assert_eq!(codec.encode("F", &[3.14159f64.into()]), "F,3.14;");

        let mut wide = FrameCodec::default();
        wide.set_decimals(4);
        assert_eq!(wide.encode("F", &[3.14159f64.into()]), "F,3.1416;");
    }

    #[test]
    fn test_header_prefixes_frames() {
        let mut codec = FrameCodec::default();
        codec.set_command_header("M1");
        assert_eq!(codec.command_header(), "M1,");
        assert_eq!(codec.encode("W", &[90i64.into()]), "M1,W,90;");
    }

    #[test]
    fn test_parse_trims_whitespace_and_terminators() {
        let codec = FrameCodec::default();
        let parsed = codec.parse("  A,1;; \n");
        assert_eq!(parsed.id, "A");
        assert_eq!(parsed.args, vec!["1"]);
        assert_eq!(parsed.text, "A,1");
    }

    #[test]
    fn test_parse_bare_identifier() {
        let codec = FrameCodec::default();
        let parsed = codec.parse("BONJOUR;");
        assert_eq!(parsed.id, "BONJOUR");
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn test_build_remaining() {
        let codec = FrameCodec::default();
        let parsed = codec.parse("M1,BONJOUR,SERVO;");
        assert_eq!(codec.build_remaining(&parsed.args), "BONJOUR,SERVO;");
    }

    #[test]
    fn test_stream_decoder_whole_string() {
        let mut decoder = StreamDecoder::new(DEFAULT_TERMINATOR);
        let frames = decoder.push_bytes(b"A,1;B,2;");
        assert_eq!(frames, vec!["A,1", "B,2"]);
    }

    #[test]
    fn test_partial_feed_equivalence() {
        let text = "MOVE,42,fast;";

        let mut one_shot = StreamDecoder::new(DEFAULT_TERMINATOR);
        let whole = one_shot.push_bytes(text.as_bytes());

        let mut byte_wise = StreamDecoder::new(DEFAULT_TERMINATOR);
        let mut single = Vec::new();
        for b in text.as_bytes() {
            if let Some(frame) = byte_wise.push_byte(*b) {
                single.push(frame);
            }
        }

        assert_eq!(whole, single);
        assert_eq!(whole, vec!["MOVE,42,fast"]);
    }

    #[test]
    fn test_decoder_keeps_partial_frame_buffered() {
        let mut decoder = StreamDecoder::new(DEFAULT_TERMINATOR);
        assert!(decoder.push_bytes(b"MOV").is_empty());
        assert_eq!(decoder.push_bytes(b"E,1;"), vec!["MOVE,1"]);
    }

    #[test]
    fn test_codec_rejects_equal_framing_chars() {
        assert!(FrameCodec::new(',', ',', 2).is_err());
    }

    #[test]
    fn test_custom_framing_characters() {
        let codec = FrameCodec::new('|', '\n', 2).unwrap();
        let frame = codec.encode("X", &[1i64.into(), 2i64.into()]);
        assert_eq!(frame, "X|1|2\n");
        let parsed = codec.parse(&frame);
        assert_eq!(parsed.id, "X");
        assert_eq!(parsed.args, vec!["1", "2"]);
    }
}
