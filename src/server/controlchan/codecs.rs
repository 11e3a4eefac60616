//! The tokio codec turning the control stream into commands and replies.

use super::command::Command;
use super::error::{ControlChanError, ControlChanErrorKind};
use super::line_parser;
use super::reply::Reply;

use bytes::BytesMut;
use std::io::Write;
use tokio_util::codec::{Decoder, Encoder};

// Longest control line we accept; everything past this is a protocol error.
const MAX_LINE_LEN: usize = 8 * 1024;

/// `FtpCodec` implements tokio's `Decoder` and `Encoder` traits for the
/// control channel: inbound CRLF-terminated lines become [`Command`]s,
/// outbound [`Reply`]s become CRLF-terminated response lines.
#[derive(Debug)]
pub struct FtpCodec {
    // Index of the next byte to examine for '\n', so repeated `decode`
    // calls don't rescan the buffer.
    next_index: usize,
}

impl FtpCodec {
    /// A fresh codec.
    pub fn new() -> FtpCodec {
        FtpCodec { next_index: 0 }
    }
}

impl Default for FtpCodec {
    fn default() -> Self {
        FtpCodec::new()
    }
}

impl Decoder for FtpCodec {
    type Item = Command;
    type Error = ControlChanError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Command>, Self::Error> {
        if let Some(newline_offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') {
            let newline_index = newline_offset + self.next_index;
            let line = buf.split_to(newline_index + 1);
            self.next_index = 0;
            if line.len() > MAX_LINE_LEN {
                return Err(ControlChanErrorKind::LineTooLong.into());
            }
            Ok(Some(line_parser::parse(line)?))
        } else {
            self.next_index = buf.len();
            if buf.len() > MAX_LINE_LEN {
                return Err(ControlChanErrorKind::LineTooLong.into());
            }
            Ok(None)
        }
    }
}

impl Encoder<Reply> for FtpCodec {
    type Error = ControlChanError;

    fn encode(&mut self, reply: Reply, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let mut buffer = vec![];
        match reply {
            Reply::None => {
                return Ok(());
            }
            Reply::CodeAndMsg { code, msg } => {
                if msg.is_empty() {
                    write!(buffer, "{}\r\n", code as u32)?;
                } else {
                    write!(buffer, "{} {}\r\n", code as u32, msg)?;
                }
            }
            Reply::MultiLine { code, mut lines } => {
                let last_line = lines.pop().unwrap_or_default();
                // Continuation lines starting with a digit are indented so
                // clients can't mistake them for the terminating line.
                for line in lines.iter_mut() {
                    if line.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                        line.insert(0, ' ');
                    }
                }
                if lines.is_empty() {
                    write!(buffer, "{} {}\r\n", code as u32, last_line)?;
                } else {
                    write!(buffer, "{}-{}\r\n{} {}\r\n", code as u32, lines.join("\r\n"), code as u32, last_line)?;
                }
            }
        }
        buf.extend(&buffer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::controlchan::ReplyCode;
    use pretty_assertions::assert_eq;

    fn encode(reply: Reply) -> String {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(reply, &mut buf).unwrap();
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn replies_end_with_crlf() {
        assert_eq!(encode(Reply::new(ReplyCode::CommandOkay, "PBSZ=0 OK.")), "200 PBSZ=0 OK.\r\n");
        assert_eq!(encode(Reply::none()), "");
    }

    #[test]
    fn multiline_uses_dash_continuation() {
        let reply = Reply::new_multiline(ReplyCode::SystemStatus, vec!["Features:", " MLSD", "End"]);
        assert_eq!(encode(reply), "211-Features:\r\n MLSD\r\n211 End\r\n");
    }

    #[test]
    fn decode_splits_on_newline() {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::from(&b"NOOP\r\nQUIT\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::Noop));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::Quit));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_waits_for_complete_lines() {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::from(&b"NO"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"OP\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::Noop));
    }

    #[test]
    fn oversized_lines_error() {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LEN + 1].as_slice());
        assert!(codec.decode(&mut buf).is_err());
    }
}
