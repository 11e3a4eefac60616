//! Replies sent to the FTP client over the control channel.

/// A reply to the FTP client.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Send nothing (the reply was already written, or none is due).
    None,
    /// A single-line reply.
    CodeAndMsg {
        /// The reply code.
        code: ReplyCode,
        /// The text after the code.
        msg: String,
    },
    /// A multi-line reply (`code-` continuation format).
    MultiLine {
        /// The reply code.
        code: ReplyCode,
        /// The individual lines; the last is prefixed with `code `.
        lines: Vec<String>,
    },
}

/// The reply codes used by the daemon, per RFC 959/2228/3659.
//
// Codes between 100 and 199 are marks, 200-399 acceptance, 400-599
// rejection. Clients should not look past the first digit, but the texts
// on several of these are load-bearing for scene tooling, so they are kept
// bit-exact where the protocol tests pin them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReplyCode {
    /// 150
    FileStatusOkay = 150,

    /// 200
    CommandOkay = 200,
    /// 202
    CommandOkayNotImplemented = 202,
    /// 211
    SystemStatus = 211,
    /// 213
    FileStatus = 213,
    /// 214
    HelpMessage = 214,
    /// 215
    SystemType = 215,
    /// 220
    ServiceReady = 220,
    /// 221
    ClosingControlConnection = 221,
    /// 226
    ClosingDataConnection = 226,
    /// 227
    EnteringPassiveMode = 227,
    /// 229
    EnteringExtendedPassiveMode = 229,
    /// 230
    UserLoggedIn = 230,
    /// 234
    AuthOkayNoDataNeeded = 234,
    /// 250
    FileActionOkay = 250,
    /// 257
    PathCreated = 257,

    /// 331
    NeedPassword = 331,
    /// 350
    FileActionPending = 350,

    /// 421
    ServiceNotAvailable = 421,
    /// 425
    CantOpenDataConnection = 425,
    /// 426
    ConnectionClosed = 426,
    /// 451
    LocalError = 451,

    /// 500
    CommandSyntaxError = 500,
    /// 501
    ParameterSyntaxError = 501,
    /// 502
    CommandNotImplemented = 502,
    /// 503
    BadCommandSequence = 503,
    /// 504
    CommandNotImplementedForParameter = 504,
    /// 530
    NotLoggedIn = 530,
    /// 534
    FtpsRequired = 534,
    /// 550
    FileError = 550,
}

impl Reply {
    /// A single-line reply.
    pub fn new(code: ReplyCode, message: &str) -> Reply {
        Reply::CodeAndMsg { code, msg: message.to_string() }
    }

    /// A single-line reply from an owned string.
    pub fn new_with_string(code: ReplyCode, msg: String) -> Reply {
        Reply::CodeAndMsg { code, msg }
    }

    /// A multi-line reply.
    pub fn new_multiline<I>(code: ReplyCode, lines: I) -> Reply
    where
        I: IntoIterator,
        I::Item: std::fmt::Display,
    {
        Reply::MultiLine {
            code,
            lines: lines.into_iter().map(|line| format!("{}", line)).collect(),
        }
    }

    /// No reply.
    pub fn none() -> Reply {
        Reply::None
    }

    /// A deny reply carrying text straight from a rule script. The CRLF is
    /// appended by the codec; stray trailing newlines are trimmed here so
    /// scripts cannot smuggle extra lines.
    pub fn script_denied(code: ReplyCode, reason: &str) -> Reply {
        Reply::new(code, reason.trim_end_matches(['\r', '\n']))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn script_reasons_lose_trailing_newlines() {
        let reply = Reply::script_denied(ReplyCode::FileError, "denied by rule\r\n");
        assert_eq!(reply, Reply::new(ReplyCode::FileError, "denied by rule"));
    }
}
