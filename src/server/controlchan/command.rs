//! The parsed representation of client commands.

use std::fmt;

/// The protection level requested via `PROT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtParam {
    /// Clear data channel.
    Clear,
    /// Private (TLS) data channel.
    Private,
}

impl fmt::Display for ProtParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtParam::Clear => write!(f, "C"),
            ProtParam::Private => write!(f, "P"),
        }
    }
}

/// A fully parsed control-channel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `USER <name>`
    User {
        /// The offered login name.
        username: String,
    },
    /// `PASS <password>`
    Pass {
        /// The offered password. Never logged.
        password: String,
    },
    /// `AUTH TLS`
    AuthTls,
    /// `PBSZ <size>`
    Pbsz,
    /// `PROT C|P`
    Prot {
        /// Requested protection level.
        param: ProtParam,
    },
    /// `SYST`
    Syst,
    /// `FEAT`
    Feat,
    /// `OPTS <option>`
    Opts {
        /// Raw option text, e.g. `UTF8 ON`.
        option: String,
    },
    /// `NOOP`
    Noop,
    /// `HELP`
    Help,
    /// `QUIT`
    Quit,
    /// `TYPE <t>`; the daemon is always binary.
    Type {
        /// The requested type character(s).
        spec: String,
    },
    /// `STRU <s>`
    Stru {
        /// The requested structure character.
        structure: char,
    },
    /// `MODE <m>`
    Mode {
        /// The requested mode character.
        mode: char,
    },
    /// `PWD`
    Pwd,
    /// `CWD <path>`
    Cwd {
        /// Target directory.
        path: String,
    },
    /// `CDUP`
    Cdup,
    /// `PASV`
    Pasv,
    /// `EPSV`
    Epsv,
    /// `PORT h1,h2,h3,h4,p1,p2`
    Port {
        /// The raw host-port string.
        addr: String,
    },
    /// `EPRT |proto|addr|port|`
    Eprt {
        /// The raw extended address string.
        addr: String,
    },
    /// `REST <offset>`
    Rest {
        /// Resume offset in bytes.
        offset: u64,
    },
    /// `RETR <path>`
    Retr {
        /// File to send.
        path: String,
    },
    /// `STOR <path>`
    Stor {
        /// File to receive.
        path: String,
    },
    /// `APPE <path>`
    Appe {
        /// File to append to.
        path: String,
    },
    /// `ABOR`
    Abor,
    /// `LIST [path]`
    List {
        /// Optional target; switches like `-la` are discarded.
        path: Option<String>,
    },
    /// `NLST [path]`
    Nlst {
        /// Optional target.
        path: Option<String>,
    },
    /// `MLSD [path]`
    Mlsd {
        /// Optional target.
        path: Option<String>,
    },
    /// `MLST [path]`
    Mlst {
        /// Optional target.
        path: Option<String>,
    },
    /// `STAT [path]`
    Stat {
        /// Optional target.
        path: Option<String>,
    },
    /// `ALLO [size]`
    Allo,
    /// `DELE <path>`
    Dele {
        /// File to remove.
        path: String,
    },
    /// `MKD <path>`
    Mkd {
        /// Directory to create.
        path: String,
    },
    /// `RMD <path>`
    Rmd {
        /// Directory to remove.
        path: String,
    },
    /// `RNFR <path>`
    Rnfr {
        /// Rename source.
        path: String,
    },
    /// `RNTO <path>`
    Rnto {
        /// Rename destination.
        path: String,
    },
    /// `SIZE <path>`
    Size {
        /// Target file.
        path: String,
    },
    /// `MDTM <path>`
    Mdtm {
        /// Target file.
        path: String,
    },
    /// `SITE <verb> [args]`
    Site {
        /// The subcommand verb as typed.
        verb: String,
        /// Everything after the verb.
        args: String,
    },
}

impl Command {
    /// The wire verb, for logging and gating.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::User { .. } => "USER",
            Command::Pass { .. } => "PASS",
            Command::AuthTls => "AUTH",
            Command::Pbsz => "PBSZ",
            Command::Prot { .. } => "PROT",
            Command::Syst => "SYST",
            Command::Feat => "FEAT",
            Command::Opts { .. } => "OPTS",
            Command::Noop => "NOOP",
            Command::Help => "HELP",
            Command::Quit => "QUIT",
            Command::Type { .. } => "TYPE",
            Command::Stru { .. } => "STRU",
            Command::Mode { .. } => "MODE",
            Command::Pwd => "PWD",
            Command::Cwd { .. } => "CWD",
            Command::Cdup => "CDUP",
            Command::Pasv => "PASV",
            Command::Epsv => "EPSV",
            Command::Port { .. } => "PORT",
            Command::Eprt { .. } => "EPRT",
            Command::Rest { .. } => "REST",
            Command::Retr { .. } => "RETR",
            Command::Stor { .. } => "STOR",
            Command::Appe { .. } => "APPE",
            Command::Abor => "ABOR",
            Command::List { .. } => "LIST",
            Command::Nlst { .. } => "NLST",
            Command::Mlsd { .. } => "MLSD",
            Command::Mlst { .. } => "MLST",
            Command::Stat { .. } => "STAT",
            Command::Allo => "ALLO",
            Command::Dele { .. } => "DELE",
            Command::Mkd { .. } => "MKD",
            Command::Rmd { .. } => "RMD",
            Command::Rnfr { .. } => "RNFR",
            Command::Rnto { .. } => "RNTO",
            Command::Size { .. } => "SIZE",
            Command::Mdtm { .. } => "MDTM",
            Command::Site { .. } => "SITE",
        }
    }

    /// Commands a client may issue before logging in.
    pub fn allowed_before_login(&self) -> bool {
        matches!(
            self,
            Command::User { .. }
                | Command::Pass { .. }
                | Command::AuthTls
                | Command::Pbsz
                | Command::Prot { .. }
                | Command::Feat
                | Command::Syst
                | Command::Opts { .. }
                | Command::Noop
                | Command::Quit
                | Command::Help
        )
    }
}
