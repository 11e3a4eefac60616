//! Parses raw control-channel lines into [`Command`]s.

use super::command::{Command, ProtParam};
use super::error::{ControlChanError, ControlChanErrorKind};

use bytes::Bytes;
use std::str;

/// Parse one CRLF-terminated line into a [`Command`].
pub fn parse<T>(line: T) -> Result<Command, ControlChanError>
where
    T: AsRef<[u8]> + Into<Bytes>,
{
    let vec = line.into().to_vec();
    let mut iter = vec.splitn(2, |&b| b == b' ' || b == b'\r' || b == b'\n');
    let token = iter.next().unwrap_or(&[]);
    let token = str::from_utf8(token)?.to_uppercase();
    let params = trim_eol(iter.next().unwrap_or(&[]));
    let params = str::from_utf8(params)?;

    let cmd = match token.as_str() {
        "USER" => Command::User {
            username: required(params)?.to_string(),
        },
        "PASS" => Command::Pass {
            password: params.to_string(),
        },
        "AUTH" => match params.to_uppercase().as_str() {
            "TLS" | "SSL" => Command::AuthTls,
            _ => return Err(ControlChanErrorKind::InvalidCommand.into()),
        },
        "PBSZ" => Command::Pbsz,
        "PROT" => match params.to_uppercase().as_str() {
            "C" => Command::Prot { param: ProtParam::Clear },
            "P" => Command::Prot { param: ProtParam::Private },
            _ => return Err(ControlChanErrorKind::InvalidCommand.into()),
        },
        "SYST" => Command::Syst,
        "FEAT" => Command::Feat,
        "OPTS" => Command::Opts {
            option: required(params)?.to_string(),
        },
        "NOOP" => Command::Noop,
        "HELP" => Command::Help,
        "QUIT" => Command::Quit,
        "TYPE" => Command::Type {
            spec: params.to_uppercase(),
        },
        "STRU" => Command::Stru {
            structure: single_char(params)?,
        },
        "MODE" => Command::Mode {
            mode: single_char(params)?,
        },
        "PWD" | "XPWD" => Command::Pwd,
        "CWD" | "XCWD" => Command::Cwd {
            path: required(params)?.to_string(),
        },
        "CDUP" => Command::Cdup,
        "PASV" => Command::Pasv,
        "EPSV" => Command::Epsv,
        "PORT" => Command::Port {
            addr: required(params)?.to_string(),
        },
        "EPRT" => Command::Eprt {
            addr: required(params)?.to_string(),
        },
        "REST" => {
            let offset = required(params)?
                .parse::<u64>()
                .map_err(|_| ControlChanError::from(ControlChanErrorKind::InvalidCommand))?;
            Command::Rest { offset }
        }
        "RETR" => Command::Retr {
            path: required(params)?.to_string(),
        },
        "STOR" => Command::Stor {
            path: required(params)?.to_string(),
        },
        "APPE" => Command::Appe {
            path: required(params)?.to_string(),
        },
        "ABOR" => Command::Abor,
        "LIST" => Command::List {
            path: listing_target(params),
        },
        "NLST" => Command::Nlst {
            path: optional(params),
        },
        "MLSD" => Command::Mlsd {
            path: optional(params),
        },
        "MLST" => Command::Mlst {
            path: optional(params),
        },
        "STAT" => Command::Stat {
            path: optional(params),
        },
        "ALLO" => Command::Allo,
        "DELE" => Command::Dele {
            path: required(params)?.to_string(),
        },
        "MKD" | "XMKD" => Command::Mkd {
            path: required(params)?.to_string(),
        },
        "RMD" | "XRMD" => Command::Rmd {
            path: required(params)?.to_string(),
        },
        "RNFR" => Command::Rnfr {
            path: required(params)?.to_string(),
        },
        "RNTO" => Command::Rnto {
            path: required(params)?.to_string(),
        },
        "SIZE" => Command::Size {
            path: required(params)?.to_string(),
        },
        "MDTM" => Command::Mdtm {
            path: required(params)?.to_string(),
        },
        "SITE" => {
            let mut parts = params.splitn(2, ' ');
            let verb = parts.next().unwrap_or("").to_string();
            let args = parts.next().unwrap_or("").trim().to_string();
            Command::Site { verb, args }
        }
        "" => return Err(ControlChanErrorKind::InvalidCommand.into()),
        unknown => {
            return Err(ControlChanErrorKind::UnknownCommand {
                command: unknown.to_string(),
            }
            .into())
        }
    };
    Ok(cmd)
}

fn trim_eol(params: &[u8]) -> &[u8] {
    let end = params
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(params.len());
    &params[..end]
}

fn required(params: &str) -> Result<&str, ControlChanError> {
    if params.is_empty() {
        Err(ControlChanErrorKind::InvalidCommand.into())
    } else {
        Ok(params)
    }
}

fn optional(params: &str) -> Option<String> {
    if params.is_empty() {
        None
    } else {
        Some(params.to_string())
    }
}

// LIST may carry `ls` style switches; they are accepted and discarded.
fn listing_target(params: &str) -> Option<String> {
    params
        .split(' ')
        .find(|part| !part.is_empty() && !part.starts_with('-'))
        .map(|part| part.to_string())
}

fn single_char(params: &str) -> Result<char, ControlChanError> {
    let mut chars = params.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c.to_ascii_uppercase()),
        _ => Err(ControlChanErrorKind::InvalidCommand.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_line(line: &str) -> Result<Command, ControlChanError> {
        parse(line.as_bytes().to_vec())
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(parse_line("user anonymous\r\n").unwrap(), Command::User { username: "anonymous".to_string() });
        assert_eq!(parse_line("QuIt\r\n").unwrap(), Command::Quit);
    }

    #[test]
    fn pass_keeps_password_verbatim() {
        assert_eq!(parse_line("PASS s3cr3t!\r\n").unwrap(), Command::Pass { password: "s3cr3t!".to_string() });
        // An empty password is legal (anonymous logins).
        assert_eq!(parse_line("PASS\r\n").unwrap(), Command::Pass { password: String::new() });
    }

    #[test]
    fn auth_accepts_tls_only() {
        assert_eq!(parse_line("AUTH TLS\r\n").unwrap(), Command::AuthTls);
        assert_eq!(parse_line("AUTH tls\r\n").unwrap(), Command::AuthTls);
        assert!(parse_line("AUTH KERBEROS\r\n").is_err());
    }

    #[test]
    fn prot_levels() {
        assert_eq!(parse_line("PROT P\r\n").unwrap(), Command::Prot { param: ProtParam::Private });
        assert_eq!(parse_line("PROT c\r\n").unwrap(), Command::Prot { param: ProtParam::Clear });
        assert!(parse_line("PROT E\r\n").is_err());
    }

    #[test]
    fn rest_parses_offsets() {
        assert_eq!(parse_line("REST 512\r\n").unwrap(), Command::Rest { offset: 512 });
        assert!(parse_line("REST twelve\r\n").is_err());
        assert!(parse_line("REST -1\r\n").is_err());
    }

    #[test]
    fn list_discards_switches() {
        assert_eq!(parse_line("LIST -la /dir\r\n").unwrap(), Command::List { path: Some("/dir".to_string()) });
        assert_eq!(parse_line("LIST\r\n").unwrap(), Command::List { path: None });
    }

    #[test]
    fn site_splits_verb_and_args() {
        assert_eq!(
            parse_line("SITE NUKE /rel dupe release\r\n").unwrap(),
            Command::Site { verb: "NUKE".to_string(), args: "/rel dupe release".to_string() }
        );
        assert_eq!(parse_line("SITE\r\n").unwrap(), Command::Site { verb: String::new(), args: String::new() });
    }

    #[test]
    fn unknown_verbs_error_with_the_verb() {
        let err = parse_line("MACB x\r\n").unwrap_err();
        assert!(matches!(err.kind(), ControlChanErrorKind::UnknownCommand { command } if command == "MACB"));
    }

    #[test]
    fn paths_may_contain_spaces_after_first_arg() {
        assert_eq!(
            parse_line("RETR /dir/file name.rar\r\n").unwrap(),
            Command::Retr { path: "/dir/file name.rar".to_string() }
        );
    }
}
