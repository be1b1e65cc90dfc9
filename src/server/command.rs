//! FTP control-channel command parsing

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use thiserror::Error;

/// A parsed control-channel command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    User(String),
    Pass(String),
    Quit,
    Syst,
    Feat,
    Opts(String),
    Noop,
    Type(String),
    Mode(String),
    Stru(String),
    Pwd,
    Cwd(String),
    Cdup,
    Pasv,
    Epsv,
    Port(SocketAddr),
    List(Option<String>),
    Nlst(Option<String>),
    Retr(String),
    Stor(String),
    Dele(String),
    Mkd(String),
    Rmd(String),
    Rnfr(String),
    Rnto(String),
    Size(String),
    Mdtm(String),
    /// Recognized syntax, unsupported verb
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("{0} requires an argument")]
    MissingArgument(&'static str),

    #[error("Invalid PORT argument")]
    InvalidPort,
}

impl Command {
    /// Parse one line without its trailing CRLF
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb, arg.trim_start()),
            None => (line, ""),
        };
        if verb.is_empty() {
            return Err(CommandError::Empty);
        }

        let verb = verb.to_ascii_uppercase();
        let required = |name: &'static str| -> Result<String, CommandError> {
            if arg.is_empty() {
                Err(CommandError::MissingArgument(name))
            } else {
                Ok(arg.to_string())
            }
        };

        let command = match verb.as_str() {
            "USER" => Command::User(required("USER")?),
            // Empty passwords are a login failure, not a syntax error
            "PASS" => Command::Pass(arg.to_string()),
            "QUIT" => Command::Quit,
            "SYST" => Command::Syst,
            "FEAT" => Command::Feat,
            "OPTS" => Command::Opts(required("OPTS")?),
            "NOOP" => Command::Noop,
            "TYPE" => Command::Type(required("TYPE")?),
            "MODE" => Command::Mode(required("MODE")?),
            "STRU" => Command::Stru(required("STRU")?),
            "PWD" | "XPWD" => Command::Pwd,
            "CWD" | "XCWD" => Command::Cwd(required("CWD")?),
            "CDUP" | "XCUP" => Command::Cdup,
            "PASV" => Command::Pasv,
            "EPSV" => Command::Epsv,
            "PORT" => Command::Port(parse_port_argument(&required("PORT")?)?),
            "LIST" => Command::List(listing_target(arg)),
            "NLST" => Command::Nlst(listing_target(arg)),
            "RETR" => Command::Retr(required("RETR")?),
            "STOR" => Command::Stor(required("STOR")?),
            "DELE" => Command::Dele(required("DELE")?),
            "MKD" | "XMKD" => Command::Mkd(required("MKD")?),
            "RMD" | "XRMD" => Command::Rmd(required("RMD")?),
            "RNFR" => Command::Rnfr(required("RNFR")?),
            "RNTO" => Command::Rnto(required("RNTO")?),
            "SIZE" => Command::Size(required("SIZE")?),
            "MDTM" => Command::Mdtm(required("MDTM")?),
            _ => Command::Unknown(verb),
        };
        Ok(command)
    }

    /// Commands accepted before login completes
    pub fn allowed_before_login(&self) -> bool {
        matches!(
            self,
            Command::User(_)
                | Command::Pass(_)
                | Command::Quit
                | Command::Syst
                | Command::Feat
                | Command::Opts(_)
                | Command::Noop
        )
    }
}

/// LIST/NLST take an optional path, often preceded by `ls` flags like `-la`
fn listing_target(arg: &str) -> Option<String> {
    let mut rest = arg.trim();
    while rest.starts_with('-') {
        rest = match rest.split_once(' ') {
            Some((_, tail)) => tail.trim_start(),
            None => "",
        };
    }
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Parse `h1,h2,h3,h4,p1,p2`
pub fn parse_port_argument(arg: &str) -> Result<SocketAddr, CommandError> {
    let parts: Vec<u8> = arg
        .trim()
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| CommandError::InvalidPort)?;

    if parts.len() != 6 {
        return Err(CommandError::InvalidPort);
    }

    let ip = Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    let port = u16::from(parts[4]) << 8 | u16::from(parts[5]);
    if port == 0 {
        return Err(CommandError::InvalidPort);
    }
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

/// Encode an IPv4 address and port for a PASV reply
pub fn format_pasv_address(ip: Ipv4Addr, port: u16) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{},{},{},{},{},{}", a, b, c, d, port >> 8, port & 0xff)
}
