//! One FTP control connection
//!
//! Paths in commands are virtual: relative to the session's working
//! directory and rooted at `server.root_path` in the store. `..` never
//! climbs above the virtual root.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::command::{format_pasv_address, Command, CommandError};
use super::listing::{list_line, mdtm_timestamp, quote_path};
use super::ServerContext;
use crate::error::GatewayError;
use crate::path;

/// Longest accepted control line, including CRLF
const MAX_LINE: usize = 4096;

/// How long to wait for the client to open or accept a data connection
const DATA_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Failed PASS attempts before the connection is dropped
const MAX_LOGIN_ATTEMPTS: u32 = 3;

enum Login {
    AwaitingUser,
    AwaitingPass { user: String },
    LoggedIn { user: String },
}

enum DataChannel {
    Passive(TcpListener),
    Active(SocketAddr),
}

enum Flow {
    Continue,
    Close,
}

pub struct Session {
    context: Arc<ServerContext>,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    local_ip: IpAddr,
    shutdown: watch::Receiver<bool>,
    login: Login,
    failed_logins: u32,
    cwd: String,
    rename_from: Option<String>,
    data: Option<DataChannel>,
}

impl Session {
    pub fn new(
        context: Arc<ServerContext>,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> io::Result<Self> {
        let local_ip = stream.local_addr()?.ip();
        let (reader, writer) = stream.into_split();

        Ok(Self {
            context,
            reader: BufReader::new(reader),
            writer,
            peer,
            local_ip,
            shutdown,
            login: Login::AwaitingUser,
            failed_logins: 0,
            cwd: "/".to_string(),
            rename_from: None,
            data: None,
        })
    }

    /// Serve commands until the client quits, idles out or the server stops
    pub async fn run(mut self) -> io::Result<()> {
        self.reply(220, "Service ready").await?;
        let idle_timeout = self.context.config.idle_timeout;

        loop {
            let read = tokio::select! {
                read = timeout(idle_timeout, read_line(&mut self.reader)) => read,
                _ = self.shutdown.changed() => {
                    self.reply(421, "Server shutting down").await?;
                    break;
                }
            };

            let line = match read {
                Err(_) => {
                    info!("Closing idle session {}", self.peer);
                    self.reply(421, "Idle timeout, closing control connection")
                        .await?;
                    break;
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    self.reply(500, "Command line too long").await?;
                    break;
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(None)) => break,
                Ok(Ok(Some(line))) => line,
            };

            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(e @ CommandError::Empty) => {
                    self.reply(500, e.to_string()).await?;
                    continue;
                }
                Err(e) => {
                    self.reply(501, e.to_string()).await?;
                    continue;
                }
            };

            match &command {
                Command::Pass(_) => trace!("{} -> PASS ****", self.peer),
                other => trace!("{} -> {:?}", self.peer, other),
            }

            if let Flow::Close = self.handle(command).await? {
                break;
            }
        }

        let _ = self.writer.shutdown().await;
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> io::Result<Flow> {
        if !matches!(self.login, Login::LoggedIn { .. }) && !command.allowed_before_login() {
            self.reply(530, "Please login with USER and PASS").await?;
            return Ok(Flow::Continue);
        }

        match command {
            Command::User(user) => {
                self.login = Login::AwaitingPass { user: user.clone() };
                self.reply(331, format!("Password required for {}", user))
                    .await?;
            }
            Command::Pass(password) => return self.login(password).await,
            Command::Quit => {
                self.reply(221, "Goodbye").await?;
                return Ok(Flow::Close);
            }
            Command::Syst => self.reply(215, "UNIX Type: L8").await?,
            Command::Feat => {
                self.writer
                    .write_all(b"211-Features:\r\n EPSV\r\n MDTM\r\n PASV\r\n SIZE\r\n UTF8\r\n211 End\r\n")
                    .await?;
            }
            Command::Opts(option) => {
                if option.to_ascii_uppercase().starts_with("UTF8") {
                    self.reply(200, "UTF8 mode always enabled").await?;
                } else {
                    self.reply(501, "Option not understood").await?;
                }
            }
            Command::Noop => self.reply(200, "NOOP ok").await?,
            Command::Type(kind) => match kind.to_ascii_uppercase().as_str() {
                "A" | "A N" | "I" | "L 8" => {
                    self.reply(200, format!("Type set to {}", kind)).await?
                }
                _ => self.reply(504, "Type not supported").await?,
            },
            Command::Mode(mode) => {
                if mode.eq_ignore_ascii_case("S") {
                    self.reply(200, "Mode set to S").await?;
                } else {
                    self.reply(504, "Only stream mode is supported").await?;
                }
            }
            Command::Stru(structure) => {
                if structure.eq_ignore_ascii_case("F") {
                    self.reply(200, "Structure set to F").await?;
                } else {
                    self.reply(504, "Only file structure is supported").await?;
                }
            }
            Command::Pwd => {
                let text = format!("{} is the current directory", quote_path(&self.cwd));
                self.reply(257, text).await?;
            }
            Command::Cwd(dir) => self.change_dir(&dir).await?,
            Command::Cdup => self.change_dir("..").await?,
            Command::Pasv => self.open_passive(false).await?,
            Command::Epsv => self.open_passive(true).await?,
            Command::Port(addr) => {
                // Data connections only go back to the client itself
                if addr.ip() != self.peer.ip() {
                    warn!("Refusing PORT {} from {}", addr, self.peer);
                    self.reply(500, "Illegal PORT command").await?;
                } else {
                    self.data = Some(DataChannel::Active(addr));
                    self.reply(200, "PORT command successful").await?;
                }
            }
            Command::List(target) => self.send_listing(target, false).await?,
            Command::Nlst(target) => self.send_listing(target, true).await?,
            Command::Retr(file) => self.retrieve(&file).await?,
            Command::Stor(file) => self.store(&file).await?,
            Command::Dele(file) => {
                let target = self.virtual_path(&file);
                if path::is_root(&target) {
                    self.reply(550, "Permission denied").await?;
                } else {
                    match self.context.adapter.delete_file(&self.store_path(&target)).await {
                        Ok(()) => self.reply(250, "File deleted").await?,
                        Err(e) => self.reply_error("DELE", e).await?,
                    }
                }
            }
            Command::Mkd(dir) => {
                let target = self.virtual_path(&dir);
                match self
                    .context
                    .adapter
                    .create_directory(&self.store_path(&target))
                    .await
                {
                    Ok(()) => self.reply(257, format!("{} created", quote_path(&target))).await?,
                    Err(e) => self.reply_error("MKD", e).await?,
                }
            }
            Command::Rmd(dir) => {
                let target = self.virtual_path(&dir);
                if path::is_root(&target) {
                    self.reply(550, "Permission denied").await?;
                } else {
                    match self
                        .context
                        .adapter
                        .remove_directory(&self.store_path(&target))
                        .await
                    {
                        Ok(()) => self.reply(250, "Directory removed").await?,
                        Err(e) => self.reply_error("RMD", e).await?,
                    }
                }
            }
            Command::Rnfr(from) => {
                self.rename_from = None;
                let source = self.virtual_path(&from);
                if path::is_root(&source) {
                    self.reply(550, "Permission denied").await?;
                } else {
                    match self.context.adapter.stat(&self.store_path(&source)).await {
                        Ok(_) => {
                            self.rename_from = Some(source);
                            self.reply(350, "Ready for destination name").await?;
                        }
                        Err(e) => self.reply_error("RNFR", e).await?,
                    }
                }
            }
            Command::Rnto(to) => match self.rename_from.take() {
                None => self.reply(503, "Bad sequence of commands").await?,
                Some(source) => {
                    let target = self.virtual_path(&to);
                    let result = self
                        .context
                        .adapter
                        .rename(&self.store_path(&source), &self.store_path(&target))
                        .await;
                    match result {
                        Ok(()) => self.reply(250, "Rename successful").await?,
                        Err(e) => self.reply_error("RNTO", e).await?,
                    }
                }
            },
            Command::Size(file) => {
                let target = self.virtual_path(&file);
                match self.context.adapter.stat(&self.store_path(&target)).await {
                    Ok(stat) if stat.is_dir => self.reply(550, "Not a regular file").await?,
                    Ok(stat) => self.reply(213, stat.size.to_string()).await?,
                    Err(e) => self.reply_error("SIZE", e).await?,
                }
            }
            Command::Mdtm(file) => {
                let target = self.virtual_path(&file);
                match self.context.adapter.stat(&self.store_path(&target)).await {
                    Ok(stat) => self.reply(213, mdtm_timestamp(&stat)).await?,
                    Err(e) => self.reply_error("MDTM", e).await?,
                }
            }
            Command::Unknown(verb) => {
                debug!("{} sent unsupported command {}", self.peer, verb);
                self.reply(502, "Command not implemented").await?;
            }
        }

        Ok(Flow::Continue)
    }

    async fn login(&mut self, password: String) -> io::Result<Flow> {
        let user = match std::mem::replace(&mut self.login, Login::AwaitingUser) {
            Login::AwaitingPass { user } => user,
            Login::LoggedIn { user } => {
                self.login = Login::LoggedIn { user };
                self.reply(230, "Already logged in").await?;
                return Ok(Flow::Continue);
            }
            Login::AwaitingUser => {
                self.reply(503, "Login with USER first").await?;
                return Ok(Flow::Continue);
            }
        };

        let config = &self.context.config;
        if user == config.username && password == config.password {
            info!("User {} logged in from {}", user, self.peer);
            self.login = Login::LoggedIn { user };
            self.reply(230, "Login successful").await?;
            return Ok(Flow::Continue);
        }

        self.failed_logins += 1;
        warn!("Failed login for {:?} from {}", user, self.peer);
        if self.failed_logins >= MAX_LOGIN_ATTEMPTS {
            self.reply(421, "Too many failed login attempts").await?;
            return Ok(Flow::Close);
        }
        self.reply(530, "Login incorrect").await?;
        Ok(Flow::Continue)
    }

    async fn change_dir(&mut self, dir: &str) -> io::Result<()> {
        let target = self.virtual_path(dir);
        match self.context.adapter.stat(&self.store_path(&target)).await {
            Ok(stat) if stat.is_dir => {
                let text = format!("Directory changed to {}", target);
                self.cwd = target;
                self.reply(250, text).await
            }
            Ok(_) => self.reply(550, "Not a directory").await,
            Err(e) => self.reply_error("CWD", e).await,
        }
    }

    async fn open_passive(&mut self, extended: bool) -> io::Result<()> {
        self.data = None;
        let advertised = self.context.config.passive_address.unwrap_or(self.local_ip);
        let advertised_v4 = match advertised {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) if extended => None,
            IpAddr::V6(_) => return self.reply(522, "Use EPSV for IPv6").await,
        };

        let listener = match self.bind_passive().await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Failed to open passive listener: {}", e);
                return self.reply(425, "Cannot open passive connection").await;
            }
        };
        let port = listener.local_addr()?.port();
        self.data = Some(DataChannel::Passive(listener));

        match advertised_v4 {
            Some(ip) if !extended => {
                let text = format!("Entering Passive Mode ({})", format_pasv_address(ip, port));
                self.reply(227, text).await
            }
            _ => {
                let text = format!("Entering Extended Passive Mode (|||{}|)", port);
                self.reply(229, text).await
            }
        }
    }

    async fn bind_passive(&self) -> io::Result<TcpListener> {
        let Some(ports) = &self.context.passive_ports else {
            return TcpListener::bind(SocketAddr::new(self.local_ip, 0)).await;
        };

        let mut last_error = None;
        for port in ports.candidates() {
            match TcpListener::bind(SocketAddr::new(self.local_ip, port)).await {
                Ok(listener) => return Ok(listener),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrInUse, "No passive port available")
        }))
    }

    /// Establish the data connection prepared by PASV/EPSV/PORT
    async fn open_data(&mut self) -> Option<TcpStream> {
        let result = match self.data.take()? {
            DataChannel::Passive(listener) => {
                timeout(DATA_CONNECT_TIMEOUT, listener.accept())
                    .await
                    .map(|accepted| accepted.map(|(stream, _)| stream))
            }
            DataChannel::Active(addr) => {
                timeout(DATA_CONNECT_TIMEOUT, TcpStream::connect(addr)).await
            }
        };

        match result {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(e)) => {
                debug!("Data connection for {} failed: {}", self.peer, e);
                None
            }
            Err(_) => {
                debug!("Data connection for {} timed out", self.peer);
                None
            }
        }
    }

    async fn send_listing(&mut self, target: Option<String>, names_only: bool) -> io::Result<()> {
        if self.data.is_none() {
            return self.reply(425, "Use PORT or PASV first").await;
        }

        let dir = self.virtual_path(target.as_deref().unwrap_or("."));
        let nodes = match self
            .context
            .adapter
            .list_directory(&self.store_path(&dir))
            .await
        {
            Ok(nodes) => nodes,
            Err(e) => {
                self.data = None;
                return self.reply_error("LIST", e).await;
            }
        };

        let now = SystemTime::now();
        let mut body = String::new();
        for node in &nodes {
            if names_only {
                body.push_str(&node.name);
            } else {
                body.push_str(&list_line(node, now));
            }
            body.push_str("\r\n");
        }

        self.reply(150, "Here comes the directory listing").await?;
        let Some(mut data) = self.open_data().await else {
            return self.reply(425, "Cannot open data connection").await;
        };

        let sent = async {
            data.write_all(body.as_bytes()).await?;
            data.shutdown().await
        }
        .await;

        match sent {
            Ok(()) => self.reply(226, "Directory send OK").await,
            Err(e) => {
                debug!("Listing transfer to {} aborted: {}", self.peer, e);
                self.reply(426, "Connection closed; transfer aborted").await
            }
        }
    }

    async fn retrieve(&mut self, file: &str) -> io::Result<()> {
        if self.data.is_none() {
            return self.reply(425, "Use PORT or PASV first").await;
        }

        let target = self.virtual_path(file);
        let mut stream = match self.context.adapter.read_file(&self.store_path(&target)).await {
            Ok(stream) => stream,
            Err(e) => {
                self.data = None;
                return self.reply_error("RETR", e).await;
            }
        };

        self.reply(150, "Opening data connection").await?;
        let Some(mut data) = self.open_data().await else {
            return self.reply(425, "Cannot open data connection").await;
        };

        let mut sent: u64 = 0;
        let mut failure = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Err(e) = data.write_all(&bytes).await {
                        debug!("RETR {} to {} aborted: {}", target, self.peer, e);
                        failure = Some((426, "Connection closed; transfer aborted"));
                        break;
                    }
                    sent += bytes.len() as u64;
                }
                Err(e) => {
                    warn!("RETR {} failed mid-transfer: {}", target, e);
                    failure = Some((451, "Transfer aborted: read from storage failed"));
                    break;
                }
            }
        }
        let _ = data.shutdown().await;
        drop(data);

        match failure {
            None => {
                debug!("RETR {}: {} bytes sent to {}", target, sent, self.peer);
                self.reply(226, "Transfer complete").await
            }
            Some((code, text)) => self.reply(code, text).await,
        }
    }

    async fn store(&mut self, file: &str) -> io::Result<()> {
        if self.data.is_none() {
            return self.reply(425, "Use PORT or PASV first").await;
        }

        let target = self.virtual_path(file);
        self.reply(150, "Ok to send data").await?;
        let Some(mut data) = self.open_data().await else {
            return self.reply(425, "Cannot open data connection").await;
        };

        let max = self.context.config.max_upload_size;
        let mut content = Vec::new();
        let received = async {
            (&mut data)
                .take(max.saturating_add(1))
                .read_to_end(&mut content)
                .await?;
            if content.len() as u64 > max {
                // Let the client finish sending, without keeping any of it
                content = Vec::new();
                tokio::io::copy(&mut data, &mut tokio::io::sink()).await?;
                return Ok(false);
            }
            Ok::<_, io::Error>(true)
        }
        .await;
        drop(data);

        match received {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "STOR {} from {} exceeds {} bytes, discarded",
                    target, self.peer, max
                );
                return self.reply(552, "Exceeded storage allocation").await;
            }
            Err(e) => {
                debug!("STOR {} from {} aborted: {}", target, self.peer, e);
                return self.reply(426, "Connection closed; transfer aborted").await;
            }
        }

        let size = content.len();
        match self
            .context
            .adapter
            .write_file(&self.store_path(&target), Bytes::from(content))
            .await
        {
            Ok(()) => {
                debug!("STOR {}: {} bytes from {}", target, size, self.peer);
                self.reply(226, "Transfer complete").await
            }
            Err(e) => self.reply_error("STOR", e).await,
        }
    }

    /// Session path for a command argument
    fn virtual_path(&self, arg: &str) -> String {
        path::join(&self.cwd, arg)
    }

    /// Store path for a session path
    fn store_path(&self, virtual_path: &str) -> String {
        let root = &self.context.config.root_path;
        if path::is_root(root) {
            virtual_path.to_string()
        } else {
            path::join(root, virtual_path.trim_start_matches('/'))
        }
    }

    async fn reply(&mut self, code: u16, text: impl AsRef<str>) -> io::Result<()> {
        let line = format!("{} {}\r\n", code, text.as_ref());
        trace!("{} <- {}", self.peer, line.trim_end());
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }

    async fn reply_error(&mut self, action: &str, err: GatewayError) -> io::Result<()> {
        match &err {
            GatewayError::Backend(_)
            | GatewayError::Timeout(_)
            | GatewayError::Io(_)
            | GatewayError::Auth(_)
            | GatewayError::Config(_) => warn!("{} from {} failed: {}", action, self.peer, err),
            _ => debug!("{} from {} rejected: {}", action, self.peer, err),
        }
        self.reply(err.reply_code(), error_text(&err)).await
    }
}

/// Client-facing text; internal store paths stay out of replies
fn error_text(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::NotFound(_) => "No such file or directory",
        GatewayError::AlreadyExists(_) => "File exists",
        GatewayError::NotADirectory(_) => "Not a directory",
        GatewayError::IsADirectory(_) => "Is a directory",
        GatewayError::NotEmpty(_) => "Directory not empty",
        GatewayError::InvalidPath(_) => "File name not allowed",
        GatewayError::PermissionDenied => "Permission denied",
        GatewayError::Auth(_) => "Storage authorization failed",
        GatewayError::Timeout(_) => "Storage request timed out",
        GatewayError::Io(_) | GatewayError::Backend(_) | GatewayError::Config(_) => {
            "Requested action aborted: local error in processing"
        }
    }
}

/// Read one CRLF/LF terminated line. `Ok(None)` means the client went away.
async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE as u64)
        .read_until(b'\n', &mut buf)
        .await?;

    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if n >= MAX_LINE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Control line too long",
            ));
        }
        // Connection closed mid-line
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}
