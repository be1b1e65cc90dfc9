//! Minimal FTP client for driving the server under test
//!
//! Only passive mode is used; every transfer opens a fresh PASV
//! data connection.

use anyhow::{anyhow, bail, Context, Result};
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

/// A complete (possibly multi-line) server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// The server answered with a code the caller did not expect
#[derive(Debug, Clone)]
pub struct UnexpectedReply {
    pub command: String,
    pub expected: u16,
    pub reply: Reply,
}

impl fmt::Display for UnexpectedReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.command, self.expected, self.reply
        )
    }
}

impl std::error::Error for UnexpectedReply {}

/// Reply code carried by an error from this client, if any
pub fn reply_code(err: &anyhow::Error) -> Option<u16> {
    err.downcast_ref::<UnexpectedReply>().map(|e| e.reply.code)
}

pub struct FtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    server: SocketAddr,
}

impl FtpClient {
    /// Connect and return the client with the server greeting
    pub async fn connect(addr: SocketAddr) -> Result<(Self, Reply)> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            server: addr,
        };
        let greeting = client.read_reply().await?;
        Ok((client, greeting))
    }

    /// Connect and log in
    pub async fn login(addr: SocketAddr, user: &str, password: &str) -> Result<Self> {
        let (mut client, greeting) = Self::connect(addr).await?;
        if greeting.code != 220 {
            bail!("Unexpected greeting: {}", greeting);
        }
        client.expect(&format!("USER {}", user), 331).await?;
        client.expect(&format!("PASS {}", password), 230).await?;
        Ok(client)
    }

    /// Send a raw command line and read the reply
    pub async fn command(&mut self, line: &str) -> Result<Reply> {
        trace!("-> {}", line);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.read_reply().await
    }

    /// Send a command and require a specific reply code
    pub async fn expect(&mut self, line: &str, code: u16) -> Result<Reply> {
        let reply = self.command(line).await?;
        check(line, code, reply)
    }

    /// Read the next reply. `Ok(None)`-like EOF is reported as an error.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let first = self.read_line().await?;
        let code: u16 = first
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| anyhow!("Malformed reply: {:?}", first))?;

        if first.as_bytes().get(3) != Some(&b'-') {
            return Ok(Reply {
                code,
                text: first.get(4..).unwrap_or("").to_string(),
            });
        }

        let mut text = first[4..].to_string();
        let terminator = format!("{} ", code);
        loop {
            let line = self.read_line().await?;
            if line.starts_with(&terminator) {
                text.push('\n');
                text.push_str(&line[4..]);
                return Ok(Reply { code, text });
            }
            text.push('\n');
            text.push_str(line.trim_start());
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            bail!("Connection closed by server");
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        trace!("<- {}", line);
        Ok(line)
    }

    /// True once the server has closed the control connection
    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(self.reader.read(&mut buf).await, Ok(0) | Err(_))
    }

    /// Enter passive mode and connect the data socket
    async fn passive(&mut self) -> Result<TcpStream> {
        let reply = self.expect("PASV", 227).await?;
        let addr = parse_pasv_reply(&reply.text)?;
        // The advertised address may be a wildcard bind; reuse the control host
        let addr = SocketAddr::new(self.server.ip(), addr.port());
        TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to open data connection to {}", addr))
    }

    /// Run a download-style command and return the received bytes
    async fn download(&mut self, line: &str) -> Result<Vec<u8>> {
        let mut data = self.passive().await?;
        let reply = self.command(line).await?;
        check(line, 150, reply)?;

        let mut content = Vec::new();
        data.read_to_end(&mut content).await?;
        drop(data);

        self.expect_final(line).await?;
        Ok(content)
    }

    async fn expect_final(&mut self, line: &str) -> Result<Reply> {
        let reply = self.read_reply().await?;
        check(line, 226, reply)
    }

    pub async fn list(&mut self, path: Option<&str>) -> Result<Vec<String>> {
        let line = match path {
            Some(path) => format!("LIST {}", path),
            None => "LIST".to_string(),
        };
        let raw = self.download(&line).await?;
        Ok(String::from_utf8_lossy(&raw)
            .lines()
            .map(str::to_string)
            .collect())
    }

    pub async fn nlst(&mut self, path: Option<&str>) -> Result<Vec<String>> {
        let line = match path {
            Some(path) => format!("NLST {}", path),
            None => "NLST".to_string(),
        };
        let raw = self.download(&line).await?;
        Ok(String::from_utf8_lossy(&raw)
            .lines()
            .map(str::to_string)
            .collect())
    }

    pub async fn retr(&mut self, path: &str) -> Result<Vec<u8>> {
        self.download(&format!("RETR {}", path)).await
    }

    pub async fn stor(&mut self, path: &str, content: &[u8]) -> Result<()> {
        let line = format!("STOR {}", path);
        let mut data = self.passive().await?;
        let reply = self.command(&line).await?;
        check(&line, 150, reply)?;

        data.write_all(content).await?;
        data.shutdown().await?;
        drop(data);

        self.expect_final(&line).await?;
        Ok(())
    }

    pub async fn mkd(&mut self, path: &str) -> Result<()> {
        self.expect(&format!("MKD {}", path), 257).await.map(|_| ())
    }

    pub async fn rmd(&mut self, path: &str) -> Result<()> {
        self.expect(&format!("RMD {}", path), 250).await.map(|_| ())
    }

    pub async fn dele(&mut self, path: &str) -> Result<()> {
        self.expect(&format!("DELE {}", path), 250).await.map(|_| ())
    }

    pub async fn cwd(&mut self, path: &str) -> Result<()> {
        self.expect(&format!("CWD {}", path), 250).await.map(|_| ())
    }

    /// Current directory as reported by PWD
    pub async fn pwd(&mut self) -> Result<String> {
        let reply = self.expect("PWD", 257).await?;
        let start = reply
            .text
            .find('"')
            .ok_or_else(|| anyhow!("No quoted path in {}", reply))?;
        let end = reply
            .text
            .rfind('"')
            .filter(|end| *end > start)
            .ok_or_else(|| anyhow!("Unterminated path in {}", reply))?;
        Ok(reply.text[start + 1..end].replace("\"\"", "\""))
    }

    pub async fn size(&mut self, path: &str) -> Result<u64> {
        let reply = self.expect(&format!("SIZE {}", path), 213).await?;
        Ok(reply.text.trim().parse()?)
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.expect(&format!("RNFR {}", from), 350).await?;
        self.expect(&format!("RNTO {}", to), 250).await.map(|_| ())
    }

    pub async fn quit(mut self) -> Result<()> {
        self.expect("QUIT", 221).await.map(|_| ())
    }
}

fn check(command: &str, expected: u16, reply: Reply) -> Result<Reply> {
    if reply.code == expected {
        Ok(reply)
    } else {
        Err(UnexpectedReply {
            command: command.to_string(),
            expected,
            reply,
        }
        .into())
    }
}

/// Extract the address from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
pub fn parse_pasv_reply(text: &str) -> Result<SocketAddr> {
    let start = text
        .find('(')
        .ok_or_else(|| anyhow!("No address in PASV reply: {}", text))?;
    let end = text
        .rfind(')')
        .ok_or_else(|| anyhow!("No address in PASV reply: {}", text))?;
    let parts: Vec<u8> = text[start + 1..end]
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Bad PASV address: {}", text))?;
    if parts.len() != 6 {
        bail!("Bad PASV address: {}", text);
    }
    let ip = std::net::Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    let port = u16::from(parts[4]) << 8 | u16::from(parts[5]);
    Ok(SocketAddr::new(ip.into(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pasv_reply() {
        let addr = parse_pasv_reply("Entering Passive Mode (127,0,0,1,117,48)").unwrap();
        assert_eq!(addr, "127.0.0.1:30000".parse().unwrap());
        assert!(parse_pasv_reply("Entering Passive Mode").is_err());
    }
}
