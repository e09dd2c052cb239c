//! TCP client for the acquisition software's remote-command server.
//!
//! Commands are single text lines. The server answers with zero or more data lines
//! followed by `OK`, or a line starting with `ERROR`. Every read is bounded by the
//! configured timeout. The connection is opened on first use and dropped after any
//! failure so the next command reconnects.

use super::backend::RecordingBackend;
use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};

/// Recorder reached over the network
#[derive(Debug)]
pub struct RemoteRecorder {
    addr: String,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl RemoteRecorder {
    /// Client for the server at `addr` (`host:port`). Does not connect yet.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            stream: None,
        }
    }

    async fn connection(&mut self) -> RigResult<&mut BufReader<TcpStream>> {
        if self.stream.is_none() {
            let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
                .await
                .map_err(|_| RigError::Recorder(format!("connect to {} timed out", self.addr)))?
                .map_err(|e| RigError::Recorder(format!("connect to {}: {}", self.addr, e)))?;
            debug!(addr = %self.addr, "Connected to recorder");
            self.stream = Some(BufReader::new(stream));
        }
        self.stream
            .as_mut()
            .ok_or_else(|| RigError::Recorder("connection unavailable".into()))
    }

    /// Send one command line and collect the data lines before `OK`
    #[instrument(skip(self), fields(addr = %self.addr), err)]
    pub async fn command(&mut self, line: &str) -> RigResult<Vec<String>> {
        let result = self.exchange(line).await;
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    async fn exchange(&mut self, line: &str) -> RigResult<Vec<String>> {
        let timeout = self.timeout;
        let stream = self.connection().await?;
        stream.get_mut().write_all(line.as_bytes()).await?;
        stream.get_mut().write_all(b"\n").await?;
        stream.get_mut().flush().await?;

        let mut data = Vec::new();
        loop {
            let mut reply = String::new();
            let n = tokio::time::timeout(timeout, stream.read_line(&mut reply))
                .await
                .map_err(|_| RigError::Recorder(format!("no reply to '{}'", line)))??;
            if n == 0 {
                return Err(RigError::Recorder("connection closed by recorder".into()));
            }
            let reply = reply.trim_end();
            if reply == "OK" {
                return Ok(data);
            }
            if reply.starts_with("ERROR") {
                return Err(RigError::Recorder(reply.to_string()));
            }
            data.push(reply.to_string());
        }
    }

    async fn single_value(&mut self, line: &str) -> RigResult<String> {
        self.command(line)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RigError::Recorder(format!("empty reply to '{}'", line)))
    }
}

#[async_trait]
impl RecordingBackend for RemoteRecorder {
    async fn is_running(&mut self) -> RigResult<bool> {
        match self.single_value("ISRUNNING").await {
            Ok(value) => Ok(value.trim() == "1"),
            Err(e) => {
                warn!(error = %e, "Recorder unreachable");
                Ok(false)
            }
        }
    }

    async fn enable(&mut self, enabled: bool) -> RigResult<()> {
        self.command(&format!("SETRECORDENAB {}", u8::from(enabled)))
            .await
            .map(|_| ())
    }

    async fn trigger(&mut self, gate_delta: i32, trigger_delta: i32) -> RigResult<()> {
        self.command(&format!("TRIGGERGT {} {}", gate_delta, trigger_delta))
            .await
            .map(|_| ())
    }

    async fn run_name(&mut self) -> RigResult<String> {
        self.single_value("GETRUNNAME").await
    }

    async fn data_dir(&mut self) -> RigResult<PathBuf> {
        self.single_value("GETDATADIR 0").await.map(PathBuf::from)
    }

    async fn set_data_dir(&mut self, dir: &Path) -> RigResult<()> {
        self.command(&format!("SETDATADIR 0 {}", dir.display()))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve canned replies, one per expected command, and hand back what was received.
    async fn serve(replies: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut received = Vec::new();
            for reply in replies {
                let mut line = String::new();
                socket.read_line(&mut line).await.unwrap();
                received.push(line.trim_end().to_string());
                socket.get_mut().write_all(reply.as_bytes()).await.unwrap();
            }
            received
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn commands_and_replies() {
        let (addr, server) = serve(vec![
            "1\nOK\n",
            "mouse7\nOK\n",
            "D:\\data\nOK\n",
            "OK\n",
            "OK\n",
        ])
        .await;
        let mut recorder = RemoteRecorder::new(addr, Duration::from_secs(2));

        assert!(recorder.is_running().await.unwrap());
        assert_eq!(recorder.run_name().await.unwrap(), "mouse7");
        assert_eq!(recorder.data_dir().await.unwrap(), PathBuf::from("D:\\data"));
        recorder.enable(true).await.unwrap();
        recorder.trigger(-1, 1).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(
            received,
            vec![
                "ISRUNNING",
                "GETRUNNAME",
                "GETDATADIR 0",
                "SETRECORDENAB 1",
                "TRIGGERGT -1 1"
            ]
        );
    }

    #[tokio::test]
    async fn error_replies_become_recorder_errors() {
        let (addr, _server) = serve(vec!["ERROR no run active\n"]).await;
        let mut recorder = RemoteRecorder::new(addr, Duration::from_secs(2));
        let err = recorder.trigger(1, 1).await.unwrap_err();
        assert!(matches!(err, RigError::Recorder(msg) if msg.contains("no run active")));
    }

    #[tokio::test]
    async fn unreachable_recorder_is_not_running() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut recorder = RemoteRecorder::new(addr, Duration::from_millis(500));
        assert!(!recorder.is_running().await.unwrap());
    }
}
