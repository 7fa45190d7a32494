//! # Scripted Redis Stand-In
//!
//! Purpose: Accept RESP2 connections on loopback and answer a small command
//! set, plus a few `DEBUG` hooks that misbehave on purpose, so driver tests
//! can exercise replies, pushes, stalls, EOF and garbage without a real
//! server.
//!
//! ## Commands
//! - `PING [msg]`, `ECHO msg`, `SET k v`, `GET k`, `DEL k...`, `INFO`
//! - `DEBUG SLEEP ms`: reply `+OK` after a delay
//! - `DEBUG HANG`: never reply
//! - `DEBUG PUSH payload`: reply `+OK`, then send `payload` in a RESP3
//!   push frame
//! - `DEBUG GARBLE`: answer with bytes that are not RESP
//! - `DEBUG QUIT`: close the connection without replying
//!
//! The server runs on a current-thread tokio runtime in a background thread
//! and shuts down when the handle drops.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener as StdListener};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use hdrv_common::{RespParser, RespValue};

type Store = Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>;
type Journal = Arc<Mutex<Vec<Vec<Vec<u8>>>>>;

/// Handle to a running fake server.
pub struct FakeRedis {
    addr: SocketAddr,
    journal: Journal,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FakeRedis {
    /// Binds an ephemeral loopback port and starts serving.
    pub fn start() -> io::Result<Self> {
        let listener = StdListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let journal: Journal = Arc::default();
        let (tx, rx) = oneshot::channel();

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let server_journal = journal.clone();
        let thread = std::thread::spawn(move || {
            runtime.block_on(async move {
                let listener = match TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(err) => {
                        tracing::error!(%err, "fake redis failed to adopt listener");
                        return;
                    }
                };
                let store: Store = Arc::default();
                tokio::select! {
                    _ = accept_loop(listener, store, server_journal) => {}
                    _ = rx => {}
                }
            });
        });

        Ok(FakeRedis {
            addr,
            journal,
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every command received so far, across connections, in arrival order.
    pub fn commands(&self) -> Vec<Vec<Vec<u8>>> {
        self.journal.lock().clone()
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn accept_loop(listener: TcpListener, store: Store, journal: Journal) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_connection(stream, store.clone(), journal.clone()));
            }
            Err(err) => {
                tracing::warn!(%err, "fake redis accept failed");
                return;
            }
        }
    }
}

enum Action {
    Reply(Vec<u8>),
    ReplyThenPush(Vec<u8>, Vec<u8>),
    Sleep(Duration),
    Hang,
    Quit,
}

/// Handles a single client connection.
async fn handle_connection(mut stream: TcpStream, store: Store, journal: Journal) -> io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            return Ok(());
        }

        loop {
            let args = match parser.parse(&mut buffer) {
                Ok(Some(value)) => match command_args(value) {
                    Some(args) => args,
                    None => {
                        stream.write_all(&resp_error("expected array of bulk strings")).await?;
                        continue;
                    }
                },
                Ok(None) => break,
                Err(_) => {
                    stream.write_all(&resp_error("protocol error")).await?;
                    return Ok(());
                }
            };
            journal.lock().push(args.clone());

            match dispatch_command(&args, &store) {
                Action::Reply(bytes) => stream.write_all(&bytes).await?,
                Action::ReplyThenPush(reply, push) => {
                    stream.write_all(&reply).await?;
                    stream.write_all(&push).await?;
                }
                Action::Sleep(delay) => {
                    tokio::time::sleep(delay).await;
                    stream.write_all(&resp_simple("OK")).await?;
                }
                Action::Hang => {}
                Action::Quit => return Ok(()),
            }
        }
    }
}

fn command_args(value: RespValue) -> Option<Vec<Vec<u8>>> {
    let RespValue::Array(Some(items)) = value else {
        return None;
    };
    items
        .into_iter()
        .map(|item| match item {
            RespValue::Bulk(Some(data)) => Some(data),
            _ => None,
        })
        .collect()
}

fn dispatch_command(args: &[Vec<u8>], store: &Store) -> Action {
    let Some(cmd) = args.first() else {
        return Action::Reply(resp_error("empty command"));
    };

    if cmd.eq_ignore_ascii_case(b"PING") {
        return Action::Reply(match args.len() {
            1 => resp_simple("PONG"),
            2 => resp_bulk(&args[1]),
            _ => resp_error("wrong number of arguments for PING"),
        });
    }
    if cmd.eq_ignore_ascii_case(b"ECHO") && args.len() == 2 {
        return Action::Reply(resp_bulk(&args[1]));
    }
    if cmd.eq_ignore_ascii_case(b"SET") && args.len() == 3 {
        store.lock().insert(args[1].clone(), args[2].clone());
        return Action::Reply(resp_simple("OK"));
    }
    if cmd.eq_ignore_ascii_case(b"GET") && args.len() == 2 {
        return Action::Reply(match store.lock().get(&args[1]) {
            Some(value) => resp_bulk(value),
            None => b"$-1\r\n".to_vec(),
        });
    }
    if cmd.eq_ignore_ascii_case(b"DEL") && args.len() >= 2 {
        let mut store = store.lock();
        let removed = args[1..].iter().filter(|key| store.remove(*key).is_some()).count();
        return Action::Reply(resp_integer(removed as i64));
    }
    if cmd.eq_ignore_ascii_case(b"INFO") {
        return Action::Reply(resp_bulk(b"role:master\r\nengine:hdrv-testkit\r\n"));
    }
    if cmd.eq_ignore_ascii_case(b"DEBUG") && args.len() >= 2 {
        return dispatch_debug(&args[1..]);
    }

    Action::Reply(resp_error("unknown command"))
}

fn dispatch_debug(args: &[Vec<u8>]) -> Action {
    let sub = &args[0];
    if sub.eq_ignore_ascii_case(b"SLEEP") && args.len() == 2 {
        let millis = std::str::from_utf8(&args[1]).ok().and_then(|s| s.parse().ok());
        return match millis {
            Some(ms) => Action::Sleep(Duration::from_millis(ms)),
            None => Action::Reply(resp_error("invalid integer")),
        };
    }
    if sub.eq_ignore_ascii_case(b"HANG") {
        return Action::Hang;
    }
    if sub.eq_ignore_ascii_case(b"PUSH") && args.len() == 2 {
        let push = RespValue::Push(vec![RespValue::Bulk(Some(args[1].clone()))]);
        return Action::ReplyThenPush(resp_simple("OK"), push.to_bytes());
    }
    if sub.eq_ignore_ascii_case(b"GARBLE") {
        return Action::Reply(b"!not resp at all\r\n".to_vec());
    }
    if sub.eq_ignore_ascii_case(b"QUIT") {
        return Action::Quit;
    }
    Action::Reply(resp_error("unknown DEBUG subcommand"))
}

fn resp_simple(message: &str) -> Vec<u8> {
    RespValue::Simple(message.as_bytes().to_vec()).to_bytes()
}

fn resp_error(message: &str) -> Vec<u8> {
    RespValue::Error(format!("ERR {}", message).into_bytes()).to_bytes()
}

fn resp_integer(value: i64) -> Vec<u8> {
    RespValue::Integer(value).to_bytes()
}

fn resp_bulk(data: &[u8]) -> Vec<u8> {
    RespValue::Bulk(Some(data.to_vec())).to_bytes()
}
