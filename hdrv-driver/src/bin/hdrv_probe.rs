//! # Driver Probe
//!
//! Purpose: Exercise one driver instance end to end from the command line:
//! connect through the control channel, send a command on either the sync or
//! the async path, and print every notification the port emits.
//!
//! Usage: `hdrv-probe [--config FILE] [--async] <host:port> <arg>...`
//!
//! Logging follows `RUST_LOG` (e.g. `RUST_LOG=hdrv_driver=trace`).

use std::env;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use bytes::BytesMut;
use tracing_subscriber::EnvFilter;

use hdrv_common::{encode_args, encode_connect, read_response, CallCommand, LinkState, RespParser};
use hdrv_driver::{Driver, DriverConfig, MioHost, Notification, Token};

const OUTPUT_CAPACITY: usize = 1024 * 1024;
const WAIT_LIMIT: Duration = Duration::from_secs(10);

struct ProbeArgs {
    config: DriverConfig,
    use_async: bool,
    addr: String,
    command: Vec<String>,
}

impl ProbeArgs {
    fn from_args() -> anyhow::Result<Self> {
        let mut config = DriverConfig::default();
        let mut use_async = false;
        let mut rest = Vec::new();

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
                    config = DriverConfig::from_json(&text).with_context(|| format!("parsing {}", path))?;
                }
                "--async" => use_async = true,
                _ => rest.push(arg),
            }
        }

        if rest.len() < 2 {
            bail!("usage: hdrv-probe [--config FILE] [--async] <host:port> <arg>...");
        }
        let addr = rest.remove(0);
        Ok(ProbeArgs {
            config,
            use_async,
            addr,
            command: rest,
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = ProbeArgs::from_args()?;
    let driver = Driver::init(args.config.clone());
    let mut host = MioHost::new(driver)?;
    let (tx, rx) = mpsc::channel();
    let port = host.open(tx)?;

    let mut output = vec![0u8; OUTPUT_CAPACITY];
    let mut payload = Vec::new();
    encode_connect(0, &args.addr, &mut payload);
    control(&mut host, port, CallCommand::Connect, &payload, &mut output)?;

    let opened = host.run_until(WAIT_LIMIT, |h| {
        h.port(port).map_or(true, |p| p.state() != LinkState::Connecting)
    })?;
    print_pending(&rx);
    if !opened || host.port(port).map(|p| p.state()) != Some(LinkState::Open) {
        bail!("connection to {} did not open", args.addr);
    }

    let argv: Vec<&[u8]> = args.command.iter().map(|a| a.as_bytes()).collect();
    payload.clear();
    encode_args(&argv, &mut payload);

    if args.use_async {
        control(&mut host, port, CallCommand::Append, &payload, &mut output)?;
        host.run_until(WAIT_LIMIT, |h| h.port(port).map_or(true, |p| p.handle().pending() == 0))?;
        print_pending(&rx);
    } else {
        let body = control(&mut host, port, CallCommand::Command, &payload, &mut output)?;
        print_pending(&rx);
        let mut buf = BytesMut::from(&body[..]);
        match RespParser::new().parse(&mut buf)? {
            Some(value) => println!("{}", value),
            None => bail!("truncated reply"),
        }
    }

    control(&mut host, port, CallCommand::Close, &[], &mut output)?;
    print_pending(&rx);
    host.close(port);
    Ok(())
}

fn control(
    host: &mut MioHost<mpsc::Sender<Notification>>,
    port: Token,
    command: CallCommand,
    payload: &[u8],
    output: &mut [u8],
) -> anyhow::Result<Vec<u8>> {
    let len = host
        .call(port, command.as_u8() as u32, payload, output)
        .map_err(|err| anyhow!("{} rejected: {} (code {})", command, err, err.code()))?;
    let response = read_response(&output[..len])?;
    match response.body {
        Ok(body) => Ok(body.to_vec()),
        Err((tag, detail)) => Err(anyhow!("{} failed: {} ({}): {}", command, tag, tag.label(), detail)),
    }
}

fn print_pending(rx: &Receiver<Notification>) {
    while let Ok(note) = rx.try_recv() {
        println!("{}", note);
    }
}
