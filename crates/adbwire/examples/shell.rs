//! Run one shell command on a device reachable over TCP.
//!
//! Run with:
//!   cargo run --example shell -- 192.168.1.20:5555 getprop ro.product.model
//!
//! The key at `$ADB_VENDOR_KEY` (or `~/.android/adbkey`) answers the
//! device's auth challenge. If the device has not seen it before, accept the
//! prompt on screen. Without a key only `ro.adb.secure=0` devices connect.
//! Set `RUST_LOG=adbwire_session=debug` to watch the stream lifecycle.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use adbwire::message::SystemIdentity;
use adbwire::session::{
    connect_with_config, AuthSigner, ConnectionConfig, Destination, RsaSigner,
};
use adbwire::transport::{TcpTransport, DEFAULT_PORT};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let addr = args
        .next()
        .unwrap_or_else(|| format!("127.0.0.1:{DEFAULT_PORT}"));
    let command = args.collect::<Vec<_>>().join(" ");

    let transport = TcpTransport::connect(addr.as_str())?;
    let mut signers: Vec<Arc<dyn AuthSigner>> = Vec::new();
    if let Some(path) = key_path().filter(|path| path.exists()) {
        signers.push(Arc::new(RsaSigner::load(&path)?));
    }
    let config = ConnectionConfig {
        identity: SystemIdentity::host("", "adbwire-example"),
        ..ConnectionConfig::default()
    };
    let conn = connect_with_config(transport, config, &signers)?;
    eprintln!("Connected to {}", conn.peer());

    let destination = if command.is_empty() {
        Destination::shell("uname -a")
    } else {
        Destination::shell(command)
    };
    let shell = conn.open(destination)?;

    let mut stdout = std::io::stdout().lock();
    while let Some(chunk) = shell.receive()? {
        stdout.write_all(&chunk)?;
    }
    stdout.flush()?;

    shell.close()?;
    conn.close()?;
    Ok(())
}

fn key_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("ADB_VENDOR_KEY") {
        return Some(PathBuf::from(path));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".android").join("adbkey"))
}
