use std::fmt;

/// Service strings understood by `adbd` in `OPEN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Interactive shell.
    Shell,
    /// `shell:<command>`.
    ShellCommand(String),
    /// File sync service.
    Sync,
    /// `tcp:<port>` on the device.
    Tcp(u16),
    /// `tcp:<host>:<port>` reachable from the device.
    TcpHost(String, u16),
    Udp(String, u16),
    LocalAbstract(String),
    LocalFilesystem(String),
    /// `local-stream:<id>`.
    LocalStream(u32),
    /// `local-dgram:<id>`.
    LocalDgram(u32),
    /// `reboot:<target>`; an empty target reboots normally.
    Reboot(String),
    Upload,
    FsBridge,
    /// Any other service string, sent verbatim.
    Raw(String),
}

impl Destination {
    pub fn shell(command: impl Into<String>) -> Self {
        Destination::ShellCommand(command.into())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Shell => f.write_str("shell:"),
            Destination::ShellCommand(command) => write!(f, "shell:{command}"),
            Destination::Sync => f.write_str("sync:"),
            Destination::Tcp(port) => write!(f, "tcp:{port}"),
            Destination::TcpHost(host, port) => write!(f, "tcp:{host}:{port}"),
            Destination::Udp(host, port) => write!(f, "udp:{host}:{port}"),
            Destination::LocalAbstract(name) => write!(f, "localabstract:{name}"),
            Destination::LocalFilesystem(path) => write!(f, "localfilesystem:{path}"),
            Destination::LocalStream(id) => write!(f, "local-stream:{id}"),
            Destination::LocalDgram(id) => write!(f, "local-dgram:{id}"),
            Destination::Reboot(target) => write!(f, "reboot:{target}"),
            Destination::Upload => f.write_str("upload"),
            Destination::FsBridge => f.write_str("fs-bridge"),
            Destination::Raw(raw) => f.write_str(raw),
        }
    }
}

impl From<&str> for Destination {
    fn from(raw: &str) -> Self {
        Destination::Raw(raw.to_string())
    }
}

impl From<String> for Destination {
    fn from(raw: String) -> Self {
        Destination::Raw(raw)
    }
}
