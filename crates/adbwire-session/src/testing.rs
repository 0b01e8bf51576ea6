//! In-process `adbd` stand-in for unit tests.

use std::thread;
use std::time::Duration;

use adbwire_message::{
    CodecConfig, CodecError, Command, Message, MessageReader, MessageWriter, SystemIdentity,
    SystemType, MAX_PAYLOAD, VERSION,
};
use adbwire_transport::{Transport, UnixTransport};

use crate::config::ConnectionConfig;
use crate::connection::{connect_with_config, Connection};

const DEVICE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct FakeDevice {
    reader: MessageReader<UnixTransport>,
    writer: MessageWriter<UnixTransport>,
}

impl FakeDevice {
    /// Host-side transport plus the device end of the pair.
    pub(crate) fn pair() -> (UnixTransport, FakeDevice) {
        let (host, device) = UnixTransport::pair().expect("socket pair should be creatable");
        let config = CodecConfig {
            max_payload_size: 1024 * 1024,
            read_timeout: Some(DEVICE_TIMEOUT),
        };
        let reader_half = device.try_clone().expect("device socket should clone");
        let reader =
            MessageReader::with_config(reader_half, config.clone()).expect("reader should build");
        let writer = MessageWriter::with_config(device, config);
        (host, FakeDevice { reader, writer })
    }

    pub(crate) fn send(&mut self, message: Message) {
        self.writer
            .write_message(&message)
            .expect("device should send");
    }

    pub(crate) fn recv(&mut self) -> Message {
        self.reader
            .read_message()
            .expect("device should receive a message")
    }

    pub(crate) fn expect(&mut self, command: Command) -> Message {
        let message = self.recv();
        assert_eq!(message.command, command, "unexpected {message:?}");
        message
    }

    /// `None` if nothing arrives within `wait`.
    pub(crate) fn try_recv(&mut self, wait: Duration) -> Option<Message> {
        self.reader
            .get_ref()
            .set_receive_timeout(Some(wait))
            .expect("timeout should apply");
        let result = self.reader.read_message();
        self.reader
            .get_ref()
            .set_receive_timeout(Some(DEVICE_TIMEOUT))
            .expect("timeout should apply");
        match result {
            Ok(message) => Some(message),
            Err(err) if err.is_timeout() => None,
            Err(err) => panic!("device receive failed: {err}"),
        }
    }

    /// Answer the host's `CNXN`.
    pub(crate) fn accept_connect(&mut self, max_payload: u32) -> Message {
        let cnxn = self.expect(Command::Cnxn);
        self.send(Message::connect(VERSION, max_payload, &device_identity()));
        cnxn
    }

    /// Accept an `OPEN` as `remote_id`; returns the host's id and the destination.
    pub(crate) fn accept_open(&mut self, remote_id: u32) -> (u32, String) {
        let open = self.expect(Command::Open);
        self.send(Message::okay(remote_id, open.arg0));
        (open.arg0, open.payload_str().into_owned())
    }

    /// Next `WRTE` from the host, acknowledged. Write acks in between are skipped.
    pub(crate) fn recv_write(&mut self) -> Message {
        loop {
            let message = self.recv();
            match message.command {
                Command::Okay => continue,
                Command::Wrte => {
                    self.send(Message::okay(message.arg1, message.arg0));
                    return message;
                }
                other => panic!("expected WRTE, got {other}"),
            }
        }
    }

    /// The host closed the connection without sending anything further.
    pub(crate) fn expect_hangup(&mut self) {
        match self.reader.read_message() {
            Err(CodecError::ConnectionClosed) => {}
            other => panic!("expected hangup, got {other:?}"),
        }
    }

    /// Close the device end of the socket.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.writer.close();
    }
}

pub(crate) fn device_identity() -> SystemIdentity {
    SystemIdentity::new(
        SystemType::Device,
        "emulator-5554",
        "ro.product.model=sdk_gphone64;features=shell_v2,cmd,stat_v2",
    )
}

/// Short timeouts so failure paths finish quickly.
pub(crate) fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        identity: SystemIdentity::host("", "unit-test"),
        handshake_timeout: Duration::from_secs(2),
        open_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(20),
        ..ConnectionConfig::default()
    }
}

pub(crate) fn connected(config: ConnectionConfig) -> (Connection, FakeDevice) {
    connected_with_max(config, MAX_PAYLOAD)
}

/// Connect to a fake device announcing `max_payload`.
pub(crate) fn connected_with_max(
    config: ConnectionConfig,
    max_payload: u32,
) -> (Connection, FakeDevice) {
    let (host, mut device) = FakeDevice::pair();
    let device_thread = thread::spawn(move || {
        device.accept_connect(max_payload);
        device
    });
    let conn = connect_with_config(host, config, &[]).expect("handshake should succeed");
    let device = device_thread.join().expect("device thread should finish");
    (conn, device)
}
