use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use adbwire_message::{
    AuthType, CodecError, Command, Message, MessageReader, MessageWriter, SystemIdentity,
};
use adbwire_transport::Transport;
use tracing::{debug, warn};

use crate::auth::AuthSigner;
use crate::config::ConnectionConfig;
use crate::error::{ProtocolError, Result};

/// Where the client is in the `CNXN`/`AUTH` exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet.
    Start,
    /// `CNXN` sent; the peer may answer with `CNXN` or `AUTH(TOKEN)`.
    AwaitAuthOrConnect,
    /// A signature was sent; `next_key` is the index of the next signer to try.
    Authenticating { next_key: usize },
    /// A public key was offered; waiting for the user to accept it on the device.
    AwaitingApproval,
    Established,
    Failed,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Failed)
    }
}

/// Values agreed on by both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// `min(local, remote)` protocol version.
    pub version: u32,
    /// `min(local, remote)` payload limit.
    pub max_payload: usize,
    /// The identity the device announced.
    pub peer: SystemIdentity,
}

/// What the caller must do after feeding a message to [`ClientHandshake`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Send this message and keep waiting.
    Reply(Message),
    /// Done; the connection is usable.
    Established(ConnectionInfo),
}

/// Client side of the handshake as a pure state machine.
///
/// It performs no I/O: [`start`](Self::start) yields the opening `CNXN`, and
/// each received message is fed to [`on_message`](Self::on_message), which
/// answers with the next message to send or the negotiated result.
pub struct ClientHandshake {
    version: u32,
    max_payload: u32,
    identity: SystemIdentity,
    offer_public_key: bool,
    signers: Vec<Arc<dyn AuthSigner>>,
    state: HandshakeState,
}

impl ClientHandshake {
    pub fn new(config: &ConnectionConfig, signers: &[Arc<dyn AuthSigner>]) -> Self {
        Self {
            version: config.version,
            max_payload: config.max_payload,
            identity: config.identity.clone(),
            offer_public_key: config.offer_public_key,
            signers: signers.to_vec(),
            state: HandshakeState::Start,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The opening `CNXN`.
    pub fn start(&mut self) -> Result<Message> {
        if self.state != HandshakeState::Start {
            return Err(ProtocolError::UnexpectedMessage(format!(
                "handshake already started ({:?})",
                self.state
            )));
        }
        self.state = HandshakeState::AwaitAuthOrConnect;
        Ok(Message::connect(
            self.version,
            self.max_payload,
            &self.identity,
        ))
    }

    /// Advance on a message from the peer.
    ///
    /// Any error leaves the machine in [`HandshakeState::Failed`].
    pub fn on_message(&mut self, message: &Message) -> Result<HandshakeStep> {
        let result = self.advance(message);
        if result.is_err() {
            self.state = HandshakeState::Failed;
        }
        result
    }

    fn advance(&mut self, message: &Message) -> Result<HandshakeStep> {
        let next_key = match self.state {
            HandshakeState::AwaitAuthOrConnect => 0,
            HandshakeState::Authenticating { next_key } => next_key,
            HandshakeState::AwaitingApproval => self.signers.len(),
            state => {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "{} while handshake is {state:?}",
                    message.command
                )))
            }
        };

        match message.command {
            Command::Cnxn => self.establish(message),
            Command::Auth if message.arg0 == AuthType::Token.as_u32() => {
                if self.state == HandshakeState::AwaitingApproval {
                    return Err(ProtocolError::HandshakeFailed(
                        "device refused the offered public key".to_string(),
                    ));
                }
                self.answer_token(&message.payload, next_key)
            }
            Command::Auth => Err(ProtocolError::UnexpectedMessage(format!(
                "AUTH type {} from device",
                message.arg0
            ))),
            other => Err(ProtocolError::UnexpectedMessage(format!(
                "{other} during handshake"
            ))),
        }
    }

    fn establish(&mut self, message: &Message) -> Result<HandshakeStep> {
        if message.arg1 == 0 {
            return Err(ProtocolError::Malformed(
                "device announced a zero max payload".to_string(),
            ));
        }
        let peer = SystemIdentity::parse(&message.payload)?;
        let info = ConnectionInfo {
            version: self.version.min(message.arg0),
            max_payload: self.max_payload.min(message.arg1) as usize,
            peer,
        };
        self.state = HandshakeState::Established;
        Ok(HandshakeStep::Established(info))
    }

    fn answer_token(&mut self, token: &[u8], first: usize) -> Result<HandshakeStep> {
        for (index, signer) in self.signers.iter().enumerate().skip(first) {
            match signer.sign(token) {
                Ok(signature) => {
                    debug!(key = signer.name(), "answering auth token");
                    self.state = HandshakeState::Authenticating {
                        next_key: index + 1,
                    };
                    return Ok(HandshakeStep::Reply(Message::auth_signature(signature)));
                }
                Err(err) => warn!(error = %err, "skipping key"),
            }
        }

        if self.offer_public_key {
            let offer = self
                .signers
                .iter()
                .find_map(|signer| signer.public_key().map(|key| (signer.name(), key)));
            if let Some((name, public_key)) = offer {
                debug!(key = name, "offering public key for approval");
                self.state = HandshakeState::AwaitingApproval;
                return Ok(HandshakeStep::Reply(Message::auth_public_key(&public_key)));
            }
        }

        Err(ProtocolError::HandshakeFailed(format!(
            "device rejected all {} key(s) and no public key could be offered",
            self.signers.len()
        )))
    }
}

impl fmt::Debug for ClientHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandshake")
            .field("version", &self.version)
            .field("max_payload", &self.max_payload)
            .field("identity", &self.identity)
            .field("offer_public_key", &self.offer_public_key)
            .field("signers", &self.signers.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Run the client handshake over a reader/writer pair.
///
/// The reader's receive timeout should be short; the deadline is checked
/// between reads. Each reply restarts the deadline, using
/// `auth_approval_timeout` once a public key has been offered.
pub fn handshake_client<R: Transport, W: Transport>(
    reader: &mut MessageReader<R>,
    writer: &mut MessageWriter<W>,
    config: &ConnectionConfig,
    signers: &[Arc<dyn AuthSigner>],
) -> Result<ConnectionInfo> {
    let mut machine = ClientHandshake::new(config, signers);
    writer.write_message(&machine.start()?)?;

    let mut timeout = config.handshake_timeout;
    let mut deadline = Instant::now() + timeout;
    loop {
        if Instant::now() >= deadline {
            return Err(ProtocolError::HandshakeTimeout(timeout));
        }

        let message = match reader.read_message() {
            Ok(message) => message,
            Err(err) if err.is_timeout() => continue,
            Err(CodecError::ConnectionClosed) => {
                return Err(ProtocolError::Disconnected(
                    "connection closed during handshake".to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        };

        match machine.on_message(&message)? {
            HandshakeStep::Established(info) => return Ok(info),
            HandshakeStep::Reply(reply) => {
                writer.write_message(&reply)?;
                timeout = approval_aware_timeout(machine.state(), config);
                deadline = Instant::now() + timeout;
            }
        }
    }
}

fn approval_aware_timeout(state: HandshakeState, config: &ConnectionConfig) -> Duration {
    if state == HandshakeState::AwaitingApproval {
        config.auth_approval_timeout
    } else {
        config.handshake_timeout
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use adbwire_message::{CodecConfig, SystemType, MAX_PAYLOAD, VERSION};
    use adbwire_transport::UnixTransport;
    use bytes::Bytes;

    use super::*;
    use crate::auth::SignError;
    use crate::connection::connect_with_config;
    use crate::testing::{device_identity, FakeDevice};

    struct TestKey {
        name: &'static str,
        public: Option<&'static [u8]>,
        broken: bool,
        signed: AtomicUsize,
    }

    impl TestKey {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                public: None,
                broken: false,
                signed: AtomicUsize::new(0),
            })
        }

        fn with_public(name: &'static str, public: &'static [u8]) -> Arc<Self> {
            Arc::new(Self {
                name,
                public: Some(public),
                broken: false,
                signed: AtomicUsize::new(0),
            })
        }

        fn broken(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                public: None,
                broken: true,
                signed: AtomicUsize::new(0),
            })
        }
    }

    impl AuthSigner for TestKey {
        fn sign(&self, token: &[u8]) -> std::result::Result<Vec<u8>, SignError> {
            if self.broken {
                return Err(SignError::new(self.name, "key file unreadable"));
            }
            self.signed.fetch_add(1, Ordering::SeqCst);
            let mut signature = self.name.as_bytes().to_vec();
            signature.extend_from_slice(token);
            Ok(signature)
        }

        fn public_key(&self) -> Option<Vec<u8>> {
            self.public.map(<[u8]>::to_vec)
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn token() -> Message {
        Message::auth(AuthType::Token, Bytes::from_static(&[0x5a; 20]))
    }

    fn device_cnxn(version: u32, max_payload: u32) -> Message {
        Message::connect(version, max_payload, &device_identity())
    }

    fn signers(keys: &[Arc<TestKey>]) -> Vec<Arc<dyn AuthSigner>> {
        keys.iter()
            .map(|key| Arc::clone(key) as Arc<dyn AuthSigner>)
            .collect()
    }

    #[test]
    fn cnxn_reply_negotiates_minimums() {
        let mut machine = ClientHandshake::new(&ConnectionConfig::default(), &[]);
        let cnxn = machine.start().unwrap();
        assert_eq!(cnxn.command, Command::Cnxn);
        assert_eq!(cnxn.arg0, VERSION);
        assert_eq!(cnxn.arg1, MAX_PAYLOAD);
        assert_eq!(cnxn.payload.as_ref(), b"host::\0");

        let step = machine.on_message(&device_cnxn(0x0100_0001, 4096)).unwrap();
        let HandshakeStep::Established(info) = step else {
            panic!("expected established, got {step:?}");
        };
        assert_eq!(info.version, VERSION);
        assert_eq!(info.max_payload, 4096);
        assert_eq!(info.peer.system_type, SystemType::Device);
        assert!(info.peer.has_feature("shell_v2"));
        assert_eq!(machine.state(), HandshakeState::Established);
    }

    #[test]
    fn each_key_tried_once_then_public_key_offered() {
        let first = TestKey::new("first");
        let second = TestKey::with_public("second", b"QAAAAKEY user@host");
        let mut machine =
            ClientHandshake::new(&ConnectionConfig::default(), &signers(&[first.clone(), second.clone()]));
        machine.start().unwrap();

        let HandshakeStep::Reply(reply) = machine.on_message(&token()).unwrap() else {
            panic!("expected a signature");
        };
        assert_eq!(reply.arg0, AuthType::Signature.as_u32());
        assert!(reply.payload.starts_with(b"first"));
        assert_eq!(machine.state(), HandshakeState::Authenticating { next_key: 1 });

        let HandshakeStep::Reply(reply) = machine.on_message(&token()).unwrap() else {
            panic!("expected a signature");
        };
        assert!(reply.payload.starts_with(b"second"));

        let HandshakeStep::Reply(reply) = machine.on_message(&token()).unwrap() else {
            panic!("expected a public key");
        };
        assert_eq!(reply.arg0, AuthType::RsaPublicKey.as_u32());
        assert_eq!(reply.payload.as_ref(), b"QAAAAKEY user@host\0");
        assert_eq!(machine.state(), HandshakeState::AwaitingApproval);

        assert_eq!(first.signed.load(Ordering::SeqCst), 1);
        assert_eq!(second.signed.load(Ordering::SeqCst), 1);

        let step = machine.on_message(&device_cnxn(VERSION, MAX_PAYLOAD)).unwrap();
        assert!(matches!(step, HandshakeStep::Established(_)));
    }

    #[test]
    fn exhausted_keys_without_public_key_fail() {
        let mut machine =
            ClientHandshake::new(&ConnectionConfig::default(), &signers(&[TestKey::new("only")]));
        machine.start().unwrap();
        machine.on_message(&token()).unwrap();

        let err = machine.on_message(&token()).unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeFailed(_)));
        assert_eq!(machine.state(), HandshakeState::Failed);
    }

    #[test]
    fn public_key_not_offered_when_disabled() {
        let config = ConnectionConfig {
            offer_public_key: false,
            ..ConnectionConfig::default()
        };
        let mut machine =
            ClientHandshake::new(&config, &signers(&[TestKey::with_public("k", b"PUB")]));
        machine.start().unwrap();
        machine.on_message(&token()).unwrap();
        assert!(matches!(
            machine.on_message(&token()),
            Err(ProtocolError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn token_while_awaiting_approval_fails() {
        let mut machine = ClientHandshake::new(
            &ConnectionConfig::default(),
            &signers(&[TestKey::with_public("k", b"PUB")]),
        );
        machine.start().unwrap();
        machine.on_message(&token()).unwrap();
        machine.on_message(&token()).unwrap();
        assert_eq!(machine.state(), HandshakeState::AwaitingApproval);

        let err = machine.on_message(&token()).unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeFailed(_)));
    }

    #[test]
    fn broken_key_is_skipped() {
        let good = TestKey::new("good");
        let mut machine = ClientHandshake::new(
            &ConnectionConfig::default(),
            &signers(&[TestKey::broken("bad"), good.clone()]),
        );
        machine.start().unwrap();
        let HandshakeStep::Reply(reply) = machine.on_message(&token()).unwrap() else {
            panic!("expected a signature");
        };
        assert!(reply.payload.starts_with(b"good"));
        assert_eq!(machine.state(), HandshakeState::Authenticating { next_key: 2 });
    }

    #[test]
    fn stream_traffic_before_connect_is_unexpected() {
        let mut machine = ClientHandshake::new(&ConnectionConfig::default(), &[]);
        machine.start().unwrap();
        let err = machine.on_message(&Message::okay(1, 1)).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedMessage(_)));
        assert!(machine.state().is_terminal());

        let err = machine.on_message(&device_cnxn(VERSION, MAX_PAYLOAD)).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedMessage(_)));
    }

    #[test]
    fn unrecognized_device_type_still_connects() {
        let mut machine = ClientHandshake::new(&ConnectionConfig::default(), &[]);
        machine.start().unwrap();
        let cnxn = Message::new(Command::Cnxn, VERSION, 4096, Bytes::from_static(b"watch:w1:\0"));
        let HandshakeStep::Established(info) = machine.on_message(&cnxn).unwrap() else {
            panic!("expected established");
        };
        assert_eq!(info.peer.system_type, SystemType::Unknown);
        assert_eq!(info.peer.serial, "w1");
    }

    #[test]
    fn connect_fails_once_only_key_is_refused() {
        let (host, mut device) = FakeDevice::pair();
        let device_thread = thread::spawn(move || {
            device.expect(Command::Cnxn);
            device.send(token());
            let signature = device.expect(Command::Auth);
            assert_eq!(signature.arg0, AuthType::Signature.as_u32());
            device.send(token());
            device
        });

        let key = TestKey::new("adbkey");
        let config = ConnectionConfig {
            handshake_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
            ..ConnectionConfig::default()
        };
        let err = connect_with_config(host, config, &signers(&[key.clone()])).unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeFailed(_)), "got {err:?}");
        assert_eq!(key.signed.load(Ordering::SeqCst), 1);

        // The transport is closed on failure; no public key was offered.
        let mut device = device_thread.join().unwrap();
        device.expect_hangup();
    }

    fn host_halves(host: UnixTransport) -> (MessageReader<UnixTransport>, MessageWriter<UnixTransport>) {
        let codec = CodecConfig {
            max_payload_size: 16 * 1024,
            read_timeout: Some(Duration::from_millis(20)),
        };
        let reader =
            MessageReader::with_config(host.try_clone().unwrap(), codec.clone()).unwrap();
        (reader, MessageWriter::with_config(host, codec))
    }

    #[test]
    fn driver_signs_and_connects() {
        let (host, mut device) = FakeDevice::pair();
        let device_thread = thread::spawn(move || {
            device.expect(Command::Cnxn);
            device.send(token());
            let signature = device.expect(Command::Auth);
            assert_eq!(signature.arg0, AuthType::Signature.as_u32());
            device.send(device_cnxn(VERSION, 8192));
        });

        let (mut reader, mut writer) = host_halves(host);
        let key: Arc<dyn AuthSigner> = TestKey::new("adbkey");
        let info =
            handshake_client(&mut reader, &mut writer, &ConnectionConfig::default(), &[key])
                .unwrap();
        assert_eq!(info.max_payload, 8192);
        device_thread.join().unwrap();
    }

    #[test]
    fn driver_times_out_on_silent_peer() {
        let (host, mut device) = FakeDevice::pair();
        let config = ConnectionConfig {
            handshake_timeout: Duration::from_millis(150),
            ..ConnectionConfig::default()
        };

        let (mut reader, mut writer) = host_halves(host);
        let started = Instant::now();
        let err = handshake_client(&mut reader, &mut writer, &config, &[]).unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeTimeout(t) if t == Duration::from_millis(150)));
        assert!(started.elapsed() >= Duration::from_millis(150));

        device.expect(Command::Cnxn);
    }

    #[test]
    fn driver_reports_disconnect() {
        let (host, mut device) = FakeDevice::pair();
        let device_thread = thread::spawn(move || {
            device.expect(Command::Cnxn);
            device.shutdown();
        });

        let (mut reader, mut writer) = host_halves(host);
        let err = handshake_client(&mut reader, &mut writer, &ConnectionConfig::default(), &[])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Disconnected(_)));
        device_thread.join().unwrap();
    }
}
