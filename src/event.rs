use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable event-type names, in id order (ids 1..=26, 0 is "unknown").
pub const EVENT_TYPES: [&str; 26] = [
    "no_auth",
    "password_auth",
    "public_key_auth",
    "keyboard_interactive_auth",
    "connection",
    "connection_close",
    "tcpip_forward",
    "cancel_tcpip_forward",
    "no_more_sessions",
    "host_keys_prove",
    "session",
    "session_close",
    "session_input",
    "direct_tcpip",
    "direct_tcpip_close",
    "direct_tcpip_input",
    "pty",
    "shell",
    "exec",
    "subsystem",
    "x11",
    "env",
    "window_change",
    "debug_global_request",
    "debug_channel",
    "debug_channel_request",
];

/// Map an event-type name to its integer id. Unknown names map to 0.
pub fn event_type_id(name: &str) -> i32 {
    EVENT_TYPES
        .iter()
        .position(|&candidate| candidate == name)
        .map(|index| index as i32 + 1)
        .unwrap_or(0)
}

/// A network address as it appears in event payloads: either the split
/// `{host, port}` object or the joined `host:port` string, selected by the
/// `logging.split_host_port` option at event construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressValue {
    Split { host: String, port: u32 },
    Joined(String),
}

impl AddressValue {
    pub fn new(host: &str, port: u32, split_host_port: bool) -> Self {
        if split_host_port {
            AddressValue::Split {
                host: host.to_string(),
                port,
            }
        } else {
            AddressValue::Joined(join_host_port(host, port))
        }
    }
}

fn join_host_port(host: &str, port: u32) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

impl fmt::Display for AddressValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressValue::Split { host, port } => write!(f, "{}", join_host_port(host, *port)),
            AddressValue::Joined(address) => write!(f, "{}", address),
        }
    }
}

fn decision(accepted: bool) -> &'static str {
    if accepted {
        "accepted"
    } else {
        "rejected"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoAuthEvent {
    pub user: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordAuthEvent {
    pub user: String,
    pub password: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyAuthEvent {
    pub user: String,
    pub public_key: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardInteractiveAuthEvent {
    pub user: String,
    pub answers: Vec<String>,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub client_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCloseEvent {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpipForwardEvent {
    pub address: AddressValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTcpipForwardEvent {
    pub address: AddressValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoMoreSessionsEvent {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostKeysProveEvent {
    pub host_key_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub channel_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCloseEvent {
    pub channel_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInputEvent {
    pub channel_id: u32,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectTcpipEvent {
    pub channel_id: u32,
    pub from: AddressValue,
    pub to: AddressValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectTcpipCloseEvent {
    pub channel_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectTcpipInputEvent {
    pub channel_id: u32,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyEvent {
    pub channel_id: u32,
    pub terminal: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellEvent {
    pub channel_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecEvent {
    pub channel_id: u32,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemEvent {
    pub channel_id: u32,
    pub subsystem: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct X11Event {
    pub channel_id: u32,
    pub screen: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEvent {
    pub channel_id: u32,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowChangeEvent {
    pub channel_id: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugGlobalRequestEvent {
    pub request_type: String,
    pub want_reply: bool,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugChannelEvent {
    pub channel_id: u32,
    pub channel_type: String,
    pub extra_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugChannelRequestEvent {
    pub channel_id: u32,
    pub request_type: String,
    pub want_reply: bool,
    pub payload: String,
}

/// Everything the honeypot can observe, as a closed tagged union. Records are
/// values: constructed once, logged, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NoAuth(NoAuthEvent),
    PasswordAuth(PasswordAuthEvent),
    PublicKeyAuth(PublicKeyAuthEvent),
    KeyboardInteractiveAuth(KeyboardInteractiveAuthEvent),
    Connection(ConnectionEvent),
    ConnectionClose(ConnectionCloseEvent),
    TcpipForward(TcpipForwardEvent),
    CancelTcpipForward(CancelTcpipForwardEvent),
    NoMoreSessions(NoMoreSessionsEvent),
    HostKeysProve(HostKeysProveEvent),
    Session(SessionEvent),
    SessionClose(SessionCloseEvent),
    SessionInput(SessionInputEvent),
    DirectTcpip(DirectTcpipEvent),
    DirectTcpipClose(DirectTcpipCloseEvent),
    DirectTcpipInput(DirectTcpipInputEvent),
    Pty(PtyEvent),
    Shell(ShellEvent),
    Exec(ExecEvent),
    Subsystem(SubsystemEvent),
    X11(X11Event),
    Env(EnvEvent),
    WindowChange(WindowChangeEvent),
    DebugGlobalRequest(DebugGlobalRequestEvent),
    DebugChannel(DebugChannelEvent),
    DebugChannelRequest(DebugChannelRequestEvent),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::NoAuth(_) => "no_auth",
            Event::PasswordAuth(_) => "password_auth",
            Event::PublicKeyAuth(_) => "public_key_auth",
            Event::KeyboardInteractiveAuth(_) => "keyboard_interactive_auth",
            Event::Connection(_) => "connection",
            Event::ConnectionClose(_) => "connection_close",
            Event::TcpipForward(_) => "tcpip_forward",
            Event::CancelTcpipForward(_) => "cancel_tcpip_forward",
            Event::NoMoreSessions(_) => "no_more_sessions",
            Event::HostKeysProve(_) => "host_keys_prove",
            Event::Session(_) => "session",
            Event::SessionClose(_) => "session_close",
            Event::SessionInput(_) => "session_input",
            Event::DirectTcpip(_) => "direct_tcpip",
            Event::DirectTcpipClose(_) => "direct_tcpip_close",
            Event::DirectTcpipInput(_) => "direct_tcpip_input",
            Event::Pty(_) => "pty",
            Event::Shell(_) => "shell",
            Event::Exec(_) => "exec",
            Event::Subsystem(_) => "subsystem",
            Event::X11(_) => "x11",
            Event::Env(_) => "env",
            Event::WindowChange(_) => "window_change",
            Event::DebugGlobalRequest(_) => "debug_global_request",
            Event::DebugChannel(_) => "debug_channel",
            Event::DebugChannelRequest(_) => "debug_channel_request",
        }
    }

    pub fn type_id(&self) -> i32 {
        event_type_id(self.event_type())
    }

    pub fn is_debug(&self) -> bool {
        self.event_type().starts_with("debug_")
    }

    /// The event-specific payload as a JSON value, as it appears under the
    /// `event` key of a structured-line record.
    pub fn payload(&self) -> Value {
        fn to_value<T: Serialize>(payload: &T) -> Value {
            serde_json::to_value(payload).unwrap_or(Value::Null)
        }
        match self {
            Event::NoAuth(e) => to_value(e),
            Event::PasswordAuth(e) => to_value(e),
            Event::PublicKeyAuth(e) => to_value(e),
            Event::KeyboardInteractiveAuth(e) => to_value(e),
            Event::Connection(e) => to_value(e),
            Event::ConnectionClose(e) => to_value(e),
            Event::TcpipForward(e) => to_value(e),
            Event::CancelTcpipForward(e) => to_value(e),
            Event::NoMoreSessions(e) => to_value(e),
            Event::HostKeysProve(e) => to_value(e),
            Event::Session(e) => to_value(e),
            Event::SessionClose(e) => to_value(e),
            Event::SessionInput(e) => to_value(e),
            Event::DirectTcpip(e) => to_value(e),
            Event::DirectTcpipClose(e) => to_value(e),
            Event::DirectTcpipInput(e) => to_value(e),
            Event::Pty(e) => to_value(e),
            Event::Shell(e) => to_value(e),
            Event::Exec(e) => to_value(e),
            Event::Subsystem(e) => to_value(e),
            Event::X11(e) => to_value(e),
            Event::Env(e) => to_value(e),
            Event::WindowChange(e) => to_value(e),
            Event::DebugGlobalRequest(e) => to_value(e),
            Event::DebugChannel(e) => to_value(e),
            Event::DebugChannelRequest(e) => to_value(e),
        }
    }

    /// Rebuild an event from its type name and payload, the inverse of
    /// `event_type` + `payload`. Used by the offline log replay.
    pub fn from_parts(event_type: &str, payload: Value) -> Option<Event> {
        fn from_value<T: serde::de::DeserializeOwned>(payload: Value) -> Option<T> {
            serde_json::from_value(payload).ok()
        }
        match event_type {
            "no_auth" => from_value(payload).map(Event::NoAuth),
            "password_auth" => from_value(payload).map(Event::PasswordAuth),
            "public_key_auth" => from_value(payload).map(Event::PublicKeyAuth),
            "keyboard_interactive_auth" => from_value(payload).map(Event::KeyboardInteractiveAuth),
            "connection" => from_value(payload).map(Event::Connection),
            "connection_close" => from_value(payload).map(Event::ConnectionClose),
            "tcpip_forward" => from_value(payload).map(Event::TcpipForward),
            "cancel_tcpip_forward" => from_value(payload).map(Event::CancelTcpipForward),
            "no_more_sessions" => from_value(payload).map(Event::NoMoreSessions),
            "host_keys_prove" => from_value(payload).map(Event::HostKeysProve),
            "session" => from_value(payload).map(Event::Session),
            "session_close" => from_value(payload).map(Event::SessionClose),
            "session_input" => from_value(payload).map(Event::SessionInput),
            "direct_tcpip" => from_value(payload).map(Event::DirectTcpip),
            "direct_tcpip_close" => from_value(payload).map(Event::DirectTcpipClose),
            "direct_tcpip_input" => from_value(payload).map(Event::DirectTcpipInput),
            "pty" => from_value(payload).map(Event::Pty),
            "shell" => from_value(payload).map(Event::Shell),
            "exec" => from_value(payload).map(Event::Exec),
            "subsystem" => from_value(payload).map(Event::Subsystem),
            "x11" => from_value(payload).map(Event::X11),
            "env" => from_value(payload).map(Event::Env),
            "window_change" => from_value(payload).map(Event::WindowChange),
            "debug_global_request" => from_value(payload).map(Event::DebugGlobalRequest),
            "debug_channel" => from_value(payload).map(Event::DebugChannel),
            "debug_channel_request" => from_value(payload).map(Event::DebugChannelRequest),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::NoAuth(e) => write!(
                f,
                "authentication for user {:?} without credentials {}",
                e.user,
                decision(e.accepted)
            ),
            Event::PasswordAuth(e) => write!(
                f,
                "authentication for user {:?} with password {:?} {}",
                e.user,
                e.password,
                decision(e.accepted)
            ),
            Event::PublicKeyAuth(e) => write!(
                f,
                "authentication for user {:?} with public key {:?} {}",
                e.user,
                e.public_key,
                decision(e.accepted)
            ),
            Event::KeyboardInteractiveAuth(e) => write!(
                f,
                "authentication for user {:?} with keyboard interactive answers {:?} {}",
                e.user,
                e.answers,
                decision(e.accepted)
            ),
            Event::Connection(e) => write!(
                f,
                "connection with client version {:?} established",
                e.client_version
            ),
            Event::ConnectionClose(_) => write!(f, "connection closed"),
            Event::TcpipForward(e) => {
                write!(f, "TCP/IP forwarding on {} requested", e.address)
            }
            Event::CancelTcpipForward(e) => {
                write!(f, "TCP/IP forwarding on {} canceled", e.address)
            }
            Event::NoMoreSessions(_) => {
                write!(f, "rejection of further session channels requested")
            }
            Event::HostKeysProve(e) => {
                let base_names: Vec<String> = e
                    .host_key_files
                    .iter()
                    .map(|file| {
                        let base = std::path::Path::new(file)
                            .file_name()
                            .map(|name| name.to_string_lossy().into_owned())
                            .unwrap_or_else(|| file.clone());
                        format!("{:?}", base)
                    })
                    .collect();
                write!(
                    f,
                    "proof of ownership of host keys {} requested",
                    base_names.join(", ")
                )
            }
            Event::Session(e) => write!(f, "[channel {}] session requested", e.channel_id),
            Event::SessionClose(e) => write!(f, "[channel {}] closed", e.channel_id),
            Event::SessionInput(e) => {
                write!(f, "[channel {}] input: {:?}", e.channel_id, e.input)
            }
            Event::DirectTcpip(e) => write!(
                f,
                "[channel {}] direct TCP/IP forwarding from {} to {} requested",
                e.channel_id, e.from, e.to
            ),
            Event::DirectTcpipClose(e) => write!(f, "[channel {}] closed", e.channel_id),
            Event::DirectTcpipInput(e) => {
                write!(f, "[channel {}] input: {:?}", e.channel_id, e.input)
            }
            Event::Pty(e) => write!(
                f,
                "[channel {}] PTY using terminal {:?} (size {}x{}) requested",
                e.channel_id, e.terminal, e.width, e.height
            ),
            Event::Shell(e) => write!(f, "[channel {}] shell requested", e.channel_id),
            Event::Exec(e) => write!(
                f,
                "[channel {}] command {:?} requested",
                e.channel_id, e.command
            ),
            Event::Subsystem(e) => write!(
                f,
                "[channel {}] subsystem {:?} requested",
                e.channel_id, e.subsystem
            ),
            Event::X11(e) => write!(
                f,
                "[channel {}] X11 forwarding on screen {} requested",
                e.channel_id, e.screen
            ),
            Event::Env(e) => write!(
                f,
                "[channel {}] environment variable {:?} with value {:?} requested",
                e.channel_id, e.name, e.value
            ),
            Event::WindowChange(e) => write!(
                f,
                "[channel {}] window size change to {}x{} requested",
                e.channel_id, e.width, e.height
            ),
            Event::DebugGlobalRequest(e) => write!(
                f,
                "DEBUG global request received: {}",
                serde_json::to_string(e).unwrap_or_default()
            ),
            Event::DebugChannel(e) => write!(
                f,
                "DEBUG new channel requested: {}",
                serde_json::to_string(e).unwrap_or_default()
            ),
            Event::DebugChannelRequest(e) => write!(
                f,
                "DEBUG channel request received: {}",
                serde_json::to_string(e).unwrap_or_default()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_events() -> Vec<Event> {
        vec![
            Event::NoAuth(NoAuthEvent {
                user: "alice".into(),
                accepted: false,
            }),
            Event::PasswordAuth(PasswordAuthEvent {
                user: "alice".into(),
                password: "hunter2".into(),
                accepted: true,
            }),
            Event::PublicKeyAuth(PublicKeyAuthEvent {
                user: "bob".into(),
                public_key: "SHA256:aBcD".into(),
                accepted: false,
            }),
            Event::KeyboardInteractiveAuth(KeyboardInteractiveAuthEvent {
                user: "carol".into(),
                answers: vec!["yes".into(), "no".into()],
                accepted: true,
            }),
            Event::Connection(ConnectionEvent {
                client_version: "SSH-2.0-TestClient".into(),
            }),
            Event::ConnectionClose(ConnectionCloseEvent {}),
            Event::TcpipForward(TcpipForwardEvent {
                address: AddressValue::new("0.0.0.0", 2222, true),
            }),
            Event::CancelTcpipForward(CancelTcpipForwardEvent {
                address: AddressValue::new("0.0.0.0", 2222, false),
            }),
            Event::NoMoreSessions(NoMoreSessionsEvent {}),
            Event::HostKeysProve(HostKeysProveEvent {
                host_key_files: vec!["/var/lib/sshesame/host_key_ed25519".into()],
            }),
            Event::Session(SessionEvent { channel_id: 0 }),
            Event::SessionClose(SessionCloseEvent { channel_id: 0 }),
            Event::SessionInput(SessionInputEvent {
                channel_id: 0,
                input: "whoami".into(),
            }),
            Event::DirectTcpip(DirectTcpipEvent {
                channel_id: 1,
                from: AddressValue::new("10.0.0.1", 40000, true),
                to: AddressValue::new("example.com", 80, true),
            }),
            Event::DirectTcpipClose(DirectTcpipCloseEvent { channel_id: 1 }),
            Event::DirectTcpipInput(DirectTcpipInputEvent {
                channel_id: 1,
                input: "GET / HTTP/1.0\r\n\r\n".into(),
            }),
            Event::Pty(PtyEvent {
                channel_id: 0,
                terminal: "xterm".into(),
                width: 80,
                height: 24,
            }),
            Event::Shell(ShellEvent { channel_id: 0 }),
            Event::Exec(ExecEvent {
                channel_id: 0,
                command: "echo hello world".into(),
            }),
            Event::Subsystem(SubsystemEvent {
                channel_id: 0,
                subsystem: "sftp".into(),
            }),
            Event::X11(X11Event {
                channel_id: 0,
                screen: 0,
            }),
            Event::Env(EnvEvent {
                channel_id: 0,
                name: "LANG".into(),
                value: "C.UTF-8".into(),
            }),
            Event::WindowChange(WindowChangeEvent {
                channel_id: 0,
                width: 120,
                height: 40,
            }),
            Event::DebugGlobalRequest(DebugGlobalRequestEvent {
                request_type: "no-more-sessions@openssh.com".into(),
                want_reply: false,
                payload: String::new(),
            }),
            Event::DebugChannel(DebugChannelEvent {
                channel_id: 2,
                channel_type: "x11".into(),
                extra_data: String::new(),
            }),
            Event::DebugChannelRequest(DebugChannelRequestEvent {
                channel_id: 0,
                request_type: "auth-agent-req@openssh.com".into(),
                want_reply: true,
                payload: String::new(),
            }),
        ]
    }

    #[test]
    fn event_type_ids_are_a_bijection() {
        for (index, name) in EVENT_TYPES.iter().enumerate() {
            assert_eq!(event_type_id(name), index as i32 + 1);
        }
        assert_eq!(event_type_id("bogus"), 0);

        let events = sample_events();
        assert_eq!(events.len(), EVENT_TYPES.len());
        let mut seen = std::collections::HashSet::new();
        for event in &events {
            assert!(seen.insert(event.type_id()), "duplicate id for {}", event.event_type());
            assert!(event.type_id() >= 1 && event.type_id() <= 26);
            assert_eq!(EVENT_TYPES[event.type_id() as usize - 1], event.event_type());
        }
    }

    #[test]
    fn payload_round_trips_through_json() {
        for event in sample_events() {
            let payload = event.payload();
            let rebuilt = Event::from_parts(event.event_type(), payload)
                .unwrap_or_else(|| panic!("failed to rebuild {}", event.event_type()));
            assert_eq!(rebuilt, event);
        }
    }

    #[test]
    fn address_value_serializes_split_or_joined() {
        let split = AddressValue::new("0.0.0.0", 2222, true);
        assert_eq!(
            serde_json::to_value(&split).unwrap(),
            json!({"host": "0.0.0.0", "port": 2222})
        );
        let joined = AddressValue::new("0.0.0.0", 2222, false);
        assert_eq!(serde_json::to_value(&joined).unwrap(), json!("0.0.0.0:2222"));
        assert_eq!(split.to_string(), "0.0.0.0:2222");
        assert_eq!(AddressValue::new("::1", 22, false).to_string(), "[::1]:22");
    }

    #[test]
    fn canonical_text_forms() {
        assert_eq!(
            Event::PasswordAuth(PasswordAuthEvent {
                user: "alice".into(),
                password: "hunter2".into(),
                accepted: true,
            })
            .to_string(),
            "authentication for user \"alice\" with password \"hunter2\" accepted"
        );
        assert_eq!(
            Event::Session(SessionEvent { channel_id: 3 }).to_string(),
            "[channel 3] session requested"
        );
        assert_eq!(
            Event::SessionInput(SessionInputEvent {
                channel_id: 0,
                input: "whoami".into(),
            })
            .to_string(),
            "[channel 0] input: \"whoami\""
        );
        assert_eq!(
            Event::Pty(PtyEvent {
                channel_id: 0,
                terminal: "xterm".into(),
                width: 80,
                height: 24,
            })
            .to_string(),
            "[channel 0] PTY using terminal \"xterm\" (size 80x24) requested"
        );
        assert_eq!(
            Event::ConnectionClose(ConnectionCloseEvent {}).to_string(),
            "connection closed"
        );
    }
}
