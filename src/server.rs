use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use russh::keys::HashAlg;
use russh::server::{Auth, Handler, Msg, Response, Session};
use russh::{Channel, ChannelId, Sig};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;

use crate::channel::{
    spawn_interpreter, ChannelKind, DirectTcpipChannel, SessionChannel, SessionStage,
};
use crate::event::{
    AddressValue, CancelTcpipForwardEvent, DebugChannelEvent, DebugChannelRequestEvent,
    DirectTcpipCloseEvent, DirectTcpipEvent, DirectTcpipInputEvent, EnvEvent, Event, ExecEvent,
    KeyboardInteractiveAuthEvent, NoAuthEvent, PasswordAuthEvent, PtyEvent, PublicKeyAuthEvent,
    SessionCloseEvent, SessionEvent, SessionInputEvent, ShellEvent, SubsystemEvent,
    TcpipForwardEvent, WindowChangeEvent, X11Event,
};
use crate::logging::ConnContext;
use crate::shell::{SessionContext, TerminalInfo};

/// Per-connection protocol handler: logs authentication attempts with the
/// configured policy decision, multiplexes channels, and never executes or
/// forwards anything real.
pub struct ConnectionHandler {
    ctx: ConnContext,
    user: String,
    channels: HashMap<ChannelId, ChannelKind>,
    next_channel_id: u32,
}

impl ConnectionHandler {
    pub fn new(ctx: ConnContext) -> Self {
        ConnectionHandler {
            ctx,
            user: String::new(),
            channels: HashMap::new(),
            next_channel_id: 0,
        }
    }

    fn assign_channel_id(&mut self) -> u32 {
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        id
    }

    fn address(&self, host: &str, port: u32) -> AddressValue {
        AddressValue::new(host, port, self.ctx.cfg.logging.split_host_port)
    }

    fn auth_result(&self, accepted: bool) -> Auth {
        if accepted {
            Auth::Accept
        } else {
            Auth::reject()
        }
    }

    /// Tear down bookkeeping for a channel the peer is done with. Close
    /// events for running session channels are owned by the interpreter task,
    /// which notices its stdin going away.
    async fn release_channel(&mut self, channel: ChannelId) {
        match self.channels.remove(&channel) {
            Some(ChannelKind::Session(state)) => {
                if state.stage == SessionStage::Requests {
                    self.ctx
                        .log_event(&Event::SessionClose(SessionCloseEvent {
                            channel_id: state.local_id,
                        }))
                        .await;
                }
            }
            Some(ChannelKind::DirectTcpip(state)) => {
                self.ctx
                    .log_event(&Event::DirectTcpipClose(DirectTcpipCloseEvent {
                        channel_id: state.local_id,
                    }))
                    .await;
            }
            None => {}
        }
    }
}

impl Handler for ConnectionHandler {
    type Error = russh::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        let accepted = self.ctx.cfg.auth.no_auth.accepted;
        self.user = user.to_string();
        self.ctx
            .log_event(&Event::NoAuth(NoAuthEvent {
                user: user.to_string(),
                accepted,
            }))
            .await;
        Ok(self.auth_result(accepted))
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let policy = &self.ctx.cfg.auth.password_auth;
        let accepted = policy.enabled && policy.accepted;
        self.user = user.to_string();
        self.ctx
            .log_event(&Event::PasswordAuth(PasswordAuthEvent {
                user: user.to_string(),
                password: password.to_string(),
                accepted,
            }))
            .await;
        Ok(self.auth_result(accepted))
    }

    async fn auth_publickey_offered(
        &mut self,
        _user: &str,
        _public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        // Let the client sign so the verified attempt is the one recorded.
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        let policy = &self.ctx.cfg.auth.public_key_auth;
        let accepted = policy.enabled && policy.accepted;
        self.user = user.to_string();
        let fingerprint = public_key.key_data().fingerprint(HashAlg::Sha256);
        self.ctx
            .log_event(&Event::PublicKeyAuth(PublicKeyAuthEvent {
                user: user.to_string(),
                public_key: fingerprint.to_string(),
                accepted,
            }))
            .await;
        Ok(self.auth_result(accepted))
    }

    async fn auth_keyboard_interactive<'a>(
        &'a mut self,
        user: &str,
        _submethods: &str,
        response: Option<Response<'a>>,
    ) -> Result<Auth, Self::Error> {
        let policy = self.ctx.cfg.auth.keyboard_interactive_auth.clone();
        self.user = user.to_string();
        if policy.enabled && response.is_none() {
            return Ok(Auth::Partial {
                name: "".into(),
                instructions: "".into(),
                prompts: std::borrow::Cow::Owned(vec![("Password: ".into(), false)]),
            });
        }
        // Attempts against a disabled method are still attempts; log them
        // with the rejection instead of dropping them on the floor.
        let answers: Vec<String> = response
            .map(|response| {
                response
                    .map(|answer| String::from_utf8_lossy(&answer).into_owned())
                    .collect()
            })
            .unwrap_or_default();
        let accepted = policy.enabled && policy.accepted;
        self.ctx
            .log_event(&Event::KeyboardInteractiveAuth(
                KeyboardInteractiveAuthEvent {
                    user: user.to_string(),
                    answers,
                    accepted,
                },
            ))
            .await;
        Ok(self.auth_result(accepted))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let local_id = self.assign_channel_id();
        self.ctx
            .log_event(&Event::Session(SessionEvent {
                channel_id: local_id,
            }))
            .await;
        self.channels.insert(
            channel.id(),
            ChannelKind::Session(SessionChannel::new(local_id)),
        );
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let local_id = self.assign_channel_id();
        self.ctx
            .log_event(&Event::DirectTcpip(DirectTcpipEvent {
                channel_id: local_id,
                from: self.address(originator_address, originator_port),
                to: self.address(host_to_connect, port_to_connect),
            }))
            .await;
        self.channels.insert(
            channel.id(),
            ChannelKind::DirectTcpip(DirectTcpipChannel { local_id }),
        );
        Ok(true)
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let local_id = self.assign_channel_id();
        self.ctx
            .log_event(&Event::DebugChannel(DebugChannelEvent {
                channel_id: local_id,
                channel_type: "forwarded-tcpip".to_string(),
                extra_data: format!("{}:{}", host_to_connect, port_to_connect),
            }))
            .await;
        Ok(false)
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let local_id = self.assign_channel_id();
        self.ctx
            .log_event(&Event::DebugChannel(DebugChannelEvent {
                channel_id: local_id,
                channel_type: "x11".to_string(),
                extra_data: format!("{}:{}", originator_address, originator_port),
            }))
            .await;
        Ok(false)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(ChannelKind::Session(state)) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        if state.stage != SessionStage::Requests {
            session.channel_failure(channel)?;
            return Ok(());
        }
        state.terminal = Some(TerminalInfo {
            term: term.to_string(),
            width: col_width,
            height: row_height,
        });
        let local_id = state.local_id;
        self.ctx
            .log_event(&Event::Pty(PtyEvent {
                channel_id: local_id,
                terminal: term.to_string(),
                width: col_width,
                height: row_height,
            }))
            .await;
        session.channel_success(channel)?;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(ChannelKind::Session(state)) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        if state.stage != SessionStage::Requests {
            session.channel_failure(channel)?;
            return Ok(());
        }
        state
            .env
            .insert(variable_name.to_string(), variable_value.to_string());
        let local_id = state.local_id;
        self.ctx
            .log_event(&Event::Env(EnvEvent {
                channel_id: local_id,
                name: variable_name.to_string(),
                value: variable_value.to_string(),
            }))
            .await;
        session.channel_success(channel)?;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Valid both before and after the shell starts.
        let Some(ChannelKind::Session(state)) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        if let Some(terminal) = &mut state.terminal {
            terminal.width = col_width;
            terminal.height = row_height;
        }
        let local_id = state.local_id;
        self.ctx
            .log_event(&Event::WindowChange(WindowChangeEvent {
                channel_id: local_id,
                width: col_width,
                height: row_height,
            }))
            .await;
        session.channel_success(channel)?;
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(ChannelKind::Session(state)) = self.channels.get(&channel) else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        let local_id = state.local_id;
        if state.stage != SessionStage::Requests {
            // Setup requests after the shell started are treated as unknown.
            self.ctx
                .log_event(&Event::DebugChannelRequest(DebugChannelRequestEvent {
                    channel_id: local_id,
                    request_type: "x11-req".to_string(),
                    want_reply: true,
                    payload: String::new(),
                }))
                .await;
            session.channel_failure(channel)?;
            return Ok(());
        }
        // Logged, acknowledged, never forwarded.
        self.ctx
            .log_event(&Event::X11(X11Event {
                channel_id: local_id,
                screen: x11_screen_number,
            }))
            .await;
        session.channel_success(channel)?;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(ChannelKind::Session(state)) = self.channels.get(&channel) {
            let local_id = state.local_id;
            if state.stage != SessionStage::Requests {
                // Setup requests after the shell started are treated as unknown.
                self.ctx
                    .log_event(&Event::DebugChannelRequest(DebugChannelRequestEvent {
                        channel_id: local_id,
                        request_type: "subsystem".to_string(),
                        want_reply: true,
                        payload: name.to_string(),
                    }))
                    .await;
                session.channel_failure(channel)?;
                return Ok(());
            }
            self.ctx
                .log_event(&Event::Subsystem(SubsystemEvent {
                    channel_id: local_id,
                    subsystem: name.to_string(),
                }))
                .await;
        }
        // No subsystem is supported.
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let user = self.user.clone();
        let cfg = self.ctx.cfg.clone();
        let ctx = self.ctx.clone();
        let handle = session.handle();
        let Some(ChannelKind::Session(state)) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        if state.stage != SessionStage::Requests {
            session.channel_failure(channel)?;
            return Ok(());
        }
        let Some(input) = state.take_input() else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        state.stage = SessionStage::Running;
        let local_id = state.local_id;
        let mut shell_session = SessionContext::new(&user, cfg);
        shell_session.env = std::mem::take(&mut state.env);
        shell_session.pty = state.terminal.clone();
        self.ctx
            .log_event(&Event::Shell(ShellEvent {
                channel_id: local_id,
            }))
            .await;
        let program = crate::shell::commands::SHELL_PROGRAM
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        spawn_interpreter(ctx, handle, channel, local_id, shell_session, input, program);
        session.channel_success(channel)?;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let user = self.user.clone();
        let cfg = self.ctx.cfg.clone();
        let ctx = self.ctx.clone();
        let handle = session.handle();
        let Some(ChannelKind::Session(state)) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        if state.stage != SessionStage::Requests {
            session.channel_failure(channel)?;
            return Ok(());
        }
        let Some(input) = state.take_input() else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        state.stage = SessionStage::Running;
        let local_id = state.local_id;
        let command = String::from_utf8_lossy(data).into_owned();
        let mut shell_session = SessionContext::new(&user, cfg);
        shell_session.env = std::mem::take(&mut state.env);
        shell_session.pty = state.terminal.clone();
        self.ctx
            .log_event(&Event::Exec(ExecEvent {
                channel_id: local_id,
                command: command.clone(),
            }))
            .await;
        let args: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        spawn_interpreter(ctx, handle, channel, local_id, shell_session, input, args);
        session.channel_success(channel)?;
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        enum Incoming {
            Lines(u32, Vec<String>),
            Chunk(u32),
        }
        let incoming = match self.channels.get_mut(&channel) {
            Some(ChannelKind::Session(state)) => {
                Incoming::Lines(state.local_id, state.push_data(data))
            }
            Some(ChannelKind::DirectTcpip(state)) => Incoming::Chunk(state.local_id),
            None => return Ok(()),
        };
        match incoming {
            Incoming::Lines(local_id, lines) => {
                for line in lines {
                    self.ctx
                        .log_event(&Event::SessionInput(SessionInputEvent {
                            channel_id: local_id,
                            input: line.clone(),
                        }))
                        .await;
                    if let Some(ChannelKind::Session(state)) = self.channels.get_mut(&channel) {
                        state.feed_line(line);
                    }
                }
            }
            Incoming::Chunk(local_id) => {
                self.ctx
                    .log_event(&Event::DirectTcpipInput(DirectTcpipInputEvent {
                        channel_id: local_id,
                        input: String::from_utf8_lossy(data).into_owned(),
                    }))
                    .await;
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.release_channel(channel).await;
        let _ = session.close(channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.release_channel(channel).await;
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        // Accepted and logged; nothing is ever bound or forwarded.
        self.ctx
            .log_event(&Event::TcpipForward(TcpipForwardEvent {
                address: self.address(address, *port),
            }))
            .await;
        Ok(true)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.ctx
            .log_event(&Event::CancelTcpipForward(CancelTcpipForwardEvent {
                address: self.address(address, port),
            }))
            .await;
        Ok(true)
    }

    async fn agent_request(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if let Some(ChannelKind::Session(state)) = self.channels.get(&channel) {
            self.ctx
                .log_event(&Event::DebugChannelRequest(DebugChannelRequestEvent {
                    channel_id: state.local_id,
                    request_type: "auth-agent-req@openssh.com".to_string(),
                    want_reply: true,
                    payload: String::new(),
                }))
                .await;
        }
        Ok(false)
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(ChannelKind::Session(state)) = self.channels.get(&channel) {
            self.ctx
                .log_event(&Event::DebugChannelRequest(DebugChannelRequestEvent {
                    channel_id: state.local_id,
                    request_type: "signal".to_string(),
                    want_reply: false,
                    payload: format!("{:?}", signal),
                }))
                .await;
        }
        Ok(())
    }
}

/// Passthrough stream wrapper that records the peer's `SSH-2.0-…`
/// identification line as it flows into the transport.
pub struct VersionCapture<S> {
    inner: S,
    captured: Vec<u8>,
    version_tx: Option<oneshot::Sender<String>>,
}

/// Identification lines are at most 255 bytes including CRLF (RFC 4253 §4.2).
const MAX_VERSION_LEN: usize = 255;

impl<S> VersionCapture<S> {
    pub fn new(inner: S, version_tx: oneshot::Sender<String>) -> Self {
        VersionCapture {
            inner,
            captured: Vec::new(),
            version_tx: Some(version_tx),
        }
    }

    fn observe(&mut self, bytes: &[u8]) {
        if self.version_tx.is_none() {
            return;
        }
        for &byte in bytes {
            if byte == b'\n' || self.captured.len() >= MAX_VERSION_LEN {
                let mut line = std::mem::take(&mut self.captured);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if let Some(tx) = self.version_tx.take() {
                    let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
                }
                return;
            }
            self.captured.push(byte);
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for VersionCapture<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let new_bytes = buf.filled()[before..].to_vec();
                this.observe(&new_bytes);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for VersionCapture<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
