use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, Credential};
use mongodb::{Client, Collection};
use tokio::sync::{mpsc, RwLock};

use crate::config::MongoConfig;
use crate::event::Event;

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

struct StoreHandles {
    client: Client,
    ssh: Collection<Document>,
    auth: Collection<Document>,
    shell: Collection<Document>,
}

/// Client for the document store. Owns a background watchdog that pings the
/// server every 10 seconds and reconnects when the connection drops. While
/// disconnected, events are simply not recorded here.
pub struct MongoRecorder {
    cfg: MongoConfig,
    state: RwLock<Option<StoreHandles>>,
    connected: AtomicBool,
    stop: Mutex<Option<mpsc::Sender<()>>>,
}

impl MongoRecorder {
    /// Connect (best effort) and start the watchdog.
    pub async fn start(cfg: MongoConfig) -> Arc<MongoRecorder> {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let recorder = Arc::new(MongoRecorder {
            cfg,
            state: RwLock::new(None),
            connected: AtomicBool::new(false),
            stop: Mutex::new(Some(stop_tx)),
        });
        if let Err(err) = recorder.connect().await {
            log::warn!("Failed to connect to the document store: {}", err);
        }
        recorder.spawn_watchdog(stop_rx);
        recorder
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop the watchdog. Pending inserts finish on their own.
    pub fn shutdown(&self) {
        self.stop.lock().expect("stop lock poisoned").take();
    }

    async fn connect(&self) -> mongodb::error::Result<()> {
        let uri = format!("mongodb://{}:{}", self.cfg.host, self.cfg.port);
        let mut options = ClientOptions::parse(&uri).await?;
        if !self.cfg.user.is_empty() {
            options.credential = Some(
                Credential::builder()
                    .username(self.cfg.user.clone())
                    .password(self.cfg.password.clone())
                    .source(self.cfg.auth.clone())
                    .build(),
            );
        }
        let client = Client::with_options(options)?;
        let db = client.database(&self.cfg.db);
        db.run_command(doc! { "ping": 1 }).await?;
        let handles = StoreHandles {
            ssh: db.collection(&self.cfg.ssh_collect),
            auth: db.collection(&self.cfg.auth_collect),
            shell: db.collection(&self.cfg.shell_collect),
            client,
        };
        *self.state.write().await = Some(handles);
        self.connected.store(true, Ordering::SeqCst);
        log::info!("Connected to the document store at {}", uri);
        Ok(())
    }

    async fn ping(&self) -> bool {
        let guard = self.state.read().await;
        match guard.as_ref() {
            Some(handles) => handles
                .client
                .database(&self.cfg.db)
                .run_command(doc! { "ping": 1 })
                .await
                .is_ok(),
            None => false,
        }
    }

    fn spawn_watchdog(self: &Arc<Self>, mut stop_rx: mpsc::Receiver<()>) {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + WATCHDOG_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, WATCHDOG_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if recorder.ping().await {
                            continue;
                        }
                        recorder.connected.store(false, Ordering::SeqCst);
                        log::warn!("Document store connection lost, attempting to reconnect");
                        loop {
                            tokio::select! {
                                _ = stop_rx.recv() => return,
                                result = recorder.connect() => match result {
                                    Ok(()) => break,
                                    Err(err) => log::warn!("Reconnect failed: {}", err),
                                },
                            }
                        }
                    }
                    _ = stop_rx.recv() => return,
                }
            }
        });
    }

    /// Insert one event. `base` carries the common fields
    /// (time, session_id, event_type, source_ip, source_port).
    pub async fn record(&self, base: Document, event: &Event) {
        let guard = self.state.read().await;
        let Some(handles) = guard.as_ref() else {
            return;
        };
        let (collection, mut document) = match route_event(event) {
            StoreRoute::Suppressed => return,
            StoreRoute::Auth(fields) => (&handles.auth, fields),
            StoreRoute::Shell(fields) => (&handles.shell, fields),
            StoreRoute::Ssh(fields) => (&handles.ssh, fields),
        };
        for (key, value) in base {
            document.insert(key, value);
        }
        if let Err(err) = collection.insert_one(document).await {
            log::warn!("Failed to insert log event into the document store: {}", err);
        }
    }
}

/// Which collection an event belongs to, with its event-specific fields.
#[derive(Debug, PartialEq)]
pub(crate) enum StoreRoute {
    Auth(Document),
    Shell(Document),
    Ssh(Document),
    /// Not stored at all.
    Suppressed,
}

pub(crate) fn route_event(event: &Event) -> StoreRoute {
    match event {
        Event::NoAuth(e) => {
            if e.user.is_empty() {
                return StoreRoute::Suppressed;
            }
            StoreRoute::Auth(doc! { "user": &e.user, "accepted": e.accepted })
        }
        Event::PasswordAuth(e) => StoreRoute::Auth(doc! {
            "user": &e.user,
            "accepted": e.accepted,
            "password": &e.password,
        }),
        Event::PublicKeyAuth(e) => StoreRoute::Auth(doc! {
            "user": &e.user,
            "accepted": e.accepted,
            "public_key": &e.public_key,
        }),
        Event::KeyboardInteractiveAuth(e) => StoreRoute::Auth(doc! {
            "user": &e.user,
            "accepted": e.accepted,
            "answers": e.answers.clone(),
        }),
        Event::SessionInput(e) => StoreRoute::Shell(doc! {
            "channel_id": e.channel_id as i64,
            "content": &e.input,
        }),
        other => {
            let payload =
                mongodb::bson::to_bson(&other.payload()).unwrap_or(Bson::Null);
            StoreRoute::Ssh(doc! { "payload": payload })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        ExecEvent, NoAuthEvent, PasswordAuthEvent, SessionInputEvent,
    };

    #[test]
    fn auth_events_route_to_the_auth_collection() {
        let route = route_event(&Event::PasswordAuth(PasswordAuthEvent {
            user: "alice".into(),
            password: "hunter2".into(),
            accepted: true,
        }));
        match route {
            StoreRoute::Auth(fields) => {
                assert_eq!(fields.get_str("user").unwrap(), "alice");
                assert_eq!(fields.get_str("password").unwrap(), "hunter2");
                assert!(fields.get_bool("accepted").unwrap());
            }
            other => panic!("unexpected route {:?}", other),
        }
    }

    #[test]
    fn no_auth_with_an_empty_user_is_suppressed() {
        let route = route_event(&Event::NoAuth(NoAuthEvent {
            user: String::new(),
            accepted: false,
        }));
        assert_eq!(route, StoreRoute::Suppressed);

        let route = route_event(&Event::NoAuth(NoAuthEvent {
            user: "probe".into(),
            accepted: false,
        }));
        assert!(matches!(route, StoreRoute::Auth(_)));
    }

    #[test]
    fn session_input_routes_to_the_shell_collection_as_content() {
        let route = route_event(&Event::SessionInput(SessionInputEvent {
            channel_id: 2,
            input: "uname -a".into(),
        }));
        match route {
            StoreRoute::Shell(fields) => {
                assert_eq!(fields.get_i64("channel_id").unwrap(), 2);
                assert_eq!(fields.get_str("content").unwrap(), "uname -a");
            }
            other => panic!("unexpected route {:?}", other),
        }
    }

    #[test]
    fn everything_else_lands_in_ssh_under_payload() {
        let route = route_event(&Event::Exec(ExecEvent {
            channel_id: 0,
            command: "echo hi".into(),
        }));
        match route {
            StoreRoute::Ssh(fields) => {
                let payload = fields.get_document("payload").unwrap();
                assert_eq!(payload.get_str("command").unwrap(), "echo hi");
            }
            other => panic!("unexpected route {:?}", other),
        }
    }
}
