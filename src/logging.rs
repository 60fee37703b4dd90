use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Local, Utc};
use mongodb::bson::doc;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::event::Event;
use crate::mongo::MongoRecorder;

/// Process-wide event sinks, shared by every connection.
pub struct Sinks {
    pub recorder: Option<Arc<MongoRecorder>>,
}

/// Per-connection logging context. Created once per accepted connection; the
/// configuration snapshot captured here is used for the connection's whole
/// lifetime.
#[derive(Clone)]
pub struct ConnContext {
    pub session_id: i64,
    pub peer: SocketAddr,
    pub cfg: Arc<Config>,
    pub sinks: Arc<Sinks>,
}

#[derive(Serialize)]
struct LineRecord<'a> {
    session_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<i64>,
    source: Value,
    event_type: &'a str,
    event: Value,
}

impl ConnContext {
    pub fn new(peer: SocketAddr, cfg: Arc<Config>, sinks: Arc<Sinks>) -> Self {
        ConnContext {
            session_id: rand::rng().random_range(0..i64::MAX),
            peer,
            cfg,
            sinks,
        }
    }

    /// `debug_*` events exist only when debug logging is on.
    fn suppressed(&self, event: &Event) -> bool {
        event.is_debug() && !self.cfg.logging.debug
    }

    /// Record one event on every active sink. Never fails; sink errors are
    /// logged as warnings and dropped.
    pub async fn log_event(&self, event: &Event) {
        if self.suppressed(event) {
            return;
        }
        if let Some(recorder) = &self.sinks.recorder {
            if recorder.is_connected() {
                let base = doc! {
                    "time": mongodb::bson::DateTime::now(),
                    "session_id": self.session_id,
                    "event_type": event.type_id(),
                    "source_ip": self.peer.ip().to_string(),
                    "source_port": self.peer.port() as i32,
                };
                recorder.record(base, event).await;
            }
        }
        if self.cfg.logging.json {
            let record = LineRecord {
                session_id: self.session_id,
                time: self.cfg.logging.timestamps.then(|| Utc::now().timestamp()),
                source: self.source_value(),
                event_type: event.event_type(),
                event: event.payload(),
            };
            match serde_json::to_string(&record) {
                Ok(line) => println!("{}", line),
                Err(err) => log::warn!("Failed to log event: {}", err),
            }
        } else {
            println!(
                "{} [{}] {}",
                Local::now().format("%Y/%m/%d %H:%M:%S"),
                self.peer,
                event
            );
        }
    }

    fn source_value(&self) -> Value {
        if self.cfg.logging.split_host_port {
            serde_json::json!({
                "host": self.peer.ip().to_string(),
                "port": self.peer.port(),
            })
        } else {
            Value::String(self.peer.to_string())
        }
    }
}
