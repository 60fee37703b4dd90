use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use mongodb::bson::doc;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::event::{event_type_id, Event, EVENT_TYPES};
use crate::event::{
    NoAuthEvent, PasswordAuthEvent, PublicKeyAuthEvent, SessionInputEvent,
};
use crate::mongo::MongoRecorder;

/// One historical log line, normalized from either input format.
struct ParsedLine {
    event_type: String,
    event: Option<Event>,
    session_id: i64,
    time: DateTime<Utc>,
    source_ip: String,
    source_port: i32,
}

/// Only the attack-relevant event kinds are written back into the store;
/// everything else is counted only.
fn reingestable(event_type: &str) -> bool {
    matches!(
        event_type,
        "no_auth" | "password_auth" | "public_key_auth" | "keyboard_interactive_auth"
            | "session_input"
    )
}

/// Re-ingest a historical log file through the document-store sink.
/// With `dry_run`, print per-type counts as JSON instead of writing.
pub async fn replay_old_log(
    recorder: Option<&MongoRecorder>,
    path: &Path,
    json: bool,
    dry_run: bool,
) -> Result<()> {
    if recorder.is_none() && !dry_run {
        bail!("the document store is disabled; enable mongo or pass --dry-run");
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read log file {}", path.display()))?;

    let mut counter: BTreeMap<String, u64> = EVENT_TYPES
        .iter()
        .map(|name| (name.to_string(), 0))
        .collect();
    let mut processed = 0u64;

    for line in content.lines() {
        processed += 1;
        let parsed = if json {
            parse_structured_line(line)
        } else {
            parse_text_line(line)
        };
        if let Some(parsed) = parsed {
            *counter.entry(parsed.event_type.clone()).or_insert(0) += 1;
            if !dry_run && reingestable(&parsed.event_type) {
                if let (Some(recorder), Some(event)) = (recorder, &parsed.event) {
                    let base = doc! {
                        "time": mongodb::bson::DateTime::from_millis(
                            parsed.time.timestamp_millis(),
                        ),
                        "session_id": parsed.session_id,
                        "event_type": event_type_id(&parsed.event_type),
                        "source_ip": &parsed.source_ip,
                        "source_port": parsed.source_port,
                    };
                    recorder.record(base, event).await;
                }
            }
        }
        if processed % 1000 == 0 {
            log::info!("Processed {} lines", processed);
        }
    }

    if dry_run {
        println!("{}", serde_json::to_string(&counter)?);
    }
    log::info!("Done");
    Ok(())
}

#[derive(Deserialize)]
struct OldRecord {
    #[serde(default)]
    session_id: Option<i64>,
    #[serde(default)]
    time: Option<Value>,
    #[serde(default)]
    source: Option<Value>,
    event_type: String,
    event: Value,
}

fn parse_structured_line(line: &str) -> Option<ParsedLine> {
    let record: OldRecord = serde_json::from_str(line).ok()?;
    let event = Event::from_parts(&record.event_type, record.event);
    let (source_ip, source_port) = parse_source(record.source.as_ref());
    Some(ParsedLine {
        event,
        session_id: record.session_id.unwrap_or(0),
        time: parse_time(record.time.as_ref()),
        source_ip,
        source_port,
        event_type: record.event_type,
    })
}

/// Old structured logs carry `time` either as epoch seconds or as an
/// RFC 3339 string; both are accepted.
fn parse_time(time: Option<&Value>) -> DateTime<Utc> {
    match time {
        Some(Value::Number(number)) => number
            .as_i64()
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
            .unwrap_or_default(),
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_default(),
        _ => DateTime::default(),
    }
}

fn parse_source(source: Option<&Value>) -> (String, i32) {
    match source {
        Some(Value::String(address)) => split_host_port(address),
        Some(Value::Object(fields)) => {
            let host = fields
                .get("host")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let port = fields.get("port").and_then(Value::as_i64).unwrap_or(0) as i32;
            (host, port)
        }
        _ => (String::new(), 0),
    }
}

fn split_host_port(address: &str) -> (String, i32) {
    match address.rsplit_once(':') {
        Some((host, port)) => (
            host.trim_start_matches('[')
                .trim_end_matches(']')
                .to_string(),
            port.parse().unwrap_or(0),
        ),
        None => (address.to_string(), 0),
    }
}

fn input_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\[channel (\d+)\] input: "(.*)"$"#).expect("regex"))
}

fn no_auth_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^authentication for user "(.*?)" without credentials (accepted|rejected)$"#)
            .expect("regex")
    })
}

fn password_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^authentication for user "(.*?)" with password "(.*)" (accepted|rejected)$"#,
        )
        .expect("regex")
    })
}

fn public_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^authentication for user "(.*?)" with public key "(.*)" (accepted|rejected)$"#,
        )
        .expect("regex")
    })
}

/// Text lines look like `2024/06/10 08:16:10 [192.0.2.1:4711] <event text>`.
/// Session input and authentication events are recovered; other lines are
/// not attributable to a single event and are skipped.
fn parse_text_line(line: &str) -> Option<ParsedLine> {
    let fields: Vec<&str> = line.splitn(4, ' ').collect();
    if fields.len() < 4 {
        return None;
    }
    let time = NaiveDateTime::parse_from_str(
        &format!("{} {}", fields[0], fields[1]),
        "%Y/%m/%d %H:%M:%S",
    )
    .map(|naive| naive.and_utc())
    .unwrap_or_default();
    let address = fields[2].trim_start_matches('[').trim_end_matches(']');
    let (source_ip, source_port) = split_host_port(address);
    let content = fields[3];

    let (event_type, event) = if let Some(captures) = input_re().captures(content) {
        (
            "session_input",
            Event::SessionInput(SessionInputEvent {
                channel_id: captures[1].parse().unwrap_or(0),
                input: captures[2].to_string(),
            }),
        )
    } else if let Some(captures) = password_re().captures(content) {
        (
            "password_auth",
            Event::PasswordAuth(PasswordAuthEvent {
                user: captures[1].to_string(),
                password: captures[2].to_string(),
                accepted: &captures[3] == "accepted",
            }),
        )
    } else if let Some(captures) = public_key_re().captures(content) {
        (
            "public_key_auth",
            Event::PublicKeyAuth(PublicKeyAuthEvent {
                user: captures[1].to_string(),
                public_key: captures[2].to_string(),
                accepted: &captures[3] == "accepted",
            }),
        )
    } else if let Some(captures) = no_auth_re().captures(content) {
        (
            "no_auth",
            Event::NoAuth(NoAuthEvent {
                user: captures[1].to_string(),
                accepted: &captures[2] == "accepted",
            }),
        )
    } else {
        return None;
    };

    Some(ParsedLine {
        event_type: event_type.to_string(),
        event: Some(event),
        session_id: 0,
        time,
        source_ip,
        source_port,
    })
}
