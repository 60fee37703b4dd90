mod app;
mod channel;
mod config;
mod event;
mod faker;
mod keys;
mod logging;
mod mongo;
mod replay;
mod server;
mod shell;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use russh::{MethodKind, SshId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::app::App;
use crate::config::ConfigStore;
use crate::event::{ConnectionCloseEvent, ConnectionEvent, Event};
use crate::logging::{ConnContext, Sinks};
use crate::mongo::MongoRecorder;
use crate::server::{ConnectionHandler, VersionCapture};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .parse_env(env_logger::Env::default())
        .filter_level(log::LevelFilter::Info)
        .filter_module("russh", log::LevelFilter::Warn)
        .init();

    let app = App::parse();

    let cfg = config::load(&app.config)?;
    let store = Arc::new(ConfigStore::new(cfg));

    #[cfg(unix)]
    {
        let store = store.clone();
        let config_path = app.config.clone();
        tokio::spawn(async move {
            let mut hangup =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(signal) => signal,
                    Err(err) => {
                        log::warn!("Failed to listen for SIGHUP: {}", err);
                        return;
                    }
                };
            while hangup.recv().await.is_some() {
                log::info!("Reloading config due to SIGHUP");
                match config::load(&config_path) {
                    Ok(new_cfg) => store.replace(new_cfg),
                    Err(err) => log::warn!("Failed to reload config: {:#}", err),
                }
            }
        });
    }

    std::fs::create_dir_all(&app.data_dir).with_context(|| {
        format!("failed to create data directory {}", app.data_dir.display())
    })?;

    let snapshot = store.snapshot();
    let recorder = if snapshot.mongo.enable {
        Some(MongoRecorder::start(snapshot.mongo.clone()).await)
    } else {
        None
    };
    let sinks = Arc::new(Sinks {
        recorder: recorder.clone(),
    });

    if let Some(old_log) = &app.old_log {
        let result =
            replay::replay_old_log(recorder.as_deref(), old_log, app.old_log_json, app.dry_run)
                .await;
        if let Some(recorder) = &recorder {
            recorder.shutdown();
        }
        return result;
    }

    let host_keys = keys::load_or_generate(&snapshot, &app.data_dir);
    for file in &host_keys.files {
        log::debug!("Host key file: {}", file.display());
    }

    // Offering "none" keeps credential-less probes observable; the policy
    // decides whether they get in.
    let mut methods = vec![MethodKind::None];
    if snapshot.auth.password_auth.enabled {
        methods.push(MethodKind::Password);
    }
    if snapshot.auth.public_key_auth.enabled {
        methods.push(MethodKind::PublicKey);
    }
    if snapshot.auth.keyboard_interactive_auth.enabled {
        methods.push(MethodKind::KeyboardInteractive);
    }

    let server_config = Arc::new(russh::server::Config {
        server_id: SshId::Standard("SSH-2.0-sshesame".to_string()),
        keys: host_keys.keys,
        methods: methods.as_slice().into(),
        auth_rejection_time: Duration::from_secs(3),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        keepalive_interval: Some(Duration::from_secs(20)),
        keepalive_max: 5,
        inactivity_timeout: Some(Duration::from_secs(300)),
        ..Default::default()
    });

    let listener = TcpListener::bind(&snapshot.server.listen_address)
        .await
        .with_context(|| format!("failed to listen on {}", snapshot.server.listen_address))?;
    log::info!("Listening on {}", listener.local_addr()?);

    if let Some(metrics_address) = &snapshot.logging.metrics_address {
        log::info!(
            "Metrics address {} is configured but metrics are not served by this build",
            metrics_address
        );
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let ctx = ConnContext::new(peer, store.snapshot(), sinks.clone());
                    let server_config = server_config.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, ctx, server_config).await;
                    });
                }
                Err(err) => log::warn!("Failed to accept connection: {}", err),
            },
            _ = &mut shutdown => break,
        }
    }

    log::info!("Shutting down");
    if let Some(recorder) = &recorder {
        recorder.shutdown();
    }
    Ok(())
}

/// Drive one connection from accept to teardown: capture the client version,
/// run the SSH transport with the honeypot handler, and emit the
/// connection-close event once everything is over.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: ConnContext,
    server_config: Arc<russh::server::Config>,
) {
    let (version_tx, version_rx) = oneshot::channel();
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Ok(client_version) = version_rx.await {
                ctx.log_event(&Event::Connection(ConnectionEvent { client_version }))
                    .await;
            }
        });
    }

    let stream = VersionCapture::new(stream, version_tx);
    let handler = ConnectionHandler::new(ctx.clone());
    match russh::server::run_stream(server_config, stream, handler).await {
        Ok(session) => {
            if let Err(err) = session.await {
                log::warn!("Connection from {} ended with an error: {}", peer, err);
            }
        }
        Err(err) => {
            log::warn!("Failed to set up connection from {}: {}", peer, err);
        }
    }
    ctx.log_event(&Event::ConnectionClose(ConnectionCloseEvent {}))
        .await;
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    log::warn!("Failed to listen for SIGTERM: {}", err);
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = terminate.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
