use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use blf_sync::{init_logging, load_extensions, Config, ConfigError, PresenceBridge};
use graph_presence::{GraphClient, GraphCredentials, PresenceExpiry, PresencePublisher, SessionIdStore};
use sip_client::{EventDispatcher, SessionConfig, SessionManager, SipEndpoint};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const USER_AGENT: &str = concat!("sip-blf-sync/", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::load();

    if let Err(e) = init_logging(config.log_mode) {
        eprintln!("sip-blf-sync: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{:#}", e);
            error!(error = %message, "sip-blf-sync stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let extensions = load_extensions(&config.extensions_path).map_err(ConfigError::from)?;
    info!(
        path = %extensions.source().display(),
        count = extensions.len(),
        "loaded extensions"
    );

    let credentials = GraphCredentials {
        tenant_id: config.azure_tenant_id.trim().to_string(),
        client_id: config.azure_client_id.trim().to_string(),
        client_secret: config.azure_client_secret.clone(),
    };
    let sessions = SessionIdStore::load(&config.presence_state_path).context("load presence state")?;
    let graph = Arc::new(GraphClient::new(credentials.clone()).context("create Graph client")?);
    let expiry = PresenceExpiry::from_minutes(config.presence_expiration_minutes)?;
    let publisher = Arc::new(PresencePublisher::new(graph, sessions, credentials.client_id, expiry));

    // STUN uses blocking sockets
    let discovered = {
        let contact_ip = config.sip_contact_ip.clone();
        let servers = config.stun_servers();
        tokio::task::spawn_blocking(move || {
            stun_client::resolve_contact_if_needed(&contact_ip, &servers, stun_client::DEFAULT_TIMEOUT)
        })
        .await
        .context("STUN discovery task")?
        .context("STUN discovery failed")?
    };

    let contact_ip = match discovered {
        Some(public) => public.ip().to_string(),
        None => config.sip_contact_ip.trim().to_string(),
    };
    if stun_client::is_contact_sentinel(&contact_ip) {
        return Err(ConfigError::ContactUnresolved.into());
    }

    let listen = config.listen_addr(discovered.is_some())?;
    let endpoint = Arc::new(
        SipEndpoint::bind(listen, &config.sip_server)
            .await
            .context("bind SIP endpoint")?,
    );
    let contact_port = match discovered {
        Some(public) => public.port(),
        None => endpoint.local_addr().context("local SIP address")?.port(),
    };

    let cancel = CancellationToken::new();
    let _shutdown = cancel.clone().drop_guard();

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let receiver = endpoint.spawn_receiver(inbound_tx, cancel.clone());

    let monitored = extensions.extensions().to_vec();
    let bridge = Arc::new(PresenceBridge::new(extensions, publisher));
    let dispatcher = EventDispatcher::new(bridge, endpoint.clone());
    let dispatch = tokio::spawn({
        let cancel = cancel.clone();
        async move { dispatcher.run(inbound_rx, cancel).await }
    });

    let session_config = SessionConfig {
        user_agent: USER_AGENT.to_string(),
        ..SessionConfig::new(
            config.sip_server.trim(),
            config.sip_username.trim(),
            config.sip_password.clone(),
            contact_ip,
        )
        .with_contact_port(contact_port)
    };
    let session = Arc::new(SessionManager::new(session_config, endpoint.clone()).with_cancellation(cancel.clone()));

    session.register().await.context("register")?;
    let report = session.subscribe(&monitored).await.context("subscribe")?;
    info!(
        extensions = monitored.len(),
        active = report.active.len(),
        failed = report.failed.len(),
        "sip-blf-sync running"
    );

    if config.refresh_subscriptions {
        let session = session.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { session.run_refresh(&monitored, cancel).await });
    } else {
        info!("subscription refresh disabled; subscriptions lapse when the PBX grant expires");
    }

    shutdown_signal().await;
    info!("shutting down");
    cancel.cancel();

    if let Err(e) = receiver.await {
        warn!(error = %e, "SIP listener task failed");
    }
    if let Err(e) = dispatch.await {
        warn!(error = %e, "dispatcher task failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
