//! CLI for amqp-relay
//!
//! Settings come from `config/default.toml` (or `--config`), then `RELAY__*`
//! environment variables (a `.env` file is honoured), then the flags below.

use std::process::ExitCode;

use amqp_relay::config::{Settings, load_config};
use amqp_relay::relay::address::{MessageType, source_address};
use amqp_relay::relay::{LINK_CREDIT, Relay};
use amqp_relay::tls::TlsMode;
use amqp_relay::transport::{InboundLink, close_within};
use amqp_relay::transport::amqp::AmqpEndpoint;
use amqp_relay::utils::{RelayError, logging};
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "amqp-relay", about = "Relay tenant AMQP traffic to per-device sinks")]
struct Cli {
    /// Configuration file (toml, yaml or json)
    #[arg(long)]
    config: Option<String>,
    /// Broker host name
    #[arg(long)]
    host: Option<String>,
    /// Broker port
    #[arg(long)]
    port: Option<u16>,
    /// Tenant whose traffic is consumed
    #[arg(long)]
    tenant: Option<String>,
    /// `telemetry` or `event`
    #[arg(long)]
    message_type: Option<MessageType>,
    /// SASL PLAIN username
    #[arg(long)]
    username: Option<String>,
    /// SASL PLAIN password
    #[arg(long, env = "RELAY_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// 0 = disabled, 1 = insecure (no verification), 2 = secure
    #[arg(long)]
    tls_mode: Option<u8>,
    /// PEM file with the CA certificates trusted in secure mode
    #[arg(long)]
    ca_file: Option<String>,
    /// Base of every target address
    #[arg(long)]
    sink_base: Option<String>,
    /// error, warn, info, debug or trace
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, settings: &mut Settings) -> Result<(), RelayError> {
        if let Some(host) = self.host {
            settings.broker.host = host;
        }
        if let Some(port) = self.port {
            settings.broker.port = port;
        }
        if let Some(tenant) = self.tenant {
            settings.broker.tenant = tenant;
        }
        if let Some(message_type) = self.message_type {
            settings.broker.message_type = message_type;
        }
        if let Some(username) = self.username {
            settings.broker.username = Some(username);
        }
        if let Some(password) = self.password {
            settings.broker.password = Some(password);
        }
        if let Some(mode) = self.tls_mode {
            settings.tls.mode = TlsMode::try_from(mode)?;
        }
        if let Some(ca_file) = self.ca_file {
            settings.tls.ca_file = Some(ca_file);
        }
        if let Some(sink_base) = self.sink_base {
            settings.relay.sink_base = sink_base;
        }
        if let Some(level) = self.log_level {
            settings.log.level = level;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = load_config(cli.config.as_deref())
        .map_err(RelayError::from)
        .and_then(|mut settings| cli.apply(&mut settings).map(|()| settings));

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log.level);

    match run_relay(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Relay failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_relay(settings: Settings) -> Result<(), RelayError> {
    settings.validate()?;
    let tls = settings.tls.build()?;
    let source = source_address(settings.broker.message_type, &settings.broker.tenant);

    let mut endpoint = AmqpEndpoint::connect(&settings.broker, tls.as_ref()).await?;
    let mut inbound = match endpoint.open_inbound(&source, LINK_CREDIT).await {
        Ok(inbound) => inbound,
        Err(e) => {
            for close_err in endpoint.close().await {
                warn!("{close_err}");
            }
            return Err(e);
        }
    };

    info!(%source, sink_base = %settings.relay.sink_base, "relaying");
    let mut relay = Relay::new(settings.relay.clone());
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received. Exiting gracefully.");
    };
    let result = relay.run(&mut inbound, endpoint.links(), shutdown).await;

    if let Err(e) = close_within("receiver", inbound.close()).await {
        warn!("{e}");
    }
    for close_err in endpoint.close().await {
        warn!("{close_err}");
    }

    result
}
