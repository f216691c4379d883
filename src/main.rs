use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use stacksrv::config::{
    DEFAULT_CONTROL_ADDR, DEFAULT_EVICTION_AGE, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_LINGERING_REJECTIONS, DEFAULT_SERVICE_ADDR, DEFAULT_STACK_CAPACITY, ListenConfig,
    ServerConfig, log_level_directive,
};
use stacksrv::server::{ControlServer, Server};

#[derive(Parser, Debug)]
#[command(about = "Bounded LIFO stack server")]
struct Args {
    /// Address of the stack service
    #[arg(long, env = "STACKSRV_SERVICE", default_value = DEFAULT_SERVICE_ADDR)]
    service: SocketAddr,

    /// Address of the control (reset/status) channel
    #[arg(long, env = "STACKSRV_CONTROL", default_value = DEFAULT_CONTROL_ADDR)]
    control: SocketAddr,

    /// Maximum number of entries on the stack
    #[arg(long, env = "QUEUE_SIZE", default_value_t = DEFAULT_STACK_CAPACITY)]
    stack_capacity: usize,

    /// Maximum number of simultaneous client connections
    #[arg(long, env = "CONN_POOL_SIZE", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Seconds after which the oldest connection may be evicted for a new one
    #[arg(long, env = "CONN_EXPIRATION", default_value_t = DEFAULT_EVICTION_AGE.as_secs())]
    eviction_age_secs: u64,

    /// Rejected sockets allowed to linger at once after the busy byte
    #[arg(
        long,
        env = "STACKSRV_MAX_LINGERING_REJECTIONS",
        default_value_t = DEFAULT_MAX_LINGERING_REJECTIONS
    )]
    max_lingering_rejections: usize,

    /// Log level used when RUST_LOG is unset: info, error, or debug for anything else
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            stack_capacity: self.stack_capacity,
            max_connections: self.max_connections,
            eviction_age: Duration::from_secs(self.eviction_age_secs),
            max_lingering_rejections: self.max_lingering_rejections,
        }
    }

    fn listen_config(&self) -> ListenConfig {
        ListenConfig {
            service: self.service,
            control: self.control,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(log_level_directive(args.log_level.as_deref()))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.server_config();
    config.validate().context("invalid configuration")?;
    let listen = args.listen_config();

    let listener = TcpListener::bind(listen.service)
        .await
        .with_context(|| format!("failed to bind service address {}", listen.service))?;
    let control_listener = TcpListener::bind(listen.control)
        .await
        .with_context(|| format!("failed to bind control address {}", listen.control))?;

    let server = Server::new(listener, config);
    let control = ControlServer::new(control_listener, server.handle());

    info!(
        service = %listen.service,
        control = %listen.control,
        stack_capacity = config.stack_capacity,
        max_connections = config.max_connections,
        eviction_age_secs = config.eviction_age.as_secs(),
        "stacksrv ready"
    );

    tokio::select! {
        res = server.serve() => res.context("service listener failed")?,
        res = control.serve() => res.context("control listener failed")?,
    }
    Ok(())
}
