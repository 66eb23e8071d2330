use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use archer_operator::broker::{ArcherClient, KeystoneAuth, KeystoneCredentials, KeystoneMethod};
use archer_operator::controller::{
    self, ControllerConfig, ControllerOptions, ControllerState, KubeServiceStore,
    ServiceReconciler,
};
use archer_operator::{leader, server, Error};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Network used for endpoint services without a network-id annotation
    #[arg(long, env = "NETWORK_ID")]
    network_id: String,

    /// Prefix of every annotation key and of the finalizer
    #[arg(long, env = "ANNOTATION_PREFIX", default_value = controller::DEFAULT_ANNOTATION_PREFIX)]
    annotation_prefix: String,

    /// Base URL of the Archer API; looked up in the Keystone catalog when unset
    #[arg(long, env = "ARCHER_ENDPOINT")]
    archer_endpoint: Option<String>,

    /// Fixed token sent as X-Auth-Token when Keystone auth is not configured
    #[arg(long, env = "OS_AUTH_TOKEN", hide_env_values = true)]
    archer_token: Option<String>,

    #[command(flatten)]
    keystone: KeystoneArgs,

    /// Timeout for a single Archer request
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Only watch Services in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Maximum number of concurrent reconciles, 0 for unbounded
    #[arg(long, env = "CONCURRENCY", default_value_t = 0)]
    concurrency: u16,

    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,

    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    health_probe_bind_address: SocketAddr,

    /// Only reconcile while holding the leader lease
    #[arg(long, env = "LEADER_ELECT")]
    leader_elect: bool,

    /// Namespace of the leader lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    lease_namespace: String,

    /// Log in JSON format
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// Keystone credentials, read from the usual `OS_*` variables
#[derive(Parser, Debug)]
struct KeystoneArgs {
    /// Keystone v3 URL; enables Keystone authentication
    #[arg(long, env = "OS_AUTH_URL")]
    os_auth_url: Option<String>,

    #[arg(long, env = "OS_USERNAME")]
    os_username: Option<String>,

    #[arg(long, env = "OS_PASSWORD", hide_env_values = true)]
    os_password: Option<String>,

    #[arg(long, env = "OS_USER_DOMAIN_NAME", default_value = "Default")]
    os_user_domain_name: String,

    #[arg(long, env = "OS_PROJECT_NAME")]
    os_project_name: Option<String>,

    #[arg(long, env = "OS_PROJECT_DOMAIN_NAME", default_value = "Default")]
    os_project_domain_name: String,

    #[arg(long, env = "OS_APPLICATION_CREDENTIAL_ID")]
    os_application_credential_id: Option<String>,

    #[arg(long, env = "OS_APPLICATION_CREDENTIAL_SECRET", hide_env_values = true)]
    os_application_credential_secret: Option<String>,

    #[arg(long, env = "OS_REGION_NAME")]
    os_region_name: Option<String>,
}

impl KeystoneArgs {
    /// `None` when no auth URL is configured. Application credentials win
    /// over a password.
    fn credentials(&self) -> Result<Option<KeystoneCredentials>, Error> {
        let Some(auth_url) = self.os_auth_url.clone() else {
            return Ok(None);
        };

        let method = match (
            &self.os_application_credential_id,
            &self.os_application_credential_secret,
        ) {
            (Some(id), Some(secret)) => KeystoneMethod::ApplicationCredential {
                id: id.clone(),
                secret: secret.clone(),
            },
            (Some(_), None) => {
                return Err(Error::ConfigError(
                    "OS_APPLICATION_CREDENTIAL_SECRET is required with an application credential id"
                        .to_string(),
                ))
            }
            _ => match (&self.os_username, &self.os_password, &self.os_project_name) {
                (Some(username), Some(password), Some(project_name)) => KeystoneMethod::Password {
                    username: username.clone(),
                    password: password.clone(),
                    user_domain_name: self.os_user_domain_name.clone(),
                    project_name: project_name.clone(),
                    project_domain_name: self.os_project_domain_name.clone(),
                },
                _ => {
                    return Err(Error::ConfigError(
                        "OS_USERNAME, OS_PASSWORD and OS_PROJECT_NAME are required for password auth"
                            .to_string(),
                    ))
                }
            },
        };

        Ok(Some(KeystoneCredentials {
            auth_url,
            method,
            region: self.os_region_name.clone(),
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("archer-operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_json);

    info!("Starting archer-operator v{}", env!("CARGO_PKG_VERSION"));

    if args.network_id.trim().is_empty() {
        return Err(Error::ConfigError("network id must not be empty".to_string()));
    }

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let timeout = Duration::from_secs(args.request_timeout_secs);
    let broker = match (args.keystone.credentials()?, &args.archer_endpoint) {
        (Some(credentials), endpoint) => {
            info!("Authenticating against Keystone at {}", credentials.auth_url);
            let auth = KeystoneAuth::new(credentials, timeout)?;
            ArcherClient::with_keystone(auth, endpoint.as_deref(), timeout).await?
        }
        (None, Some(endpoint)) => ArcherClient::new(endpoint, args.archer_token.clone(), timeout)?,
        (None, None) => {
            return Err(Error::ConfigError(
                "either OS_AUTH_URL or ARCHER_ENDPOINT must be set".to_string(),
            ))
        }
    };
    info!("Using Archer API at {}", broker.endpoint());

    let config = ControllerConfig::new(&args.annotation_prefix, &args.network_id);
    let reconciler = ServiceReconciler::new(KubeServiceStore::new(client.clone()), broker, &config);

    // Without leader election every replica reconciles
    let is_leader = Arc::new(AtomicBool::new(!args.leader_elect));

    if args.leader_elect {
        let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string())
        });
        info!("Leader election using holder ID: {}", holder_identity);

        let lease_client = client.clone();
        let lease_ns = args.lease_namespace.clone();
        let is_leader_bg = Arc::clone(&is_leader);
        tokio::spawn(async move {
            leader::run_leader_election(lease_client, &lease_ns, &holder_identity, is_leader_bg)
                .await;
        });
    }

    let metrics_addr = args.metrics_bind_address;
    tokio::spawn(async move {
        if let Err(e) = server::run_metrics_server(metrics_addr).await {
            error!("Metrics server error: {:?}", e);
        }
    });

    let probe_addr = args.health_probe_bind_address;
    tokio::spawn(async move {
        if let Err(e) = server::run_probe_server(probe_addr).await {
            error!("Health probe server error: {:?}", e);
        }
    });

    let state = Arc::new(ControllerState {
        client,
        reconciler,
        is_leader,
    });

    let options = ControllerOptions {
        watch_namespace: args.watch_namespace,
        concurrency: args.concurrency,
    };

    controller::run_controller(state, options).await
}
