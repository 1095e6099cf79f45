//! Redis Enterprise database operator binary.
//!
//! Watches Rdbc resources and the credential Secrets they own, and keeps the
//! databases on the Redis Enterprise cluster in sync with them.

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, CustomResourceExt};
use rdbc_operator::OperatorConfig;
use rdbc_operator::controller::{ControllerContext, RdbcController, error_policy};
use rdbc_operator::crd::Rdbc;
use rdbc_operator::error::OperatorError;
use rdbc_operator::observability::{LogFormat, init_tracing};
use rdbc_operator::security::CredentialsResolver;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rdbc-operator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Print the Rdbc CRD as YAML and exit
    #[arg(long)]
    generate_crds: bool,

    /// Log output format (text or json)
    #[arg(long, env = "RDBC_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.generate_crds {
        generate_crds()?;
        return Ok(());
    }

    init_tracing(cli.log_format)?;
    tracing::info!("Starting rdbc operator");

    let config = OperatorConfig::from_env()?;
    tracing::info!(
        api = %config.api_url,
        credentials_namespace = %config.credentials_namespace,
        credentials_secret = %config.credentials_secret,
        watch_namespace = ?config.watch_namespace,
        "Loaded configuration"
    );

    let client = Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let credentials = CredentialsResolver::new(client.clone())
        .resolve(&config.credentials_secret, &config.credentials_namespace)
        .await?;

    let api_config = rdbc_client::ClientConfig::new(
        config.api_url.clone(),
        credentials.username,
        credentials.password,
    )
    .with_timeout(config.api_timeout)
    .with_tls(config.tls_verification()?);
    let databases = rdbc_client::Client::new(api_config)?;

    let ctx = Arc::new(ControllerContext::new(client.clone(), databases));
    run_controller(client, &config, ctx).await
}

/// Run the Rdbc controller until shutdown.
async fn run_controller(
    client: Client,
    config: &OperatorConfig,
    ctx: Arc<ControllerContext>,
) -> anyhow::Result<()> {
    let (rdbcs, secrets): (Api<Rdbc>, Api<Secret>) = match &config.watch_namespace {
        Some(namespace) => (
            Api::namespaced(client.clone(), namespace),
            Api::namespaced(client, namespace),
        ),
        None => (Api::all(client.clone()), Api::all(client)),
    };

    tracing::info!("Starting Rdbc controller");
    let controller = RdbcController::new(ctx.clone());

    Controller::new(rdbcs, WatcherConfig::default())
        .owns(secrets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            move |rdbc, _ctx| {
                let controller = controller.clone();
                async move {
                    let action = controller.reconcile_object(rdbc).await?;
                    Ok::<Action, OperatorError>(action.into())
                }
            },
            error_policy,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(
                        rdbc = %obj.name,
                        namespace = ?obj.namespace,
                        ?action,
                        "Reconciled Rdbc"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rdbc controller stream error");
                }
            }
        })
        .await;

    tracing::info!("Rdbc controller stopped");
    Ok(())
}

/// Generate CRD YAML.
fn generate_crds() -> anyhow::Result<()> {
    println!("---");
    println!("{}", serde_yaml::to_string(&Rdbc::crd())?);
    Ok(())
}
