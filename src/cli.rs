//! # certctl
//!
//! Command-line interface for the Certificate Controller.
//!
//! ## Usage
//!
//! ```bash
//! # List all Certificates
//! certctl list
//!
//! # Show status of a Certificate
//! certctl status --namespace default --name my-cert
//!
//! # Re-issue a Certificate into its current secret now
//! certctl renew --namespace default --name my-cert
//! ```

use anyhow::{Context, Result};
use certificate_controller::crd::{
    Certificate, ConditionType, RequestIntent, OBSOLETE_SECRET_ANNOTATION,
    REQUEST_INTENT_ANNOTATION, VALIDITY_ANNOTATION,
};
use clap::{Parser, Subcommand};
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    Client,
};
use serde_json::json;

/// Certificate Controller CLI
#[derive(Debug, Parser)]
#[command(name = "certctl")]
#[command(about = "Certificate Controller CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to "default")
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List Certificate resources
    List {
        /// Namespace to list resources in (defaults to all namespaces)
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Show status of a Certificate resource
    Status {
        /// Name of the Certificate resource
        #[arg(long)]
        name: String,

        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Re-issue the certificate into its current secret on the next reconcile
    Renew {
        /// Name of the Certificate resource
        #[arg(long)]
        name: String,

        #[arg(short, long)]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "certctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;

    match cli.command {
        Commands::List { namespace } => list_command(client, namespace.or(cli.namespace)).await,
        Commands::Status { name, namespace } => {
            status_command(client, &name, namespace.or(cli.namespace)).await
        }
        Commands::Renew { name, namespace } => {
            renew_command(client, &name, namespace.or(cli.namespace)).await
        }
    }
}

/// List Certificates with their active condition and expiry
async fn list_command(client: Client, namespace: Option<String>) -> Result<()> {
    let api: Api<Certificate> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let certificates = api
        .list(&ListParams::default())
        .await
        .context("Failed to list Certificate resources")?;

    if certificates.items.is_empty() {
        println!("No Certificate resources found.");
        return Ok(());
    }

    println!(
        "{:<30} {:<20} {:<25} {:<10} {:<25}",
        "NAME", "NAMESPACE", "SECRET", "STATE", "EXPIRY"
    );
    println!("{}", "-".repeat(110));

    for certificate in certificates.items {
        let status = certificate.status.as_ref();
        let state = status
            .and_then(|s| s.active_condition())
            .map_or("Unknown", |c| c.as_str());
        let expiry = status
            .and_then(|s| s.expiry_date.as_deref())
            .unwrap_or("-");

        println!(
            "{:<30} {:<20} {:<25} {:<10} {:<25}",
            certificate.metadata.name.as_deref().unwrap_or("<unknown>"),
            certificate.metadata.namespace.as_deref().unwrap_or("<unknown>"),
            certificate.spec.secret_name(),
            state,
            expiry
        );
    }

    Ok(())
}

/// Show detailed status of a Certificate
async fn status_command(client: Client, name: &str, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<Certificate> = Api::namespaced(client, ns);

    let certificate = api
        .get(name)
        .await
        .with_context(|| format!("Failed to get Certificate '{ns}/{name}'"))?;

    println!("Status for Certificate '{ns}/{name}':\n");
    println!("Metadata:");
    if let Some(generation) = certificate.metadata.generation {
        println!("  Generation: {generation}");
    }
    let annotations = certificate.metadata.annotations.clone().unwrap_or_default();
    for key in [VALIDITY_ANNOTATION, REQUEST_INTENT_ANNOTATION, OBSOLETE_SECRET_ANNOTATION] {
        if let Some(value) = annotations.get(key) {
            println!("  {key}: {value}");
        }
    }

    let spec = &certificate.spec;
    println!("\nSpec:");
    println!("  DNS Name: {}", spec.dns_name);
    if !spec.email_addresses.is_empty() {
        println!("  Email Addresses: {}", spec.email_addresses.join(", "));
    }
    println!("  Validity: {}", spec.validity);
    println!(
        "  Renew Before: {}",
        spec.renew_before.as_deref().unwrap_or("-")
    );
    println!("  Secret: {}", spec.secret_name());
    if let Some(subject) = &spec.subject {
        println!("  Common Name: {}", subject.common_name);
        println!("  Serial Number: {}", subject.serial_number);
    }

    let Some(status) = &certificate.status else {
        println!("\nStatus: No status available (resource may not have been reconciled yet)");
        return Ok(());
    };

    println!("\nStatus:");
    if let Some(generation) = status.observed_generation {
        println!("  Observed Generation: {generation}");
    }
    if let Some(secret) = &status.secret_ref {
        println!("  Secret: {secret}");
    }
    if let Some(expiry) = &status.expiry_date {
        println!("  Expiry: {expiry}");
    }
    if let Some(renewed_at) = &status.renewed_at {
        println!("  Renewed At: {renewed_at}");
    }

    if !status.conditions.is_empty() {
        println!("\nConditions:");
        for condition in &status.conditions {
            println!("  {}: {}", condition.r#type, condition.status);
            if let Some(reason) = &condition.reason {
                println!("    Reason: {reason}");
            }
            if let Some(message) = &condition.message {
                println!("    Message: {message}");
            }
            if let Some(time) = &condition.last_transition_time {
                println!("    Last Transition: {time}");
            }
        }
    }
    if status.active_condition() == Some(ConditionType::Failed) {
        println!("\nThe last reconciliation failed; the controller retries with backoff.");
    }

    Ok(())
}

/// Stamp an update request so the controller re-issues into the current secret
async fn renew_command(client: Client, name: &str, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<Certificate> = Api::namespaced(client, ns);

    let patch = json!({
        "metadata": {
            "annotations": {
                REQUEST_INTENT_ANNOTATION: RequestIntent::Update.as_str()
            }
        }
    });
    let params = PatchParams {
        field_manager: Some("certctl".to_string()),
        ..PatchParams::default()
    };

    api.patch(name, &params, &Patch::Merge(patch))
        .await
        .with_context(|| format!("Failed to request renewal of '{ns}/{name}'"))?;

    println!("Renewal requested for Certificate '{ns}/{name}'");
    println!("The controller will re-issue the certificate shortly.");
    Ok(())
}
