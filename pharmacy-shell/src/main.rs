//! Pharmacy shell: runs the session and subscription client from the
//! command line.
//!
//! ```text
//! pharmacy-shell [config.toml]
//! ```
//!
//! The configuration path falls back to `PHARMACY_CONFIG`, then to
//! `pharmacy.toml`. When no persisted session can be revived, credentials are
//! read from `PHARMACY_EMAIL` and `PHARMACY_PASSWORD`.
//!
//! The shell keeps the session alive in the background until Ctrl+C.

mod observability;

use std::{env, process::ExitCode};

use pharmacy_client::{
    ClientError, PharmacyClient, Result, auth::UserProfile, config::ClientConfig,
    subscription::SubscriptionView,
};
use tokio::signal;
use zeroize::Zeroizing;

use crate::observability::{LogFormat, init_observability};

const DEFAULT_CONFIG: &str = "pharmacy.toml";

#[tokio::main]
async fn main() -> ExitCode {
    init_observability(LogFormat::from_env());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Pharmacy shell failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var("PHARMACY_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_owned());
    tracing::info!(path = %config_path, "Loading configuration");

    let config = ClientConfig::from_file(&config_path)?;
    let client = PharmacyClient::from_config(&config)?;

    let user = if client.initialize().await {
        match client.session().current_user().await {
            Some(user) => {
                tracing::info!(user_id = %user.id, "Resumed persisted session");
                user
            }
            None => sign_in(&client).await?,
        }
    } else {
        sign_in(&client).await?
    };

    let scheduler = client.start_refresh();

    match &user.pharmacy_id {
        Some(pharmacy_id) => {
            let view = client.subscriptions().view(pharmacy_id, user.role).await;
            print_view(&view);
        }
        None => println!("Signed in as platform administrator; no pharmacy subscription."),
    }

    tracing::info!("Session active, press Ctrl+C to exit");
    shutdown_signal().await;

    scheduler.stop().await;
    Ok(())
}

async fn sign_in(client: &PharmacyClient) -> Result<UserProfile> {
    let email = env::var("PHARMACY_EMAIL").map_err(|_| {
        ClientError::ConfigError("no stored session; set PHARMACY_EMAIL and PHARMACY_PASSWORD".to_owned())
    })?;
    let password = Zeroizing::new(env::var("PHARMACY_PASSWORD").map_err(|_| {
        ClientError::ConfigError("PHARMACY_PASSWORD is not set".to_owned())
    })?);

    client.session().login(&email, &password).await
}

fn print_view(view: &SubscriptionView) {
    match view {
        SubscriptionView::Current { subscription, actions } => {
            let plan = subscription.plan.as_ref().map_or(subscription.plan_id.as_str(), |p| p.name.as_str());
            println!("Plan:     {plan}");
            println!("Status:   {}", subscription.status);
            println!("Renews:   {}", subscription.current_period_end.format("%Y-%m-%d"));
            let actions: Vec<String> = actions.iter().map(|a| format!("{a:?}")).collect();
            println!("Actions:  {}", actions.join(", "));
        }
        SubscriptionView::NoSubscription { offer_trial: true } => {
            println!("No subscription yet. A free trial is available.");
        }
        SubscriptionView::NoSubscription { offer_trial: false } => {
            println!("No subscription.");
        }
        SubscriptionView::AccessDenied => println!("Access denied to this pharmacy's subscription."),
        SubscriptionView::SignInRequired => println!("Session expired, please sign in again."),
        SubscriptionView::Unavailable { retryable } => {
            println!("Subscription unavailable{}.", if *retryable { ", try again later" } else { "" });
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal, shutting down"),
        () = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
