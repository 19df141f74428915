//! SnapVocab identity CLI.
//!
//! Operator tool for the identity layer: resolve who a request belongs to,
//! and inspect, install or clear the session stored on this device.
//! Token values are never printed.

use std::io;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use snapvocab_identity::{
    BackendConfig, ClientFactory, Credential, EnvBridge, ExecutionContext, GoTrueBackend,
    IdentityClient, InvalidBearerPolicy, PlatformCapability, RequestCookies,
    RequestIdentityResolver, TargetBridge,
};

/// Exit code for an unauthenticated request, distinct from tool failures
const EXIT_UNAUTHORIZED: u8 = 2;

#[derive(Parser)]
#[command(name = "snapvocab", version, about = "SnapVocab identity tooling")]
struct Cli {
    /// Execution context; probed from SNAPVOCAB_PLATFORM, then the build target, when omitted
    #[arg(long, global = true)]
    platform: Option<ExecutionContext>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the identity of a request from its headers
    Whoami {
        /// Raw Authorization header value, e.g. "Bearer <token>"
        #[arg(long, env = "SNAPVOCAB_AUTHORIZATION", hide_env_values = true)]
        authorization: Option<String>,

        /// Raw Cookie header value
        #[arg(long, env = "SNAPVOCAB_COOKIE", hide_env_values = true)]
        cookie: Option<String>,

        /// Reject invalid bearer tokens instead of falling back to cookies
        #[arg(long)]
        strict: bool,
    },
    /// Manage the session stored on this device
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Show the stored session (user and expiry only)
    Show,
    /// Validate a credential and store it
    Set {
        #[arg(long, env = "SNAPVOCAB_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        #[arg(long, env = "SNAPVOCAB_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,
    },
    /// Remove the stored session and revoke it
    Clear,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    // Misconfiguration is fatal
    let config = BackendConfig::from_env().context("Invalid backend configuration")?;
    info!(?config, "Configuration loaded");

    match cli.command {
        Command::Whoami {
            authorization,
            cookie,
            strict,
        } => {
            if whoami(config, authorization, cookie, strict).await? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_UNAUTHORIZED))
            }
        }
        Command::Session { action } => {
            let factory = match cli.platform {
                Some(context) => ClientFactory::with_context(config, context),
                None => ClientFactory::new(config, detect_bridge().as_deref()),
            };
            require_native(factory.context())?;
            let mut client = factory.build().context("Failed to build client")?;
            session(&mut client, factory.context(), action).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn detect_bridge() -> Option<Box<dyn PlatformCapability>> {
    match EnvBridge::probe() {
        Some(bridge) => Some(Box::new(bridge)),
        None => Some(Box::new(TargetBridge)),
    }
}

/// Web sessions live in the browser cookie jar, not in this process
fn require_native(context: ExecutionContext) -> Result<()> {
    if !context.is_native() {
        bail!("Session commands need the native context (--platform native)");
    }
    Ok(())
}

/// Resolve a request built from raw header values; true when authenticated
async fn whoami(
    config: BackendConfig,
    authorization: Option<String>,
    cookie: Option<String>,
    strict: bool,
) -> Result<bool> {
    let mut headers = HeaderMap::new();
    if let Some(value) = authorization {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).context("Authorization is not a valid header value")?,
        );
    }
    if let Some(value) = cookie {
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&value).context("Cookie is not a valid header value")?,
        );
    }

    let backend = GoTrueBackend::new(config.clone()).context("Failed to build backend client")?;
    let policy = if strict {
        InvalidBearerPolicy::Reject
    } else {
        InvalidBearerPolicy::FallThrough
    };
    let resolver = RequestIdentityResolver::new(config, backend).with_invalid_bearer_policy(policy);

    let cookies = RequestCookies::from_headers(&headers);
    let resolution = resolver.resolve(&headers, cookies.clone()).await;
    let source = resolution.source().map(|s| s.to_string());

    let mut response = HeaderMap::new();
    cookies.write_set_cookie_headers(&mut response);
    let rotated: Vec<String> = response
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split('=').next().map(str::to_string))
        .collect();

    match resolution.user {
        Some(user) => {
            let output = json!({
                "authenticated": true,
                "source": source,
                "user": user,
                "rotated_cookies": rotated,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(true)
        }
        None => {
            if let Some(e) = resolution.error {
                info!(error = %e, "Request not authenticated");
            }
            // Generic message: internal detail stays in the logs
            println!("401 Unauthorized");
            Ok(false)
        }
    }
}

async fn session(
    client: &mut IdentityClient,
    context: ExecutionContext,
    action: SessionAction,
) -> Result<()> {
    match action {
        SessionAction::Show => {
            let session = client.get_session().await.context("Failed to load session")?;
            let output = match session {
                Some(session) => json!({
                    "platform": context.to_string(),
                    "user_id": session.user.as_ref().map(|u| u.id.clone()),
                    "expires_in_minutes": session.minutes_until_expiry(),
                    "refreshable": session.has_refresh_token(),
                }),
                None => json!({ "platform": context.to_string(), "session": null }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        SessionAction::Set {
            access_token,
            refresh_token,
        } => {
            let credential = Credential::new(access_token, refresh_token);
            let session = client
                .set_session(&credential)
                .await
                .context("Credential was not accepted")?;
            println!(
                "Session stored for user {}",
                session.user.map(|u| u.id).unwrap_or_default()
            );
        }
        SessionAction::Clear => {
            client.sign_out().await.context("Failed to clear session")?;
            println!("Session cleared");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackendConfig {
        BackendConfig::new("https://abcdefgh.supabase.co", "anon").unwrap()
    }

    #[test]
    fn test_session_commands_need_native_context() {
        assert!(require_native(ExecutionContext::Native).is_ok());
        let err = require_native(ExecutionContext::Web).unwrap_err();
        assert!(err.to_string().contains("native context"));
    }

    #[tokio::test]
    async fn test_whoami_without_credentials_is_unauthenticated() {
        // No credential source present, so nothing reaches the network
        assert!(!whoami(config(), None, None, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_whoami_rejects_invalid_header_value() {
        let err = whoami(config(), Some("Bearer \n".into()), None, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Authorization"));
    }
}
