//! sessionctl
//!
//! Command-line client for a token-authenticated API:
//! 1. Logs in (or signs up) and keeps the access/refresh pair on disk
//! 2. Sends requests with the stored bearer token
//! 3. Refreshes an expired access token once and replays the request
//! 4. Ends the session when the refresh token is no longer accepted

mod cli;
mod config;
mod error;

use anyhow::{Context, Result};
use session_auth::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use session_refresh::{SessionClient, SessionStatus};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{ApiRequest, ReqwestTransport};

use crate::cli::{Command, USAGE};
use crate::config::Config;

/// How long `logout` waits for the revoke call before exiting anyway
const REVOKE_GRACE: Duration = Duration::from_secs(3);

/// Exit status when the session ended and the user must log in again
const EXIT_SESSION_ENDED: u8 = 2;

/// How a command finished.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Done,
    SessionEnded,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing with JSON output on stderr and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = cli::parse(std::env::args().skip(1))?;
    if cli.command == Command::Help {
        println!("{USAGE}");
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = Config::resolve_path(cli.config.as_deref());
    debug!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let store: Arc<dyn CredentialStore> = if cli.ephemeral {
        Arc::new(MemoryCredentialStore::new())
    } else {
        let path = config.store_path()?;
        let store = FileCredentialStore::load(path.clone())
            .await
            .with_context(|| format!("failed to open credential file {}", path.display()))?;
        Arc::new(store)
    };

    let transport = ReqwestTransport::new(config.api.base_url.clone(), config.timeout())
        .context("failed to build HTTP client")?;
    info!(
        base_url = %config.api.base_url,
        timeout_secs = config.api.timeout_secs,
        ephemeral = cli.ephemeral,
        "configuration loaded"
    );

    let client = SessionClient::new(Arc::new(transport), store).await;
    let mut stdout = std::io::stdout().lock();

    match run(&client, cli.command, &config, &mut stdout).await? {
        Outcome::Done => Ok(ExitCode::SUCCESS),
        Outcome::SessionEnded => Ok(ExitCode::from(EXIT_SESSION_ENDED)),
    }
}

/// Execute one command, writing user-facing output to `out`.
async fn run(
    client: &SessionClient,
    command: Command,
    config: &Config,
    out: &mut impl Write,
) -> Result<Outcome> {
    match command {
        Command::Login { email, password } => {
            let password = password_for(password, config)?;
            client
                .login(&email, &password)
                .await
                .context("login failed")?;
            writeln!(out, "logged in as {email}")?;
        }
        Command::Signup {
            username,
            email,
            password,
        } => {
            let password = password_for(password, config)?;
            client
                .signup(&username, &email, &password)
                .await
                .context("signup failed")?;
            writeln!(out, "account created, logged in as {email}")?;
        }
        Command::Logout => {
            if let Some(revoke) = client.logout().await {
                if tokio::time::timeout(REVOKE_GRACE, revoke).await.is_err() {
                    warn!("revoke still pending at exit");
                }
            }
            writeln!(out, "logged out")?;
        }
        Command::Status => {
            if client.is_authenticated().await {
                match client.user().await {
                    Some(user) => writeln!(out, "authenticated as {}", user.email)?,
                    None => writeln!(out, "authenticated")?,
                }
            } else {
                writeln!(out, "unauthenticated")?;
            }
        }
        Command::Request { method, path, body } => {
            let mut request = ApiRequest::new(method, path);
            if let Some(body) = body {
                request = request.with_body(body);
            }

            match client.send(request).await {
                Ok(response) => writeln!(out, "{}", response.text())?,
                Err(e) if e.is_unauthorized() && client.status() == SessionStatus::Unauthenticated => {
                    writeln!(
                        out,
                        "session ended, log in again with `sessionctl login <email>`"
                    )?;
                    return Ok(Outcome::SessionEnded);
                }
                Err(e) => return Err(e).context("request failed"),
            }
        }
        Command::Help => writeln!(out, "{USAGE}")?,
    }
    Ok(Outcome::Done)
}

fn password_for(flag: Option<String>, config: &Config) -> Result<String> {
    flag.or_else(|| config.password.as_ref().map(|p| p.expose().clone()))
        .ok_or_else(|| error::Error::MissingPassword.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use session_auth::CredentialPair;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct MockApi {
        refresh_calls: Arc<AtomicUsize>,
        logout_calls: Arc<AtomicUsize>,
    }

    /// Mock API server. Login hands out an already-expired access token;
    /// only `at_fresh` (from a refresh with `rt_ok`) opens `/api/projects/`.
    async fn start_mock_api() -> (String, MockApi) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{addr}");
        let api = MockApi::default();

        let app = axum::Router::new()
            .route(
                "/token/",
                post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                    if body["password"] == "hunter2" {
                        (
                            StatusCode::OK,
                            axum::Json(serde_json::json!({"access": "at_stale", "refresh": "rt_ok"})),
                        )
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            axum::Json(serde_json::json!({
                                "detail": "No active account found with the given credentials"
                            })),
                        )
                    }
                }),
            )
            .route(
                "/token/refresh/",
                post({
                    let calls = api.refresh_calls.clone();
                    move |axum::Json(body): axum::Json<serde_json::Value>| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if body["refresh"] == "rt_ok" {
                            (StatusCode::OK, axum::Json(serde_json::json!({"access": "at_fresh"})))
                        } else {
                            (
                                StatusCode::UNAUTHORIZED,
                                axum::Json(serde_json::json!({
                                    "detail": "Token is invalid or expired",
                                    "code": "token_not_valid"
                                })),
                            )
                        }
                    }
                }),
            )
            .route(
                "/logout/",
                post({
                    let calls = api.logout_calls.clone();
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        (
                            StatusCode::RESET_CONTENT,
                            axum::Json(serde_json::json!({"message": "Logout successful"})),
                        )
                    }
                }),
            )
            .route(
                "/api/projects/",
                get(|headers: HeaderMap| async move {
                    let bearer = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("");
                    if bearer == "Bearer at_fresh" {
                        (StatusCode::OK, axum::Json(serde_json::json!([{"id": 1, "name": "alpha"}])))
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            axum::Json(serde_json::json!({"detail": "Given token not valid"})),
                        )
                    }
                }),
            );

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (url, api)
    }

    async fn client_for(url: &str, store: Arc<dyn CredentialStore>) -> SessionClient {
        let transport = ReqwestTransport::new(url, Duration::from_secs(5)).unwrap();
        SessionClient::new(Arc::new(transport), store).await
    }

    fn request(path: &str) -> Command {
        Command::Request {
            method: transport::Method::GET,
            path: path.into(),
            body: None,
        }
    }

    #[tokio::test]
    async fn login_then_stale_token_is_refreshed_and_replayed() {
        let (url, api) = start_mock_api().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = Arc::new(FileCredentialStore::load(path.clone()).await.unwrap());
        let client = client_for(&url, store).await;
        let config = Config::default();

        let mut out = Vec::new();
        let login = Command::Login {
            email: "ada@example.com".into(),
            password: Some("hunter2".into()),
        };
        assert_eq!(run(&client, login, &config, &mut out).await.unwrap(), Outcome::Done);

        let outcome = run(&client, request("/api/projects/"), &config, &mut out)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Done);

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("logged in as ada@example.com"));
        assert!(printed.contains(r#""name":"alpha""#), "got: {printed}");
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);

        // The refreshed access token was persisted next to the original refresh token
        let reloaded = FileCredentialStore::load(path).await.unwrap();
        let pair = reloaded.get().await.unwrap();
        assert_eq!(pair.access_token.expose(), "at_fresh");
        assert_eq!(pair.refresh_token.expose(), "rt_ok");
    }

    #[tokio::test]
    async fn rejected_refresh_ends_session() {
        let (url, api) = start_mock_api().await;
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "at_stale", "rt_revoked",
        )));
        let client = client_for(&url, store.clone()).await;

        let mut out = Vec::new();
        let outcome = run(&client, request("/api/projects/"), &Config::default(), &mut out)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::SessionEnded);
        assert!(String::from_utf8(out).unwrap().contains("log in again"));
        assert!(store.get().await.is_none(), "credentials cleared");
        assert_eq!(client.status(), SessionStatus::Unauthenticated);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_password_reports_server_detail() {
        let (url, api) = start_mock_api().await;
        let client = client_for(&url, Arc::new(MemoryCredentialStore::new())).await;

        let login = Command::Login {
            email: "ada@example.com".into(),
            password: Some("wrong".into()),
        };
        let err = run(&client, login, &Config::default(), &mut Vec::new())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("No active account"), "got: {err:#}");
        assert!(!client.is_authenticated().await);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logout_sends_revoke_and_status_reflects_it() {
        let (url, api) = start_mock_api().await;
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "at_fresh", "rt_ok",
        )));
        let client = client_for(&url, store).await;
        let config = Config::default();

        let mut out = Vec::new();
        run(&client, Command::Status, &config, &mut out).await.unwrap();
        run(&client, Command::Logout, &config, &mut out).await.unwrap();
        run(&client, Command::Status, &config, &mut out).await.unwrap();

        let printed = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines, vec!["authenticated", "logged out", "unauthenticated"]);
        assert_eq!(api.logout_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn login_without_password_fails_before_network() {
        let (url, api) = start_mock_api().await;
        let client = client_for(&url, Arc::new(MemoryCredentialStore::new())).await;

        let login = Command::Login {
            email: "ada@example.com".into(),
            password: None,
        };
        let err = run(&client, login, &Config::default(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SESSIONCTL_PASSWORD"));
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }
}
