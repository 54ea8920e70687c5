//! Background token refresh
//!
//! Spawns a periodic task that refreshes the session tokens once 90% of
//! their reported lifetime has passed. Tokens without a reported lifetime
//! are left alone; the poll loop's 401 handling covers them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use skoda_auth::SessionTokens;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::Session;

/// Fraction of the token lifetime after which a refresh is attempted.
pub const REFRESH_FRACTION: f64 = 0.9;

/// What one refresh check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    NoTokens,
    NotDue,
    Refreshed,
    /// Refresh token rejected (401/403); tokens cleared.
    Rejected,
    /// Transient failure; retried on the next tick.
    Failed,
}

/// Spawn a background task that checks the tokens every `interval`.
pub fn spawn_refresh_task(session: Arc<Session>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; tokens were just obtained
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&session, Instant::now()).await;
        }
    })
}

/// Run one refresh check as of `now`.
pub async fn refresh_cycle(session: &Session, now: Instant) -> RefreshOutcome {
    let _guard = session.auth_guard().await;

    let Some(tokens) = session.tokens().await else {
        return RefreshOutcome::NoTokens;
    };
    if !tokens.needs_refresh_at(now, REFRESH_FRACTION) {
        return RefreshOutcome::NotDue;
    }

    debug!(issuer = ?tokens.issuer, "token lifetime mostly elapsed, refreshing");
    let current_refresh = tokens.refresh_token.expose().as_str();
    let refreshed = skoda_auth::refresh_tokens(
        session.executor(),
        session.profile(),
        tokens.issuer,
        current_refresh,
    )
    .await;
    match refreshed {
        Ok(response) => match SessionTokens::from_response(
            response,
            tokens.issuer,
            Some(current_refresh),
        ) {
            Ok(fresh) => {
                session.replace_tokens(fresh).await;
                info!("background token refresh succeeded");
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                warn!(error = %e, "refresh response unusable, will retry next cycle");
                RefreshOutcome::Failed
            }
        },
        Err(skoda_auth::Error::Http(e)) if matches!(e.status(), Some(401 | 403)) => {
            warn!(error = %e, "refresh token rejected, clearing session");
            session.clear_tokens().await;
            RefreshOutcome::Rejected
        }
        Err(e) => {
            warn!(error = %e, "background refresh failed (transient), will retry next cycle");
            RefreshOutcome::Failed
        }
    }
}
