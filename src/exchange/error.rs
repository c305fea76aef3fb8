// =============================================================================
// Exchange error taxonomy
// =============================================================================
//
// The retry logic in the REST clients branches on these kinds:
//   - Transport errors and 5xx responses are retried with backoff.
//   - RateLimited (HTTP 418/429) honours Retry-After before backing off.
//   - TimeSkew (Binance -1021/-1022) forces one server-time resync.
//   - Filter failures (below min qty / price / notional) are never retried;
//     the control loop treats them as "skip this action".
// =============================================================================

use thiserror::Error;

use crate::exchange::filters::FilterError;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rate limited (HTTP {status}) after {attempts} attempts")]
    RateLimited { status: u16, attempts: u32 },

    #[error("timestamp/signature rejected (code {code}): {msg}")]
    TimeSkew { code: i64, msg: String },

    #[error("exchange rejected request (HTTP {status}, code {code:?}): {msg}")]
    Api {
        status: u16,
        code: Option<i64>,
        msg: String,
    },

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("missing BINANCE_API_KEY and/or BINANCE_API_SECRET")]
    MissingCredentials,

    #[error("malformed exchange response: {0}")]
    Malformed(String),
}
