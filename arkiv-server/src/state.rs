use std::sync::Arc;

use arkiv_core::AppContext;

use crate::middleware::rate_limit::TokenBucketLimiter;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub limiter: Arc<TokenBucketLimiter>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let rate_limit = &ctx.cfg.hardening.rate_limit;
        let limiter = Arc::new(TokenBucketLimiter::new(rate_limit.rps, rate_limit.burst));
        Self { ctx, limiter }
    }
}
