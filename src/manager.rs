//! Connection managers: own the final pipe stage and the outbound dialer.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{info, warn};

use crate::context::Context;
use crate::dialer::{Dialer, QuotaDialer, TcpDialer, DEFAULT_DIAL_TIMEOUT};
use crate::handler::{Handler, Outcome};
use crate::pipe::{pipe, Duplex, Statistic};
use crate::quota::{QuotaConn, QuotaLedger, LOW_WATER_MARK};
use crate::Result;

pub const DEFAULT_ANALYSIS_INTERVAL: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_QUOTA_PER_PERIOD: i64 = 10 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub dial_timeout: Duration,
    /// Period of the statistics log line
    pub analysis_interval: Duration,
    /// Period of the quota refill
    pub refill_interval: Duration,
    /// Bytes allowed per direction per refill period
    pub quota_per_period: i64,
    pub low_water_mark: i64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            analysis_interval: DEFAULT_ANALYSIS_INTERVAL,
            refill_interval: DEFAULT_REFILL_INTERVAL,
            quota_per_period: DEFAULT_QUOTA_PER_PERIOD,
            low_water_mark: LOW_WATER_MARK,
        }
    }
}

/// Strategy for dialing targets and piping negotiated connections.
pub trait ConnManager: Send + Sync {
    fn dialer(&self) -> Arc<dyn Dialer>;
    fn pipe_handler(&self) -> Arc<dyn Handler>;
}

struct AccessShared {
    active: AtomicI32,
    stats: Statistic,
}

/// Plain manager: fixed-timeout dialer, unmetered pipes.
#[derive(Clone)]
pub struct AccessManager {
    shared: Arc<AccessShared>,
    dialer: Arc<dyn Dialer>,
}

impl AccessManager {
    /// Must be called inside a tokio runtime; starts the statistics daemon.
    pub fn new(config: &ManagerConfig) -> Self {
        let shared = Arc::new(AccessShared {
            active: AtomicI32::new(0),
            stats: Statistic::new(),
        });
        spawn_statistic_daemon(Arc::downgrade(&shared), config.analysis_interval);

        Self {
            shared,
            dialer: Arc::new(TcpDialer::new(config.dial_timeout)),
        }
    }

    pub fn active(&self) -> i32 {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &Statistic {
        &self.shared.stats
    }

    async fn pipe_target<T: Duplex>(&self, ctx: &mut Context, target: T) -> Result<Outcome> {
        let Some(source) = ctx.take_source() else {
            warn!("source closed before piping");
            return Ok(Outcome::Abort);
        };

        info!(addr = %ctx.target_addr(), "start piping");
        let _active = ActiveGuard::enter(&self.shared.active);
        let (read, written) = pipe(source, target, &self.shared.stats).await;
        info!(read, written, "finish piping");

        Ok(Outcome::Continue)
    }
}

impl ConnManager for AccessManager {
    fn dialer(&self) -> Arc<dyn Dialer> {
        Arc::clone(&self.dialer)
    }

    fn pipe_handler(&self) -> Arc<dyn Handler> {
        Arc::new(AccessPipe { mngr: self.clone() })
    }
}

struct ActiveGuard<'a>(&'a AtomicI32);

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a AtomicI32) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct AccessPipe {
    mngr: AccessManager,
}

#[async_trait]
impl Handler for AccessPipe {
    async fn handle(&self, ctx: &mut Context) -> Result<Outcome> {
        let Some(target) = ctx.take_target() else {
            warn!("no target negotiated");
            return Ok(Outcome::AbortAndClose);
        };
        self.mngr.pipe_target(ctx, target).await
    }
}

fn spawn_statistic_daemon(shared: Weak<AccessShared>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let (read, written) = shared.stats.reset();
            info!(
                comp = "mngr",
                active = shared.active.load(Ordering::SeqCst),
                read,
                written,
                "[statistic]"
            );
        }
    });
}

/// Wraps an [`AccessManager`], metering every target against a ledger that
/// is refilled on a fixed period.
#[derive(Clone)]
pub struct QuotaManager {
    inner: AccessManager,
    ledger: Arc<QuotaLedger>,
}

impl QuotaManager {
    /// Must be called inside a tokio runtime; starts the refill daemon.
    pub fn new(config: &ManagerConfig) -> Self {
        let ledger = Arc::new(QuotaLedger::with_low_water(
            config.quota_per_period,
            config.low_water_mark,
        ));
        spawn_quota_daemon(
            Arc::downgrade(&ledger),
            config.analysis_interval,
            config.refill_interval,
        );

        Self {
            inner: AccessManager::new(config),
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    pub fn active(&self) -> i32 {
        self.inner.active()
    }

    pub fn stats(&self) -> &Statistic {
        self.inner.stats()
    }
}

impl ConnManager for QuotaManager {
    fn dialer(&self) -> Arc<dyn Dialer> {
        Arc::new(QuotaDialer::new(Arc::clone(&self.ledger), self.inner.dialer()))
    }

    fn pipe_handler(&self) -> Arc<dyn Handler> {
        Arc::new(QuotaPipe { mngr: self.clone() })
    }
}

struct QuotaPipe {
    mngr: QuotaManager,
}

#[async_trait]
impl Handler for QuotaPipe {
    async fn handle(&self, ctx: &mut Context) -> Result<Outcome> {
        let Some(target) = ctx.take_target() else {
            warn!("no target negotiated");
            return Ok(Outcome::AbortAndClose);
        };
        let target = QuotaConn::new(target, Arc::clone(&self.mngr.ledger));
        self.mngr.inner.pipe_target(ctx, target).await
    }
}

fn spawn_quota_daemon(ledger: Weak<QuotaLedger>, analysis: Duration, refill: Duration) {
    tokio::spawn(async move {
        let mut analysis_ticker = tokio::time::interval(analysis);
        let mut refill_ticker = tokio::time::interval(refill);
        analysis_ticker.tick().await;
        refill_ticker.tick().await;
        loop {
            tokio::select! {
                _ = analysis_ticker.tick() => {
                    let Some(ledger) = ledger.upgrade() else { break };
                    let (read, written) = ledger.remaining();
                    info!(comp = "mngr", read, written, "[quota] remaining");
                }
                _ = refill_ticker.tick() => {
                    let Some(ledger) = ledger.upgrade() else { break };
                    ledger.refill();
                    info!(comp = "mngr", ceiling = ledger.ceiling(), "[quota] refilled");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ManagerConfig {
        ManagerConfig {
            refill_interval: Duration::from_secs(60),
            quota_per_period: 1000,
            low_water_mark: 0,
            ..ManagerConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_refilled_on_period() {
        let mngr = QuotaManager::new(&small_config());
        let ledger = Arc::clone(mngr.ledger());

        assert!(ledger.try_read(1000));
        assert!(!ledger.try_read(1));
        assert!(ledger.try_write(1000));
        assert!(!ledger.enough());

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(ledger.remaining(), (1000, 1000));
        assert!(ledger.enough());
        assert!(ledger.try_read(1000));
        assert!(!ledger.try_read(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_not_cumulative() {
        let mngr = QuotaManager::new(&small_config());
        let ledger = Arc::clone(mngr.ledger());

        tokio::time::sleep(Duration::from_secs(3 * 60 + 1)).await;

        assert_eq!(ledger.remaining(), (1000, 1000));
    }

    #[tokio::test]
    async fn test_access_manager_starts_idle() {
        let mngr = AccessManager::new(&ManagerConfig::default());
        assert_eq!(mngr.active(), 0);
        assert_eq!(mngr.stats().reset(), (0, 0));
    }
}
