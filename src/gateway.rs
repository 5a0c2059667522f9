//! Connection lifecycle for one serial bridge shared by many meters.
//!
//! A [`Gateway`] owns at most one [`Transport`] handle. All access goes through its
//! read-write lock: [`Gateway::lock`] hands out a [`SessionGuard`] that a driver keeps
//! for the whole of one device interaction (write, settle, verify), so requests for
//! different slaves never interleave on the wire.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use log::*;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::sleep;

use crate::endpoint::Endpoint;
use crate::error::{MeterError, Result};
use crate::transport::{ModbusFactory, Transport, TransportError, TransportFactory};

/// Pause between tearing down a link and opening its replacement.
pub const INIT_SETTLE_DELAY: Duration = Duration::from_millis(100);
/// Extra wait before opening when the bridge refused the previous attempt.
pub const REFUSED_BACKOFF: Duration = Duration::from_secs(5);
pub const RECONNECT_ATTEMPTS: u32 = 6;
/// Reconnect attempt `n` (from 0) waits `n * RECONNECT_STEP` before opening.
pub const RECONNECT_STEP: Duration = Duration::from_millis(50);

/// Bounded retry of a single request. Every failed attempt but the last is followed by
/// a reconnect; `settle` is slept after every attempt, successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub settle: Duration,
}

impl RetryPolicy {
    pub const READ: RetryPolicy = RetryPolicy {
        retries: 3,
        settle: Duration::ZERO,
    };
}

/// One request against the open handle, as built by [`Session::exchange`] callers.
pub type Exchange<'t, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 't>>;

/// Link state guarded by the gateway lock.
pub struct Session<F: TransportFactory> {
    factory: F,
    endpoint: Option<Endpoint>,
    client: Option<F::Transport>,
    last_error: Option<TransportError>,
}

pub type SessionGuard<'a, F> = RwLockWriteGuard<'a, Session<F>>;

impl<F: TransportFactory> Session<F> {
    fn new(factory: F) -> Self {
        Self {
            factory,
            endpoint: None,
            client: None,
            last_error: None,
        }
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Outcome of the most recent open, `None` after a success.
    pub fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    pub fn client(&mut self) -> Option<&mut F::Transport> {
        self.client.as_mut()
    }

    /// Builds and opens a handle for `endpoint`.
    ///
    /// A live handle for an identical endpoint is kept as is. A live handle for a
    /// different endpoint is closed (its error ignored) before the new one is opened.
    /// If the open fails the session is left without a handle; the endpoint is kept so
    /// that [`Session::reinit`] can try again.
    pub async fn init(&mut self, endpoint: Endpoint) -> Result<()> {
        if let Some(mut old) = self.client.take() {
            if self.endpoint.as_ref() == Some(&endpoint) {
                debug!("gateway {endpoint} already open");
                self.client = Some(old);
                return Ok(());
            }
            info!("gateway parameters changed, reopening with {endpoint}");
            if let Err(e) = old.close().await {
                debug!("closing previous link failed, ignored: {e}");
            }
            drop(old);
            sleep(INIT_SETTLE_DELAY).await;
        }
        self.endpoint = Some(endpoint.clone());

        let mut client = match self.factory.create(&endpoint) {
            Ok(client) => client,
            Err(e) => {
                error!("cannot create link for {endpoint}: {e}");
                self.last_error = Some(e.clone());
                return Err(e.into());
            }
        };

        if self
            .last_error
            .as_ref()
            .is_some_and(TransportError::is_connection_refused)
        {
            warn!(
                "gateway refused the last connection, waiting {} s before retrying",
                REFUSED_BACKOFF.as_secs()
            );
            sleep(REFUSED_BACKOFF).await;
        }

        match client.open().await {
            Ok(()) => {
                info!("gateway {endpoint} connected");
                self.last_error = None;
                self.client = Some(client);
                Ok(())
            }
            Err(e) => {
                warn!("opening {endpoint} failed: {e}");
                self.last_error = Some(e.clone());
                Err(e.into())
            }
        }
    }

    /// Runs [`Session::init`] again with the stored endpoint.
    pub async fn reinit(&mut self) -> Result<()> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| TransportError::not_connected("gateway was never initialised"))?;
        self.init(endpoint).await
    }

    /// Closes and re-opens the existing handle, up to [`RECONNECT_ATTEMPTS`] times with a
    /// linearly growing pause. Without a handle this falls back to [`Session::reinit`].
    pub async fn reconnect(&mut self) -> Result<()> {
        let Some(client) = self.client.as_mut() else {
            debug!("no link to reconnect, reinitialising");
            return self.reinit().await;
        };

        let mut outcome = Ok(());
        for attempt in 0..RECONNECT_ATTEMPTS {
            if let Err(e) = client.close().await {
                debug!("close before reconnect failed, ignored: {e}");
            }
            sleep(RECONNECT_STEP * attempt).await;
            outcome = client.open().await;
            match &outcome {
                Ok(()) => {
                    info!("gateway reconnected after {} attempt(s)", attempt + 1);
                    break;
                }
                Err(e) => warn!(
                    "reconnect attempt {}/{RECONNECT_ATTEMPTS} failed: {e}",
                    attempt + 1
                ),
            }
        }

        self.last_error = outcome.as_ref().err().cloned();
        outcome.map_err(|e| {
            error!("gateway unreachable, giving up: {e}");
            MeterError::from(e)
        })
    }

    /// Reinitialises when there is no handle, e.g. after a failed init.
    pub async fn ensure_client(&mut self) -> Result<()> {
        if self.client.is_none() {
            self.reinit().await?;
        }
        Ok(())
    }

    /// Runs `op` against the handle under `policy`.
    ///
    /// A failed attempt with retries left triggers [`Session::reconnect`]; if that fails
    /// its error is returned at once. The error of the last attempt is returned when
    /// the retries run out.
    pub async fn exchange<T, Op>(&mut self, policy: RetryPolicy, mut op: Op) -> Result<T>
    where
        Op: for<'t> FnMut(&'t mut F::Transport) -> Exchange<'t, T>,
    {
        let mut retries_left = policy.retries;
        loop {
            let client = self
                .client
                .as_mut()
                .ok_or_else(|| TransportError::not_connected("gateway has no open link"))?;
            let now = Instant::now();
            let outcome = op(client).await;
            if !policy.settle.is_zero() {
                sleep(policy.settle).await;
            }

            match outcome {
                Ok(value) => {
                    debug!("exchange done in {} ms", now.elapsed().as_millis());
                    return Ok(value);
                }
                Err(e) if retries_left == 0 => {
                    error!("exchange failed, retries exhausted: {e}");
                    return Err(e.into());
                }
                Err(e) => {
                    retries_left -= 1;
                    warn!("exchange failed ({retries_left} retries left): {e}");
                    self.reconnect().await?;
                }
            }
        }
    }
}

/// A serial bridge shared by the drivers of every meter behind it.
pub struct Gateway<F: TransportFactory = ModbusFactory> {
    session: RwLock<Session<F>>,
}

impl Default for Gateway<ModbusFactory> {
    fn default() -> Self {
        Self::new(ModbusFactory)
    }
}

impl<F: TransportFactory> Gateway<F> {
    pub fn new(factory: F) -> Self {
        Self {
            session: RwLock::new(Session::new(factory)),
        }
    }

    /// Exclusive access for a multi-request interaction with one device.
    pub async fn lock(&self) -> SessionGuard<'_, F> {
        self.session.write().await
    }

    /// Shared access for inspecting link state.
    pub async fn read(&self) -> RwLockReadGuard<'_, Session<F>> {
        self.session.read().await
    }

    pub async fn init(&self, endpoint: Endpoint) -> Result<()> {
        self.lock().await.init(endpoint).await
    }

    pub async fn reinit(&self) -> Result<()> {
        self.lock().await.reinit().await
    }

    pub async fn reconnect(&self) -> Result<()> {
        self.lock().await.reconnect().await
    }

    pub async fn is_connected(&self) -> bool {
        self.read().await.has_client()
    }

    pub async fn last_error(&self) -> Option<TransportError> {
        self.read().await.last_error().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Call, MockFactory};
    use crate::transport::TransportErrorKind;

    fn endpoint() -> Endpoint {
        Endpoint::new("rtuovertcp://127.0.0.1:1502", 9600, Duration::from_secs(5)).unwrap()
    }

    fn gateway() -> (Gateway<MockFactory>, MockFactory) {
        let factory = MockFactory::new();
        (Gateway::new(factory.clone()), factory)
    }

    #[tokio::test(start_paused = true)]
    async fn init_opens_one_handle() {
        let (gw, mock) = gateway();
        gw.init(endpoint()).await.unwrap();

        assert!(gw.is_connected().await);
        assert_eq!(gw.last_error().await, None);
        assert_eq!(mock.state().creates, 1);
        assert_eq!(mock.state().calls, vec![Call::Open]);
    }

    #[tokio::test(start_paused = true)]
    async fn init_with_same_endpoint_keeps_handle() {
        let (gw, mock) = gateway();
        gw.init(endpoint()).await.unwrap();
        gw.init(endpoint()).await.unwrap();

        assert_eq!(mock.state().creates, 1);
        assert_eq!(mock.state().calls, vec![Call::Open]);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_endpoint_tears_down_and_settles() {
        let (gw, mock) = gateway();
        gw.init(endpoint()).await.unwrap();

        let faster = Endpoint::new("rtuovertcp://127.0.0.1:1502", 19200, Duration::from_secs(5))
            .unwrap();
        let now = tokio::time::Instant::now();
        gw.init(faster.clone()).await.unwrap();

        assert!(now.elapsed() >= INIT_SETTLE_DELAY);
        assert_eq!(mock.state().creates, 2);
        assert_eq!(mock.state().calls, vec![Call::Open, Call::Close, Call::Open]);
        assert_eq!(gw.read().await.endpoint(), Some(&faster));
    }

    /// A failed open after teardown leaves no handle; the endpoint survives for reinit.
    #[tokio::test(start_paused = true)]
    async fn failed_init_leaves_session_without_handle() {
        let (gw, mock) = gateway();
        mock.fail_opens(TransportErrorKind::Io, 1);

        let err = gw.init(endpoint()).await.unwrap_err();
        assert!(err.is_connection());
        assert!(!gw.is_connected().await);
        assert_eq!(
            gw.last_error().await.map(|e| e.kind()),
            Some(TransportErrorKind::Io)
        );

        gw.reinit().await.unwrap();
        assert!(gw.is_connected().await);
        assert_eq!(gw.last_error().await, None);
        assert_eq!(mock.state().creates, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_backs_off_before_next_open() {
        let (gw, mock) = gateway();
        mock.fail_opens(TransportErrorKind::ConnectionRefused, 1);
        gw.init(endpoint()).await.unwrap_err();

        let now = tokio::time::Instant::now();
        gw.reinit().await.unwrap();
        assert!(now.elapsed() >= REFUSED_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_do_not_back_off() {
        let (gw, mock) = gateway();
        mock.fail_opens(TransportErrorKind::Timeout, 1);
        gw.init(endpoint()).await.unwrap_err();

        let now = tokio::time::Instant::now();
        gw.reinit().await.unwrap();
        assert!(now.elapsed() < REFUSED_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn reinit_without_endpoint_fails() {
        let (gw, mock) = gateway();
        assert!(gw.reinit().await.unwrap_err().is_connection());
        assert_eq!(mock.state().creates, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_six_opens() {
        let (gw, mock) = gateway();
        gw.init(endpoint()).await.unwrap();
        mock.clear_calls();
        mock.fail_opens(TransportErrorKind::Io, 10);

        let now = tokio::time::Instant::now();
        let err = gw.reconnect().await.unwrap_err();

        assert!(err.is_connection());
        assert_eq!(mock.state().opens(), 6);
        assert_eq!(mock.state().closes(), 6);
        // 0 + 50 + 100 + 150 + 200 + 250 ms
        let waited = now.elapsed();
        assert!(waited >= Duration::from_millis(750), "{waited:?}");
        assert!(waited < Duration::from_millis(800), "{waited:?}");
        assert!(gw.last_error().await.is_some());
        // the handle is kept for the next attempt
        assert!(gw.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_stops_at_first_success_and_reuses_handle() {
        let (gw, mock) = gateway();
        gw.init(endpoint()).await.unwrap();
        mock.clear_calls();
        mock.fail_opens(TransportErrorKind::Io, 2);

        gw.reconnect().await.unwrap();

        assert_eq!(mock.state().opens(), 3);
        assert_eq!(mock.state().creates, 1);
        assert_eq!(gw.last_error().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_without_handle_reinitialises() {
        let (gw, mock) = gateway();
        mock.fail_opens(TransportErrorKind::Io, 1);
        gw.init(endpoint()).await.unwrap_err();

        gw.reconnect().await.unwrap();
        assert!(gw.is_connected().await);
        assert_eq!(mock.state().creates, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exchange_retries_through_reconnects() {
        let (gw, mock) = gateway();
        gw.init(endpoint()).await.unwrap();
        mock.set_holding(1, 0, &[42]);
        mock.fail_exchanges(TransportErrorKind::Timeout, 2);

        let mut session = gw.lock().await;
        let words = session
            .exchange(RetryPolicy::READ, |c| c.read_holding_registers(1, 0, 1))
            .await
            .unwrap();
        drop(session);

        assert_eq!(words, vec![42]);
        assert_eq!(mock.state().exchanges().len(), 3);
        // initial open plus one successful open per reconnect
        assert_eq!(mock.state().opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exchange_returns_last_error_when_retries_run_out() {
        let (gw, mock) = gateway();
        gw.init(endpoint()).await.unwrap();
        mock.fail_exchanges(TransportErrorKind::Timeout, 100);

        let mut session = gw.lock().await;
        let err = session
            .exchange(RetryPolicy::READ, |c| c.read_holding_registers(1, 0, 1))
            .await
            .unwrap_err();
        drop(session);

        match err {
            MeterError::Connection(e) => assert_eq!(e.kind(), TransportErrorKind::Timeout),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(mock.state().exchanges().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exchange_aborts_when_reconnect_fails() {
        let (gw, mock) = gateway();
        gw.init(endpoint()).await.unwrap();
        mock.fail_exchanges(TransportErrorKind::Timeout, 1);
        mock.fail_opens(TransportErrorKind::ConnectionRefused, 6);

        let mut session = gw.lock().await;
        let err = session
            .exchange(RetryPolicy::READ, |c| c.read_holding_registers(1, 0, 1))
            .await
            .unwrap_err();
        drop(session);

        match err {
            MeterError::Connection(e) => assert!(e.is_connection_refused()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(mock.state().exchanges().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_follows_every_attempt() {
        let (gw, mock) = gateway();
        gw.init(endpoint()).await.unwrap();
        mock.fail_exchanges(TransportErrorKind::Timeout, 1);

        let policy = RetryPolicy {
            retries: 3,
            settle: Duration::from_millis(200),
        };
        let now = tokio::time::Instant::now();
        let mut session = gw.lock().await;
        session
            .exchange(policy, |c| c.write_register(1, 0x10, 0x5555))
            .await
            .unwrap();
        drop(session);

        // two settles plus the first reconnect attempt, which does not wait
        let waited = now.elapsed();
        assert!(waited >= Duration::from_millis(400), "{waited:?}");
        assert!(waited < Duration::from_millis(450), "{waited:?}");
    }
}
