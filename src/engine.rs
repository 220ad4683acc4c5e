use crate::buffer::ReadingSpool;
use crate::error::{ReadError, StoreError};
use crate::reading::{Reading, SensorIdentity};
use std::time::Duration;
use tokio::sync::mpsc;

pub trait SensorSource {
    fn identity(&self) -> SensorIdentity;
    async fn read_once(&mut self) -> Result<Reading, ReadError>;
}

pub trait ConnectivityProbe {
    /// Must not fail; any internal fault maps to `false`.
    async fn is_reachable(&self) -> bool;
}

/// Computed fresh every cycle; never cached, since connectivity and farm
/// assignment can change at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationVerdict {
    Authorized,
    Unauthorized,
    Unknown,
}

pub trait AuthorizationOracle {
    async fn verdict(&self, machine_id: &str) -> AuthorizationVerdict;
}

pub trait RemoteStore {
    async fn write(&self, reading: &Reading) -> Result<(), StoreError>;
    async fn register(&self, identity: &SensorIdentity) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Deliver the fresh reading to the remote store, then try to drain.
    Online,
    /// Stage the reading in the local spool until connectivity returns.
    Offline,
    /// Sensor is excluded from collection this cycle; do not read it.
    Skip,
}

/// Routing policy for one cycle. An unreachable network always spools
/// (losing data is worse than one cycle of wrongly-permitted collection);
/// an unauthorized or unconfirmable verdict on a reachable network excludes
/// the sensor instead. The verdict is `None` when the network was
/// unreachable and the oracle was never consulted.
pub fn resolve_route(reachable: bool, verdict: Option<AuthorizationVerdict>) -> Route {
    match (reachable, verdict) {
        (false, _) => Route::Offline,
        (true, Some(AuthorizationVerdict::Authorized)) => Route::Online,
        (true, _) => Route::Skip,
    }
}

pub struct Engine<S, P, A, R> {
    sensor: S,
    probe: P,
    oracle: A,
    store: R,
    spool: ReadingSpool,
    interval: Duration,
    identity: SensorIdentity,
}

impl<S, P, A, R> Engine<S, P, A, R>
where
    S: SensorSource,
    P: ConnectivityProbe,
    A: AuthorizationOracle,
    R: RemoteStore,
{
    pub fn new(
        sensor: S,
        probe: P,
        oracle: A,
        store: R,
        spool: ReadingSpool,
        interval: Duration,
    ) -> Self {
        let identity = sensor.identity();
        Self {
            sensor,
            probe,
            oracle,
            store,
            spool,
            interval,
            identity,
        }
    }

    /// Fixed-delay cycle loop: one cycle runs to completion, then the timer
    /// starts. The stop signal is only observed between cycles, so a reading
    /// is never routed and abandoned half-written.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) {
        self.register_sensor().await;
        loop {
            self.run_cycle().await;
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("stop requested; shutting down after completed cycle");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// One registration attempt at startup. Registration is independent of
    /// collection routing, so failure only logs and the loop proceeds.
    async fn register_sensor(&mut self) {
        if !self.probe.is_reachable().await {
            tracing::info!("no connectivity; sensor registration deferred");
            return;
        }
        match self.store.register(&self.identity).await {
            Ok(()) => {
                tracing::info!(machine_id = %self.identity.machine_id, "sensor registered")
            }
            Err(err) => tracing::warn!(
                machine_id = %self.identity.machine_id,
                error = %err,
                "sensor registration failed"
            ),
        }
    }

    pub async fn run_cycle(&mut self) {
        let reachable = self.probe.is_reachable().await;
        let verdict = if reachable {
            Some(self.oracle.verdict(&self.identity.machine_id).await)
        } else {
            None
        };

        match resolve_route(reachable, verdict) {
            Route::Skip => {
                tracing::info!(
                    machine_id = %self.identity.machine_id,
                    verdict = ?verdict,
                    "sensor is not cleared for collection; skipping cycle"
                );
            }
            Route::Online => self.collect_online().await,
            Route::Offline => self.collect_offline().await,
        }
    }

    async fn collect_online(&mut self) {
        let reading = match self.sensor.read_once().await {
            Ok(reading) => reading,
            Err(err) => {
                tracing::warn!(error = %err, "sensor read failed; nothing to route this cycle");
                return;
            }
        };
        match self.store.write(&reading).await {
            Ok(()) => {
                tracing::info!(machine_id = %reading.sensor_id, "reading stored remotely");
                self.drain_spool().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "remote write failed; spooling reading");
                if let Err(err) = self.spool.append(reading) {
                    tracing::error!(error = %err, "spool append failed; reading lost");
                }
            }
        }
    }

    async fn collect_offline(&mut self) {
        match self.sensor.read_once().await {
            Ok(reading) => match self.spool.append(reading) {
                Ok(()) => tracing::info!(spooled = self.spool.len(), "offline; reading spooled"),
                Err(err) => tracing::error!(error = %err, "spool append failed; reading lost"),
            },
            Err(err) => tracing::warn!(error = %err, "sensor read failed while offline"),
        }
    }

    /// Forward the spool after a confirmed fresh write. The spool is cleared
    /// only once every entry has been accepted; any failure leaves it fully
    /// intact, so a later retry may duplicate remote rows but can never lose
    /// a buffered reading.
    async fn drain_spool(&mut self) {
        let pending = self.spool.load_all();
        if pending.is_empty() {
            return;
        }
        tracing::info!(pending = pending.len(), "draining spooled readings");
        for reading in &pending {
            if let Err(err) = self.store.write(reading).await {
                tracing::warn!(
                    error = %err,
                    pending = pending.len(),
                    "drain interrupted; spool left intact"
                );
                return;
            }
        }
        match self.spool.clear() {
            Ok(()) => tracing::info!(drained = pending.len(), "spool drained"),
            Err(err) => tracing::error!(
                error = %err,
                "spool clear failed after drain; duplicates possible on next drain"
            ),
        }
    }
}
