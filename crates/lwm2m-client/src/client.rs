//! Client runtime: connect, periodic update/refresh loop, disconnect

use chrono::Utc;
use lwm2m_core::{SharedRegistry, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::ClientError;
use crate::registration::{RegistrationController, RegistrationParams, RegistrationState};

/// Sensor refresh cadence
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Runtime loop granularity
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Budget for deregistration during disconnect
pub const DEREGISTER_BUDGET: Duration = Duration::from_secs(5);

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint_name: String,
    /// Registration lifetime in seconds; updates are sent every half lifetime
    pub lifetime_secs: u32,
    pub binding_mode: String,
    pub refresh_interval: Duration,
    pub tick_interval: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint_name: "rust-lwm2m-client".to_string(),
            lifetime_secs: 86400,
            binding_mode: "U".to_string(),
            refresh_interval: REFRESH_INTERVAL,
            tick_interval: TICK_INTERVAL,
        }
    }
}

impl ClientSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.lifetime_secs / 2))
    }

    fn registration_params(&self) -> RegistrationParams {
        RegistrationParams {
            endpoint_name: self.endpoint_name.clone(),
            lifetime_secs: self.lifetime_secs,
            binding_mode: self.binding_mode.clone(),
        }
    }
}

/// Requests the runtime loop to stop. Cheap to clone and safe to trigger
/// from any task or a signal handler.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// LwM2M device client
pub struct Client<T: Transport + ?Sized> {
    transport: Arc<T>,
    registry: SharedRegistry,
    settings: ClientSettings,
    registration: RegistrationController<T>,
    dispatcher: Option<Arc<Dispatcher>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<T: Transport + ?Sized> Client<T> {
    pub fn new(transport: Arc<T>, registry: SharedRegistry, settings: ClientSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registration: RegistrationController::new(transport.clone(), registry.clone()),
            transport,
            registry,
            settings,
            dispatcher: None,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.registration.state()
    }

    pub fn location(&self) -> Option<&str> {
        self.registration.location()
    }

    pub fn dispatcher(&self) -> Option<&Arc<Dispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Register with the server, then start answering its reads. A
    /// shutdown request abandons a registration still in flight.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        let params = self.settings.registration_params();
        let mut stop = self.shutdown.subscribe();

        let outcome = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => None,
            result = self.registration.register(&params) => Some(result),
        };
        let Some(result) = outcome else {
            self.registration.abandon_in_flight();
            info!("Shutdown requested during registration");
            return Err(ClientError::Interrupted);
        };
        result?;

        let dispatcher = Arc::new(Dispatcher::new(self.registry.clone()));
        info!(
            addresses = dispatcher.address_count(),
            "Request dispatcher wired"
        );
        self.transport.serve(dispatcher.address_table());
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    /// Drive registration updates and sensor refreshes until shutdown is
    /// requested. A pending update is abandoned when shutdown wins the race.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        match self.registration.state() {
            RegistrationState::Registered | RegistrationState::Updating => {}
            state => return Err(ClientError::NotConnected(state)),
        }

        let update_interval = self.settings.update_interval();
        let refresh_interval = self.settings.refresh_interval;
        info!(
            update_secs = update_interval.as_secs(),
            refresh_secs = refresh_interval.as_secs(),
            "Client running"
        );

        let mut stop = self.shutdown.subscribe();
        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_update = Instant::now();
        let mut last_refresh = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();

            if now.duration_since(last_update) > update_interval {
                last_update = now;
                let interrupted = tokio::select! {
                    biased;
                    _ = stop.wait_for(|stopped| *stopped) => true,
                    result = self.registration.update() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Registration update failed, retrying next cycle");
                        }
                        false
                    }
                };
                if interrupted {
                    self.registration.abandon_in_flight();
                    debug!("Shutdown requested during registration update");
                    break;
                }
            }

            if now.duration_since(last_refresh) > refresh_interval {
                last_refresh = now;
                self.registry.lock().refresh_all(Utc::now());
                debug!("Sensor values refreshed");
            }
        }

        info!("Client loop stopped");
        Ok(())
    }

    /// Deregister within a short budget, release the transport and mark
    /// the lifecycle terminated. Never fails.
    pub async fn disconnect(&mut self) {
        self.shutdown.send_replace(true);

        match timeout(DEREGISTER_BUDGET, self.registration.deregister()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Deregistration failed"),
            Err(_) => warn!(
                budget_secs = DEREGISTER_BUDGET.as_secs(),
                "Deregistration timed out"
            ),
        }

        self.transport.shutdown().await;
        self.dispatcher = None;
        self.registration.mark_terminated();
        info!("Client disconnected");
    }
}
