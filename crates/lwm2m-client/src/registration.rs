//! Registration lifecycle with the management server

use lwm2m_core::{ContentFormat, Request, Response, SharedRegistry, Transport};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{ConnectError, DeregisterError, UpdateError};

/// Registration resource on the server
pub const REGISTRATION_PATH: &str = "rd";

/// Protocol version announced at registration
pub const LWM2M_VERSION: &str = "1.0";

/// Timeout for the best-effort discovery probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Updating,
    Deregistering,
    Deregistered,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unregistered => "unregistered",
            Self::Registering => "registering",
            Self::Registered => "registered",
            Self::Updating => "updating",
            Self::Deregistering => "deregistering",
            Self::Deregistered => "deregistered",
        };
        write!(f, "{}", name)
    }
}

/// What the device announces when registering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationParams {
    pub endpoint_name: String,
    pub lifetime_secs: u32,
    pub binding_mode: String,
}

/// Build the link-format registration payload, one `</o/i>` link per
/// object instance in ascending order
pub fn link_format(links: &[(u16, u16)]) -> String {
    links
        .iter()
        .map(|(object_id, instance_id)| format!("</{}/{}>", object_id, instance_id))
        .collect::<Vec<_>>()
        .join(",")
}

fn rejection_message(response: &Response) -> String {
    let text = response.payload_text();
    if text.is_empty() {
        format!("server answered {}", response.code)
    } else {
        text
    }
}

/// Drives register / update / deregister against one server
pub struct RegistrationController<T: Transport + ?Sized> {
    transport: Arc<T>,
    registry: SharedRegistry,
    state: RegistrationState,
    location: Option<String>,
}

impl<T: Transport + ?Sized> RegistrationController<T> {
    pub fn new(transport: Arc<T>, registry: SharedRegistry) -> Self {
        Self {
            transport,
            registry,
            state: RegistrationState::Unregistered,
            location: None,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Server-issued location of the current registration
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Look for an existing registration of this endpoint. Never fails;
    /// the server replaces a duplicate registration on its own.
    async fn probe(&self, endpoint_name: &str) {
        let request = Request::get(REGISTRATION_PATH);
        match timeout(PROBE_TIMEOUT, self.transport.send_request(request)).await {
            Ok(Ok(response)) if response.code.is_success() => {
                if response.payload_text().contains(endpoint_name) {
                    info!(
                        endpoint = endpoint_name,
                        "Found previous registration, server will replace it"
                    );
                } else {
                    debug!(endpoint = endpoint_name, "No previous registration found");
                }
            }
            Ok(Ok(response)) => {
                debug!(code = %response.code, "Discovery probe not answered with content")
            }
            Ok(Err(e)) => debug!(error = %e, "Discovery probe failed"),
            Err(_) => debug!(
                timeout_secs = PROBE_TIMEOUT.as_secs(),
                "Discovery probe timed out"
            ),
        }
    }

    /// Announce every object instance to the server
    pub async fn register(&mut self, params: &RegistrationParams) -> Result<(), ConnectError> {
        match self.state {
            RegistrationState::Unregistered | RegistrationState::Deregistered => {}
            state => return Err(ConnectError::InvalidState(state)),
        }
        self.state = RegistrationState::Registering;

        self.probe(&params.endpoint_name).await;

        let payload = link_format(&self.registry.lock().instance_links());
        debug!(links = %payload, "Registration payload");

        let request = Request::post(REGISTRATION_PATH)
            .query("ep", &params.endpoint_name)
            .query("lt", params.lifetime_secs)
            .query("b", &params.binding_mode)
            .query("lwm2m", LWM2M_VERSION)
            .payload(ContentFormat::LINK_FORMAT, payload.into_bytes());

        let response = match self.transport.send_request(request).await {
            Ok(response) => response,
            Err(e) => {
                self.state = RegistrationState::Unregistered;
                return Err(e.into());
            }
        };

        if !response.code.is_success() {
            self.state = RegistrationState::Unregistered;
            return Err(ConnectError::Rejected {
                status: response.code,
                message: rejection_message(&response),
            });
        }

        if response.location.is_none() {
            warn!("Server registered the endpoint without a location; updates disabled");
        }
        self.location = response.location;
        self.state = RegistrationState::Registered;

        info!(
            endpoint = %params.endpoint_name,
            location = ?self.location,
            lifetime = params.lifetime_secs,
            "Registered with LwM2M server"
        );
        Ok(())
    }

    /// Refresh the registration lease. Does nothing without a location.
    pub async fn update(&mut self) -> Result<(), UpdateError> {
        let Some(location) = self.location.clone() else {
            debug!("No registration location, skipping update");
            return Ok(());
        };

        self.state = RegistrationState::Updating;
        let result = self.transport.send_request(Request::post(&location)).await;
        self.state = RegistrationState::Registered;

        let response = result?;
        if !response.code.is_success() {
            return Err(UpdateError::Rejected {
                status: response.code,
                message: rejection_message(&response),
            });
        }
        debug!(location = %location, "Registration updated");
        Ok(())
    }

    /// Remove the registration from the server. The location is cleared
    /// before sending, so a second call is a no-op.
    pub async fn deregister(&mut self) -> Result<(), DeregisterError> {
        let Some(location) = self.location.take() else {
            debug!("No registration location, nothing to deregister");
            return Ok(());
        };

        self.state = RegistrationState::Deregistering;
        let result = self.transport.send_request(Request::delete(&location)).await;
        self.state = RegistrationState::Deregistered;

        let response = result?;
        if !response.code.is_success() {
            return Err(DeregisterError::Rejected {
                status: response.code,
                message: rejection_message(&response),
            });
        }
        info!(location = %location, "Deregistered from LwM2M server");
        Ok(())
    }

    /// Settle the state after an in-flight register, update or deregister
    /// was dropped before completing
    pub fn abandon_in_flight(&mut self) {
        self.state = match self.state {
            RegistrationState::Registering => RegistrationState::Unregistered,
            RegistrationState::Updating => RegistrationState::Registered,
            RegistrationState::Deregistering => RegistrationState::Deregistered,
            settled => settled,
        };
    }

    /// Final state once the transport is released
    pub fn mark_terminated(&mut self) {
        self.location = None;
        self.state = RegistrationState::Deregistered;
    }
}
