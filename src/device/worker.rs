use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

use crate::config::Auth;
use crate::controller::AppCommand;

use super::client::{DeskDevice, ParticleDevice};

/// A call the controller wants made on the desk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRequest {
    /// Move to a height, optionally on behalf of a preset
    SetHeight {
        /// Target height in cm
        height: u32,
        /// User-order index of the preset being activated
        preset: Option<usize>,
    },
    /// Read the current height
    GetHeight,
}

/// Run one request and turn the outcome into a command for the main loop
///
/// Reports are tagged with `device_id`. Returns `None` when there is
/// nothing to report.
pub fn execute(
    device: &dyn DeskDevice,
    device_id: &str,
    request: DeviceRequest,
) -> Option<AppCommand> {
    match request {
        DeviceRequest::SetHeight { height, preset } => match device.set_height(height) {
            Ok(()) => None,
            Err(e) => {
                error!(height_cm = height, "error setting height: {}", e);
                Some(AppCommand::MoveFailed {
                    device_id: device_id.to_owned(),
                    preset,
                    reason: e.to_string(),
                })
            }
        },
        DeviceRequest::GetHeight => match device.get_height() {
            Ok(height) => Some(AppCommand::HeightFetched {
                device_id: device_id.to_owned(),
                height,
            }),
            Err(e) => {
                warn!("getHeight error: {}", e);
                None
            }
        },
    }
}

/// Thread that owns the blocking HTTP client and serves requests in order
///
/// Dropping the worker closes the queue; the thread exits once queued
/// requests finish.
pub struct DeviceWorker {
    requests: UnboundedSender<DeviceRequest>,
    _thread: JoinHandle<()>,
}

impl DeviceWorker {
    /// Start a worker for the device in `auth`
    ///
    /// # Errors
    /// Returns error if the thread can't be spawned
    pub fn start(auth: Auth, results: UnboundedSender<AppCommand>) -> std::io::Result<Self> {
        let (requests, receiver) = mpsc::unbounded_channel();
        let handle = std::thread::Builder::new()
            .name(format!("device-{}", auth.device_id))
            .spawn(move || match ParticleDevice::new(&auth) {
                Ok(device) => serve(&device, &auth.device_id, receiver, &results),
                Err(e) => error!("failed to create desk client: {}", e),
            })?;
        Ok(Self {
            requests,
            _thread: handle,
        })
    }

    /// Queue a request
    pub fn submit(&self, request: DeviceRequest) {
        debug!(?request, "queueing device request");
        if self.requests.send(request).is_err() {
            warn!(?request, "device worker is gone, dropping request");
        }
    }
}

/// Serve requests for the desk `device_id` until the sender side closes
pub fn serve(
    device: &dyn DeskDevice,
    device_id: &str,
    mut receiver: UnboundedReceiver<DeviceRequest>,
    results: &UnboundedSender<AppCommand>,
) {
    while let Some(request) = receiver.blocking_recv() {
        if let Some(command) = execute(device, device_id, request) {
            if results.send(command).is_err() {
                break;
            }
        }
    }
    debug!("device worker stopped");
}
