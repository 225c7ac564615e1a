// I/O-free TMCL interface for offline development and tests
//
// Every request "succeeds" with a zero value, so higher layers (axis façades,
// demos) can run without hardware attached. Closing only flips a flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, info};

use super::channel::TmclInterface;
use super::datagram::{Reply, Request, Status};
use super::error::Result;
use crate::config::{DEFAULT_HOST_ID, DEFAULT_MODULE_ID};

#[derive(Debug)]
pub struct DummyInterface {
    host_id: u8,
    module_id: u8,
    closed: AtomicBool,
    requests: AtomicU64,
}

impl DummyInterface {
    pub fn new() -> Self {
        Self::with_addresses(DEFAULT_HOST_ID, DEFAULT_MODULE_ID)
    }

    pub fn with_addresses(host_id: u8, module_id: u8) -> Self {
        info!(
            "Opened dummy TMCL interface (host {}, module {})",
            host_id, module_id
        );
        Self {
            host_id,
            module_id,
            closed: AtomicBool::new(false),
            requests: AtomicU64::new(0),
        }
    }

    /// Number of requests answered so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl Default for DummyInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl TmclInterface for DummyInterface {
    fn host_id(&self) -> u8 {
        self.host_id
    }

    fn module_id(&self) -> u8 {
        self.module_id
    }

    async fn execute_on(&self, module_id: u8, request: Request) -> Result<Reply> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        debug!("dummy module {}: {}", module_id, request);

        Ok(Reply {
            reply_host_id: self.host_id,
            module_address: module_id,
            status: Status::Success as u8,
            command_echo: request.command,
            value: 0,
        })
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::Relaxed) {
            info!("Closed dummy TMCL interface");
        }
        Ok(())
    }
}
