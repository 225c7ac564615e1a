// TMCL command channel
//
// One request in flight at a time: the send and the matching receive happen
// under a single lock, so concurrent callers queue up in FIFO order instead of
// interleaving frames on the wire.
//
// TMCL replies carry no sequence number. After a timeout the module may still
// answer, so the channel counts such requests and swallows their late replies
// before the next request goes out.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::datagram::{Command, Datagram, FRAME_LEN, MoveMode, Reply, Request, Status};
use super::error::{Result, TmclError};
use super::port::Port;
use crate::config::{DEFAULT_HOST_ID, DEFAULT_MODULE_ID, DEFAULT_TIMEOUT_MS};

/// Bank numbers for the input/output commands (SIO/GIO)
pub const BANK_DIGITAL_IN: u8 = 0;
pub const BANK_ANALOG_IN: u8 = 1;
pub const BANK_DIGITAL_OUT: u8 = 2;

/// Firmware identification returned by GetFirmwareVersion (binary form)
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FirmwareVersion {
    pub module_type: u16,
    pub major: u8,
    pub minor: u8,
}

impl FirmwareVersion {
    pub fn from_value(value: i32) -> Self {
        let raw = value as u32;
        Self {
            module_type: (raw >> 16) as u16,
            major: (raw >> 8) as u8,
            minor: raw as u8,
        }
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}V{}.{:02}", self.module_type, self.major, self.minor)
    }
}

/// Anything that can run TMCL requests against a module.
///
/// Implemented by the real [`CommandChannel`] and by the I/O-free
/// [`DummyInterface`](super::DummyInterface). Everything beyond `execute_on`
/// and `close` is built on top of them.
pub trait TmclInterface: Sync {
    fn host_id(&self) -> u8;

    /// Module addressed when no explicit id is given
    fn module_id(&self) -> u8;

    /// Run one request against `module_id` and return its successful reply
    fn execute_on(
        &self,
        module_id: u8,
        request: Request,
    ) -> impl Future<Output = Result<Reply>> + Send;

    /// Release the underlying transport. Closing twice is a no-op.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    /// Run one request against the default module
    fn execute(&self, request: Request) -> impl Future<Output = Result<Reply>> + Send {
        self.execute_on(self.module_id(), request)
    }

    // === Motion commands ===

    /// Rotate at `velocity`; the sign selects the direction
    fn rotate(
        &self,
        module_id: u8,
        motor: u8,
        velocity: i32,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.execute_on(
                module_id,
                Request::new(Command::RotateRight, 0, motor, velocity),
            )
            .await?;
            Ok(())
        }
    }

    fn stop(&self, module_id: u8, motor: u8) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.execute_on(module_id, Request::new(Command::MotorStop, 0, motor, 0))
                .await?;
            Ok(())
        }
    }

    fn move_to(
        &self,
        module_id: u8,
        motor: u8,
        position: i32,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.execute_on(
                module_id,
                Request::new(
                    Command::MoveToPosition,
                    MoveMode::Absolute as u8,
                    motor,
                    position,
                ),
            )
            .await?;
            Ok(())
        }
    }

    fn move_by(
        &self,
        module_id: u8,
        motor: u8,
        difference: i32,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.execute_on(
                module_id,
                Request::new(
                    Command::MoveToPosition,
                    MoveMode::Relative as u8,
                    motor,
                    difference,
                ),
            )
            .await?;
            Ok(())
        }
    }

    // === Parameters ===

    fn set_axis_parameter(
        &self,
        module_id: u8,
        parameter: u8,
        axis: u8,
        value: i32,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.execute_on(
                module_id,
                Request::new(Command::SetAxisParameter, parameter, axis, value),
            )
            .await?;
            Ok(())
        }
    }

    /// Read an axis parameter; `signed` selects how the 32 value bits are read
    fn get_axis_parameter(
        &self,
        module_id: u8,
        parameter: u8,
        axis: u8,
        signed: bool,
    ) -> impl Future<Output = Result<i64>> + Send {
        async move {
            let reply = self
                .execute_on(
                    module_id,
                    Request::new(Command::GetAxisParameter, parameter, axis, 0),
                )
                .await?;
            Ok(reply_value(&reply, signed))
        }
    }

    /// Persist an axis parameter to the module's EEPROM
    fn store_axis_parameter(
        &self,
        module_id: u8,
        parameter: u8,
        axis: u8,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.execute_on(
                module_id,
                Request::new(Command::StoreAxisParameter, parameter, axis, 0),
            )
            .await?;
            Ok(())
        }
    }

    fn set_global_parameter(
        &self,
        module_id: u8,
        parameter: u8,
        bank: u8,
        value: i32,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.execute_on(
                module_id,
                Request::new(Command::SetGlobalParameter, parameter, bank, value),
            )
            .await?;
            Ok(())
        }
    }

    fn get_global_parameter(
        &self,
        module_id: u8,
        parameter: u8,
        bank: u8,
        signed: bool,
    ) -> impl Future<Output = Result<i64>> + Send {
        async move {
            let reply = self
                .execute_on(
                    module_id,
                    Request::new(Command::GetGlobalParameter, parameter, bank, 0),
                )
                .await?;
            Ok(reply_value(&reply, signed))
        }
    }

    // === I/O ===

    fn set_digital_output(
        &self,
        module_id: u8,
        port: u8,
        high: bool,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.execute_on(
                module_id,
                Request::new(Command::SetOutput, port, BANK_DIGITAL_OUT, high as i32),
            )
            .await?;
            Ok(())
        }
    }

    fn get_digital_input(&self, module_id: u8, port: u8) -> impl Future<Output = Result<bool>> + Send {
        async move {
            let reply = self
                .execute_on(
                    module_id,
                    Request::new(Command::GetInput, port, BANK_DIGITAL_IN, 0),
                )
                .await?;
            Ok(reply.value != 0)
        }
    }

    fn get_analog_input(&self, module_id: u8, port: u8) -> impl Future<Output = Result<i32>> + Send {
        async move {
            let reply = self
                .execute_on(
                    module_id,
                    Request::new(Command::GetInput, port, BANK_ANALOG_IN, 0),
                )
                .await?;
            Ok(reply.value)
        }
    }

    // === Register access on evaluation boards ===

    fn write_mc(&self, module_id: u8, address: u8, value: u32) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.execute_on(
                module_id,
                Request::new(Command::WriteMc, address, 0, value as i32),
            )
            .await?;
            Ok(())
        }
    }

    fn read_mc(&self, module_id: u8, address: u8) -> impl Future<Output = Result<u32>> + Send {
        async move {
            let reply = self
                .execute_on(module_id, Request::new(Command::ReadMc, address, 0, 0))
                .await?;
            Ok(reply.unsigned_value())
        }
    }

    fn write_drv(&self, module_id: u8, address: u8, value: u32) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.execute_on(
                module_id,
                Request::new(Command::WriteDrv, address, 0, value as i32),
            )
            .await?;
            Ok(())
        }
    }

    fn read_drv(&self, module_id: u8, address: u8) -> impl Future<Output = Result<u32>> + Send {
        async move {
            let reply = self
                .execute_on(module_id, Request::new(Command::ReadDrv, address, 0, 0))
                .await?;
            Ok(reply.unsigned_value())
        }
    }

    // === Module information ===

    fn get_firmware_version(&self, module_id: u8) -> impl Future<Output = Result<FirmwareVersion>> + Send {
        async move {
            let reply = self
                .execute_on(
                    module_id,
                    Request::new(Command::GetFirmwareVersion, 1, 0, 0),
                )
                .await?;
            Ok(FirmwareVersion::from_value(reply.value))
        }
    }
}

/// Read a reply value as signed or as the unsigned bit pattern
pub fn reply_value(reply: &Reply, signed: bool) -> i64 {
    if signed {
        reply.value as i64
    } else {
        reply.unsigned_value() as i64
    }
}

/// An open port and the requests on it that timed out without a reply
struct Link<P> {
    port: P,
    unanswered: usize,
}

/// Request/reply channel over a [`Port`]
pub struct CommandChannel<P> {
    link: Mutex<Option<Link<P>>>,
    host_id: u8,
    module_id: u8,
    timeout: Duration,
    debug: bool,
}

impl<P: Port> CommandChannel<P> {
    /// Channel with the default addressing (host 2, module 1) and timeout
    pub fn new(port: P) -> Self {
        Self::with_addresses(port, DEFAULT_HOST_ID, DEFAULT_MODULE_ID)
    }

    pub fn with_addresses(port: P, host_id: u8, module_id: u8) -> Self {
        Self {
            link: Mutex::new(Some(Link {
                port,
                unanswered: 0,
            })),
            host_id,
            module_id,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            debug: false,
        }
    }

    /// Bound on how long one exchange may take
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log every frame at info level instead of trace
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    fn log_frame(&self, direction: &str, module_id: u8, frame: &[u8]) {
        if self.debug {
            info!("{} module {}: {:02X?}", direction, module_id, frame);
        } else {
            trace!("{} module {}: {:02X?}", direction, module_id, frame);
        }
    }

    /// Send a request and wait for the raw reply bytes
    async fn exchange(&self, datagram: &Datagram) -> Result<[u8; FRAME_LEN]> {
        let request = datagram.request;
        let module_id = datagram.module_id;
        let frame = datagram.encode();

        // Held until the reply is in, released on every return path
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(TmclError::Closed)?;

        if link.unanswered > 0 {
            self.resync(link).await;
        }
        link.port
            .discard_input()
            .await
            .map_err(|source| TmclError::Transport {
                request,
                module_id,
                source,
            })?;

        self.log_frame("->", module_id, &frame);
        let mut reply = [0u8; FRAME_LEN];
        let port = &mut link.port;
        let transfer = async {
            port.send(&frame).await?;
            port.receive(&mut reply).await?;
            Ok::<_, std::io::Error>(())
        };

        let outcome = timeout(self.timeout, transfer).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                link.unanswered += 1;
                return Err(TmclError::Timeout {
                    request,
                    module_id,
                    timeout: self.timeout,
                });
            }
            Ok(Err(source)) => {
                return Err(TmclError::Transport {
                    request,
                    module_id,
                    source,
                });
            }
            Err(_) => {
                debug!("No reply to {} within {:?}", request, self.timeout);
                link.unanswered += 1;
                return Err(TmclError::Timeout {
                    request,
                    module_id,
                    timeout: self.timeout,
                });
            }
        }
        self.log_frame("<-", module_id, &reply);

        Ok(reply)
    }

    /// Swallow the late replies of timed-out requests. A reply that has not
    /// shown up within twice the timeout is taken as lost.
    async fn resync(&self, link: &mut Link<P>) {
        let window = self.timeout * 2;
        while link.unanswered > 0 {
            let mut late = [0u8; FRAME_LEN];
            let outcome = timeout(window, link.port.receive(&mut late)).await;
            match outcome {
                Ok(Ok(())) => {
                    warn!("Discarding late reply {:02X?}", late);
                    link.unanswered -= 1;
                }
                _ => {
                    debug!("{} late replies never arrived", link.unanswered);
                    link.unanswered = 0;
                }
            }
        }
    }
}

impl<P: Port> TmclInterface for CommandChannel<P> {
    fn host_id(&self) -> u8 {
        self.host_id
    }

    fn module_id(&self) -> u8 {
        self.module_id
    }

    async fn execute_on(&self, module_id: u8, request: Request) -> Result<Reply> {
        let datagram = Datagram::new(self.host_id, module_id, request);
        let frame = self.exchange(&datagram).await?;

        let reply = Reply::decode(&frame).map_err(|source| TmclError::Frame {
            request,
            module_id,
            source,
        })?;

        if !datagram.matches(&reply) {
            warn!(
                "Discarding reply {:02X?}: expected host {}, module {}, command {}",
                frame, self.host_id, module_id, request.command
            );
            return Err(TmclError::UnexpectedReply {
                request,
                host_id: self.host_id,
                module_id,
                frame,
            });
        }

        if !Status::is_success(reply.status) {
            return Err(TmclError::Device {
                request,
                module_id,
                status: reply.status,
                frame,
            });
        }

        Ok(reply)
    }

    async fn close(&self) -> Result<()> {
        let link = self.link.lock().await.take();
        if let Some(mut link) = link {
            debug!("Closing TMCL channel (module {})", self.module_id);
            link.port.close().await?;
        }
        Ok(())
    }
}
