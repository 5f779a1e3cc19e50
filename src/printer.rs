use log::{debug, info, warn};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Direction, TransferType, UsbContext};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    config::Config,
    error::{Error, PrinterError},
    media::Media,
    model::{Model, BROTHER_VENDOR_ID},
    raster,
};

/// Number of one second polls before a status read gives up.
const STATUS_POLLS: u32 = 10;
/// Number of status frames to wait for a job to complete.
const COMPLETION_POLLS: u32 = 60;

/// Something that can deliver an instruction blob to a printer.
pub trait Transport {
    /// Transmit one encoded job.
    fn send(&self, instructions: &[u8]) -> Result<(), Error>;

    /// Whether the configured printer is reachable.
    fn probe(&self) -> ConnectionStatus;

    /// Identifiers of every printer the transport can see.
    fn devices(&self) -> Vec<String>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, instructions: &[u8]) -> Result<(), Error> {
        (**self).send(instructions)
    }

    fn probe(&self) -> ConnectionStatus {
        (**self).probe()
    }

    fn devices(&self) -> Vec<String> {
        (**self).devices()
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, instructions: &[u8]) -> Result<(), Error> {
        (**self).send(instructions)
    }

    fn probe(&self) -> ConnectionStatus {
        (**self).probe()
    }

    fn devices(&self) -> Vec<String> {
        (**self).devices()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: String,
    pub available_devices: Vec<String>,
}

/// USB transport.
///
/// The printer is opened and its port reset on first use; later jobs reuse
/// the handle. A failed job drops it and the next one reopens the device.
#[derive(Debug)]
pub struct UsbTransport {
    config: Config,
    session: Mutex<Option<Printer>>,
}

impl UsbTransport {
    pub fn new(config: Config) -> Self {
        UsbTransport {
            config,
            session: Mutex::new(None),
        }
    }

    /// Whether a printer handle is currently held.
    pub fn is_open(&self) -> bool {
        self.session.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Release the held handle, if any.
    pub fn close(&self) {
        if let Ok(mut session) = self.session.lock() {
            session.take();
        }
    }

    /// Query the printer for its current status.
    pub fn status(&self) -> Result<Status, Error> {
        self.with_printer(|printer| printer.check_status())
    }

    /// Abort whatever the printer is doing.
    pub fn cancel(&self) -> Result<(), Error> {
        self.with_printer(|printer| printer.cancel())
    }

    fn with_printer<R>(&self, f: impl FnOnce(&Printer) -> Result<R, Error>) -> Result<R, Error> {
        let mut session = self.session.lock().map_err(|_| Error::DeviceOffline)?;
        let printer = match session.take() {
            Some(printer) => printer,
            None => Printer::new(self.config.clone())?,
        };
        let result = f(&printer);
        if result.is_ok() {
            *session = Some(printer);
        }
        result
    }
}

impl Transport for UsbTransport {
    fn send(&self, instructions: &[u8]) -> Result<(), Error> {
        self.with_printer(|printer| printer.send(instructions))
    }

    fn probe(&self) -> ConnectionStatus {
        let found = match brother_devices() {
            Ok(found) => found,
            Err(err) => {
                return ConnectionStatus {
                    connected: false,
                    message: format!("Error checking printer connection: {}", err),
                    available_devices: vec![],
                }
            }
        };

        if found.is_empty() {
            return ConnectionStatus {
                connected: false,
                message: "No Brother devices found. Please check if the printer is connected and powered on.".to_string(),
                available_devices: vec![],
            };
        }

        let pid = self.config.model.pid();
        if found.iter().any(|(_, p)| *p == pid) {
            return ConnectionStatus {
                connected: true,
                message: format!(
                    "Printer found: Vendor 0x{:04x}, Product 0x{:04x}",
                    BROTHER_VENDOR_ID, pid
                ),
                available_devices: vec![self.config.model.usb_identifier()],
            };
        }

        let available: Vec<String> = found.iter().map(|(v, p)| identifier(*v, *p)).collect();
        ConnectionStatus {
            connected: false,
            message: format!(
                "Brother devices found but not the expected one. Available: {:?}",
                available
            ),
            available_devices: available,
        }
    }

    fn devices(&self) -> Vec<String> {
        match brother_devices() {
            Ok(found) => found.iter().map(|(v, p)| identifier(*v, *p)).collect(),
            Err(err) => {
                warn!("Error listing devices: {}", err);
                vec![]
            }
        }
    }
}

fn identifier(vid: u16, pid: u16) -> String {
    format!("usb://0x{:04x}:0x{:04x}", vid, pid)
}

/// Vendor and product ids of every attached Brother device.
fn brother_devices() -> Result<Vec<(u16, u16)>, Error> {
    let context = Context::new()?;
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        match device.device_descriptor() {
            Ok(desc) if desc.vendor_id() == BROTHER_VENDOR_ID => {
                found.push((desc.vendor_id(), desc.product_id()));
            }
            Ok(_) => {}
            Err(err) => debug!("{:?}", err),
        }
    }
    Ok(found)
}

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    config: u8,
    iface: u8,
    setting: u8,
    address: u8,
}

#[derive(Debug)]
pub struct Printer {
    handle: Box<DeviceHandle<Context>>,
    endpoint_out: Endpoint,
    endpoint_in: Endpoint,
    config: Config,
}

impl Printer {
    pub fn new(config: Config) -> Result<Self, Error> {
        // rusb::set_log_level(rusb::LogLevel::Debug);
        let mut context = Context::new()?;
        let (mut device, device_desc, handle) = Self::open_device(
            &mut context,
            BROTHER_VENDOR_ID,
            config.model.pid(),
            config.serial.as_deref(),
        )?;

        handle.reset()?;

        let endpoint_in = Self::find_endpoint(&mut device, &device_desc, Direction::In, TransferType::Bulk)
            .ok_or(Error::MissingEndpoint)?;
        let endpoint_out = Self::find_endpoint(&mut device, &device_desc, Direction::Out, TransferType::Bulk)
            .ok_or(Error::MissingEndpoint)?;

        // QL-800では`has_kernel_driver`が`true`となる
        // QL-820NWBでは`has_kernel_driver`が`false`となる
        // `has_kernel_driver`が`true`の場合に、カーネルドライバーをデタッチしないとエラーとなる
        //
        if let Err(err) = handle.set_auto_detach_kernel_driver(true) {
            debug!("auto detach not supported: {:?}", err);
        }
        let has_kernel_driver = matches!(handle.kernel_driver_active(endpoint_out.iface), Ok(true));
        info!("Kernel driver support is {}", has_kernel_driver);
        handle.set_active_configuration(endpoint_out.config)?;
        handle.claim_interface(endpoint_out.iface)?;
        handle.set_alternate_setting(endpoint_out.iface, endpoint_out.setting)?;

        Ok(Printer {
            handle: Box::new(handle),
            endpoint_out,
            endpoint_in,
            config,
        })
    }

    fn open_device(
        context: &mut Context,
        vid: u16,
        pid: u16,
        serial: Option<&str>,
    ) -> Result<(Device<Context>, DeviceDescriptor, DeviceHandle<Context>), Error> {
        let devices = context.devices()?;

        if devices.is_empty() {
            debug!("Failed to read device list");
            return Err(Error::DeviceListNotReadable);
        }
        for device in devices.iter() {
            let device_desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(err) => {
                    debug!("{:?}", err);
                    continue;
                }
            };

            if device_desc.vendor_id() != vid || device_desc.product_id() != pid {
                continue;
            }
            debug!("{:?}", device_desc);

            let handle = match device.open() {
                Ok(handle) => handle,
                Err(err) => {
                    debug!("Failed to open device: {:?}", err);
                    continue;
                }
            };

            let Some(serial) = serial else {
                return Ok((device, device_desc, handle));
            };

            let timeout = Duration::from_secs(1);
            let languages = handle.read_languages(timeout)?;
            if let Some(language) = languages.first() {
                match handle.read_serial_number_string(*language, &device_desc, timeout) {
                    Ok(s) if s == serial => return Ok((device, device_desc, handle)),
                    Ok(s) => debug!("Skipping printer with serial {}", s),
                    Err(err) => debug!("Failed to read serial number string: {:?}", err),
                }
            }
        }
        debug!("No device match {:04x}:{:04x} serial {:?}", vid, pid, serial);
        Err(Error::DeviceOffline)
    }

    fn find_endpoint(
        device: &mut Device<Context>,
        device_desc: &DeviceDescriptor,
        direction: Direction,
        transfer_type: TransferType,
    ) -> Option<Endpoint> {
        for n in 0..device_desc.num_configurations() {
            let config_desc = match device.config_descriptor(n) {
                Ok(c) => c,
                Err(_) => continue,
            };
            for interface in config_desc.interfaces() {
                for interface_desc in interface.descriptors() {
                    for endpoint_desc in interface_desc.endpoint_descriptors() {
                        if endpoint_desc.direction() == direction
                            && endpoint_desc.transfer_type() == transfer_type
                        {
                            return Some(Endpoint {
                                config: config_desc.number(),
                                iface: interface_desc.interface_number(),
                                setting: interface_desc.setting_number(),
                                address: endpoint_desc.address(),
                            });
                        }
                    }
                }
            }
        }
        None
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        let timeout = Duration::from_secs(10);
        let n = self
            .handle
            .write_bulk(self.endpoint_out.address, buf, timeout)?;
        if n == buf.len() {
            Ok(n)
        } else {
            debug!(
                "write error: bytes wrote {} != bytes supplied {}, possibly timeout ?",
                n,
                buf.len()
            );
            Err(Error::InvalidResponse(n))
        }
    }

    /// Read printer status.
    ///
    /// This method is convenient for inspection when a new media is added.
    ///
    pub fn check_status(&self) -> Result<Status, Error> {
        self.request_status()?;
        self.read_status()
    }

    fn read_frame(&self) -> Result<Option<Status>, Error> {
        let timeout = Duration::from_secs(1);
        let mut buf: [u8; 32] = [0x00; 32];
        match self
            .handle
            .read_bulk(self.endpoint_in.address, &mut buf, timeout)
        {
            Ok(32) => {
                let status = Status::from_buf(buf);
                debug!("Raw status code: {:X?}", buf);
                debug!("Parsed Status struct: {:?}", status);
                Ok(Some(status))
            }
            Ok(_) | Err(rusb::Error::Timeout) => Ok(None),
            Err(e) => Err(Error::UsbError(e)),
        }
    }

    fn read_status(&self) -> Result<Status, Error> {
        for _ in 0..STATUS_POLLS {
            match self.read_frame()? {
                Some(status) if status.phase == Phase::Receiving => return Ok(status),
                _ => std::thread::sleep(Duration::from_secs(1)),
            }
        }
        Err(Error::ReadStatusTimeout)
    }

    /// Cancel printing
    ///
    pub fn cancel(&self) -> Result<(), Error> {
        self.write(&raster::invalidate())?;
        Ok(())
    }

    /// Transmit an encoded job.
    ///
    /// Without blocking the job is written and left to the printer. In
    /// blocking mode the installed media is checked first and the call
    /// returns once the printer reports the job as completed.
    pub fn send(&self, instructions: &[u8]) -> Result<(), Error> {
        if !self.config.blocking {
            self.write(instructions)?;
            return Ok(());
        }

        log::debug!("request get status");
        let status = self.check_status()?;
        status.check_error()?;
        log::debug!("check correct media installed");
        status.check_media(self.config.media)?;

        log::debug!("start printing labels");
        self.write(instructions)?;
        self.wait_completed()
    }

    fn wait_completed(&self) -> Result<(), Error> {
        for _ in 0..COMPLETION_POLLS {
            if let Some(status) = self.read_frame()? {
                match status.status_type {
                    StatusType::Completed => return Ok(()),
                    StatusType::Error => return Err(status.error.into()),
                    _ => {}
                }
            }
        }
        Err(Error::ReadStatusTimeout)
    }

    fn request_status(&self) -> Result<usize, Error> {
        let mut buf: Vec<u8> = raster::invalidate();
        buf.extend_from_slice(&[0x1b, 0x69, 0x53]);
        self.write(&buf)
    }
}

///
/// Status received from the printer encoded to Rust friendly type.
///
#[derive(Debug)]
pub struct Status {
    model: Option<Model>,
    error: PrinterError,
    media: Option<Media>,
    mode: u8,
    status_type: StatusType,
    phase: Phase,
    notification: Notification,
}

impl Status {
    fn from_buf(buf: [u8; 32]) -> Self {
        Status {
            model: Model::from_code(buf[4]),
            error: PrinterError::from_buf(buf),
            media: Media::from_buf(buf),
            mode: buf[15],
            status_type: StatusType::from_code(buf[18]),
            phase: Phase::from_buf(buf),
            notification: Notification::from_code(buf[22]),
        }
    }

    pub fn model(&self) -> Option<Model> {
        self.model
    }

    pub fn media(&self) -> Option<Media> {
        self.media
    }

    pub fn check_error(&self) -> Result<(), Error> {
        if self.error.is_no_error() {
            Ok(())
        } else {
            Err(Error::PrinterError(self.error.clone()))
        }
    }

    pub fn check_media(&self, media: Media) -> Result<(), Error> {
        match self.media {
            Some(m) if media.matches(&m) => Ok(()),
            _ => Err(Error::InvalidMedia(media)),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.model {
            Some(model) => writeln!(f, "model:        {}", model)?,
            None => writeln!(f, "model:        unknown")?,
        }
        match self.media {
            Some(media) => writeln!(f, "media:        {:?}", media)?,
            None => writeln!(f, "media:        none")?,
        }
        if self.error.is_no_error() {
            writeln!(f, "error:        none")?;
        } else {
            writeln!(f, "error:        {}", self.error)?;
        }
        writeln!(f, "mode:         0x{:02X}", self.mode)?;
        writeln!(f, "status type:  {:?}", self.status_type)?;
        writeln!(f, "phase:        {:?}", self.phase)?;
        write!(f, "notification: {:?}", self.notification)
    }
}

// StatusType

#[derive(Debug, PartialEq)]
enum StatusType {
    ReplyToRequest,
    Completed,
    Error,
    Offline,
    Notification,
    PhaseChange,
    Unknown,
}

impl StatusType {
    fn from_code(code: u8) -> StatusType {
        match code {
            0x00 => Self::ReplyToRequest,
            0x01 => Self::Completed,
            0x02 => Self::Error,
            0x04 => Self::Offline,
            0x05 => Self::Notification,
            0x06 => Self::PhaseChange,
            _ => Self::Unknown,
        }
    }
}

// Phase

#[derive(Debug, PartialEq)]
enum Phase {
    Receiving,
    Printing,
    Waiting(u8),
}

impl Phase {
    fn from_buf(buf: [u8; 32]) -> Self {
        match buf[19] {
            0x00 => Self::Receiving,
            0x01 => Self::Printing,
            other => Self::Waiting(other),
        }
    }
}

// Notification

#[derive(Debug)]
enum Notification {
    NotAvailable,
    CoolingStarted,
    CoolingFinished,
}

impl Notification {
    fn from_code(code: u8) -> Self {
        match code {
            0x03 => Self::CoolingStarted,
            0x04 => Self::CoolingFinished,
            _ => Self::NotAvailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ContinuousType;

    fn frame() -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[0..4].copy_from_slice(&[0x80, 0x20, 0x42, 0x34]);
        buf[4] = 0x38;
        buf[10] = 62;
        buf[11] = 0x0A;
        buf
    }

    #[test]
    fn parses_status_frame() {
        let status = Status::from_buf(frame());
        assert_eq!(status.model(), Some(Model::QL800));
        assert_eq!(
            status.media(),
            Some(Media::Continuous(ContinuousType::Continuous62))
        );
        assert_eq!(status.status_type, StatusType::ReplyToRequest);
        assert_eq!(status.phase, Phase::Receiving);
        assert!(status.check_error().is_ok());
        assert!(status
            .check_media(Media::Continuous(ContinuousType::Continuous62Red))
            .is_ok());
    }

    #[test]
    fn reports_printer_errors() {
        let mut buf = frame();
        buf[9] = 0b0001_0000;
        buf[18] = 0x02;
        let status = Status::from_buf(buf);
        assert_eq!(status.status_type, StatusType::Error);
        assert!(matches!(
            status.check_error(),
            Err(Error::PrinterError(PrinterError::CoverOpen))
        ));
    }

    #[test]
    fn failed_open_holds_no_handle() {
        // no QL-1100 on the test machine
        let config = Config::new(Model::QL1100, Media::Continuous(ContinuousType::Continuous62))
            .serial("no-such-serial");
        let transport = UsbTransport::new(config);
        assert!(transport.send(&[0x00]).is_err());
        assert!(!transport.is_open());
        transport.close();
        assert!(!transport.is_open());
    }

    #[test]
    fn rejects_wrong_media() {
        let status = Status::from_buf(frame());
        assert!(matches!(
            status.check_media(Media::Continuous(ContinuousType::Continuous29)),
            Err(Error::InvalidMedia(_))
        ));
    }
}
