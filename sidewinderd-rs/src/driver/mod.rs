pub mod logitech_g710;

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::device::KeyEvent;
use crate::device_database::DriverKind;
use crate::led::LedLayout;

/* Upper bound on the size of a single input report we read. */
pub const MAX_REPORT_LEN: usize = 8;

/* HIDIOCSFEATURE(len): _IOC(_IOC_WRITE|_IOC_READ, 'H', 0x06, len) */
nix::ioctl_readwrite_buf!(hidraw_set_feature, b'H', 0x06, u8);

/* Sink for HID feature reports. */
/*  */
/* `DeviceIo` is the real implementation; LED and reset logic only ever */
/* see this trait. */
pub trait FeatureReport {
    /* Send `buf` as a feature report. `buf[0]` is the report ID. */
    fn set_feature_report(&mut self, buf: &[u8]) -> Result<()>;
}

/* Blocking wrapper around a `/dev/hidraw` file descriptor. */
/*  */
/* All hardware I/O goes through this struct so that drivers never */
/* touch raw file handles directly. */
pub struct DeviceIo {
    file: File,
    path: PathBuf,
}

impl DeviceIo {
    /* Open the hidraw device node at `path`. */
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open hidraw device {}", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /* Read a single HID report from the device (blocks until data arrives). */
    pub fn read_report(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self
            .file
            .read(buf)
            .with_context(|| format!("Read failed on {}", self.path.display()))?;
        debug!("RX {} bytes: {:02x?}", n, &buf[..n]);
        Ok(n)
    }
}

impl FeatureReport for DeviceIo {
    fn set_feature_report(&mut self, buf: &[u8]) -> Result<()> {
        let mut report = buf.to_vec();
        /* SAFETY: the fd is owned by `self.file` and stays open for the call; */
        /* the ioctl reads at most `report.len()` bytes from the buffer. */
        unsafe { hidraw_set_feature(self.file.as_raw_fd(), &mut report) }
            .with_context(|| format!("HIDIOCSFEATURE failed on {}", self.path.display()))?;
        debug!("TX feature {} bytes: {:02x?}", buf.len(), buf);
        Ok(())
    }
}

impl AsFd for DeviceIo {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/* Vendor-specific keyboard behaviour. */
/*  */
/* The keyboard core owns the device handle and the read loop; a driver */
/* only knows how to reset the hardware, how to decode its input reports */
/* and where its LEDs live. */
pub trait KeyboardDriver: Send {
    /* Returns the driver name for logging purposes. */
    fn name(&self) -> &str;

    /* Vendor reset performed right after the hidraw node is opened. */
    fn initialize(&mut self, io: &mut dyn FeatureReport) -> Result<()>;

    /* Decode one raw input report. Pure: no I/O, no state. */
    fn decode(&self, report: &[u8]) -> KeyEvent;

    /* Map the index of a `ProfileSelect` key to a 0-based profile. */
    fn profile_for_key(&self, index: u8) -> Option<u8>;

    /* Feature report layout of the indicator LEDs. */
    fn led_layout(&self) -> LedLayout;
}

/* Instantiate the driver for a catalog entry. */
pub fn create_driver(kind: DriverKind) -> Box<dyn KeyboardDriver> {
    match kind {
        DriverKind::LogitechG710 => Box::new(logitech_g710::LogitechG710Driver::new()),
    }
}

/* 1-based position of the lowest set bit, 0 if no bit is set (C `ffs`). */
pub fn lowest_set_bit(value: u8) -> u8 {
    if value == 0 {
        0
    } else {
        value.trailing_zeros() as u8 + 1
    }
}
