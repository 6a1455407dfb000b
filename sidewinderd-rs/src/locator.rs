/* Device locator: finds the kernel nodes of a catalog keyboard via udev.
 *
 * A supported keyboard shows up as (at least) two USB interfaces. The
 * vendor interface 01 carries the macro keys and gets a hidraw node; the
 * boot keyboard interface 00 gets the `/dev/input/eventN` node we record
 * ordinary key strokes from. udev data is first copied into plain
 * candidate structs so the matching rules can be tested without hardware. */

use std::ffi::OsStr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::device::DeviceNodes;
use crate::device_database::DeviceDescriptor;

/* USB interface of the vendor-specific macro key reports. */
const VENDOR_INTERFACE: &str = "01";
/* USB interface of the standard HID keyboard. */
const KEYBOARD_INTERFACE: &str = "00";

/* A hidraw node together with what udev knows about its USB ancestors. */
#[derive(Debug, Clone, Default)]
pub struct HidrawCandidate {
    pub devnode: Option<PathBuf>,
    pub interface_number: Option<String>,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
}

/* An input subsystem entry with its udev properties. */
#[derive(Debug, Clone, Default)]
pub struct InputCandidate {
    pub syspath: String,
    pub devnode: Option<PathBuf>,
    pub vendor_id: Option<String>,
    pub model_id: Option<String>,
    pub interface_number: Option<String>,
    pub is_keyboard: bool,
    pub has_usb_parent: bool,
}

pub fn hidraw_matches(descriptor: &DeviceDescriptor, candidate: &HidrawCandidate) -> bool {
    let ids = candidate.vendor_id.as_deref().zip(candidate.product_id.as_deref());
    candidate.devnode.is_some()
        && candidate.interface_number.as_deref() == Some(VENDOR_INTERFACE)
        && ids.is_some_and(|(vendor, product)| descriptor.matches(vendor, product))
}

pub fn input_matches(descriptor: &DeviceDescriptor, candidate: &InputCandidate) -> bool {
    let ids = candidate.vendor_id.as_deref().zip(candidate.model_id.as_deref());
    candidate.devnode.is_some()
        && candidate.syspath.contains("event")
        && ids.is_some_and(|(vendor, product)| descriptor.matches(vendor, product))
        && candidate.interface_number.as_deref() == Some(KEYBOARD_INTERFACE)
        && candidate.is_keyboard
        && candidate.has_usb_parent
}

fn to_string(value: Option<&OsStr>) -> Option<String> {
    value.map(|v| v.to_string_lossy().into_owned())
}

/* Walk from a hidraw node up to its USB interface and USB device. */
/* Returns `None` (after logging) if the topology is incomplete. */
fn hidraw_candidate(device: &udev::Device) -> Option<HidrawCandidate> {
    let interface = match device.parent_with_subsystem_devtype("usb", "usb_interface") {
        Ok(Some(parent)) => parent,
        Ok(None) => {
            debug!("{} has no USB interface parent", device.syspath().display());
            return None;
        }
        Err(e) => {
            warn!(
                "Unable to find parent device of {}: {e}",
                device.syspath().display()
            );
            return None;
        }
    };

    let mut candidate = HidrawCandidate {
        devnode: device.devnode().map(|p| p.to_path_buf()),
        interface_number: to_string(interface.attribute_value("bInterfaceNumber")),
        ..Default::default()
    };

    /* Only walk further up for the interface we care about */
    if candidate.interface_number.as_deref() != Some(VENDOR_INTERFACE) {
        return Some(candidate);
    }

    match interface.parent_with_subsystem_devtype("usb", "usb_device") {
        Ok(Some(usb)) => {
            candidate.vendor_id = to_string(usb.attribute_value("idVendor"));
            candidate.product_id = to_string(usb.attribute_value("idProduct"));
            Some(candidate)
        }
        Ok(None) | Err(_) => {
            warn!(
                "Unable to find USB device above {}",
                interface.syspath().display()
            );
            None
        }
    }
}

fn input_candidate(device: &udev::Device) -> InputCandidate {
    InputCandidate {
        syspath: device.syspath().to_string_lossy().into_owned(),
        devnode: device.devnode().map(|p| p.to_path_buf()),
        vendor_id: to_string(device.property_value("ID_VENDOR_ID")),
        model_id: to_string(device.property_value("ID_MODEL_ID")),
        interface_number: to_string(device.property_value("ID_USB_INTERFACE_NUM")),
        is_keyboard: device.property_value("ID_INPUT_KEYBOARD").is_some(),
        has_usb_parent: matches!(device.parent_with_subsystem("usb"), Ok(Some(_))),
    }
}

/* Enumerate hidraw and input devices once and resolve the nodes of the */
/* first keyboard matching `descriptor`. Does not wait for devices. */
pub fn find_device(descriptor: &DeviceDescriptor) -> Result<Option<DeviceNodes>> {
    let mut enumerator = udev::Enumerator::new().context("Can't create udev enumerator")?;
    enumerator.match_subsystem("hidraw")?;
    enumerator.match_subsystem("input")?;

    let mut hidraw = None;
    let mut input_event = None;

    for device in enumerator.scan_devices().context("udev scan failed")? {
        let subsystem = device.subsystem().map(|s| s.to_string_lossy().into_owned());
        match subsystem.as_deref() {
            Some("hidraw") if hidraw.is_none() => {
                let Some(candidate) = hidraw_candidate(&device) else {
                    continue;
                };
                if hidraw_matches(descriptor, &candidate) {
                    info!("Found device: {descriptor}");
                    hidraw = candidate.devnode;
                }
            }
            Some("input") if input_event.is_none() => {
                let candidate = input_candidate(&device);
                if input_matches(descriptor, &candidate) {
                    debug!("Keyboard events of {descriptor} at {:?}", candidate.devnode);
                    input_event = candidate.devnode;
                }
            }
            _ => {}
        }
    }

    let Some(hidraw) = hidraw else {
        debug!("{descriptor} not attached");
        return Ok(None);
    };

    if input_event.is_none() {
        warn!("No keyboard event node for {descriptor}, macro recording disabled");
    }

    Ok(Some(DeviceNodes {
        hidraw,
        input_event,
    }))
}
