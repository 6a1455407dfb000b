use std::fmt;

/* Vendor protocol spoken by a supported keyboard. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    LogitechG710,
}

/* A supported keyboard model. */
/* Vendor and product IDs are kept as the 4-digit lowercase hex strings */
/* udev reports in `idVendor`/`idProduct` and `ID_VENDOR_ID`/`ID_MODEL_ID`, */
/* and are compared as strings. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: &'static str,
    pub product_id: &'static str,
    pub name: &'static str,
    pub driver: DriverKind,
}

impl DeviceDescriptor {
    pub fn matches(&self, vendor_id: &str, product_id: &str) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.vendor_id, self.product_id)
    }
}

/* Supported keyboards. */
pub const CATALOG: &[DeviceDescriptor] = &[DeviceDescriptor {
    vendor_id: "046d",
    product_id: "c24d",
    name: "Logitech G710+",
    driver: DriverKind::LogitechG710,
}];

#[cfg(test)]
mod tests {
    use super::*;

    fn is_udev_hex_id(s: &str) -> bool {
        s.len() == 4 && s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
    }

    #[test]
    fn test_catalog_ids_are_lowercase_hex() {
        for entry in CATALOG {
            assert!(is_udev_hex_id(entry.vendor_id), "{entry}");
            assert!(is_udev_hex_id(entry.product_id), "{entry}");
        }
    }

    #[test]
    fn test_matches_is_exact() {
        let g710 = &CATALOG[0];
        assert!(g710.matches("046d", "c24d"));
        assert!(!g710.matches("046D", "C24D"));
        assert!(!g710.matches("046d", "c248"));
        assert!(!g710.matches("46d", "c24d"));
    }
}
