/// Logitech G710+ mechanical gaming keyboard driver.
///
/// The vendor interface (USB interface 1) reports the six G-keys, the
/// three memory bank keys M1-M3 and the MR (macro record) key in a 4-byte
/// input report. The bank and record LEDs share one feature report byte.
use anyhow::Result;

use crate::device::{KeyEvent, KeyKind};
use crate::driver::{FeatureReport, KeyboardDriver, lowest_set_bit};
use crate::led::{Led, LedLayout};

/* ------------------------------------------------------------------ */
/* Protocol constants                                                   */
/* ------------------------------------------------------------------ */

/* Input report carrying G-keys and M-keys */
const REPORT_ID_KEYS: u8 = 0x03;
const REPORT_KEYS_LEN: usize = 4;

/* Feature reports */
const FEATURE_REPORT_LED: u8 = 0x06;
const FEATURE_REPORT_MACRO: u8 = 0x09;
const FEATURE_REPORT_MACRO_SIZE: usize = 13;

/* LED bits in the LED feature report */
const LED_M1: u8 = 0x10;
const LED_M2: u8 = 0x20;
const LED_M3: u8 = 0x40;
const LED_MR: u8 = 0x80;

/* Extra key indices after `byte2 >> 4` and bit scan */
const KEY_M1: u8 = 1;
const KEY_M2: u8 = 2;
const KEY_M3: u8 = 3;
const KEY_MR: u8 = 4;

pub struct LogitechG710Driver;

impl LogitechG710Driver {
    pub fn new() -> Self {
        Self
    }
}

impl KeyboardDriver for LogitechG710Driver {
    fn name(&self) -> &str {
        "Logitech G710+"
    }

    /* The G-keys emit the digits 1-6 on the regular keyboard interface */
    /* until the macro feature report is zeroed. */
    fn initialize(&mut self, io: &mut dyn FeatureReport) -> Result<()> {
        let mut buf = [0u8; FEATURE_REPORT_MACRO_SIZE];
        buf[0] = FEATURE_REPORT_MACRO;
        io.set_feature_report(&buf)
    }

    /*
     * G1   03 01 00 00      M1   03 00 10 00
     * G2   03 02 00 00      M2   03 00 20 00
     * G3   03 04 00 00      M3   03 00 40 00
     * G4   03 08 00 00      MR   03 00 80 00
     * G5   03 10 00 00
     * G6   03 20 00 00
     *
     * Several G-keys held at once only surface the lowest one.
     */
    fn decode(&self, report: &[u8]) -> KeyEvent {
        if report.len() != REPORT_KEYS_LEN || report[0] != REPORT_ID_KEYS {
            return KeyEvent::NONE;
        }

        match (report[1], report[2]) {
            (macro_bits, 0) if macro_bits != 0 => {
                KeyEvent::new(lowest_set_bit(macro_bits), KeyKind::Macro)
            }
            (0, extra_bits) if extra_bits != 0 => match lowest_set_bit(extra_bits >> 4) {
                KEY_MR => KeyEvent::new(KEY_MR, KeyKind::RecordToggle),
                key @ (KEY_M1 | KEY_M2 | KEY_M3) => KeyEvent::new(key, KeyKind::ProfileSelect),
                _ => KeyEvent::NONE,
            },
            _ => KeyEvent::NONE,
        }
    }

    fn profile_for_key(&self, index: u8) -> Option<u8> {
        match index {
            KEY_M1 => Some(0),
            KEY_M2 => Some(1),
            KEY_M3 => Some(2),
            _ => None,
        }
    }

    fn led_layout(&self) -> LedLayout {
        LedLayout {
            report_id: FEATURE_REPORT_LED,
            profiles: vec![Led::profile(LED_M1), Led::profile(LED_M2), Led::profile(LED_M3)],
            record: Led::indicator(LED_MR),
        }
    }
}
