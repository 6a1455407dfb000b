/* Profile / record-mode state machine of one keyboard.
 *
 * The LEDs mirror this state: exactly one profile LED is lit and the
 * record LED follows the record mode. */

use tracing::{debug, info, warn};

use crate::device::RecordMode;
use crate::driver::FeatureReport;
use crate::led::{BLINK_DURATION, LedGroup, LedLayout};

#[derive(Debug)]
pub struct DeviceState {
    profile: u8,
    record: RecordMode,
    layout: LedLayout,
    leds: LedGroup,
}

impl DeviceState {
    /* `initial_profile` outside the device's range falls back to profile 0. */
    pub fn new(layout: LedLayout, initial_profile: u8) -> Self {
        let profile = if initial_profile < layout.profile_count() {
            initial_profile
        } else {
            warn!(
                "Profile {} out of range (device has {}), using profile 1",
                initial_profile + 1,
                layout.profile_count()
            );
            0
        };

        Self {
            profile,
            record: RecordMode::Disarmed,
            leds: layout.group(),
            layout,
        }
    }

    pub fn profile(&self) -> u8 {
        self.profile
    }

    pub fn record_mode(&self) -> RecordMode {
        self.record
    }

    #[cfg(test)]
    pub fn leds(&self) -> &LedGroup {
        &self.leds
    }

    /* Push the canonical LED state to the device. */
    pub fn sync_leds(&mut self, io: &mut dyn FeatureReport) {
        if let Some(led) = self.layout.profiles.get(self.profile as usize) {
            self.leds.on(io, *led);
        }
        if self.record.is_armed() {
            self.leds.on(io, self.layout.record);
        } else {
            self.leds.off(io, self.layout.record);
        }
        debug!("LED report {:#04x}", self.leds.state());
    }

    /* Activate `profile` and light its LED exclusively. */
    pub fn select_profile(&mut self, io: &mut dyn FeatureReport, profile: u8) -> bool {
        let Some(led) = self.layout.profiles.get(profile as usize).copied() else {
            warn!("Ignoring selection of unknown profile {}", profile + 1);
            return false;
        };

        self.profile = profile;
        self.leds.on(io, led);
        info!("Switched to profile {}", profile + 1);
        true
    }

    /* Flip record mode and the record LED with it. */
    pub fn toggle_record(&mut self, io: &mut dyn FeatureReport) -> RecordMode {
        self.record = self.record.toggled();
        if self.record.is_armed() {
            self.leds.on(io, self.layout.record);
        } else {
            self.leds.off(io, self.layout.record);
        }
        self.record
    }

    /* Short feedback blink of the record LED. */
    pub fn blink_record(&mut self, io: &mut dyn FeatureReport) {
        self.leds.blink(io, self.layout.record, BLINK_DURATION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::KeyboardDriver;
    use crate::driver::logitech_g710::LogitechG710Driver;
    use crate::led::tests::ReportLog;

    fn state(profile: u8) -> DeviceState {
        DeviceState::new(LogitechG710Driver::new().led_layout(), profile)
    }

    fn lit_profiles(state: &DeviceState) -> Vec<usize> {
        state
            .layout
            .profiles
            .iter()
            .enumerate()
            .filter(|(_, led)| state.leds().is_on(**led))
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_initial_state() {
        let mut io = ReportLog::default();
        let mut s = state(1);
        s.sync_leds(&mut io);
        assert_eq!(s.profile(), 1);
        assert_eq!(s.record_mode(), RecordMode::Disarmed);
        assert_eq!(lit_profiles(&s), vec![1]);
    }

    #[test]
    fn test_out_of_range_initial_profile() {
        assert_eq!(state(7).profile(), 0);
    }

    #[test]
    fn test_profile_switch_keeps_one_led() {
        let mut io = ReportLog::default();
        let mut s = state(0);
        s.sync_leds(&mut io);
        for (i, j) in [(0, 1), (1, 2), (2, 0), (0, 2), (2, 1), (1, 0)] {
            assert!(s.select_profile(&mut io, i));
            assert!(s.select_profile(&mut io, j));
            assert_eq!(s.profile(), j);
            assert_eq!(lit_profiles(&s), vec![j as usize]);
        }
    }

    #[test]
    fn test_unknown_profile_is_ignored() {
        let mut io = ReportLog::default();
        let mut s = state(2);
        assert!(!s.select_profile(&mut io, 3));
        assert_eq!(s.profile(), 2);
        assert!(io.reports.is_empty());
    }

    #[test]
    fn test_record_toggle_pair() {
        let mut io = ReportLog::default();
        let mut s = state(0);
        s.sync_leds(&mut io);
        let record_led = s.layout.record;

        assert_eq!(s.toggle_record(&mut io), RecordMode::Armed);
        assert!(s.leds().is_on(record_led));
        assert_eq!(lit_profiles(&s), vec![0]);

        assert_eq!(s.toggle_record(&mut io), RecordMode::Disarmed);
        assert!(!s.leds().is_on(record_led));
        assert_eq!(lit_profiles(&s), vec![0]);
    }
}
