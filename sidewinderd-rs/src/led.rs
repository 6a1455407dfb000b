/* Indicator LEDs driven through a shared HID feature report byte.
 *
 * All LEDs of a group live as single bits in one payload byte of one
 * feature report. The group keeps the last byte it sent, so switching one
 * LED is a read-modify-write of that byte. Profile-class LEDs are mutually
 * exclusive within their group; indicator-class LEDs toggle on their own. */

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::driver::FeatureReport;

/* How long a feedback blink keeps the LED in its inverted state. */
pub const BLINK_DURATION: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedClass {
    Profile,
    Indicator,
}

/* One LED: a single bit in the group's report byte. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Led {
    pub mask: u8,
    pub class: LedClass,
}

impl Led {
    pub const fn profile(mask: u8) -> Self {
        Self {
            mask,
            class: LedClass::Profile,
        }
    }

    pub const fn indicator(mask: u8) -> Self {
        Self {
            mask,
            class: LedClass::Indicator,
        }
    }
}

/* Static LED description of a keyboard model. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedLayout {
    pub report_id: u8,
    /* Profile LEDs, indexed by 0-based profile. */
    pub profiles: Vec<Led>,
    pub record: Led,
}

impl LedLayout {
    pub fn profile_count(&self) -> u8 {
        self.profiles.len() as u8
    }

    pub fn group(&self) -> LedGroup {
        let profile_mask = self.profiles.iter().fold(0, |acc, led| acc | led.mask);
        LedGroup::new(self.report_id, profile_mask)
    }
}

/* Logical state of all LEDs that share one report byte. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedGroup {
    report_id: u8,
    profile_mask: u8,
    state: u8,
}

impl LedGroup {
    pub fn new(report_id: u8, profile_mask: u8) -> Self {
        Self {
            report_id,
            profile_mask,
            state: 0,
        }
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    pub fn is_on(&self, led: Led) -> bool {
        self.state & led.mask != 0
    }

    /* Switch `led` on. A profile LED clears every other profile LED of the */
    /* group in the same report. */
    pub fn on(&mut self, io: &mut dyn FeatureReport, led: Led) {
        let base = match led.class {
            LedClass::Profile => self.state & !self.profile_mask,
            LedClass::Indicator => self.state,
        };
        self.apply(io, base | led.mask);
    }

    /* Switch only `led` off. */
    pub fn off(&mut self, io: &mut dyn FeatureReport, led: Led) {
        self.apply(io, self.state & !led.mask);
    }

    /* Invert `led` for `duration`, then put it back as it was. */
    pub fn blink(&mut self, io: &mut dyn FeatureReport, led: Led, duration: Duration) {
        let was_on = self.is_on(led);
        self.apply(io, self.state ^ led.mask);
        thread::sleep(duration);
        if was_on {
            self.apply(io, self.state | led.mask);
        } else {
            self.apply(io, self.state & !led.mask);
        }
    }

    /* The logical state always advances; a failed write leaves the */
    /* hardware out of sync until the next successful one. */
    fn apply(&mut self, io: &mut dyn FeatureReport, state: u8) {
        self.state = state;
        let report = [self.report_id, self.state];
        if let Err(e) = io.set_feature_report(&report) {
            warn!("Failed to set LED report {:#04x}: {e:#}", self.report_id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use anyhow::bail;

    /* Records every feature report instead of sending it. */
    #[derive(Debug, Default)]
    pub struct ReportLog {
        pub reports: Vec<Vec<u8>>,
        pub fail: bool,
    }

    impl FeatureReport for ReportLog {
        fn set_feature_report(&mut self, buf: &[u8]) -> anyhow::Result<()> {
            if self.fail {
                bail!("device gone");
            }
            self.reports.push(buf.to_vec());
            Ok(())
        }
    }

    fn layout() -> LedLayout {
        LedLayout {
            report_id: 0x06,
            profiles: vec![Led::profile(0x10), Led::profile(0x20), Led::profile(0x40)],
            record: Led::indicator(0x80),
        }
    }

    #[test]
    fn test_profile_leds_are_exclusive() {
        let layout = layout();
        for i in 0..3 {
            for j in 0..3 {
                if i == j {
                    continue;
                }
                let mut io = ReportLog::default();
                let mut group = layout.group();
                group.on(&mut io, layout.profiles[i]);
                group.on(&mut io, layout.profiles[j]);
                assert!(!group.is_on(layout.profiles[i]));
                assert!(group.is_on(layout.profiles[j]));
                let lit = layout.profiles.iter().filter(|l| group.is_on(**l)).count();
                assert_eq!(lit, 1);
                assert_eq!(io.reports.last(), Some(&vec![0x06, layout.profiles[j].mask]));
            }
        }
    }

    #[test]
    fn test_indicator_does_not_touch_profiles() {
        let layout = layout();
        let mut io = ReportLog::default();
        let mut group = layout.group();
        group.on(&mut io, layout.profiles[1]);
        group.on(&mut io, layout.record);
        assert_eq!(group.state(), 0x20 | 0x80);

        group.on(&mut io, layout.profiles[2]);
        assert_eq!(group.state(), 0x40 | 0x80);

        group.off(&mut io, layout.record);
        assert_eq!(group.state(), 0x40);
        assert_eq!(io.reports.len(), 4);
    }

    #[test]
    fn test_blink_restores_state() {
        let layout = layout();
        let mut io = ReportLog::default();
        let mut group = layout.group();
        group.on(&mut io, layout.profiles[0]);
        group.on(&mut io, layout.record);

        group.blink(&mut io, layout.record, Duration::from_millis(1));
        assert_eq!(group.state(), 0x10 | 0x80);
        assert_eq!(io.reports[2], vec![0x06, 0x10]);
        assert_eq!(io.reports[3], vec![0x06, 0x90]);

        group.blink(&mut io, layout.profiles[1], Duration::from_millis(1));
        assert_eq!(group.state(), 0x10 | 0x80);
    }

    #[test]
    fn test_write_failure_keeps_logical_state() {
        let layout = layout();
        let mut io = ReportLog {
            fail: true,
            ..Default::default()
        };
        let mut group = layout.group();
        group.on(&mut io, layout.profiles[2]);
        assert!(group.is_on(layout.profiles[2]));
        assert!(io.reports.is_empty());
    }
}
