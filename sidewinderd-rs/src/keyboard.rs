/* Keyboard core: runs one connected keyboard for the daemon's lifetime.
 *
 * Each physical keyboard gets its own blocking thread, which owns the
 * hidraw handle, the vendor driver and the profile/record state. Reports
 * are handled strictly in read order. Macro playback is handed off to
 * detached tasks on the tokio runtime so the read loop never waits on it.
 *
 * While a macro is being recorded the loop also polls the keyboard's
 * `/dev/input/eventN` node and appends every key press/release to the
 * open recording. */

use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use evdev::{EventType, InputEvent};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::device::{KeyEvent, KeyKind};
use crate::device_database::DeviceDescriptor;
use crate::driver::{self, DeviceIo, FeatureReport, KeyboardDriver, MAX_REPORT_LEN};
use crate::macros::{self, KeyAction, MacroStore, Recorder};
use crate::state::DeviceState;

/* Process-wide settings, read-only once the daemon is running. */
#[derive(Debug, Clone)]
pub struct Settings {
    pub store: MacroStore,
    pub capture_delays: bool,
    /* 0-based profile active after connecting. */
    pub profile: u8,
}

pub struct Keyboard {
    driver: Box<dyn KeyboardDriver>,
    state: DeviceState,
    settings: Arc<Settings>,
    runtime: Handle,
    input_event: Option<PathBuf>,
    recorder: Option<Recorder>,
    key_events: Option<evdev::Device>,
}

impl Keyboard {
    pub fn new(
        driver: Box<dyn KeyboardDriver>,
        settings: Arc<Settings>,
        input_event: Option<PathBuf>,
        runtime: Handle,
    ) -> Self {
        let state = DeviceState::new(driver.led_layout(), settings.profile);
        Self {
            driver,
            state,
            settings,
            runtime,
            input_event,
            recorder: None,
            key_events: None,
        }
    }

    /* Reset the opened keyboard, light the initial LEDs and process its */
    /* reports until the device goes away. */
    pub fn connect(
        descriptor: &DeviceDescriptor,
        mut io: DeviceIo,
        input_event: Option<PathBuf>,
        settings: Arc<Settings>,
        runtime: Handle,
    ) -> Result<()> {
        let mut keyboard = Self::new(
            driver::create_driver(descriptor.driver),
            settings,
            input_event,
            runtime,
        );

        if let Err(e) = keyboard.driver.initialize(&mut io) {
            warn!("{} reset failed: {e:#}", keyboard.driver.name());
        }
        keyboard.state.sync_leds(&mut io);

        info!(
            "{} ready on {} (profile {})",
            keyboard.driver.name(),
            io.path().display(),
            keyboard.state.profile() + 1
        );

        keyboard.run(&mut io)
    }

    fn run(&mut self, io: &mut DeviceIo) -> Result<()> {
        let mut buf = [0u8; MAX_REPORT_LEN];

        loop {
            let (report_ready, keys_ready) = self.wait(io)?;

            if keys_ready {
                self.drain_key_events();
            }

            if report_ready {
                let n = io.read_report(&mut buf)?;
                let event = self.driver.decode(&buf[..n]);
                if event.is_actionable() {
                    self.handle(io, event);
                }
            }
        }
    }

    /* Block until the hidraw node or, while recording, the event node */
    /* has data. */
    fn wait(&self, io: &DeviceIo) -> Result<(bool, bool)> {
        let mut fds = vec![PollFd::new(io.as_fd(), PollFlags::POLLIN)];
        if let Some(device) = &self.key_events {
            /* SAFETY: `device` owns the fd and outlives `fds`. */
            let fd = unsafe { BorrowedFd::borrow_raw(device.as_raw_fd()) };
            fds.push(PollFd::new(fd, PollFlags::POLLIN));
        }

        loop {
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).with_context(|| format!("poll on {}", io.path().display())),
            }
        }

        let ready = |fd: &PollFd| {
            fd.revents().is_some_and(|r| {
                r.intersects(PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP)
            })
        };
        Ok((ready(&fds[0]), fds.get(1).is_some_and(ready)))
    }

    /* Dispatch one decoded key press. */
    pub fn handle(&mut self, io: &mut dyn FeatureReport, event: KeyEvent) {
        debug!("Key event {event:?}");
        match event.kind {
            KeyKind::Macro => self.on_macro_key(io, event.index),
            KeyKind::ProfileSelect => match self.driver.profile_for_key(event.index) {
                Some(profile) => {
                    self.state.select_profile(io, profile);
                }
                None => debug!("Key M{} selects no profile", event.index),
            },
            KeyKind::RecordToggle => self.on_record_toggle(io),
            KeyKind::None => {}
        }
    }

    fn on_macro_key(&mut self, io: &mut dyn FeatureReport, key: u8) {
        if self.state.record_mode().is_armed() {
            self.finish_recording();
            self.state.blink_record(io);
            self.start_recording(key);
            return;
        }

        let profile = self.state.profile();
        match self.settings.store.lookup(profile, key) {
            Some(path) => {
                macros::spawn_playback(&self.runtime, path, self.settings.capture_delays)
            }
            None => debug!("No macro on G{key} in profile {}", profile + 1),
        }
    }

    fn on_record_toggle(&mut self, io: &mut dyn FeatureReport) {
        if self.state.toggle_record(io).is_armed() {
            info!("Record mode on, press a G-key to pick the macro slot");
        } else {
            self.finish_recording();
            info!("Record mode off");
        }
    }

    fn start_recording(&mut self, key: u8) {
        let slot = self.settings.store.slot_path(self.state.profile(), key);
        self.recorder = Some(Recorder::start(slot));

        if self.key_events.is_some() {
            return;
        }
        match &self.input_event {
            Some(path) => match evdev::Device::open(path) {
                Ok(device) => self.key_events = Some(device),
                Err(e) => warn!("Cannot capture keys from {}: {e}", path.display()),
            },
            None => warn!("No keyboard event node, the recording will stay empty"),
        }
    }

    fn finish_recording(&mut self) {
        self.key_events = None;
        let Some(recorder) = self.recorder.take() else {
            return;
        };
        let slot = recorder.slot().to_path_buf();
        if let Err(e) = recorder.finish() {
            error!("Discarding recording for {}: {e}", slot.display());
        }
    }

    fn drain_key_events(&mut self) {
        let fetched = match self.key_events.as_mut() {
            Some(device) => device
                .fetch_events()
                .map(|events| events.collect::<Vec<InputEvent>>()),
            None => return,
        };
        let events = match fetched {
            Ok(events) => events,
            Err(e) => {
                warn!("Lost keyboard event node: {e}");
                self.key_events = None;
                return;
            }
        };

        for event in events {
            if event.event_type() != EventType::KEY {
                continue;
            }
            /* value 2 is autorepeat */
            let action = match event.value() {
                1 => KeyAction::Press,
                0 => KeyAction::Release,
                _ => continue,
            };
            self.capture_key(event.code(), action);
        }
    }

    fn capture_key(&mut self, code: u16, action: KeyAction) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.push(code, action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordMode;
    use crate::driver::logitech_g710::LogitechG710Driver;
    use crate::led::tests::ReportLog;
    use crate::macros::Recording;

    const G1: [u8; 4] = [0x03, 0x01, 0x00, 0x00];
    const G2: [u8; 4] = [0x03, 0x02, 0x00, 0x00];
    const M2: [u8; 4] = [0x03, 0x00, 0x20, 0x00];
    const MR: [u8; 4] = [0x03, 0x00, 0x80, 0x00];

    fn keyboard(dir: &std::path::Path) -> Keyboard {
        let settings = Arc::new(Settings {
            store: MacroStore::new(dir),
            capture_delays: true,
            profile: 0,
        });
        Keyboard::new(
            Box::new(LogitechG710Driver::new()),
            settings,
            None,
            Handle::current(),
        )
    }

    fn press(kb: &mut Keyboard, io: &mut ReportLog, report: &[u8]) {
        let event = kb.driver.decode(report);
        if event.is_actionable() {
            kb.handle(io, event);
        }
    }

    #[tokio::test]
    async fn test_profile_keys_switch_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut io = ReportLog::default();
        let mut kb = keyboard(dir.path());
        kb.state.sync_leds(&mut io);

        press(&mut kb, &mut io, &M2);
        assert_eq!(kb.state.profile(), 1);
        assert_eq!(kb.state.leds().state(), 0x20);
        assert_eq!(io.reports.last(), Some(&vec![0x06, 0x20]));
    }

    #[tokio::test]
    async fn test_unbound_macro_key_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut io = ReportLog::default();
        let mut kb = keyboard(dir.path());

        press(&mut kb, &mut io, &G1);
        assert!(io.reports.is_empty());
        assert!(kb.recorder.is_none());
    }

    #[tokio::test]
    async fn test_record_flow_saves_to_active_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut io = ReportLog::default();
        let mut kb = keyboard(dir.path());

        press(&mut kb, &mut io, &M2);
        press(&mut kb, &mut io, &MR);
        assert_eq!(kb.state.record_mode(), RecordMode::Armed);
        assert!(kb.recorder.is_none());

        press(&mut kb, &mut io, &G2);
        assert!(kb.recorder.is_some());
        kb.capture_key(30, KeyAction::Press);
        kb.capture_key(30, KeyAction::Release);

        press(&mut kb, &mut io, &MR);
        assert_eq!(kb.state.record_mode(), RecordMode::Disarmed);
        assert!(kb.recorder.is_none());
        assert_eq!(kb.state.leds().state(), 0x20);

        let path = kb.settings.store.lookup(1, 2).expect("macro saved");
        let codes: Vec<_> = Recording::load(&path)
            .unwrap()
            .events
            .iter()
            .map(|e| (e.code, e.action))
            .collect();
        assert_eq!(codes, vec![(30, KeyAction::Press), (30, KeyAction::Release)]);
        assert!(kb.settings.store.lookup(0, 2).is_none());
    }

    #[tokio::test]
    async fn test_new_slot_closes_open_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut io = ReportLog::default();
        let mut kb = keyboard(dir.path());

        press(&mut kb, &mut io, &MR);
        press(&mut kb, &mut io, &G1);
        kb.capture_key(2, KeyAction::Press);
        press(&mut kb, &mut io, &G2);
        kb.capture_key(3, KeyAction::Press);
        press(&mut kb, &mut io, &MR);

        let first = Recording::load(&kb.settings.store.slot_path(0, 1)).unwrap();
        let second = Recording::load(&kb.settings.store.slot_path(0, 2)).unwrap();
        assert_eq!(first.events[0].code, 2);
        assert_eq!(second.events[0].code, 3);
        assert_eq!(second.events.len(), 1);
    }

    #[tokio::test]
    async fn test_disarm_without_slot_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut io = ReportLog::default();
        let mut kb = keyboard(dir.path());

        press(&mut kb, &mut io, &MR);
        assert_eq!(kb.state.leds().state() & 0x80, 0x80);
        press(&mut kb, &mut io, &MR);
        assert_eq!(kb.state.leds().state() & 0x80, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_keys_outside_recording_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut io = ReportLog::default();
        let mut kb = keyboard(dir.path());

        kb.capture_key(30, KeyAction::Press);
        press(&mut kb, &mut io, &MR);
        kb.capture_key(30, KeyAction::Press);
        press(&mut kb, &mut io, &MR);
        assert!(kb.settings.store.lookup(0, 1).is_none());
    }
}
