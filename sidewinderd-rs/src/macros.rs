/* Macro engine: storage, recording and playback of key sequences.
 *
 * A macro slot is one JSON file per (profile, G-key) under the work
 * directory. Slots are replaced atomically (temp file + rename), so a
 * reader sees either the old or the new recording, never a partial one.
 *
 * Playback runs as a detached tokio task that owns a freshly created
 * uinput keyboard. Nobody joins or cancels it: two macros fired at once
 * play concurrently and may interleave their output. */

use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/* Highest key code advertised by the virtual keyboard. */
const VIRTUAL_KEY_MAX: u16 = 0xff;

/* Time given to userspace to pick up a new uinput device before it emits. */
const VIRTUAL_DEVICE_SETTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum MacroError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed macro {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize macro: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Virtual keyboard error: {0}")]
    Sink(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Press,
    Release,
}

impl KeyAction {
    /* evdev `EV_KEY` value. */
    pub fn value(self) -> i32 {
        match self {
            Self::Press => 1,
            Self::Release => 0,
        }
    }
}

/* One captured key transition. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroEvent {
    pub code: u16,
    pub action: KeyAction,
    /* Milliseconds since the recording started. */
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub events: Vec<MacroEvent>,
}

impl Recording {
    pub fn load(path: &Path) -> Result<Self, MacroError> {
        let file = File::open(path).map_err(|source| MacroError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| MacroError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /* Atomically replace the file at `path` with this recording. */
    pub fn save(&self, path: &Path) -> Result<(), MacroError> {
        let io_err = |source| MacroError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, self).map_err(MacroError::Serialize)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    /* Delay to wait before each event, derived from the recorded timestamps. */
    pub fn gaps(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut previous = 0;
        self.events.iter().map(move |event| {
            let gap = event.elapsed_ms.saturating_sub(previous);
            previous = event.elapsed_ms;
            Duration::from_millis(gap)
        })
    }
}

/* Maps (profile, G-key) to macro files below a root directory. */
#[derive(Debug, Clone)]
pub struct MacroStore {
    root: PathBuf,
}

impl MacroStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /* Location of the slot, whether or not it holds a macro. */
    /* `profile` is 0-based, `key` is the 1-based G-key index. */
    pub fn slot_path(&self, profile: u8, key: u8) -> PathBuf {
        self.root
            .join(format!("profile_{}", u32::from(profile) + 1))
            .join(format!("s{key}.json"))
    }

    /* The bound macro, or `None` if the slot is empty. */
    pub fn lookup(&self, profile: u8, key: u8) -> Option<PathBuf> {
        let path = self.slot_path(profile, key);
        path.is_file().then_some(path)
    }
}

/* An open recording for one macro slot. */
#[derive(Debug)]
pub struct Recorder {
    slot: PathBuf,
    started: Instant,
    recording: Recording,
}

impl Recorder {
    pub fn start(slot: PathBuf) -> Self {
        info!("Recording macro into {}", slot.display());
        Self {
            slot,
            started: Instant::now(),
            recording: Recording::default(),
        }
    }

    pub fn slot(&self) -> &Path {
        &self.slot
    }

    pub fn is_empty(&self) -> bool {
        self.recording.events.is_empty()
    }

    pub fn push(&mut self, code: u16, action: KeyAction) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.push_at(code, action, elapsed_ms);
    }

    pub fn push_at(&mut self, code: u16, action: KeyAction, elapsed_ms: u64) {
        debug!("Captured key {code} {action:?} at {elapsed_ms} ms");
        self.recording.events.push(MacroEvent {
            code,
            action,
            elapsed_ms,
        });
    }

    /* Persist the recording. An empty recording leaves the slot untouched. */
    pub fn finish(self) -> Result<usize, MacroError> {
        if self.is_empty() {
            warn!("Nothing recorded, keeping {} as it was", self.slot.display());
            return Ok(0);
        }
        self.recording.save(&self.slot)?;
        info!(
            "Saved {} events to {}",
            self.recording.events.len(),
            self.slot.display()
        );
        Ok(self.recording.events.len())
    }
}

/* Destination of synthesized key events. */
pub trait KeySink {
    fn emit_key(&mut self, code: u16, action: KeyAction) -> Result<(), MacroError>;
}

/* uinput keyboard used to replay macros. */
pub struct VirtualKeyboard {
    device: VirtualDevice,
}

impl VirtualKeyboard {
    pub fn new() -> Result<Self, MacroError> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 1..=VIRTUAL_KEY_MAX {
            keys.insert(Key::new(code));
        }

        let device = VirtualDeviceBuilder::new()
            .map_err(MacroError::Sink)?
            .name("sidewinderd")
            .with_keys(&keys)
            .map_err(MacroError::Sink)?
            .build()
            .map_err(MacroError::Sink)?;

        Ok(Self { device })
    }
}

impl KeySink for VirtualKeyboard {
    fn emit_key(&mut self, code: u16, action: KeyAction) -> Result<(), MacroError> {
        let event = InputEvent::new(EventType::KEY, code, action.value());
        self.device.emit(&[event]).map_err(MacroError::Sink)
    }
}

/* Replay `recording` into `sink`. Recorded gaps are honoured only when */
/* `capture_delays` is set. */
pub async fn replay<S: KeySink>(
    recording: &Recording,
    sink: &mut S,
    capture_delays: bool,
) -> Result<(), MacroError> {
    for (event, gap) in recording.events.iter().zip(recording.gaps()) {
        if capture_delays && !gap.is_zero() {
            tokio::time::sleep(gap).await;
        }
        sink.emit_key(event.code, event.action)?;
    }
    Ok(())
}

/* Load the macro at `path` and play it on a new virtual keyboard. */
pub async fn play(path: &Path, capture_delays: bool) -> Result<(), MacroError> {
    let recording = Recording::load(path)?;
    let mut keyboard = VirtualKeyboard::new()?;
    tokio::time::sleep(VIRTUAL_DEVICE_SETTLE).await;
    replay(&recording, &mut keyboard, capture_delays).await
}

/* Fire-and-forget playback on the runtime behind `handle`. */
pub fn spawn_playback(handle: &Handle, path: PathBuf, capture_delays: bool) {
    handle.spawn(async move {
        debug!("Playing macro {}", path.display());
        if let Err(e) = play(&path, capture_delays).await {
            warn!("Macro playback aborted: {e}");
        }
    });
}
