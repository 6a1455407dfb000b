use std::path::PathBuf;

/* Kind of key decoded from a vendor input report. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyKind {
    #[default]
    None,
    Macro,
    ProfileSelect,
    RecordToggle,
}

/* A decoded key press. `index` is 1-based; a zero index or `KeyKind::None` */
/* means the report carried nothing actionable. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyEvent {
    pub index: u8,
    pub kind: KeyKind,
}

impl KeyEvent {
    pub const NONE: Self = Self {
        index: 0,
        kind: KeyKind::None,
    };

    pub fn new(index: u8, kind: KeyKind) -> Self {
        Self { index, kind }
    }

    /* True if the event should be dispatched to a handler. */
    pub fn is_actionable(&self) -> bool {
        self.index != 0 && self.kind != KeyKind::None
    }
}

/* Kernel device nodes resolved for one physical keyboard. */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceNodes {
    /* `/dev/hidrawN` of the vendor-specific interface. */
    pub hidraw: PathBuf,
    /* `/dev/input/eventN` of the standard keyboard interface, if found. */
    pub input_event: Option<PathBuf>,
}

/* Record mode of a device. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordMode {
    #[default]
    Disarmed,
    Armed,
}

impl RecordMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Disarmed => Self::Armed,
            Self::Armed => Self::Disarmed,
        }
    }

    pub fn is_armed(self) -> bool {
        self == Self::Armed
    }
}
