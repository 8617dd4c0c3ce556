//! Guard mode state machine.
//!
//! Pure and synchronous: every operation returns the [`Transition`] it made
//! (possibly a no-op) together with the events collaborators should see.
//! The guard task owns the only instance.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Registering,
    Monitoring,
    Alarmed,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Registering => "registering",
            Mode::Monitoring => "monitoring",
            Mode::Alarmed => "alarmed",
        }
    }

    /// Text for the tray / background status indicator.
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Idle => "Protection Disabled",
            Mode::Registering => "Registration Mode - Look at camera",
            Mode::Monitoring => "Protected - Monitoring Active",
            Mode::Alarmed => "Disguise Active",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What raised an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmSource {
    /// The detection loop matched an enrolled face.
    Detection,
    /// The host reported a detection (watcher signal).
    External,
    /// Panic hotkey or manual trigger.
    Manual,
}

impl AlarmSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmSource::Detection => "detection",
            AlarmSource::External => "external",
            AlarmSource::Manual => "manual",
        }
    }
}

/// How an alarm ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Disguise view exit action.
    Exit,
    /// Cancellation key.
    Cancel,
    /// Panic hotkey pressed again.
    Toggle,
    /// Explicit request to resume monitoring.
    Clear,
    /// Configured automatic clear timer.
    AutoClear,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Exit => "exit",
            ExitReason::Cancel => "cancel",
            ExitReason::Toggle => "toggle",
            ExitReason::Clear => "clear",
            ExitReason::AutoClear => "auto-clear",
        }
    }
}

/// Notifications published to collaborators on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    RegisteringStarted,
    RegisteringStopped,
    MonitoringStarted,
    MonitoringStopped,
    AlarmEntered(AlarmSource),
    AlarmExited(ExitReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: Mode,
    pub to: Mode,
    pub events: Vec<ModeEvent>,
}

impl Transition {
    fn unchanged(mode: Mode) -> Self {
        Self {
            from: mode,
            to: mode,
            events: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.events.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModeError {
    #[error("gallery is empty; register a face before monitoring")]
    EmptyGallery,
    #[error("camera is in use while {0}")]
    CameraBusy(Mode),
    #[error("cannot {action} while {mode}")]
    NotAllowed { action: &'static str, mode: Mode },
}

#[derive(Debug)]
pub struct ModeMachine {
    mode: Mode,
    /// Mode to return to when an alarm is toggled off.
    resume: Mode,
}

impl Default for ModeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeMachine {
    pub fn new() -> Self {
        Self {
            mode: Mode::Idle,
            resume: Mode::Idle,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// True while the camera should stay open: a camera mode, or an alarm
    /// raised over a monitoring session that can still be re-armed.
    pub fn camera_wanted(&self) -> bool {
        match self.mode {
            Mode::Registering | Mode::Monitoring => true,
            Mode::Alarmed => self.resume == Mode::Monitoring,
            Mode::Idle => false,
        }
    }

    /// Mode a toggle-off would return to, if currently alarmed.
    pub fn resume_mode(&self) -> Option<Mode> {
        (self.mode == Mode::Alarmed).then_some(self.resume)
    }

    fn go(&mut self, to: Mode, events: Vec<ModeEvent>) -> Transition {
        let from = self.mode;
        self.mode = to;
        Transition { from, to, events }
    }

    pub fn start_registering(&mut self) -> Result<Transition, ModeError> {
        match self.mode {
            Mode::Idle => Ok(self.go(Mode::Registering, vec![ModeEvent::RegisteringStarted])),
            Mode::Registering => Ok(Transition::unchanged(self.mode)),
            Mode::Monitoring => Err(ModeError::CameraBusy(Mode::Monitoring)),
            Mode::Alarmed => Err(ModeError::NotAllowed {
                action: "start registering",
                mode: Mode::Alarmed,
            }),
        }
    }

    /// Leave registering. While alarmed over a registration, the camera is
    /// already released; only the toggle-off target changes to Idle.
    pub fn stop_registering(&mut self) -> Transition {
        match self.mode {
            Mode::Registering => self.go(Mode::Idle, vec![ModeEvent::RegisteringStopped]),
            Mode::Alarmed if self.resume == Mode::Registering => {
                self.resume = Mode::Idle;
                Transition::unchanged(Mode::Alarmed)
            }
            _ => Transition::unchanged(self.mode),
        }
    }

    /// Enter monitoring. An empty gallery blocks this from every mode.
    pub fn start_monitoring(&mut self, gallery_len: usize) -> Result<Transition, ModeError> {
        if gallery_len == 0 {
            return Err(ModeError::EmptyGallery);
        }
        match self.mode {
            Mode::Idle => Ok(self.go(Mode::Monitoring, vec![ModeEvent::MonitoringStarted])),
            Mode::Monitoring => Ok(Transition::unchanged(self.mode)),
            Mode::Registering => Err(ModeError::CameraBusy(Mode::Registering)),
            Mode::Alarmed => Err(ModeError::NotAllowed {
                action: "start monitoring",
                mode: Mode::Alarmed,
            }),
        }
    }

    /// Leave monitoring. While alarmed over a monitoring session, releases
    /// the camera and makes a later toggle-off land in Idle.
    pub fn stop_monitoring(&mut self) -> Transition {
        match self.mode {
            Mode::Monitoring => self.go(Mode::Idle, vec![ModeEvent::MonitoringStopped]),
            Mode::Alarmed if self.resume == Mode::Monitoring => {
                self.resume = Mode::Idle;
                Transition {
                    from: Mode::Alarmed,
                    to: Mode::Alarmed,
                    events: vec![ModeEvent::MonitoringStopped],
                }
            }
            _ => Transition::unchanged(self.mode),
        }
    }

    /// Raise the alarm. A no-op while already alarmed; detection alarms are
    /// only accepted from monitoring.
    pub fn alarm(&mut self, source: AlarmSource) -> Result<Transition, ModeError> {
        if self.mode == Mode::Alarmed {
            return Ok(Transition::unchanged(Mode::Alarmed));
        }
        if source == AlarmSource::Detection && self.mode != Mode::Monitoring {
            return Err(ModeError::NotAllowed {
                action: "raise a detection alarm",
                mode: self.mode,
            });
        }

        let mut events = Vec::with_capacity(2);
        if self.mode == Mode::Registering {
            events.push(ModeEvent::RegisteringStopped);
        }
        events.push(ModeEvent::AlarmEntered(source));
        self.resume = self.mode;
        Ok(self.go(Mode::Alarmed, events))
    }

    /// Panic hotkey: raise the alarm, or drop it and return to the mode it
    /// interrupted. Monitoring is only resumed while the gallery is non-empty.
    pub fn toggle_alarm(&mut self, gallery_len: usize) -> Transition {
        if self.mode != Mode::Alarmed {
            // Manual alarms are accepted from every non-alarmed mode.
            return self
                .alarm(AlarmSource::Manual)
                .unwrap_or_else(|_| Transition::unchanged(self.mode));
        }

        let exited = ModeEvent::AlarmExited(ExitReason::Toggle);
        match self.resume {
            Mode::Monitoring if gallery_len > 0 => self.go(Mode::Monitoring, vec![exited]),
            Mode::Monitoring => self.go(Mode::Idle, vec![exited, ModeEvent::MonitoringStopped]),
            Mode::Registering => {
                self.go(Mode::Registering, vec![exited, ModeEvent::RegisteringStarted])
            }
            _ => self.go(Mode::Idle, vec![exited]),
        }
    }

    /// Explicit exit or cancellation key: leave the alarm for Idle.
    /// A no-op when not alarmed.
    pub fn exit_alarm(&mut self, reason: ExitReason) -> Transition {
        if self.mode != Mode::Alarmed {
            return Transition::unchanged(self.mode);
        }
        let mut events = vec![ModeEvent::AlarmExited(reason)];
        if self.resume == Mode::Monitoring {
            events.push(ModeEvent::MonitoringStopped);
        }
        self.resume = Mode::Idle;
        self.go(Mode::Idle, events)
    }

    /// Drop the alarm and re-arm the monitoring session it interrupted.
    pub fn clear_alarm(
        &mut self,
        reason: ExitReason,
        gallery_len: usize,
    ) -> Result<Transition, ModeError> {
        if self.mode != Mode::Alarmed {
            return Ok(Transition::unchanged(self.mode));
        }
        if self.resume != Mode::Monitoring {
            return Err(ModeError::NotAllowed {
                action: "resume monitoring",
                mode: Mode::Alarmed,
            });
        }
        if gallery_len == 0 {
            return Err(ModeError::EmptyGallery);
        }
        Ok(self.go(Mode::Monitoring, vec![ModeEvent::AlarmExited(reason)]))
    }
}
