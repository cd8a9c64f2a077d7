use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CallError;

/// Audio output routes. Ordering is the order devices are listed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AudioDevice {
    SpeakerPhone,
    WiredHeadset,
    Earpiece,
    Bluetooth,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioManagerState {
    Uninitialized,
    Running,
}

/// The "speakerphone" preference. `Auto` lets the proximity sensor pick
/// between earpiece and speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpeakerphoneMode {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "true")]
    Enabled,
    #[serde(rename = "false")]
    Disabled,
}

impl SpeakerphoneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerphoneMode::Auto => "auto",
            SpeakerphoneMode::Enabled => "true",
            SpeakerphoneMode::Disabled => "false",
        }
    }

    /// Route used when nothing better is plugged in.
    pub fn default_device(&self) -> AudioDevice {
        match self {
            SpeakerphoneMode::Disabled => AudioDevice::Earpiece,
            _ => AudioDevice::SpeakerPhone,
        }
    }
}

impl fmt::Display for SpeakerphoneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpeakerphoneMode {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(SpeakerphoneMode::Auto),
            "true" => Ok(SpeakerphoneMode::Enabled),
            "false" => Ok(SpeakerphoneMode::Disabled),
            other => Err(CallError::Audio(format!("unknown speakerphone mode: {other}"))),
        }
    }
}
