use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::audio::SpeakerphoneMode;
use crate::errors::CallError;

pub const DEFAULT_ROOM_SERVER_URL: &str = "https://appr.tc";
/// How many rooms the connect screen remembers.
pub const MAX_RECENT_ROOMS: usize = 10;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CallSettings {
    #[serde(default = "default_room_server_url")]
    pub room_server_url: String,
    #[serde(default)]
    pub speakerphone: SpeakerphoneMode,
    #[serde(default = "default_true")]
    pub video_call: bool,
    #[serde(default)]
    pub loopback: bool,
    #[serde(default)]
    pub recent_rooms: Vec<String>,
    /// Preferred codecs, handed to the media engine as-is.
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_true")]
    pub hardware_codec: bool,
    #[serde(default)]
    pub display_hud: bool,
}

fn default_true() -> bool {
    true
}

fn default_room_server_url() -> String {
    DEFAULT_ROOM_SERVER_URL.to_string()
}

fn default_video_codec() -> String {
    "VP8".to_string()
}

fn default_audio_codec() -> String {
    "OPUS".to_string()
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            room_server_url: default_room_server_url(),
            speakerphone: SpeakerphoneMode::Auto,
            video_call: true,
            loopback: false,
            recent_rooms: Vec::new(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            hardware_codec: true,
            display_hud: false,
        }
    }
}

pub struct SettingsStore {
    settings: Mutex<CallSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &str) -> Self {
        let file_path = PathBuf::from(data_dir).join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallSettings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self) -> CallSettings {
        self.lock().clone()
    }

    /// Only absolute http(s) URLs are accepted.
    pub fn set_room_server_url(&self, room_url: &str) -> Result<(), CallError> {
        let parsed = url::Url::parse(room_url.trim())
            .map_err(|e| CallError::InvalidUrl(format!("{room_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CallError::InvalidUrl(format!(
                "{room_url}: unsupported scheme {}",
                parsed.scheme()
            )));
        }
        self.lock().room_server_url = parsed.as_str().trim_end_matches('/').to_string();
        self.save();
        Ok(())
    }

    pub fn set_speakerphone(&self, mode: SpeakerphoneMode) {
        self.lock().speakerphone = mode;
        self.save();
    }

    pub fn set_video_call(&self, enabled: bool) {
        self.lock().video_call = enabled;
        self.save();
    }

    pub fn set_loopback(&self, enabled: bool) {
        self.lock().loopback = enabled;
        self.save();
    }

    pub fn set_video_codec(&self, codec: &str) {
        self.lock().video_codec = codec.to_string();
        self.save();
    }

    pub fn set_audio_codec(&self, codec: &str) {
        self.lock().audio_codec = codec.to_string();
        self.save();
    }

    pub fn set_hardware_codec(&self, enabled: bool) {
        self.lock().hardware_codec = enabled;
        self.save();
    }

    pub fn set_display_hud(&self, enabled: bool) {
        self.lock().display_hud = enabled;
        self.save();
    }

    /// Move `room_id` to the front of the recent list.
    pub fn add_recent_room(&self, room_id: &str) {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return;
        }
        {
            let mut settings = self.lock();
            settings.recent_rooms.retain(|r| r != room_id);
            settings.recent_rooms.insert(0, room_id.to_string());
            settings.recent_rooms.truncate(MAX_RECENT_ROOMS);
        }
        self.save();
    }

    pub fn remove_recent_room(&self, room_id: &str) {
        self.lock().recent_rooms.retain(|r| r != room_id);
        self.save();
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("failed to write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("failed to serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> CallSettings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring corrupt settings file: {e}");
                CallSettings::default()
            }),
            Err(_) => CallSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_default_settings() {
        let s = CallSettings::default();
        assert_eq!(s.room_server_url, "https://appr.tc");
        assert_eq!(s.speakerphone, SpeakerphoneMode::Auto);
        assert!(s.video_call);
        assert!(!s.loopback);
        assert!(s.recent_rooms.is_empty());
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        assert_eq!(store.get(), CallSettings::default());
    }

    #[test]
    fn test_settings_persist() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        {
            let store = SettingsStore::new(path);
            store.set_room_server_url("https://rooms.example.org/").unwrap();
            store.set_speakerphone(SpeakerphoneMode::Disabled);
            store.set_video_call(false);
            store.set_loopback(true);
            store.set_video_codec("H264 Baseline");
        }
        let store = SettingsStore::new(path);
        let s = store.get();
        assert_eq!(s.room_server_url, "https://rooms.example.org");
        assert_eq!(s.speakerphone, SpeakerphoneMode::Disabled);
        assert!(!s.video_call);
        assert!(s.loopback);
        assert_eq!(s.video_codec, "H264 Baseline");
    }

    #[test]
    fn test_room_server_url_validation() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        assert!(store.set_room_server_url("not a url").is_err());
        assert!(store.set_room_server_url("ftp://appr.tc").is_err());
        assert_eq!(store.get().room_server_url, DEFAULT_ROOM_SERVER_URL);
    }

    #[test]
    fn test_recent_rooms_are_deduplicated_and_bounded() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        for i in 0..(MAX_RECENT_ROOMS + 3) {
            store.add_recent_room(&format!("room{i}"));
        }
        store.add_recent_room("room5");
        store.add_recent_room("  ");

        let rooms = store.get().recent_rooms;
        assert_eq!(rooms.len(), MAX_RECENT_ROOMS);
        assert_eq!(rooms[0], "room5");
        assert_eq!(rooms.iter().filter(|r| *r == "room5").count(), 1);

        store.remove_recent_room("room5");
        assert!(!store.get().recent_rooms.contains(&"room5".to_string()));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        fs::write(dir.path().join("settings.json"), "not json!!!").unwrap();
        let store = SettingsStore::new(path);
        assert_eq!(store.get(), CallSettings::default());
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"loopback":true,"speakerphone":"true"}"#,
        )
        .unwrap();
        let store = SettingsStore::new(path);
        let s = store.get();
        assert!(s.loopback);
        assert_eq!(s.speakerphone, SpeakerphoneMode::Enabled);
        assert_eq!(s.room_server_url, DEFAULT_ROOM_SERVER_URL);
        assert!(s.hardware_codec);
    }
}
