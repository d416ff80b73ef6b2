use serde::Serialize;

use super::generators::SoundCategory;

/// A selectable ambient sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SoundProfile {
    pub id: &'static str,
    pub title: &'static str,
    pub artist: &'static str,
    pub mood: &'static str,
    pub category: SoundCategory,
}

pub static TRACKS: [SoundProfile; 4] = [
    SoundProfile {
        id: "1",
        title: "Ocean Waves",
        artist: "Nature Sounds",
        mood: "calm",
        category: SoundCategory::Ocean,
    },
    SoundProfile {
        id: "2",
        title: "Gentle Rain",
        artist: "Ambient Sounds",
        mood: "relaxing",
        category: SoundCategory::Rain,
    },
    SoundProfile {
        id: "3",
        title: "Forest Birds",
        artist: "Nature Harmony",
        mood: "peaceful",
        category: SoundCategory::Birds,
    },
    SoundProfile {
        id: "4",
        title: "Wind Chimes",
        artist: "Meditation Music",
        mood: "focus",
        category: SoundCategory::Chimes,
    },
];

pub fn find(id: &str) -> Option<&'static SoundProfile> {
    TRACKS.iter().find(|t| t.id == id)
}
