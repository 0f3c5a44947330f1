//! Guess a content category from a file name.
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileCategory {
    Image,
    Archive,
    Audio,
    Video,
    Script,
    Other,
}

const IMAGE_EXTS: &[&str] = &[
    "bmp", "gif", "jpeg", "jpg", "pimg", "png", "psb", "tga", "tlg", "tlg5", "tlg6", "webp",
];
const ARCHIVE_EXTS: &[&str] = &["7z", "arc", "gz", "lzh", "rar", "xp3", "zip"];
const AUDIO_EXTS: &[&str] = &["mp3", "ogg", "opus", "wav"];
const VIDEO_EXTS: &[&str] = &["mp4", "mpg", "wmv"];
const SCRIPT_EXTS: &[&str] = &["csv", "ks", "scn", "tjs", "txt"];

/// Returns the category of `name` judged by its extension.
pub fn guess_category(name: &str) -> FileCategory {
    let ext = Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    let ext = ext.as_str();
    if IMAGE_EXTS.contains(&ext) {
        FileCategory::Image
    } else if ARCHIVE_EXTS.contains(&ext) {
        FileCategory::Archive
    } else if AUDIO_EXTS.contains(&ext) {
        FileCategory::Audio
    } else if VIDEO_EXTS.contains(&ext) {
        FileCategory::Video
    } else if SCRIPT_EXTS.contains(&ext) {
        FileCategory::Script
    } else {
        FileCategory::Other
    }
}

#[test]
fn test_guess_category() {
    assert_eq!(guess_category("bg/title.PNG"), FileCategory::Image);
    assert_eq!(guess_category("patch.xp3"), FileCategory::Archive);
    assert_eq!(guess_category("bgm01.ogg"), FileCategory::Audio);
    assert_eq!(guess_category("first.ks"), FileCategory::Script);
    assert_eq!(guess_category("data.dat"), FileCategory::Other);
    assert_eq!(guess_category("noext"), FileCategory::Other);
}
