use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{next_id, ShowError, DEFAULT_FRAME_MS};

/// How a block of channel data is merged into what is already in the buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Overwrite,
    OverwriteIfZero,
    Mask,
    Unmask,
    Average,
    Max,
    Min,
}

impl BlendMode {
    /// Blend `src` into `dst`. Only the overlapping prefix is touched.
    pub fn apply(self, dst: &mut [u8], src: &[u8]) {
        let len = dst.len().min(src.len());
        let (dst, src) = (&mut dst[..len], &src[..len]);

        match self {
            BlendMode::Overwrite => dst.copy_from_slice(src),
            BlendMode::OverwriteIfZero => {
                for (d, s) in dst.iter_mut().zip(src) {
                    if *d == 0 {
                        *d = *s;
                    }
                }
            }
            BlendMode::Mask => {
                for (d, s) in dst.iter_mut().zip(src) {
                    if *s != 0 {
                        *d = 0;
                    }
                }
            }
            BlendMode::Unmask => {
                for (d, s) in dst.iter_mut().zip(src) {
                    if *s == 0 {
                        *d = 0;
                    }
                }
            }
            BlendMode::Average => {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = ((*d as u16 + *s as u16) / 2) as u8;
                }
            }
            BlendMode::Max => {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = (*d).max(*s);
                }
            }
            BlendMode::Min => {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = (*d).min(*s);
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlendMode::Overwrite => "Overwrite",
            BlendMode::OverwriteIfZero => "Overwrite if zero",
            BlendMode::Mask => "Mask",
            BlendMode::Unmask => "Unmask",
            BlendMode::Average => "Average",
            BlendMode::Max => "Max",
            BlendMode::Min => "Min",
        }
    }
}

impl FromStr for BlendMode {
    type Err = ShowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "overwrite" => Ok(BlendMode::Overwrite),
            "overwrite if zero" | "overwriteifzero" | "overwrite if black" => {
                Ok(BlendMode::OverwriteIfZero)
            }
            "mask" => Ok(BlendMode::Mask),
            "unmask" => Ok(BlendMode::Unmask),
            "average" => Ok(BlendMode::Average),
            "max" | "maximum" => Ok(BlendMode::Max),
            "min" | "minimum" => Ok(BlendMode::Min),
            other => Err(ShowError::InvalidBlendMode(other.to_string())),
        }
    }
}

/// What an item does while its step is playing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    /// Frame-indexed channel data. Frames are supplied by whoever loads the show and are not
    /// written back to the schedule file.
    Sequence {
        file: String,
        frame_ms: u32,
        #[serde(default)]
        start_channel: usize,
        #[serde(default)]
        blend: BlendMode,
        #[serde(default)]
        duration_ms: u32,
        #[serde(skip)]
        frames: Vec<Vec<u8>>,
    },
    /// Audio or video played by an external media collaborator.
    Media { file: String, duration_ms: u32 },
    /// Holds the step open without contributing anything.
    Delay { duration_ms: u32 },
    /// Drives a constant value onto a channel range.
    Test {
        start_channel: usize,
        channels: usize,
        value: u8,
        duration_ms: u32,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub delay_ms: u32,
    pub kind: ItemKind,
}

impl PlaylistItem {
    pub fn new(name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            id: next_id(),
            name: name.into(),
            delay_ms: 0,
            kind,
        }
    }

    pub fn sequence(file: impl Into<String>, frame_ms: u32, frames: Vec<Vec<u8>>) -> Self {
        let file = file.into();
        Self::new(
            file_name(&file),
            ItemKind::Sequence {
                file,
                frame_ms: frame_ms.max(1),
                start_channel: 0,
                blend: BlendMode::Overwrite,
                duration_ms: 0,
                frames,
            },
        )
    }

    pub fn media(file: impl Into<String>, duration_ms: u32) -> Self {
        let file = file.into();
        Self::new(file_name(&file), ItemKind::Media { file, duration_ms })
    }

    pub fn delay(duration_ms: u32) -> Self {
        Self::new("Delay", ItemKind::Delay { duration_ms })
    }

    /// Time from the start of the step until this item has finished.
    pub fn end_ms(&self) -> u32 {
        self.delay_ms.saturating_add(self.duration_ms())
    }

    pub fn duration_ms(&self) -> u32 {
        match &self.kind {
            ItemKind::Sequence {
                frame_ms,
                duration_ms,
                frames,
                ..
            } => {
                if frames.is_empty() {
                    *duration_ms
                } else {
                    (frames.len() as u32).saturating_mul(*frame_ms)
                }
            }
            ItemKind::Media { duration_ms, .. }
            | ItemKind::Delay { duration_ms }
            | ItemKind::Test { duration_ms, .. } => *duration_ms,
        }
    }

    pub fn frame_ms(&self) -> Option<u32> {
        match &self.kind {
            ItemKind::Sequence { frame_ms, .. } => Some(*frame_ms),
            _ => None,
        }
    }

    pub fn sequence_file(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::Sequence { file, .. } => Some(file),
            _ => None,
        }
    }

    pub fn media_file(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::Media { file, .. } => Some(file),
            _ => None,
        }
    }

    /// Contribute this item's channel data for `position_ms` (relative to the step start).
    pub fn render(&self, buffer: &mut [u8], position_ms: u32) {
        if position_ms < self.delay_ms || position_ms >= self.end_ms() {
            return;
        }
        let local = position_ms - self.delay_ms;

        match &self.kind {
            ItemKind::Sequence {
                frame_ms,
                start_channel,
                blend,
                frames,
                ..
            } => {
                let index = (local / (*frame_ms).max(1)) as usize;
                if let Some(frame) = frames.get(index) {
                    if *start_channel < buffer.len() {
                        blend.apply(&mut buffer[*start_channel..], frame);
                    }
                }
            }
            ItemKind::Test {
                start_channel,
                channels,
                value,
                ..
            } => {
                let start = (*start_channel).min(buffer.len());
                let end = start.saturating_add(*channels).min(buffer.len());
                buffer[start..end].fill(*value);
            }
            ItemKind::Media { .. } | ItemKind::Delay { .. } => {}
        }
    }
}

/// Final path component of a file reference, which is how peers name a sequence.
pub(crate) fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// The frame period a step should tick at, derived from its first sequence.
pub(crate) fn items_frame_ms(items: &[PlaylistItem]) -> u32 {
    items
        .iter()
        .find_map(PlaylistItem::frame_ms)
        .unwrap_or(DEFAULT_FRAME_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_modes() {
        let src = [0u8, 100, 200, 50];

        let mut dst = [10u8, 10, 10, 10];
        BlendMode::Overwrite.apply(&mut dst, &src);
        assert_eq!(dst, src);

        let mut dst = [0u8, 10, 0, 10];
        BlendMode::OverwriteIfZero.apply(&mut dst, &src);
        assert_eq!(dst, [0, 10, 200, 10]);

        let mut dst = [10u8, 10, 10, 10];
        BlendMode::Mask.apply(&mut dst, &src);
        assert_eq!(dst, [10, 0, 0, 0]);

        let mut dst = [10u8, 10, 10, 10];
        BlendMode::Unmask.apply(&mut dst, &src);
        assert_eq!(dst, [0, 10, 10, 10]);

        let mut dst = [100u8, 100, 100, 100];
        BlendMode::Average.apply(&mut dst, &src);
        assert_eq!(dst, [50, 100, 150, 75]);

        let mut dst = [100u8, 100, 100, 100];
        BlendMode::Max.apply(&mut dst, &src);
        assert_eq!(dst, [100, 100, 200, 100]);

        let mut dst = [100u8, 100, 100, 100];
        BlendMode::Min.apply(&mut dst, &src);
        assert_eq!(dst, [0, 100, 100, 50]);
    }

    #[test]
    fn test_blend_clips_to_destination() {
        let mut dst = [0u8; 2];
        BlendMode::Overwrite.apply(&mut dst, &[1, 2, 3, 4]);
        assert_eq!(dst, [1, 2]);
    }

    #[test]
    fn test_blend_mode_tokens() {
        assert_eq!("".parse::<BlendMode>(), Ok(BlendMode::Overwrite));
        assert_eq!("Maximum".parse::<BlendMode>(), Ok(BlendMode::Max));
        assert_eq!(
            "Overwrite if zero".parse::<BlendMode>(),
            Ok(BlendMode::OverwriteIfZero)
        );
        assert!("sparkle".parse::<BlendMode>().is_err());
    }

    #[test]
    fn test_sequence_renders_frame_for_position() {
        let item = PlaylistItem::sequence("show/intro.fseq", 50, vec![vec![1, 1], vec![2, 2]]);
        assert_eq!(item.name, "intro.fseq");
        assert_eq!(item.duration_ms(), 100);

        let mut buffer = [0u8; 4];
        item.render(&mut buffer, 60);
        assert_eq!(buffer, [2, 2, 0, 0]);

        let mut buffer = [0u8; 4];
        item.render(&mut buffer, 100);
        assert_eq!(buffer, [0, 0, 0, 0]);
    }

    #[test]
    fn test_delayed_test_item() {
        let mut item = PlaylistItem::new(
            "Test",
            ItemKind::Test {
                start_channel: 2,
                channels: 10,
                value: 255,
                duration_ms: 100,
            },
        );
        item.delay_ms = 50;
        assert_eq!(item.end_ms(), 150);

        let mut buffer = [0u8; 4];
        item.render(&mut buffer, 10);
        assert_eq!(buffer, [0, 0, 0, 0]);
        item.render(&mut buffer, 60);
        assert_eq!(buffer, [0, 0, 255, 255]);
    }
}
