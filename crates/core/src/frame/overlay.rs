use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use marquee_show::BlendMode;

/// Externally injected channel values laid over the composited frame.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelOverlay {
    /// 1-based channel the data starts at.
    pub start_channel: usize,
    pub data: Vec<u8>,
    pub blend: BlendMode,
}

impl PixelOverlay {
    pub fn apply(&self, buffer: &mut [u8]) {
        let offset = self.start_channel.saturating_sub(1);
        if offset < buffer.len() {
            self.blend.apply(&mut buffer[offset..], &self.data);
        }
    }

    /// Last 1-based channel this overlay writes.
    pub fn end_channel(&self) -> usize {
        self.start_channel + self.data.len().saturating_sub(1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayChange {
    Added,
    Updated,
    Removed,
    /// Empty payload for a channel with no overlay.
    Ignored,
}

/// At most one overlay per start channel, applied in insertion order.
#[derive(Clone, Debug, Default)]
pub struct OverlaySet {
    overlays: Vec<PixelOverlay>,
}

impl OverlaySet {
    /// Add, replace or (with an empty payload) remove the overlay at `start_channel`.
    /// `payload` is base64.
    pub fn set(
        &mut self,
        start_channel: usize,
        payload: &str,
        blend: BlendMode,
    ) -> Result<OverlayChange, base64::DecodeError> {
        let data = STANDARD.decode(payload.trim())?;
        let existing = self
            .overlays
            .iter()
            .position(|o| o.start_channel == start_channel);

        let change = match (existing, data.is_empty()) {
            (Some(index), true) => {
                self.overlays.remove(index);
                OverlayChange::Removed
            }
            (Some(index), false) => {
                let overlay = &mut self.overlays[index];
                overlay.data = data;
                overlay.blend = blend;
                OverlayChange::Updated
            }
            (None, true) => OverlayChange::Ignored,
            (None, false) => {
                self.overlays.push(PixelOverlay {
                    start_channel,
                    data,
                    blend,
                });
                OverlayChange::Added
            }
        };

        log::debug!("Overlay at channel {}: {:?}", start_channel, change);
        Ok(change)
    }

    pub fn apply(&self, buffer: &mut [u8]) {
        for overlay in &self.overlays {
            overlay.apply(buffer);
        }
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PixelOverlay> {
        self.overlays.iter()
    }

    pub fn clear(&mut self) {
        self.overlays.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    #[test]
    fn test_same_channel_replaces() {
        let mut set = OverlaySet::default();
        let payload = encode(&[1, 2, 3]);
        assert_eq!(
            set.set(100, &payload, BlendMode::Overwrite).unwrap(),
            OverlayChange::Added
        );
        assert_eq!(
            set.set(100, &payload, BlendMode::Overwrite).unwrap(),
            OverlayChange::Updated
        );
        assert_eq!(set.len(), 1);

        assert_eq!(
            set.set(100, "", BlendMode::Overwrite).unwrap(),
            OverlayChange::Removed
        );
        assert!(set.is_empty());
        assert_eq!(
            set.set(100, "", BlendMode::Overwrite).unwrap(),
            OverlayChange::Ignored
        );
    }

    #[test]
    fn test_apply_uses_one_based_channels_and_blend() {
        let mut set = OverlaySet::default();
        set.set(2, &encode(&[50, 50]), BlendMode::Max).unwrap();
        set.set(4, &encode(&[9, 9, 9]), BlendMode::Overwrite).unwrap();

        let mut buffer = [10u8, 100, 10, 0];
        set.apply(&mut buffer);
        assert_eq!(buffer, [10, 100, 50, 9]);
    }

    #[test]
    fn test_bad_payload_is_rejected() {
        let mut set = OverlaySet::default();
        assert!(set.set(1, "not base64!", BlendMode::Overwrite).is_err());
        assert!(set.is_empty());
    }
}
