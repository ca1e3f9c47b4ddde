/// Precomputed `value -> value * brightness / 100` table. Rebuilt only when the brightness
/// it was built for changes.
#[derive(Clone, Debug)]
pub struct BrightnessTable {
    table: [u8; 256],
    brightness: Option<u8>,
}

impl Default for BrightnessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BrightnessTable {
    pub fn new() -> Self {
        let mut table = [0u8; 256];
        for (i, v) in table.iter_mut().enumerate() {
            *v = i as u8;
        }
        Self {
            table,
            brightness: None,
        }
    }

    /// Brightness the table currently holds, if it has been built.
    pub fn built_for(&self) -> Option<u8> {
        self.brightness
    }

    pub fn lookup(&self, value: u8) -> u8 {
        self.table[value as usize]
    }

    fn rebuild(&mut self, brightness: u8) {
        for (i, v) in self.table.iter_mut().enumerate() {
            *v = (((i * brightness as usize) / 100) & 0xFF) as u8;
        }
        self.brightness = Some(brightness);
        log::debug!("Rebuilt brightness table for {}%", brightness);
    }

    /// Scale every byte of `buffer`. Full brightness leaves the buffer untouched.
    pub fn apply(&mut self, buffer: &mut [u8], brightness: u8) {
        if brightness >= 100 {
            return;
        }
        if self.brightness != Some(brightness) {
            self.rebuild(brightness);
        }
        for v in buffer.iter_mut() {
            *v = self.table[*v as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_formula() {
        let mut table = BrightnessTable::new();
        for b in [0u8, 1, 37, 50, 99] {
            let mut buffer: Vec<u8> = (0..=255).collect();
            table.apply(&mut buffer, b);
            for (v, scaled) in buffer.iter().enumerate() {
                assert_eq!(*scaled as usize, (v * b as usize / 100) & 0xFF);
            }
        }
    }

    #[test]
    fn test_full_brightness_is_identity() {
        let mut table = BrightnessTable::new();
        let mut buffer: Vec<u8> = (0..=255).collect();
        table.apply(&mut buffer, 100);
        table.apply(&mut buffer, 100);
        assert_eq!(buffer, (0..=255).collect::<Vec<u8>>());
        assert_eq!(table.built_for(), None);
    }

    #[test]
    fn test_rebuilds_only_on_change() {
        let mut table = BrightnessTable::new();
        let mut buffer = [200u8];
        table.apply(&mut buffer, 50);
        assert_eq!(buffer, [100]);
        assert_eq!(table.built_for(), Some(50));
        assert_eq!(table.lookup(10), 5);

        let mut buffer = [200u8];
        table.apply(&mut buffer, 25);
        assert_eq!(buffer, [50]);
        assert_eq!(table.built_for(), Some(25));
    }
}
