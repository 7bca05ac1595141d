// SPDX-License-Identifier: CEPL-1.0

/// Fixed-capacity table of live textures. A texture's slot is the index the
/// shaders receive as `texture_index`, so slots never move once assigned.
#[derive(Debug)]
pub struct TextureSlots<T> {
    slots: Vec<Option<T>>,
}

impl<T> TextureSlots<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
        }
    }

    /// Lowest free slot, or the value back when the table is full.
    pub fn insert(&mut self, value: T) -> Result<u32, T> {
        match self.slots.iter().position(Option::is_none) {
            Some(i) => {
                self.slots[i] = Some(value);
                Ok(i as u32)
            }
            None => Err(value),
        }
    }

    pub fn remove(&mut self, slot: u32) -> Option<T> {
        self.slots.get_mut(slot as usize).and_then(Option::take)
    }

    pub fn get(&self, slot: u32) -> Option<&T> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every slot in order, `None` where free.
    pub fn slots(&self) -> impl Iterator<Item = Option<&T>> {
        self.slots.iter().map(Option::as_ref)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_slots_are_reused_lowest_first() {
        let mut t = TextureSlots::new(3);
        assert_eq!(t.insert("a"), Ok(0));
        assert_eq!(t.insert("b"), Ok(1));
        assert_eq!(t.insert("c"), Ok(2));
        assert_eq!(t.insert("d"), Err("d"));

        assert_eq!(t.remove(1), Some("b"));
        assert_eq!(t.remove(1), None);
        assert_eq!(t.insert("e"), Ok(1));
        assert_eq!(t.get(1), Some(&"e"));
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn out_of_range_is_none() {
        let mut t: TextureSlots<u8> = TextureSlots::new(2);
        assert_eq!(t.get(7), None);
        assert_eq!(t.remove(7), None);
        assert!(t.is_empty());
    }

    #[test]
    fn drain_empties_every_slot() {
        let mut t = TextureSlots::new(4);
        t.insert(1).ok();
        t.insert(2).ok();
        let drained: Vec<_> = t.drain().collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(t.is_empty());
        assert_eq!(t.capacity(), 4);
    }
}
