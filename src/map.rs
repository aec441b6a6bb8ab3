//! Keyed device registry
//!
//! A string-keyed map that owns its values. Overwriting, removing, or
//! dropping the map drops the stored values, so the value's `Drop` impl is
//! the destructor. Iteration follows insertion order, and a [`Cursor`] keeps
//! walking correctly while entries (including the current one) are removed.
use std::collections::HashMap;

/// Outcome of [`DeviceMap::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// The key was new
    Added,
    /// The key existed; the previous value was dropped
    Replaced,
}

/// Insertion-ordered map keyed by device id
#[derive(Debug)]
pub struct DeviceMap<V> {
    index: HashMap<String, usize>,
    slots: Vec<Option<(String, V)>>,
    live: usize,
}

/// Removal-tolerant traversal position over a [`DeviceMap`]
///
/// Holds no borrow, so the map can be mutated between steps. Entries removed
/// ahead of the cursor are skipped. Inserting new keys while a cursor is
/// outstanding may compact the map; start a new cursor afterwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct Cursor {
    next: usize,
}

impl<V> Default for DeviceMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> DeviceMap<V> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            live: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let pos = *self.index.get(key)?;
        self.slots[pos].as_ref().map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let pos = *self.index.get(key)?;
        self.slots[pos].as_mut().map(|(_, v)| v)
    }

    /// Insert or update `key`
    ///
    /// An existing value is replaced in place (keeping its iteration
    /// position) and dropped.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Insertion {
        let key = key.into();
        if let Some(&pos) = self.index.get(&key) {
            self.slots[pos] = Some((key, value));
            return Insertion::Replaced;
        }

        self.compact_if_sparse();
        self.index.insert(key.clone(), self.slots.len());
        self.slots.push(Some((key, value)));
        self.live += 1;
        Insertion::Added
    }

    /// Remove `key` and drop its value. Returns false if it was absent.
    pub fn remove(&mut self, key: &str) -> bool {
        self.take(key).is_some()
    }

    /// Remove `key` and hand its value back to the caller
    pub fn take(&mut self, key: &str) -> Option<V> {
        let pos = self.index.remove(key)?;
        let (_, value) = self.slots[pos].take()?;
        self.live -= 1;
        Some(value)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.live = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|(k, v)| (k.as_str(), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut V)> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.as_mut().map(|(k, v)| (k.as_str(), v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    /// Keep only entries for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &mut V) -> bool) {
        for slot in self.slots.iter_mut() {
            let drop_it = match slot {
                Some((k, v)) => !keep(k, v),
                None => false,
            };
            if drop_it && let Some((k, _)) = slot.take() {
                self.index.remove(&k);
                self.live -= 1;
            }
        }
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::default()
    }

    /// Advance `cursor` and return the next live key
    pub fn advance(&self, cursor: &mut Cursor) -> Option<String> {
        while cursor.next < self.slots.len() {
            let pos = cursor.next;
            cursor.next += 1;
            if let Some((k, _)) = &self.slots[pos] {
                return Some(k.clone());
            }
        }
        None
    }

    fn compact_if_sparse(&mut self) {
        let dead = self.slots.len() - self.live;
        if dead < 16 || dead < self.live {
            return;
        }
        self.slots.retain(Option::is_some);
        for (pos, slot) in self.slots.iter().enumerate() {
            if let Some((k, _)) = slot {
                self.index.insert(k.clone(), pos);
            }
        }
    }
}
