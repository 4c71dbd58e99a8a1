use std::fmt;
use std::mem;

/// A generation-checked handle into an [`Arena`].
///
/// A key stays valid until the slot it names is removed. After that the
/// slot's generation moves on, so the stale key no longer matches anything,
/// even once the slot is reused by a later insertion.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// pack the key into a `u64`, e.g. for epoll user data
    #[inline]
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Key {
        Key {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Slab of reusable slots addressed by [`Key`]s.
///
/// Freed slots are kept on a LIFO free list so recently released slots are
/// handed out first.
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            entries: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            entries: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Key {
        self.insert_with(|_| value)
    }

    /// insert a value that needs to know its own key
    pub fn insert_with<F: FnOnce(Key) -> T>(&mut self, f: F) -> Key {
        self.len += 1;
        match self.free_head {
            Some(index) => {
                let slot = &mut self.entries[index as usize];
                let (generation, next_free) = match *slot {
                    Entry::Vacant {
                        generation,
                        next_free,
                    } => (generation, next_free),
                    Entry::Occupied { .. } => unreachable!("occupied slot on the free list"),
                };
                let key = Key { index, generation };
                *slot = Entry::Occupied {
                    generation,
                    value: f(key),
                };
                self.free_head = next_free;
                key
            }
            None => {
                let index = self.entries.len();
                assert!(index < u32::MAX as usize, "arena index overflow");
                let key = Key {
                    index: index as u32,
                    generation: 0,
                };
                self.entries.push(Entry::Occupied {
                    generation: 0,
                    value: f(key),
                });
                key
            }
        }
    }

    /// remove the value, a stale key returns `None`
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.entries.get_mut(key.index())?;
        match slot {
            Entry::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }
        let vacant = Entry::Vacant {
            generation: key.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        self.free_head = Some(key.index);
        self.len -= 1;
        match mem::replace(slot, vacant) {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Vacant { .. } => unreachable!(),
        }
    }

    #[inline]
    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        match self.entries.get(key.index())? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.entries.get_mut(key.index())? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// iterate the live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match e {
                Entry::Occupied { generation, value } => Some((
                    Key {
                        index: i as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }

    /// remove every live value, all outstanding keys become stale
    pub fn take_all(&mut self) -> Vec<T> {
        let keys: Vec<Key> = self.iter().map(|(k, _)| k).collect();
        keys.into_iter().filter_map(|k| self.remove(k)).collect()
    }
}

impl<T: fmt::Debug> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
