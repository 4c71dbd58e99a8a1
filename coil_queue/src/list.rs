use crate::arena::{Arena, Key};

struct Node<T> {
    value: T,
    prev: Option<Key>,
    next: Option<Key>,
}

/// Doubly linked list with O(1) removal by [`Key`].
///
/// The nodes live in an [`Arena`] and link to each other by key, so a
/// removed element's key can never reach into a later element.
pub struct List<T> {
    nodes: Arena<Node<T>>,
    head: Option<Key>,
    tail: Option<Key>,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        List::new()
    }
}

impl<T> List<T> {
    pub fn new() -> Self {
        List {
            nodes: Arena::new(),
            head: None,
            tail: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn contains(&self, key: Key) -> bool {
        self.nodes.contains(key)
    }

    pub fn push_back(&mut self, value: T) -> Key {
        let prev = self.tail;
        let key = self.nodes.insert(Node {
            value,
            prev,
            next: None,
        });
        match prev {
            Some(p) => self.node_mut(p).next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        key
    }

    pub fn push_front(&mut self, value: T) -> Key {
        let next = self.head;
        let key = self.nodes.insert(Node {
            value,
            prev: None,
            next,
        });
        match next {
            Some(n) => self.node_mut(n).prev = Some(key),
            None => self.tail = Some(key),
        }
        self.head = Some(key);
        key
    }

    pub fn front_key(&self) -> Option<Key> {
        self.head
    }

    pub fn front(&self) -> Option<&T> {
        self.head.and_then(|k| self.get(k))
    }

    pub fn back(&self) -> Option<&T> {
        self.tail.and_then(|k| self.get(k))
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        self.nodes.get(key).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.nodes.get_mut(key).map(|n| &mut n.value)
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let key = self.head?;
        self.remove(key)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        let key = self.tail?;
        self.remove(key)
    }

    /// unlink the element, a stale key is a no-op
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let node = self.nodes.remove(key)?;
        match node.prev {
            Some(p) => self.node_mut(p).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.node_mut(n).prev = node.prev,
            None => self.tail = node.prev,
        }
        Some(node.value)
    }

    /// front to back
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// the keys front to back, handy when elements are removed while walking
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(k) = cursor {
            keys.push(k);
            cursor = self.nodes.get(k).and_then(|n| n.next);
        }
        keys
    }

    /// pop every element front to back
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { list: self }
    }

    fn node_mut(&mut self, key: Key) -> &mut Node<T> {
        match self.nodes.get_mut(key) {
            Some(n) => n,
            None => unreachable!("dangling list link {:?}", key),
        }
    }
}

pub struct Iter<'a, T> {
    list: &'a List<T>,
    cursor: Option<Key>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Key, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        let node = self.list.nodes.get(key)?;
        self.cursor = node.next;
        Some((key, &node.value))
    }
}

pub struct Drain<'a, T> {
    list: &'a mut List<T>,
}

impl<'a, T> Iterator for Drain<'a, T> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        self.list.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(list: &List<i32>) -> Vec<i32> {
        list.iter().map(|(_, v)| *v).collect()
    }

    #[test]
    fn fifo_order() {
        let mut list = List::new();
        for i in 0..4 {
            list.push_back(i);
        }
        list.push_front(-1);
        assert_eq!(values(&list), vec![-1, 0, 1, 2, 3]);
        assert_eq!(list.pop_front(), Some(-1));
        assert_eq!(list.pop_back(), Some(3));
        assert_eq!(list.front(), Some(&0));
        assert_eq!(list.back(), Some(&2));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn remove_middle_and_ends() {
        let mut list = List::new();
        let a = list.push_back(1);
        let b = list.push_back(2);
        let c = list.push_back(3);
        assert_eq!(list.remove(b), Some(2));
        assert_eq!(values(&list), vec![1, 3]);
        assert_eq!(list.remove(a), Some(1));
        assert_eq!(list.remove(c), Some(3));
        assert!(list.is_empty());
        assert_eq!(list.front_key(), None);
    }

    #[test]
    fn stale_remove_is_noop() {
        let mut list = List::new();
        let a = list.push_back(1);
        list.remove(a);
        let b = list.push_back(2);
        assert_eq!(list.remove(a), None);
        assert!(list.contains(b));
        assert_eq!(values(&list), vec![2]);
    }

    #[test]
    fn drain_all() {
        let mut list = List::new();
        for i in 0..3 {
            list.push_back(i);
        }
        let got: Vec<_> = list.drain().collect();
        assert_eq!(got, vec![0, 1, 2]);
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn keys_snapshot() {
        let mut list = List::new();
        let keys: Vec<_> = (0..3).map(|i| list.push_back(i)).collect();
        assert_eq!(list.keys(), keys);
        for k in list.keys() {
            list.remove(k);
        }
        assert!(list.is_empty());
    }
}
