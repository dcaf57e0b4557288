use std::{cmp::Ordering, collections::BinaryHeap};

#[derive(Debug, Copy, Clone)]
struct Node<K, V> {
    key: K,
    value: V,
}

impl<K: PartialEq, V: PartialEq> PartialEq for Node<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

impl<K: PartialEq, V: PartialEq> Eq for Node<K, V> {}

impl<K: PartialOrd, V: PartialOrd> PartialOrd for Node<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: PartialOrd, V: PartialOrd> Ord for Node<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.partial_cmp(&other.key) {
            Some(Ordering::Equal) | None => {}
            Some(ord) => return ord,
        }
        { self.value.partial_cmp(&other.value) }.unwrap_or(Ordering::Equal)
    }
}

/// Collects `(key, value)` candidates offered during a search, where the key
/// is a distance.
pub trait ResultSet {
    type Key;
    type Value;

    fn push(&mut self, key: Self::Key, value: Self::Value);

    fn is_full(&self) -> bool;

    /// Candidates with keys not below this are rejected by `push`.
    fn max_key(&self) -> Option<&Self::Key>;
}

/// Keeps the `num` candidates with the smallest keys.
#[derive(Debug, Clone)]
pub struct KnnResultSet<K, V> {
    data: BinaryHeap<Node<K, V>>,
    num: usize,
}

impl<K: PartialOrd, V: PartialOrd> KnnResultSet<K, V> {
    pub fn new(num: usize) -> Self {
        KnnResultSet {
            data: BinaryHeap::with_capacity(num.min(128)),
            num,
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The kept candidates by ascending key; equal keys are ordered by value.
    pub fn into_sorted_vec(self) -> Vec<(K, V)> {
        { self.data.into_sorted_vec().into_iter() }
            .map(|node| (node.key, node.value))
            .collect()
    }
}

impl<K: PartialOrd, V: PartialOrd> ResultSet for KnnResultSet<K, V> {
    type Key = K;
    type Value = V;

    fn push(&mut self, key: K, value: V) {
        if self.num == 0 {
            return;
        }
        let node = Node { key, value };
        if self.is_full() {
            match self.data.peek() {
                Some(top) if node < *top => {
                    self.data.pop();
                }
                _ => return,
            }
        }
        self.data.push(node);
    }

    fn is_full(&self) -> bool {
        self.data.len() >= self.num
    }

    fn max_key(&self) -> Option<&K> {
        if self.is_full() {
            self.data.peek().map(|node| &node.key)
        } else {
            None
        }
    }
}

/// Keeps every candidate whose key is below `radius`.
#[derive(Debug, Clone)]
pub struct RadiusResultSet<K, V> {
    data: Vec<Node<K, V>>,
    radius: K,
}

impl<K: PartialOrd, V: PartialOrd> RadiusResultSet<K, V> {
    pub fn new(radius: K) -> Self {
        RadiusResultSet {
            data: Vec::with_capacity(128),
            radius,
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The kept candidates by ascending key; equal keys are ordered by value.
    pub fn into_sorted_vec(mut self) -> Vec<(K, V)> {
        self.data.sort_unstable();
        { self.data.into_iter() }
            .map(|node| (node.key, node.value))
            .collect()
    }
}

impl<K: PartialOrd, V: PartialOrd> ResultSet for RadiusResultSet<K, V> {
    type Key = K;
    type Value = V;

    fn push(&mut self, key: K, value: V) {
        if key < self.radius {
            self.data.push(Node { key, value });
        }
    }

    fn is_full(&self) -> bool {
        true
    }

    fn max_key(&self) -> Option<&K> {
        Some(&self.radius)
    }
}
