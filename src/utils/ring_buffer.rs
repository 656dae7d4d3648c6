use std::collections::VecDeque;

/// Кольцевой буфер фиксированной ёмкости: при переполнении вытесняется самая старая запись
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
            self.evicted += 1;
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Сколько записей было вытеснено за всё время
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// От старых к новым
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> {
        self.items.iter_mut()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let mut buffer = RingBuffer::new(3);
        for i in 0..5 {
            buffer.push(i);
        }
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(buffer.evicted(), 2);
        assert_eq!(buffer.last(), Some(&4));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buffer = RingBuffer::new(0);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.last(), Some(&"b"));
    }
}
