//! Page size schedules.

/// Page size used when a schedule is configured empty.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Sequence of page sizes for successive requests of one listing.
///
/// A small first page gives low latency to the first record; later pages can
/// be larger. Once the configured sizes run out the last one repeats.
#[derive(Debug, Clone)]
pub struct PageSizeSchedule {
    sizes: Vec<usize>,
    next: usize,
}

impl PageSizeSchedule {
    pub fn new(sizes: &[usize]) -> Self {
        let sizes: Vec<usize> = sizes.iter().copied().filter(|s| *s > 0).collect();
        Self {
            sizes: if sizes.is_empty() {
                vec![DEFAULT_PAGE_SIZE]
            } else {
                sizes
            },
            next: 0,
        }
    }

    /// A schedule requesting the same size every time.
    pub fn fixed(size: usize) -> Self {
        Self::new(&[size])
    }

    /// Size to request for the next page.
    pub fn next_size(&mut self) -> usize {
        let index = self.next.min(self.sizes.len() - 1);
        self.next = self.next.saturating_add(1);
        self.sizes[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_size_repeats() {
        let mut schedule = PageSizeSchedule::new(&[10, 100, 1000]);
        let sizes: Vec<usize> = (0..5).map(|_| schedule.next_size()).collect();
        assert_eq!(sizes, vec![10, 100, 1000, 1000, 1000]);
    }

    #[test]
    fn test_empty_schedule_uses_default() {
        let mut schedule = PageSizeSchedule::new(&[]);
        assert_eq!(schedule.next_size(), DEFAULT_PAGE_SIZE);

        let mut schedule = PageSizeSchedule::new(&[0, 0]);
        assert_eq!(schedule.next_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_fixed_schedule() {
        let mut schedule = PageSizeSchedule::fixed(7);
        assert_eq!(schedule.next_size(), 7);
        assert_eq!(schedule.next_size(), 7);
    }
}
