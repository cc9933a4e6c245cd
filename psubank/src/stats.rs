const WORDS: usize = 16;
const BITS_PER_WORD: usize = 32;

/// Number of samples held by an [`ErrorStatisticsWindow`]
pub const WINDOW_SIZE: usize = WORDS * BITS_PER_WORD;

/// Circular history of the last 512 exchanges of a channel (bit set = error)
///
/// The derived values are recomputed over the whole window after every sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ErrorStatisticsWindow {
    history: [u32; WORDS],
    // index of the oldest sample, where the next one is written
    head: usize,
    per_mille: u16,
    max_run: u16,
}

impl Default for ErrorStatisticsWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorStatisticsWindow {
    /// Create a window filled with successful samples
    pub fn new() -> Self {
        Self {
            history: [0; WORDS],
            head: 0,
            per_mille: 0,
            max_run: 0,
        }
    }

    /// Record the outcome of one exchange
    pub fn add_sample(&mut self, error: bool) {
        let word = &mut self.history[self.head / BITS_PER_WORD];
        let mask = 1u32 << (self.head % BITS_PER_WORD);
        if error {
            *word |= mask;
        } else {
            *word &= !mask;
        }
        self.head = (self.head + 1) % WINDOW_SIZE;
        self.recalculate();
    }

    /// Errors in the window in per-mille
    pub fn per_mille(&self) -> u16 {
        self.per_mille
    }

    /// Longest run of consecutive errors in the window
    pub fn max_run(&self) -> u16 {
        self.max_run
    }

    fn bit(&self, index: usize) -> bool {
        self.history[index / BITS_PER_WORD] & (1 << (index % BITS_PER_WORD)) != 0
    }

    fn recalculate(&mut self) {
        let mut ones: usize = 0;
        let mut run: usize = 0;
        let mut max_run: usize = 0;

        // oldest to newest
        for i in 0..WINDOW_SIZE {
            if self.bit((self.head + i) % WINDOW_SIZE) {
                ones += 1;
                run += 1;
                max_run = max_run.max(run);
            } else {
                run = 0;
            }
        }

        self.per_mille = (1000 * ones / WINDOW_SIZE) as u16;
        self.max_run = max_run as u16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(window: &mut ErrorStatisticsWindow, error: bool, count: usize) {
        for _ in 0..count {
            window.add_sample(error);
        }
    }

    #[test]
    fn starts_without_errors() {
        let window = ErrorStatisticsWindow::new();
        assert_eq!(window.per_mille(), 0);
        assert_eq!(window.max_run(), 0);
    }

    #[test]
    fn full_window_of_errors() {
        let mut window = ErrorStatisticsWindow::new();
        feed(&mut window, true, WINDOW_SIZE);
        assert_eq!(window.per_mille(), 1000);
        assert_eq!(window.max_run(), 512);
    }

    #[test]
    fn a_full_window_of_successes_forgets_any_history() {
        let mut window = ErrorStatisticsWindow::new();
        for i in 0..1000 {
            window.add_sample(i % 3 == 0 || i % 7 == 0);
        }
        assert_ne!(window.per_mille(), 0);

        feed(&mut window, false, WINDOW_SIZE);
        assert_eq!(window.per_mille(), 0);
        assert_eq!(window.max_run(), 0);
    }

    #[test]
    fn rate_is_truncated_per_mille() {
        let mut window = ErrorStatisticsWindow::new();
        feed(&mut window, true, 1);
        // 1000 / 512
        assert_eq!(window.per_mille(), 1);
        feed(&mut window, true, 255);
        // 256 errors
        assert_eq!(window.per_mille(), 500);
    }

    #[test]
    fn longest_run_is_tracked_across_the_wrap() {
        let mut window = ErrorStatisticsWindow::new();
        feed(&mut window, false, 500);
        // this run straddles the physical end of the bit array
        feed(&mut window, true, 20);
        feed(&mut window, false, 3);
        feed(&mut window, true, 5);
        assert_eq!(window.max_run(), 20);
        assert_eq!(window.per_mille(), (1000 * 25 / 512) as u16);
    }

    #[test]
    fn runs_age_out_of_the_window() {
        let mut window = ErrorStatisticsWindow::new();
        feed(&mut window, true, 10);
        feed(&mut window, false, WINDOW_SIZE - 10);
        assert_eq!(window.max_run(), 10);
        window.add_sample(false);
        assert_eq!(window.max_run(), 9);
    }
}
