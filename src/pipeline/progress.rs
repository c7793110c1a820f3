// file: src/pipeline/progress.rs
// description: progress bars, status spinners and task statistics for long running steps
// reference: uses indicatif for progress bars and tracks processing metrics

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct TaskStats {
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    /// Tasks never started because an earlier one failed.
    pub tasks_skipped: usize,
    pub duration_secs: u64,
}

impl TaskStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks_per_second(&self) -> f64 {
        if self.duration_secs == 0 {
            return 0.0;
        }
        self.tasks_completed as f64 / self.duration_secs as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            return 0.0;
        }
        (self.tasks_completed as f64 / total as f64) * 100.0
    }
}

/// Counts per-item SQL executions, e.g. one script run per road or per census block.
pub struct ProgressTracker {
    main_bar: ProgressBar,
    detail_bar: ProgressBar,
    tasks_completed: Arc<AtomicUsize>,
    tasks_failed: Arc<AtomicUsize>,
    tasks_skipped: Arc<AtomicUsize>,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total_tasks: usize) -> Self {
        Self::with_color(total_tasks, true)
    }

    pub fn with_color(total_tasks: usize, colored: bool) -> Self {
        let multi_progress = MultiProgress::new();

        let main_bar = create_progress_bar(&multi_progress, total_tasks as u64, colored);
        let detail_bar = create_detail_bar(&multi_progress);

        Self {
            main_bar,
            detail_bar,
            tasks_completed: Arc::new(AtomicUsize::new(0)),
            tasks_failed: Arc::new(AtomicUsize::new(0)),
            tasks_skipped: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Progress tracker that draws nothing, for tests and quiet runs.
    pub fn hidden(total_tasks: usize) -> Self {
        let tracker = Self::with_color(total_tasks, false);
        tracker.main_bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        tracker
            .detail_bar
            .set_draw_target(indicatif::ProgressDrawTarget::hidden());
        tracker
    }

    pub fn inc_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::SeqCst);
        self.main_bar.inc(1);
        self.update_detail_bar();
    }

    pub fn inc_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
        self.main_bar.inc(1);
        self.update_detail_bar();
    }

    pub fn inc_skipped(&self) {
        self.tasks_skipped.fetch_add(1, Ordering::SeqCst);
        self.main_bar.inc(1);
        self.update_detail_bar();
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.main_bar.set_message(message.into());
    }

    pub fn finish(&self) {
        self.main_bar.finish_and_clear();
        self.detail_bar.finish_and_clear();
    }

    pub fn get_stats(&self) -> TaskStats {
        TaskStats {
            tasks_completed: self.tasks_completed.load(Ordering::SeqCst),
            tasks_failed: self.tasks_failed.load(Ordering::SeqCst),
            tasks_skipped: self.tasks_skipped.load(Ordering::SeqCst),
            duration_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn update_detail_bar(&self) {
        let failed = self.tasks_failed.load(Ordering::SeqCst);
        let skipped = self.tasks_skipped.load(Ordering::SeqCst);
        if failed > 0 {
            self.detail_bar
                .set_message(format!("Failed: {failed}, skipped: {skipped}"));
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.finish();
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn create_progress_bar(multi_progress: &MultiProgress, total: u64, colored: bool) -> ProgressBar {
    let bar = multi_progress.add(ProgressBar::new(total));
    let style = if colored {
        bar_style(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .progress_chars("█▓▒░")
    } else {
        bar_style("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({eta}) {msg}")
            .progress_chars("=>-")
    };
    bar.set_style(style);
    bar
}

fn create_detail_bar(multi_progress: &MultiProgress) -> ProgressBar {
    let bar = multi_progress.add(ProgressBar::new(0));
    bar.set_style(bar_style("{msg}"));
    bar
}

/// Status line shown while a step without measurable progress runs.
pub struct StatusSpinner {
    bar: ProgressBar,
}

impl StatusSpinner {
    pub fn new(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Drop for StatusSpinner {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_task_stats_calculations() {
        let mut stats = TaskStats::new();
        stats.tasks_completed = 90;
        stats.tasks_failed = 10;
        stats.duration_secs = 10;

        assert_eq!(stats.tasks_per_second(), 9.0);
        assert_eq!(stats.success_rate(), 90.0);
    }

    #[test]
    fn test_task_stats_zero_duration() {
        let stats = TaskStats::new();
        assert_eq!(stats.tasks_per_second(), 0.0);
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn test_progress_tracker_counts() {
        let tracker = ProgressTracker::hidden(4);

        tracker.inc_completed();
        tracker.inc_completed();
        tracker.inc_failed();
        tracker.inc_skipped();

        let stats = tracker.get_stats();
        assert_eq!(stats.tasks_completed, 2);
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.tasks_skipped, 1);
        assert!((stats.success_rate() - 66.666).abs() < 0.01);
    }
}
