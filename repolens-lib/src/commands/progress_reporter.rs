use crate::pipeline::Progress;
use core::fmt::{Debug, Formatter};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;

type StatusCallback = Box<dyn Fn() -> (u64, u64, String) + Send + Sync>;

/// Refresh rate for progress updates (10 Hz).
const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

const BAR_WIDTH: usize = 25;

const DETERMINATE_TEMPLATE: &str = "{prefix:>12.bold.cyan} [{bar:25}] {pos}/{len} {msg}";
const DETERMINATE_TEMPLATE_NO_COLOR: &str = "{prefix:>12} [{bar:25}] {pos}/{len} {msg}";
const INDETERMINATE_TEMPLATE: &str = "{prefix:>12.bold.cyan} [{spinner}] {msg}";
const INDETERMINATE_TEMPLATE_NO_COLOR: &str = "{prefix:>12} [{spinner}] {msg}";

#[derive(Debug)]
struct Visibility {
    visible_after: Instant,
    visible: AtomicBool,
    indeterminate: AtomicBool,
    phase_started: Mutex<Instant>,
}

/// A progress bar on stderr that stays hidden for runs that finish quickly.
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
    visibility: Arc<Visibility>,
    status: Arc<Mutex<StatusCallback>>,
    refresh_task: Arc<JoinHandle<()>>,
    use_colors: bool,
}

impl ProgressReporter {
    /// Create a new progress reporter.
    ///
    /// The bar only appears once `delay` has passed. When `use_colors` is false, the bar is
    /// rendered without ANSI styling.
    #[must_use]
    pub fn new(delay: Duration, use_colors: bool) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_draw_target(ProgressDrawTarget::hidden());

        let visibility = Arc::new(Visibility {
            visible_after: Instant::now() + delay,
            visible: AtomicBool::new(false),
            indeterminate: AtomicBool::new(false),
            phase_started: Mutex::new(Instant::now()),
        });

        let status = Arc::new(Mutex::new(Box::new(|| (0_u64, 0_u64, String::new())) as StatusCallback));

        Self {
            refresh_task: Arc::new(tokio::spawn(refresh(bar.clone(), Arc::clone(&visibility), Arc::clone(&status)))),
            bar,
            visibility,
            status,
            use_colors,
        }
    }

    fn style(&self, colored: &str, plain: &str, spinner: bool) -> ProgressStyle {
        let template = if self.use_colors { colored } else { plain };
        let style = if spinner {
            ProgressStyle::default_spinner()
        } else {
            ProgressStyle::default_bar()
        };

        // The templates are constants, so this only fails if one of them is malformed.
        style.template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
    }
}

impl Progress for ProgressReporter {
    fn set_phase(&self, phase: &str) {
        self.bar.set_prefix(phase.to_string());
        *self.visibility.phase_started.lock().expect("lock not poisoned") = Instant::now();
    }

    fn set_determinate(&self, callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>) {
        *self.status.lock().expect("lock not poisoned") = callback;
        self.visibility.indeterminate.store(false, Ordering::Relaxed);
        self.bar.disable_steady_tick();
        self.bar.set_length(0);
        self.bar.set_position(0);
        self.bar
            .set_style(self.style(DETERMINATE_TEMPLATE, DETERMINATE_TEMPLATE_NO_COLOR, false).progress_chars("=> "));
    }

    fn set_indeterminate(&self, callback: Box<dyn Fn() -> String + Send + Sync + 'static>) {
        *self.status.lock().expect("lock not poisoned") = Box::new(move || (0, 0, callback()));
        *self.visibility.phase_started.lock().expect("lock not poisoned") = Instant::now();
        self.visibility.indeterminate.store(true, Ordering::Relaxed);
        self.bar.enable_steady_tick(REFRESH_INTERVAL);

        let frames = bounce_frames(BAR_WIDTH);
        let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
        self.bar
            .set_style(self.style(INDETERMINATE_TEMPLATE, INDETERMINATE_TEMPLATE_NO_COLOR, true).tick_strings(&frames));
    }

    fn println(&self, msg: &str) {
        self.bar.suspend(|| eprintln!("{msg}"));
    }

    fn done(&self) {
        self.refresh_task.abort();
        if self.visibility.visible.load(Ordering::Relaxed) {
            self.bar.finish_and_clear();
        }
    }
}

impl Debug for ProgressReporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("bar", &self.bar)
            .field("visibility", &self.visibility)
            .field("status", &"<callback>")
            .field("refresh_task", &"<task>")
            .field("use_colors", &self.use_colors)
            .finish()
    }
}

/// Spinner frames of a `===>` marker sweeping right and a `<===` marker sweeping back.
///
/// The last frame is blank and doubles as the finished state.
fn bounce_frames(width: usize) -> Vec<String> {
    const MARKER: usize = 4;
    let pad = |offset: usize, text: &str| {
        let mut frame = " ".repeat(offset);
        frame.push_str(text);
        format!("{frame:<width$}").chars().take(width).collect::<String>()
    };

    let mut frames = Vec::with_capacity(2 * (width + MARKER) + 1);
    for end in 1..=width + MARKER - 1 {
        let start = end.saturating_sub(MARKER);
        let visible = end.min(width) - start;
        let head = if end <= width { ">" } else { "" };
        let body = "=".repeat(visible - head.len());
        frames.push(pad(start, &format!("{body}{head}")));
    }
    frames.push(" ".repeat(width));
    for end in 1..=width + MARKER - 1 {
        let start = end.saturating_sub(MARKER);
        let visible = end.min(width) - start;
        let head = if end <= width { "<" } else { "" };
        let body = "=".repeat(visible - head.len());
        frames.push(pad(width - start - visible, &format!("{head}{body}")));
    }
    frames.push(" ".repeat(width));
    frames
}

/// Periodically pull the status and redraw, revealing the bar once the delay has passed.
async fn refresh(bar: ProgressBar, visibility: Arc<Visibility>, status: Arc<Mutex<StatusCallback>>) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);
    #[expect(clippy::infinite_loop, reason = "task runs until aborted")]
    loop {
        let _ = interval.tick().await;

        if !visibility.visible.load(Ordering::Relaxed) && Instant::now() >= visibility.visible_after {
            visibility.visible.store(true, Ordering::Relaxed);
            bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        }

        if !visibility.visible.load(Ordering::Relaxed) {
            continue;
        }

        let (length, position, mut message) = {
            let callback = status.lock().expect("lock not poisoned");
            callback()
        };

        if visibility.indeterminate.load(Ordering::Relaxed) {
            let elapsed = visibility.phase_started.lock().expect("lock not poisoned").elapsed().as_secs();
            message = format!("{elapsed}s: {message}");
        }

        if length > 0 {
            bar.set_length(length);
            bar.set_position(position);
        }
        bar.set_message(message);
    }
}
