use duopane_archive::ProgressUpdate;
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;

const PB_STYLE: &str = "{spinner:.blue} {prefix:>10.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} ({eta}) {msg}";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const PB_CHARS: &str = "█▓▒░  ";

const MSG_WIDTH: usize = 40;

static PB_TEMPLATE: Lazy<Option<ProgressStyle>> = Lazy::new(|| {
    let pb_style = match ProgressStyle::with_template(PB_STYLE) {
        Ok(pb_style) => pb_style.tick_chars(TICK).progress_chars(PB_CHARS),
        Err(_) => return None,
    };

    Some(pb_style)
});

/// Terminal bar mirroring a task's latest [`ProgressUpdate`].
pub struct TaskTracker {
    pb: ProgressBar,
    finish: Option<String>,
}

impl TaskTracker {
    pub fn update(&self, progress: &ProgressUpdate) {
        if progress.total_files > 0 {
            self.pb.set_length(progress.total_files);
            self.pb.set_position(progress.processed_files);
        }
        if !progress.current_file.is_empty() {
            self.pb.set_message(shorten(&progress.current_file, MSG_WIDTH));
        }
    }

    pub fn finish(self) {
        match self.finish {
            Some(msg) => self.pb.finish_with_message(msg),
            None => self.pb.finish(),
        }
    }

    pub fn abandon(self, msg: &str) {
        self.pb.abandon_with_message(msg.to_string());
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskTrackerBuilder {
    prefix: Option<String>,
    finish: Option<String>,
}

impl TaskTrackerBuilder {
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub fn with_finish(mut self, finish: &str) -> Self {
        self.finish = Some(finish.to_string());
        self
    }

    pub fn build(self) -> TaskTracker {
        let pb = ProgressBar::new(0);
        let pb = if let Some(style) = PB_TEMPLATE.as_ref() {
            pb.with_style(style.clone())
        } else {
            pb
        };

        if let Some(prefix) = self.prefix {
            pb.set_prefix(prefix);
        }
        TaskTracker {
            pb,
            finish: self.finish,
        }
    }
}

/// Keep the tail of long paths, which is the part that changes.
fn shorten(name: &str, width: usize) -> String {
    let count = name.chars().count();
    if count <= width {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - (width - 1)).collect();
    format!("…{tail}")
}
