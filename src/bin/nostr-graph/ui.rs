use std::fmt::Display;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use nu_ansi_term::{Color, Style};

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Theme {
    Auto,
    Light,
    Dark,
    Plain,
}

/// Terminal output for the importer: a spinner while work runs and a
/// key/value summary afterwards. Logs go through `tracing` on stderr.
pub struct Ui {
    palette: Palette,
    paint: bool,
    spinner: bool,
    spinner_style: ProgressStyle,
}

impl Ui {
    pub fn new(theme: Theme, spinner: bool) -> Self {
        let paint = theme != Theme::Plain && std::io::stdout().is_terminal();

        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        let palette = match theme {
            Theme::Plain => Palette::plain(),
            Theme::Light => Palette::light(),
            Theme::Dark | Theme::Auto => Palette::dark(),
        };

        let spinner_style = ProgressStyle::with_template("{prefix} {spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

        Self {
            palette,
            paint,
            spinner: spinner && std::io::stderr().is_terminal(),
            spinner_style,
        }
    }

    pub fn section<'a, I, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        let rows: Vec<(&str, String)> = rows
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect();
        if rows.is_empty() {
            return;
        }

        let heading = format!("{HEADING_ICON} {title}");
        if self.paint {
            println!("{}", self.palette.heading.paint(heading));
        } else {
            println!("{heading}");
        }
        let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in rows {
            if self.paint {
                println!(
                    "  {} {}",
                    self.palette.key.paint(format!("{key:>key_width$}:")),
                    self.palette.value.paint(value)
                );
            } else {
                println!("  {key:>key_width$}: {value}");
            }
        }
    }

    pub fn success(&self, message: &str) {
        if self.paint {
            println!("{} {message}", self.palette.success.paint(SUCCESS_ICON));
        } else {
            println!("{SUCCESS_ICON} {message}");
        }
    }

    pub fn warn(&self, message: &str) {
        if self.paint {
            eprintln!("{} {message}", self.palette.warn.paint(WARNING_ICON));
        } else {
            eprintln!("{WARNING_ICON} {message}");
        }
    }

    pub fn task(&self, label: impl Into<String>) -> TaskGuard<'_> {
        let label = label.into();
        let pb = self.spinner.then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(self.spinner_style.clone());
            pb.set_prefix(if self.paint {
                self.palette.info.paint(PROGRESS_ICON).to_string()
            } else {
                PROGRESS_ICON.to_string()
            });
            pb.set_message(label.clone());
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        });
        TaskGuard {
            ui: self,
            label,
            start: Instant::now(),
            finished: false,
            pb,
        }
    }
}

pub struct TaskGuard<'a> {
    ui: &'a Ui,
    label: String,
    start: Instant,
    finished: bool,
    pb: Option<ProgressBar>,
}

impl TaskGuard<'_> {
    pub fn finish(mut self) -> Duration {
        self.finished = true;
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
        self.start.elapsed()
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let message = format!(
            "{} interrupted after {}",
            self.label,
            format_runtime(self.start.elapsed())
        );
        match self.pb.take() {
            Some(pb) => pb.abandon_with_message(message),
            None => self.ui.warn(&message),
        }
    }
}

/// Formats a duration as `HH:MM:SS.mmm`.
pub fn format_runtime(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1_000) % 60;
    let millis = total_ms % 1_000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

struct Palette {
    heading: Style,
    key: Style,
    value: Style,
    info: Style,
    success: Style,
    warn: Style,
}

impl Palette {
    fn dark() -> Self {
        Self {
            heading: Style::new().fg(Color::Purple).bold(),
            key: Style::new().fg(Color::LightBlue).bold(),
            value: Style::new().fg(Color::White),
            info: Style::new().fg(Color::LightCyan),
            success: Style::new().fg(Color::LightGreen).bold(),
            warn: Style::new().fg(Color::Yellow).bold(),
        }
    }

    fn light() -> Self {
        Self {
            heading: Style::new().fg(Color::Blue).bold(),
            key: Style::new().fg(Color::Black).bold(),
            value: Style::new().fg(Color::Black),
            info: Style::new().fg(Color::Purple),
            success: Style::new().fg(Color::Green).bold(),
            warn: Style::new().fg(Color::Red).bold(),
        }
    }

    fn plain() -> Self {
        Self {
            heading: Style::new(),
            key: Style::new(),
            value: Style::new(),
            info: Style::new(),
            success: Style::new(),
            warn: Style::new(),
        }
    }
}

const HEADING_ICON: &str = "▸";
const SUCCESS_ICON: &str = "✔";
const WARNING_ICON: &str = "⚠";
const PROGRESS_ICON: &str = "▶";
