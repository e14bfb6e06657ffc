use std::fmt::Display;
use std::io::{IsTerminal, Stderr, Write};

use log::{Level, LevelFilter, Log};
use owo_colors::OwoColorize;

struct Inner {
    writer: Option<Stderr>,
    color: bool,
}

impl Inner {
    fn write_with_color(&mut self, color: Color, string: impl Display) {
        let Some(writer) = self.writer.as_mut() else { return };
        let string: &dyn Display = match (self.color, color) {
            (false, _) | (_, Color::Default) => &string,
            (_, Color::Gray) => &string.dimmed(),
            (_, Color::BrightRed) => &string.bright_red(),
            (_, Color::BrightYellow) => &string.bright_yellow(),
            (_, Color::BrightBlue) => &string.bright_blue(),
            (_, Color::BrightCyan) => &string.bright_cyan(),
            (_, Color::BrightMagenta) => &string.bright_magenta(),
        };
        // Nowhere left to report a failed write to stderr.
        let _ = write!(writer, "{string}");
    }
}

struct HostLogger {
    inner: spin::Mutex<Inner>,
}

static LOGGER: HostLogger = HostLogger {
    inner: spin::Mutex::new(Inner { writer: None, color: false }),
};

impl Log for HostLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut inner = self.inner.lock();
        let level = record.level();
        inner.write_with_color(
            match level {
                Level::Error => Color::BrightRed,
                Level::Warn => Color::BrightYellow,
                Level::Info => Color::BrightBlue,
                Level::Debug => Color::BrightCyan,
                Level::Trace => Color::BrightMagenta,
            },
            format_args!("{level:5} "),
        );
        inner.write_with_color(Color::Gray, format_args!("[{}] ", record.target()));
        inner.write_with_color(Color::Default, record.args());
        inner.write_with_color(Color::Default, "\n");
    }

    fn flush(&self) {
        if let Some(writer) = self.inner.lock().writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

/// Install the stderr logger. Colors are used only when stderr is a terminal.
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    {
        let mut inner = LOGGER.inner.lock();
        let stderr = std::io::stderr();
        inner.color = stderr.is_terminal();
        inner.writer = Some(stderr);
    }
    log::set_max_level(level);
    log::set_logger(&LOGGER)
}

/// `-v` count to level: warnings by default, then info, debug, trace.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[derive(Clone, Copy)]
enum Color {
    Default,
    Gray,
    BrightRed,
    BrightYellow,
    BrightBlue,
    BrightCyan,
    BrightMagenta,
}
