//! Tracing setup: an `EnvFilter`'d JSON layer that writes to both stdout and
//! a hand-rolled daily-rotating file under
//! `{data_root}/logs/debug-YYYY-MM-DD.log`.
//!
//! The file is retained regardless of `CODEMIE_DEBUG` — only the filter
//! level changes with it, not whether the file exists at all. No
//! `tracing-appender` in the dependency graph, so the rotation itself is a
//! small reopen-on-date-change writer rather than a borrowed crate.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

struct DailyState {
    dir: PathBuf,
    open: Option<(String, File)>,
}

impl DailyState {
    fn file_for_today(&mut self) -> io::Result<&mut File> {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let needs_reopen = match &self.open {
            Some((date, _)) => date != &today,
            None => true,
        };
        if needs_reopen {
            std::fs::create_dir_all(&self.dir)?;
            let file = OpenOptions::new().create(true).append(true).open(self.dir.join(format!("debug-{today}.log")))?;
            self.open = Some((today, file));
        }
        Ok(&mut self.open.as_mut().expect("just populated above").1)
    }
}

/// Duplicates every write to stdout and the rolling log file. Cheap to
/// clone (an `Arc` around the rotation state), which is what
/// `tracing_subscriber`'s `MakeWriter` contract expects per log line.
#[derive(Clone)]
struct TeeDailyWriter {
    state: Arc<Mutex<DailyState>>,
}

impl TeeDailyWriter {
    fn new(log_dir: PathBuf) -> Self {
        Self { state: Arc::new(Mutex::new(DailyState { dir: log_dir, open: None })) }
    }
}

impl Write for TeeDailyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = io::stdout().write(buf)?;
        let mut state = self.state.lock().expect("daily log file mutex poisoned");
        if let Ok(file) = state.file_for_today() {
            let _ = file.write_all(&buf[..written]);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        let mut state = self.state.lock().expect("daily log file mutex poisoned");
        if let Ok(file) = state.file_for_today() {
            file.flush()?;
        }
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for TeeDailyWriter {
    type Writer = TeeDailyWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs the global tracing subscriber. `CODEMIE_DEBUG=1` widens the
/// default filter to `debug` everywhere; otherwise it's `info` with
/// `cm_lifecycle,cm_metrics,cm_proxy=debug`, mirroring the teacher's
/// gateway-scoped debug default.
pub fn init(data_root: &std::path::Path) {
    let default_filter = if std::env::var("CODEMIE_DEBUG").as_deref() == Ok("1") {
        "debug"
    } else {
        "info,cm_lifecycle=debug,cm_metrics=debug,cm_proxy=debug"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let writer = TeeDailyWriter::new(data_root.join("logs"));

    tracing_subscriber::fmt().with_env_filter(env_filter).json().with_writer(writer).init();
}
