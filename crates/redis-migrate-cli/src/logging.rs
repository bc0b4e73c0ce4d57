//! Log routing for the CLI.
//!
//! Text lines look like `2024-05-01 12:00:00,123 - (redis-migrate) - INFO - msg`
//! on stdout and in the log file. Syslog datagrams carry an RFC 3164
//! priority prefix and drop the timestamp, which the daemon adds itself:
//! `<14>redis-migrate - INFO - msg`.

use std::fmt::{self, Write as FmtWrite};
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use redis_migrate::{LogOutput, LoggingConfig, MigrateError};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const APP_NAME: &str = "redis-migrate";

/// Install the global subscriber.
pub fn setup_logging(
    verbosity: &str,
    format: &str,
    logging: &LoggingConfig,
) -> Result<(), MigrateError> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let (writer, timestamp) = match logging.output {
        LogOutput::Stdout => (BoxMakeWriter::new(io::stdout), true),
        LogOutput::File => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&logging.file)?;
            (BoxMakeWriter::new(Mutex::new(file)), true)
        }
        LogOutput::Syslog => (syslog_writer(logging)?, false),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(writer);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.event_format(LineFormat { timestamp }).init();
    }

    Ok(())
}

#[cfg(unix)]
fn syslog_writer(logging: &LoggingConfig) -> Result<BoxMakeWriter, MigrateError> {
    Ok(BoxMakeWriter::new(syslog::SyslogWriter::connect(
        &logging.syslog_socket,
    )?))
}

#[cfg(not(unix))]
fn syslog_writer(_logging: &LoggingConfig) -> Result<BoxMakeWriter, MigrateError> {
    Err(MigrateError::Config(
        "syslog output requires a unix datagram socket".to_string(),
    ))
}

/// `<time> - (redis-migrate) - <LEVEL> - msg`, or `redis-migrate - <LEVEL> - msg`
/// without a timestamp.
pub struct LineFormat {
    timestamp: bool,
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = event.metadata().level();
        if self.timestamp {
            let now = chrono::Local::now();
            write!(
                writer,
                "{} - ({}) - {} - ",
                now.format("%Y-%m-%d %H:%M:%S,%3f"),
                APP_NAME,
                level
            )?;
        } else {
            write!(writer, "{} - {} - ", APP_NAME, level)?;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        writeln!(writer, "{}", visitor.finish())
    }
}

/// Collects the message and any extra fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn push_field(&mut self, name: &str, value: &dyn fmt::Display) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }

    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            self.push_field(field.name(), &format_args!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), &value);
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.push_field(field.name(), &value);
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.push_field(field.name(), &value);
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.push_field(field.name(), &value);
    }
}

/// RFC 3164 priority for `level` in the `user` facility.
pub fn syslog_priority(level: &Level) -> u8 {
    const FACILITY_USER: u8 = 1;
    let severity = match *level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        _ => 7,
    };
    FACILITY_USER * 8 + severity
}

#[cfg(unix)]
mod syslog {
    use std::io;
    use std::os::unix::net::UnixDatagram;
    use std::path::Path;
    use std::sync::Arc;

    use tracing::{Level, Metadata};
    use tracing_subscriber::fmt::MakeWriter;

    use super::syslog_priority;

    /// Sends one datagram per log event to a local syslog socket.
    pub struct SyslogWriter {
        socket: Arc<UnixDatagram>,
    }

    impl SyslogWriter {
        pub fn connect(path: &Path) -> io::Result<Self> {
            let socket = UnixDatagram::unbound()?;
            socket.connect(path)?;
            Ok(Self {
                socket: Arc::new(socket),
            })
        }

        fn line(&self, level: &Level) -> SyslogLine {
            SyslogLine {
                socket: self.socket.clone(),
                buf: format!("<{}>", syslog_priority(level)).into_bytes(),
            }
        }
    }

    impl<'a> MakeWriter<'a> for SyslogWriter {
        type Writer = SyslogLine;

        fn make_writer(&'a self) -> Self::Writer {
            self.line(&Level::INFO)
        }

        fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
            self.line(meta.level())
        }
    }

    /// Buffers one formatted event; sent when dropped.
    pub struct SyslogLine {
        socket: Arc<UnixDatagram>,
        buf: Vec<u8>,
    }

    impl io::Write for SyslogLine {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for SyslogLine {
        fn drop(&mut self) {
            while self.buf.last() == Some(&b'\n') {
                self.buf.pop();
            }
            // Lost if no daemon is listening
            let _ = self.socket.send(&self.buf);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::io::Write;

        #[test]
        fn test_datagram_carries_priority() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("log.sock");
            let receiver = UnixDatagram::bind(&path).unwrap();

            let writer = SyslogWriter::connect(&path).unwrap();
            {
                let mut line = writer.line(&Level::ERROR);
                line.write_all(b"redis-migrate - ERROR - boom\n").unwrap();
            }

            let mut buf = [0u8; 256];
            let n = receiver.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"<11>redis-migrate - ERROR - boom");
        }
    }
}
