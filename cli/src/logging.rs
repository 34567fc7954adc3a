use std::{
    fmt,
    fs::File,
    io,
    path::Path,
    sync::Mutex,
};
use tracing::{field::{Field, Visit}, Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
};

// `[YYYY-MM-DD HH:MM:SS]: <message>`, structured fields left out.
struct EventLine;

impl<S, N> FormatEvent<S, N> for EventLine
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
        let mut message = MessageField::default();
        event.record(&mut message);
        writeln!(
            writer,
            "[{}]: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message.0,
        )
    }
}

#[derive(Default)]
struct MessageField(String);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

// Protocol events go to log_peer_<id>.log in `dir`, everything else to stdout.
pub fn init(dir: &Path, peer_id: u32, verbose: bool) -> io::Result<()> {
    let file = File::create(dir.join(format!("log_peer_{}.log", peer_id)))?;
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .event_format(EventLine)
        .with_filter(Targets::new().with_target(peershare::EVENT_TARGET, Level::INFO));

    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(level);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();
    Ok(())
}
