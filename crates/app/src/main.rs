//! counterflow: event-sourced counters fed by JSON lines on stdin.
//!
//! Each stdin line is an inbound message, e.g.
//!
//! ```text
//! {"type":"IncreaseCounter","data":{"counterId":"001","value":10}}
//! {"type":"MultiplyCounter","data":{"counterId":"001","value":20},"metadata":{"Content-Type":"application/json"}}
//! ```
//!
//! Outbound envelopes are written to stdout as JSON lines (or published on
//! Redis when built with `redis` and `REDIS_URL` is set). Logs go to stderr.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use tracing::{info, warn};

use counterflow_events::{EventBus, InMemoryEventBus, OutboundEnvelope, Subscription};
use counterflow_infra::consumers::InMemoryCursorStore;
use counterflow_infra::event_store::{EventStore, InMemoryEventStore};
use counterflow_infra::runtime::Cursors;
use counterflow_infra::{CounterConfig, CounterRuntime, InboundMessage};

fn main() -> anyhow::Result<()> {
    counterflow_observability::init();

    let config = CounterConfig::from_env().context("invalid configuration")?;

    #[cfg(feature = "postgres")]
    if let Some(url) = config.database_url.clone() {
        let store = counterflow_infra::event_store::PostgresEventStore::connect(&url, 5)
            .context("failed to connect to Postgres")?;
        let cursors: Cursors = Arc::new(store.cursor_store());
        info!("using Postgres event log and consumer cursors");
        return with_transport(&config, store, cursors);
    }

    if config.database_url.is_some() {
        warn!("DATABASE_URL set but postgres feature not enabled, using in-memory event log");
    }
    with_transport(
        &config,
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryCursorStore::new()),
    )
}

fn with_transport<S>(config: &CounterConfig, store: S, cursors: Cursors) -> anyhow::Result<()>
where
    S: EventStore + Clone + 'static,
{
    #[cfg(feature = "redis")]
    if let Some(url) = config.redis_url.clone() {
        use counterflow_infra::event_bus::RedisPubSubTransport;

        let transport = RedisPubSubTransport::<OutboundEnvelope>::new(&url, config.events_topic.as_str())
            .context("invalid REDIS_URL")?;
        let commands = RedisPubSubTransport::<InboundMessage>::new(&url, config.commands_topic.as_str())
            .context("invalid REDIS_URL")?;
        info!(events_topic = %config.events_topic, commands_topic = %config.commands_topic, "using Redis transport");
        return run(config, store, cursors, transport, None, Some(commands.subscribe()));
    }

    if config.redis_url.is_some() {
        warn!("REDIS_URL set but redis feature not enabled, using in-memory transport");
    }
    let transport = InMemoryEventBus::<OutboundEnvelope>::new();
    let printed = transport.subscribe();
    run(config, store, cursors, transport, Some(printed), None)
}

/// Start the runtime, feed it stdin, and shut down at end of input.
fn run<S, T>(
    config: &CounterConfig,
    store: S,
    cursors: Cursors,
    transport: T,
    print: Option<Subscription<OutboundEnvelope>>,
    broker_commands: Option<Subscription<InboundMessage>>,
) -> anyhow::Result<()>
where
    S: EventStore + Clone + 'static,
    T: EventBus<OutboundEnvelope> + 'static,
{
    let printer = print
        .map(|outbound| {
            thread::Builder::new()
                .name("counter-stdout".to_string())
                .spawn(move || print_envelopes(outbound))
        })
        .transpose()
        .context("failed to spawn stdout printer")?;

    let inbound = Arc::new(InMemoryEventBus::<InboundMessage>::new());
    let runtime = CounterRuntime::start(config, store, cursors, transport, Some(inbound.subscribe()))?;

    if let Some(commands) = broker_commands {
        let inbound = inbound.clone();
        thread::Builder::new()
            .name("counter-broker-in".to_string())
            .spawn(move || {
                while let Ok(message) = commands.recv() {
                    if inbound.publish(message).is_err() {
                        break;
                    }
                }
            })
            .context("failed to spawn broker forwarder")?;
    }

    let stdin = io::stdin();
    for (lineno, line) in stdin.lock().lines().enumerate() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(&line) {
            Ok(message) => {
                if let Err(e) = inbound.publish(message) {
                    warn!(error = ?e, "inbound bus rejected message");
                }
            }
            Err(e) => warn!(line = lineno + 1, error = %e, "skipping malformed input line"),
        }
    }

    info!("end of input, shutting down");
    let reports = runtime.shutdown()?;
    let failing = reports.iter().filter(|r| r.has_failures()).count();
    if failing > 0 {
        warn!(entities = failing, "some deliveries are still failing");
    }

    if let Some(printer) = printer {
        if printer.join().is_err() {
            warn!("stdout printer panicked");
        }
    }
    Ok(())
}

fn print_envelopes(outbound: Subscription<OutboundEnvelope>) {
    let stdout = io::stdout();
    while let Ok(envelope) = outbound.recv() {
        let mut out = stdout.lock();
        let written = serde_json::to_writer(&mut out, &envelope)
            .map_err(io::Error::from)
            .and_then(|()| writeln!(out));
        if let Err(e) = written {
            warn!(error = %e, "failed to write envelope to stdout");
            return;
        }
    }
}
