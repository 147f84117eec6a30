use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use eventline_core::{load_config, Dispatcher, DispatcherConfig, Event, Handlers, Priority, Subscriber};

#[derive(Debug)]
struct StartEvent;
impl Event for StartEvent {}

#[derive(Debug)]
struct TickEvent {
    n: u32,
}
impl Event for TickEvent {}

/// Reacts to start-up without needing an instance.
struct Clock;

impl Subscriber for Clock {
    fn subscribe(handlers: &mut Handlers<Self>) {
        handlers.on_static("on_start", Priority::High, |_: &StartEvent| {
            info!("Clock started");
            Ok(())
        });
    }
}

struct Ticker {
    label: String,
}

impl Subscriber for Ticker {
    fn subscribe(handlers: &mut Handlers<Self>) {
        handlers.on("on_tick", Priority::Medium, |this: &Ticker, tick: &TickEvent| {
            info!(ticker = this.label.as_str(), n = tick.n, "Tick");
            Ok(())
        });
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("eventline_core=info".parse()?)
                .add_directive("eventline_demo=info".parse()?),
        )
        .init();

    // Optional --config <path>; otherwise EVENTLINE_* env vars.
    let config = match std::env::args().nth(1).as_deref() {
        Some("--config") => {
            let path = std::env::args()
                .nth(2)
                .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
            load_config(Path::new(&path))?
        }
        _ => DispatcherConfig::from_env()?,
    };
    info!(
        name = config.name.as_str(),
        order = ?config.order,
        type_unregistration = ?config.type_unregistration,
        "Starting dispatcher"
    );

    let dispatcher = Dispatcher::new(config);
    let first = Arc::new(Ticker { label: "first".into() });
    let second = Arc::new(Ticker { label: "second".into() });

    dispatcher.register_type::<Clock>()?;
    dispatcher.register(&first)?;
    dispatcher.register(&second)?;

    let started = dispatcher.dispatch(&StartEvent);
    let ticked = dispatcher.dispatch(&TickEvent { n: 1 });
    info!(invoked = started.invoked, failed = started.failed, "Dispatched StartEvent");
    info!(invoked = ticked.invoked, failed = ticked.failed, "Dispatched TickEvent");

    dispatcher.unregister(&first);
    let ticked = dispatcher.dispatch(&TickEvent { n: 2 });
    info!(invoked = ticked.invoked, "Dispatched TickEvent after unregistering first ticker");

    println!("{}", serde_json::to_string_pretty(&dispatcher.snapshot())?);

    Ok(())
}
