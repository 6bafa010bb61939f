//! Exchange pings and pongs over a local message bus.
//!
//! This is a simple example to demonstrate how to use the [`courier`] library.

use clap::Parser;
use std::sync::Arc;

use courier::{
    example::{PingBody, PongBody, Responder, Tracer, PING, RESPONDER, TRACER},
    BusConfig, CourierError, Message, MessageBus, MessageChannel, SubscribeFilter,
};

#[derive(Parser, Debug)]
#[command(version, about = "Ping a responder over the courier message bus.")]
struct Cli {
    #[command(flatten)]
    bus: BusConfig,

    /// The number of pings to send.
    #[arg(long, default_value_t = 3)]
    pings: u32,

    /// How long to wait for each pong, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Print the shadow copies posted to the debug channel.
    #[arg(long)]
    trace: bool,
}

async fn run(bus: &Arc<MessageBus>, args: &Cli) -> Result<(), CourierError> {
    let responder = Arc::new(Responder::default());
    bus.register_object(RESPONDER, responder.clone());

    let tracer = Arc::new(Tracer);
    if args.trace {
        bus.register_object(TRACER, tracer.clone());
        bus.subscribe(MessageChannel::MESSAGE_DEBUG, tracer.as_ref(), SubscribeFilter::any());
    }

    let timeout = Some(tokio::time::Duration::from_millis(args.timeout_ms));

    for sequence in 0..args.pings {
        let ping = Message::new(PING).with_serializable_body(&PingBody { sequence })?;
        let reply = bus.send_message_to_uid(&RESPONDER, ping, timeout, false).await?;

        match reply.error_body() {
            Some(error) => println!("Ping #{sequence} failed: {} ({})", error.text, error.kind),
            None => {
                let pong = reply.body_as::<PongBody>()?;
                println!("Pong #{} received; {} served so far.", pong.sequence, pong.served);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), CourierError> {
    let args = Cli::parse();
    let bus = MessageBus::new_and_bootstrap(args.bus.clone())?;

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted, shutting down.");
            Ok(())
        },
        result = run(&bus, &args) => result,
    };

    bus.shutdown();
    result
}
