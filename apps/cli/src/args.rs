//! # CLI Argument Definitions

use clap::{Args, Parser, Subcommand};
use evbus::domain::config::BackendKind;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "evbus")]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(arg_required_else_help = true)]
#[command(about = "Publish, listen and load-balance events over the configured bus")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON); `EVBUS__*` variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend to use instead of `bus.backend` (memory, nats, redis_stream)
    #[arg(short, long, global = true)]
    pub backend: Option<BackendKind>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Publish one or more events
    Publish(PublishArgs),
    /// Print events delivered to a subscription
    Listen(ListenArgs),
    /// Spread events over a consumer group and print who handled what
    Demo(DemoArgs),
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Topic to publish on; also used as the event type
    #[arg(short, long)]
    pub topic: String,

    /// JSON payload
    #[arg(short, long, default_value = "{}")]
    pub data: String,

    /// Event source attribute
    #[arg(short, long)]
    pub source: Option<String>,

    /// Number of events to publish
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: usize,
}

#[derive(Debug, Args)]
pub struct ListenArgs {
    #[arg(short, long)]
    pub topic: String,

    /// Join a consumer group instead of receiving every event
    #[arg(short, long)]
    pub group: Option<String>,

    /// Consumer name within the group
    #[arg(short, long, requires = "group")]
    pub name: Option<String>,

    /// Stop after this many seconds (runs until Ctrl-C otherwise)
    #[arg(short, long)]
    pub duration: Option<u64>,
}

#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Events to publish
    #[arg(short, long, default_value_t = 10)]
    pub events: usize,

    /// Group members sharing the load
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..))]
    pub members: u16,
}
