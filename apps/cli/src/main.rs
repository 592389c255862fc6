#![allow(clippy::print_stdout)]

mod args;
mod handlers;

use crate::args::{Cli, Commands};
use anyhow::Context;
use clap::Parser;
use evbus::domain::config::AppConfig;
use evbus::kernel::config::load_config;
use evbus_logger::Logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg: AppConfig =
        load_config(cli.config.as_deref()).context("Critical: Configuration is malformed")?;
    if let Some(backend) = cli.backend {
        cfg.bus.backend = backend;
    }

    let _log = Logger::from_config(env!("CARGO_PKG_NAME"), &cfg.logging)?;

    let bus = evbus::connect(&cfg.bus)
        .await
        .with_context(|| format!("Failed to connect the '{}' event bus", cfg.bus.backend))?;

    let outcome = match &cli.command {
        Commands::Publish(args) => handlers::publish::run(bus.as_ref(), args).await.map(|ids| {
            for id in &ids {
                println!("{id}");
            }
            println!("published {} event(s) to {}", ids.len(), args.topic);
        }),
        Commands::Listen(args) => handlers::listen::run(bus.as_ref(), args).await.map(|n| {
            println!("received {n} event(s)");
        }),
        Commands::Demo(args) => handlers::demo::run(bus.as_ref(), args).await.map(|dist| {
            for (member, count) in dist.per_member.iter().enumerate() {
                println!("member-{member}: {count}");
            }
            println!("total: {}", dist.total());
        }),
    };

    bus.close().await.context("Failed to close the event bus")?;
    outcome
}
