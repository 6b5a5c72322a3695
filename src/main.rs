use std::{io::Write, process::ExitCode, sync::Arc};

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use ractor::{Actor, ActorRef, SpawnErr, call, cast};
use rustyline_async::{Readline, ReadlineEvent, SharedWriter};
use tokio::{select, signal::ctrl_c};
use tracing_subscriber::EnvFilter;

use crate::{
    actors::net::{NetActor, NetActorArgs, NetActorMsg},
    config::{Args, Config},
    engine::webrtc::WebRtcEngine,
    handler::{MessageHandler, Mode},
    models::token::PeerToken,
};

pub(crate) mod actors;
pub(crate) mod config;
pub(crate) mod engine;
pub(crate) mod error;
pub(crate) mod handler;
pub(crate) mod models;
pub(crate) mod registry;
pub(crate) mod utils;

#[derive(Debug, Parser)]
enum Command {
    /// Offer to a peer whose token clashes with a command name
    #[clap(alias = "o")]
    Offer { token: String },
    /// List the registered sessions
    #[clap(alias = "l")]
    List,
    // a bare token
    #[clap(external_subcommand)]
    Peer(Vec<String>),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("Error: {err:#}");
            // -1 as seen by the shell
            ExitCode::from(255)
        },
    }
}

async fn run(args: Args) -> Result<()> {
    let local_token = PeerToken::random(args.token_length);
    let config = Arc::new(args.into_config(local_token));

    match &config.stun_url {
        Some(url) => println!("Stun server is {url}"),
        None if config.ice_servers.is_empty() => {
            println!("No ICE server is configured. Only local hosts and public IP addresses supported.");
        },
        None => {},
    }
    println!("The local ID is: {}", config.local_token);
    println!(
        "Received data channel messages will be {}",
        match config.mode {
            Mode::Echo => "echoed back to sender",
            Mode::Print => "printed to stdout",
        }
    );
    println!("Url is {}", config.signaling_url);
    println!("Waiting for signaling to be connected...");

    let (rl, stdout) = Readline::new("> ".to_string())?;
    let handler = Arc::new(MessageHandler::new(config.mode, stdout.clone()));
    let engine = Arc::new(WebRtcEngine::new(config.ice_servers.clone(), handler));
    let (net, handle) = Actor::spawn(None, NetActor, NetActorArgs { config: config.clone(), engine })
        .await
        .map_err(startup_error)?;

    let result = console(&net, &config, rl, stdout).await;

    println!("Cleaning up...");
    net.stop(Some("shutting down".to_string()));
    handle.await?;
    result
}

// ractor wraps a failed linked spawn once per level, keep only the cause
fn startup_error(err: SpawnErr) -> anyhow::Error {
    let err = anyhow::Error::from(err);
    anyhow!("signaling failed to connect: {}", err.root_cause())
}

fn parse_command(line: &str) -> Result<Command> {
    let mut args = shellwords::split(line).map_err(|err| anyhow!("Error parsing command: {err}"))?;
    args.insert(0, String::new());
    Ok(Command::try_parse_from(args)?)
}

async fn console(
    net: &ActorRef<NetActorMsg>,
    config: &Config,
    mut rl: Readline,
    mut stdout: SharedWriter,
) -> Result<()> {
    writeln!(stdout, "Enter a remote ID to send an offer:")?;
    loop {
        let event = select! {
            event = rl.readline() => event?,
            _ = ctrl_c() => ReadlineEvent::Interrupted,
        };
        let line = match event {
            ReadlineEvent::Eof | ReadlineEvent::Interrupted => break,
            ReadlineEvent::Line(line) => line,
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        rl.add_history_entry(line.to_string());
        let token = match parse_command(line).and_then(offer_target) {
            Ok(Some(token)) => token,
            Ok(None) => {
                let sessions = call!(net, NetActorMsg::Sessions).map_err(|err| anyhow!("{err}"))?;
                if sessions.is_empty() {
                    writeln!(stdout, "No sessions")?;
                }
                for token in sessions {
                    writeln!(stdout, "  - {token}")?;
                }
                continue;
            },
            Err(err) => {
                writeln!(stdout, "{err}")?;
                continue;
            },
        };
        if token == config.local_token {
            continue;
        }
        writeln!(stdout, "Offering to {token}")?;
        cast!(net, NetActorMsg::Offer(token)).map_err(|err| anyhow!("{err}"))?;
    }
    Ok(())
}

/// The peer a command offers to, `None` for `list`.
fn offer_target(command: Command) -> Result<Option<PeerToken>> {
    match command {
        Command::Offer { token } => Ok(Some(PeerToken::from(token))),
        Command::List => Ok(None),
        Command::Peer(args) => match args.as_slice() {
            [token] => Ok(Some(PeerToken::from(token.as_str()))),
            _ => bail!("expected a single remote ID, got `{}`", args.join(" ")),
        },
    }
}
