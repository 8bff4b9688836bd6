//! Console dialer over the callbus message bus
//!
//! A small command-line phone: place, answer, hold, transfer and record
//! calls by dispatching commands and pumping the indication channel, the
//! way any application sits on top of the bus. Runs against the loopback
//! engine adapter, which simulates a well-behaved engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use callbus_core::envelope::{
    AnswerCallParams, ClearCallParams, Command, GeneralParams, ProtocolParams, RecordingParams,
    RegistrationParams, SetUpCallParams, TransferParams, MediaStreamParams,
};
use callbus_core::{
    BusError, CommandDispatcher, EngineManager, EngineOptions, Indication, IndicationChannel,
    LoopbackAdapter, MediaState,
};

#[derive(Parser)]
#[command(name = "dialer", version, about = "Console dialer over the call-control bus")]
struct Cli {
    /// Engine trace verbosity
    #[arg(long, default_value_t = 4)]
    trace_level: u8,

    /// Engine trace output file
    #[arg(long, default_value = "debugstream")]
    trace_file: String,

    /// Seconds of indication silence before an operation finishes
    #[arg(long, default_value_t = 15)]
    linger: u64,

    /// Verbose bus logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    operation: Operation,
}

#[derive(Subcommand)]
enum Operation {
    /// Wait for incoming calls and answer them
    Listen,
    /// Place a call
    Call {
        /// Destination address, e.g. sip:500@example.com
        destination: String,
        /// Originating endpoint; defaults to the engine's local endpoint
        #[arg(long)]
        from: Option<String>,
    },
    /// Place a call, then mute and unmute the outbound audio
    Mute {
        /// Destination address
        destination: String,
    },
    /// Place a call, then put it on hold
    Hold {
        /// Destination address
        destination: String,
    },
    /// Place a call, then transfer it
    Transfer {
        /// Destination address
        destination: String,
        /// Party to transfer the call to
        target: String,
    },
    /// Place a call, hold it, consult a second party, then transfer
    Consult {
        /// Destination address
        destination: String,
        /// Party to consult before transferring
        target: String,
    },
    /// Register an address-of-record
    Register {
        /// Address-of-record, e.g. sip:alice@example.com
        aor: String,
        /// Registration password
        password: String,
    },
    /// Subscribe to an event package
    Subscribe {
        /// Event package, e.g. "dialog;sla;ma"
        package: String,
        /// Address-of-record to subscribe to
        aor: String,
        /// Subscriber address
        from: String,
    },
    /// Place a call and record it to a file
    Record {
        /// Destination address
        destination: String,
        /// File to record into
        file: String,
    },
    /// Place a call and play a file to it through the IVR endpoint
    Play {
        /// Destination address
        destination: String,
        /// File to play
        file: String,
    },
}

/// Console phone state: the bus plus the tokens the scenarios juggle
struct Dialer {
    manager: EngineManager,
    dispatcher: Arc<CommandDispatcher>,
    channel: Arc<IndicationChannel>,
    current_token: Option<String>,
    held_token: Option<String>,
    play_script: Option<String>,
}

impl Dialer {
    async fn start(cli: &Cli) -> Result<Self> {
        let options = EngineOptions::default()
            .with_protocol("ivr")
            .with_trace_level(cli.trace_level)
            .with_trace_file(&cli.trace_file);

        let manager = EngineManager::new(Arc::new(LoopbackAdapter::new()));
        manager
            .initialise(&options)
            .await
            .context("could not initialise the engine")?;
        let dispatcher = manager.dispatcher().await?;
        let channel = manager.channel().await?;

        let dialer = Self {
            manager,
            dispatcher,
            channel,
            current_token: None,
            held_token: None,
            play_script: None,
        };

        // General options, then options across all protocols; mirrors how
        // a phone configures the engine before doing anything else.
        dialer
            .send(
                Command::SetGeneralParameters(GeneralParams {
                    auto_rx_media: Some("audio".to_string()),
                    auto_tx_media: Some("audio".to_string()),
                    stun_server: Some("stun.example.com".to_string()),
                    ..Default::default()
                }),
                "Could not set general options",
            )
            .await?;
        dialer
            .send(
                Command::SetProtocolParameters(ProtocolParams {
                    prefix: None,
                    user_name: Some(whoami()),
                    display_name: Some("Callbus Dialer".to_string()),
                    interface_addresses: Some("*".to_string()),
                    default_options: None,
                }),
                "Could not set protocol options",
            )
            .await?;

        Ok(dialer)
    }

    /// Dispatch a command, printing engine rejections the way a console
    /// phone does, and returning `None` when the engine said no
    async fn send(&self, command: Command, error_message: &str) -> Result<Option<Command>> {
        match self.dispatcher.dispatch(command).await {
            Ok(ack) => Ok(Some(ack)),
            Err(BusError::Rejected { reason }) => {
                println!("{}: {}", error_message, reason);
                Ok(None)
            }
            Err(err) => Err(err).context(error_message.to_string()),
        }
    }

    async fn do_call(&mut self, from: Option<String>, to: &str) -> Result<bool> {
        println!("Calling {}", to);
        let mut params = SetUpCallParams::to(to);
        params.party_a = from;
        let Some(ack) = self
            .send(Command::SetUpCall(params), "Could not make call")
            .await?
        else {
            return Ok(false);
        };
        match ack {
            Command::SetUpCall(params) => {
                self.current_token = params.call_token;
                Ok(true)
            }
            _ => bail!("engine acknowledged with the wrong message kind"),
        }
    }

    async fn do_mute(&mut self, on: bool) -> Result<bool> {
        println!("Mute {}", if on { "on" } else { "off" });
        let Some(token) = self.current_token.clone() else {
            println!("No call in progress.");
            return Ok(false);
        };
        let command = Command::SetMediaStreamState(MediaStreamParams {
            call_token: token,
            stream_type: "audio out".to_string(),
            state: if on { MediaState::Pause } else { MediaState::Resume },
        });
        Ok(self.send(command, "Could not mute call").await?.is_some())
    }

    async fn do_hold(&mut self) -> Result<bool> {
        println!("Hold");
        let Some(token) = self.current_token.clone() else {
            println!("No call in progress.");
            return Ok(false);
        };
        if self.send(Command::hold(&token), "Could not hold call").await?.is_none() {
            return Ok(false);
        }
        self.held_token = Some(token);
        self.current_token = None;
        Ok(true)
    }

    async fn do_transfer(&mut self, to: &str) -> Result<bool> {
        println!("Transferring to {}", to);
        let Some(token) = self.current_token.clone() else {
            println!("No call in progress.");
            return Ok(false);
        };
        let command = Command::TransferCall(TransferParams {
            call_token: token,
            party_a: None,
            party_b: to.to_string(),
        });
        Ok(self.send(command, "Could not transfer call").await?.is_some())
    }

    async fn do_register(&mut self, aor: &str, password: &str) -> Result<bool> {
        println!("Registering {}", aor);
        let params = match aor.split_once(':') {
            None => RegistrationParams::new("h323", aor),
            Some((protocol, identifier)) => RegistrationParams::new(protocol, identifier),
        }
        .with_password(password)
        .with_time_to_live(300);
        Ok(self
            .send(Command::Register(params), "Could not register endpoint")
            .await?
            .is_some())
    }

    async fn do_subscribe(&mut self, package: &str, aor: &str, from: &str) -> Result<bool> {
        println!("Subscribing {}", aor);
        let params = RegistrationParams::new("sip", aor)
            .with_host(from)
            .with_event_package(package)
            .with_time_to_live(300);
        Ok(self
            .send(Command::Register(params), "Could not subscribe")
            .await?
            .is_some())
    }

    async fn do_record(&mut self, file: &str) -> Result<bool> {
        let Some(token) = self.current_token.clone() else {
            println!("No call in progress.");
            return Ok(false);
        };
        println!("Recording {}", file);
        let command = Command::StartRecording(RecordingParams {
            call_token: token,
            file: file.to_string(),
            channels: Some(2),
        });
        Ok(self.send(command, "Could not start recording").await?.is_some())
    }

    /// Pump the indication channel until `idle` elapses with no traffic
    ///
    /// This is the dialer's whole event loop: print what the engine
    /// reports, answer incoming calls, kick off a queued IVR script once
    /// the call is up.
    async fn pump(&mut self, idle: Duration) -> Result<()> {
        while let Some(indication) = self.channel.poll(idle).await? {
            self.handle_indication(indication).await?;
        }
        Ok(())
    }

    async fn handle_indication(&mut self, indication: Indication) -> Result<()> {
        match indication {
            Indication::RegistrationStatus(status) => {
                use callbus_core::RegistrationState::*;
                match status.state {
                    Retrying => println!("Trying registration to {}.", status.server_name),
                    Restored => println!("Registration of {} restored.", status.server_name),
                    Successful => println!("Registration of {} successful.", status.server_name),
                    Removed => println!("Unregistered {}.", status.server_name),
                    Failed => match status.error {
                        Some(error) => {
                            println!("Registration of {} error: {}", status.server_name, error)
                        }
                        None => println!("Registration of {} failed.", status.server_name),
                    },
                }
            }
            Indication::IncomingCall(info) => {
                println!(
                    "Incoming call from \"{}\", \"{}\" to \"{}\".",
                    info.remote_display_name.as_deref().unwrap_or(""),
                    info.remote_address,
                    info.called_address.as_deref().unwrap_or(&info.local_address),
                );
                if self.current_token.is_none() {
                    self.current_token = Some(info.call_token.clone());
                    self.send(
                        Command::AnswerCall(AnswerCallParams {
                            call_token: info.call_token,
                            overrides: None,
                        }),
                        "Could not answer call",
                    )
                    .await?;
                } else {
                    self.send(
                        Command::ClearCall(ClearCallParams {
                            call_token: info.call_token,
                            reason: Some("EndedByLocalBusy".to_string()),
                        }),
                        "Could not refuse call",
                    )
                    .await?;
                }
            }
            Indication::Proceeding { .. } => println!("Proceeding."),
            Indication::Alerting(_) => println!("Ringing."),
            Indication::Established(info) => {
                println!("Established.");
                if let Some(script) = self.play_script.take() {
                    println!("Playing {}", script);
                    self.send(
                        Command::TransferCall(TransferParams {
                            call_token: info.call_token,
                            party_a: Some("pc:*".to_string()),
                            party_b: script,
                        }),
                        "Could not start playing",
                    )
                    .await?;
                }
            }
            Indication::MediaStreamStatus(info) => {
                println!(
                    "Media stream {} {} using {}.",
                    info.stream_type,
                    info.state,
                    info.format.as_deref().unwrap_or("unknown"),
                );
            }
            Indication::UserInput(info) => println!("User Input: {}.", info.input),
            Indication::CallCleared(info) => {
                match &info.reason {
                    Some(reason) => println!("Call cleared: {}", reason),
                    None => println!("Call cleared."),
                }
                if self.current_token.as_deref() == Some(info.call_token.as_str()) {
                    self.current_token = None;
                }
                if self.held_token.as_deref() == Some(info.call_token.as_str()) {
                    self.held_token = None;
                }
            }
            Indication::MessageWaiting(info) => {
                println!(
                    "Message waiting for {} ({}{}).",
                    info.party,
                    info.kind,
                    info.extra_info.map(|e| format!(": {}", e)).unwrap_or_default(),
                );
            }
            Indication::LineAppearance(info) => {
                println!("Line {} is {:?}.", info.line, info.state);
            }
            Indication::TransferStatus(info) => {
                println!(
                    "Transfer {:?}{}.",
                    info.result,
                    info.info.map(|i| format!(": {}", i)).unwrap_or_default(),
                );
            }
            Indication::CompletedIvr(info) => {
                println!("IVR script on {} completed.", info.call_token);
            }
            Indication::CommandError { reason } => println!("Engine error: {}", reason),
        }
        Ok(())
    }
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "callbus".to_string())
}

fn ivr_play_script(file: &str) -> String {
    format!(
        "ivr:<?xml version=\"1.0\"?><vxml version=\"1.0\">\
         <form id=\"PlayFile\"><audio src=\"{}\"/></form></vxml>",
        file
    )
}

async fn run(cli: Cli) -> Result<()> {
    println!("Initialising.");
    let mut dialer = Dialer::start(&cli).await?;
    let linger = Duration::from_secs(cli.linger);
    tracing::debug!(linger_secs = cli.linger, "engine session ready");

    match &cli.operation {
        Operation::Listen => {
            println!("Listening.");
            dialer.pump(Duration::from_secs(60)).await?;
        }
        Operation::Call { destination, from } => {
            if dialer.do_call(from.clone(), destination).await? {
                dialer.pump(linger).await?;
            }
        }
        Operation::Mute { destination } => {
            if dialer.do_call(None, destination).await? {
                dialer.pump(linger).await?;
                if dialer.do_mute(true).await? {
                    dialer.pump(linger).await?;
                    if dialer.do_mute(false).await? {
                        dialer.pump(linger).await?;
                    }
                }
            }
        }
        Operation::Hold { destination } => {
            if dialer.do_call(None, destination).await? {
                dialer.pump(linger).await?;
                if dialer.do_hold().await? {
                    dialer.pump(linger).await?;
                }
            }
        }
        Operation::Transfer { destination, target } => {
            if dialer.do_call(None, destination).await? {
                dialer.pump(linger).await?;
                if dialer.do_transfer(target).await? {
                    dialer.pump(linger).await?;
                }
            }
        }
        Operation::Consult { destination, target } => {
            if dialer.do_call(None, destination).await? {
                dialer.pump(linger).await?;
                if dialer.do_hold().await? {
                    dialer.pump(linger).await?;
                    if dialer.do_call(None, target).await? {
                        dialer.pump(linger).await?;
                        let held = dialer.held_token.clone().unwrap_or_default();
                        if dialer.do_transfer(&held).await? {
                            dialer.pump(linger).await?;
                        }
                    }
                }
            }
        }
        Operation::Register { aor, password } => {
            if dialer.do_register(aor, password).await? {
                dialer.pump(linger).await?;
            }
        }
        Operation::Subscribe { package, aor, from } => {
            if dialer.do_subscribe(package, aor, from).await? {
                dialer.pump(Duration::from_secs(3600)).await?;
            }
        }
        Operation::Record { destination, file } => {
            if dialer.do_call(None, destination).await? && dialer.do_record(file).await? {
                dialer.pump(Duration::from_secs(3600)).await?;
            }
        }
        Operation::Play { destination, file } => {
            dialer.play_script = Some(ivr_play_script(file));
            if dialer.do_call(None, destination).await? {
                dialer.pump(Duration::from_secs(3600)).await?;
            }
        }
    }

    println!("Exiting.");
    dialer.manager.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "callbus=debug" } else { "callbus=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    run(cli).await
}
