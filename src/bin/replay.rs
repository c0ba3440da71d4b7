//! Episode replay - plays recorded episodes on a simulated or real arm.
//!
//! Reads operator commands from stdin while playing (type `h` for help).
//!
//! Usage:
//!   reprise-replay --episodes <file> [options]
//!
//! Options:
//!   --episodes <file>          Episode JSON file (required)
//!   --fps <n>                  Playback rate (default: file fps, else 30)
//!   --start <n>                First episode (default: 0)
//!   --end <n>                  Last episode, inclusive (default: last)
//!   --auto-advance             Move to the next episode without waiting
//!   --episode-delay <seconds>  Pause between episodes with --auto-advance (default: 2)
//!   --send-timeout <seconds>   Bound on each actuator send, 0 disables (default: 1)
//!   --failure-policy <policy>  halt | abandon (default: halt)
//!   --home <posture>           so101 | bi-so101 | none (default: none)
//!   --home-on-exit             Return to the home posture before disconnecting
//!   --confirm                  Wait for 'n' before every episode
//!   --port <path>              Serial port of an SO100/SO101 arm (feature `so100`)
//!   --servo-ids <ids>          Comma-separated servo ids, in channel order (default: 1..N)

use anyhow::{bail, Context, Result};
use reprise::command::HELP;
use reprise::config::{send_timeout_from_secs, DEFAULT_SEND_TIMEOUT};
use reprise::frame::{bi_so101_home, so101_home};
use reprise::{
    stdin_lines, ActuatorGateway, CommandListener, EpisodeSource, FailurePolicy, MemorySource,
    ReplayConfig, ReplayController, ReplayState, RunReport, SimulatedGateway,
};
use std::sync::Arc;
use std::time::Duration;

struct Args {
    episodes: Option<String>,
    fps: Option<f64>,
    start: usize,
    end: Option<usize>,
    auto_advance: bool,
    episode_delay: f64,
    send_timeout: Option<Duration>,
    failure_policy: FailurePolicy,
    home: Option<String>,
    home_on_exit: bool,
    confirm: bool,
    port: Option<String>,
    servo_ids: Option<Vec<u8>>,
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value {:?} for {}: {}", value, flag, e))
}

fn parse_args() -> Result<Option<Args>> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        episodes: None,
        fps: None,
        start: 0,
        end: None,
        auto_advance: false,
        episode_delay: 2.0,
        send_timeout: Some(DEFAULT_SEND_TIMEOUT),
        failure_policy: FailurePolicy::HaltRun,
        home: None,
        home_on_exit: false,
        confirm: false,
        port: None,
        servo_ids: None,
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args.get(i + 1).map(String::as_str);
        match (flag, value) {
            ("--episodes", Some(v)) => {
                parsed.episodes = Some(v.to_string());
                i += 2;
            }
            ("--fps", Some(v)) => {
                parsed.fps = Some(parse_value(flag, v)?);
                i += 2;
            }
            ("--start", Some(v)) => {
                parsed.start = parse_value(flag, v)?;
                i += 2;
            }
            ("--end", Some(v)) => {
                // -1 is accepted as "last episode"
                parsed.end = if v == "-1" {
                    None
                } else {
                    Some(parse_value(flag, v)?)
                };
                i += 2;
            }
            ("--episode-delay", Some(v)) => {
                parsed.episode_delay = parse_value(flag, v)?;
                i += 2;
            }
            ("--send-timeout", Some(v)) => {
                parsed.send_timeout = send_timeout_from_secs(parse_value(flag, v)?)?;
                i += 2;
            }
            ("--failure-policy", Some(v)) => {
                parsed.failure_policy = match v {
                    "halt" => FailurePolicy::HaltRun,
                    "abandon" => FailurePolicy::AbandonEpisode,
                    other => bail!("unknown failure policy {:?} (expected halt or abandon)", other),
                };
                i += 2;
            }
            ("--home", Some(v)) => {
                parsed.home = match v {
                    "none" => None,
                    "so101" | "bi-so101" => Some(v.to_string()),
                    other => bail!(
                        "unknown home posture {:?} (expected so101, bi-so101 or none)",
                        other
                    ),
                };
                i += 2;
            }
            ("--port", Some(v)) => {
                parsed.port = Some(v.to_string());
                i += 2;
            }
            ("--servo-ids", Some(v)) => {
                let ids = v
                    .split(',')
                    .map(|id| parse_value(flag, id.trim()))
                    .collect::<Result<Vec<u8>>>()?;
                parsed.servo_ids = Some(ids);
                i += 2;
            }
            ("--auto-advance", _) => {
                parsed.auto_advance = true;
                i += 1;
            }
            ("--home-on-exit", _) => {
                parsed.home_on_exit = true;
                i += 1;
            }
            ("--confirm", _) => {
                parsed.confirm = true;
                i += 1;
            }
            ("--help" | "-h", _) => return Ok(None),
            _ => {
                eprintln!("Unknown argument: {}", flag);
                return Ok(None);
            }
        }
    }

    if parsed.episodes.is_none() {
        eprintln!("Missing --episodes <file>");
        return Ok(None);
    }
    Ok(Some(parsed))
}

fn print_usage() {
    println!("Episode replay - plays recorded episodes on a simulated or real arm");
    println!();
    println!("Usage: reprise-replay --episodes <file> [options]");
    println!();
    println!("Options:");
    println!("  --episodes <file>          Episode JSON file (required)");
    println!("  --fps <n>                  Playback rate (default: file fps, else 30)");
    println!("  --start <n>                First episode (default: 0)");
    println!("  --end <n>                  Last episode, inclusive (default: last)");
    println!("  --auto-advance             Move to the next episode without waiting");
    println!("  --episode-delay <seconds>  Pause between episodes with --auto-advance (default: 2)");
    println!("  --send-timeout <seconds>   Bound on each actuator send, 0 disables (default: 1)");
    println!("  --failure-policy <policy>  halt | abandon (default: halt)");
    println!("  --home <posture>           so101 | bi-so101 | none (default: none)");
    println!("  --home-on-exit             Return to the home posture before disconnecting");
    println!("  --confirm                  Wait for 'n' before every episode");
    println!("  --port <path>              Serial port of an SO100/SO101 arm (feature so100)");
    println!("  --servo-ids <ids>          Comma-separated servo ids, in channel order (default: 1..N)");
    println!();
    println!("Examples:");
    println!("  reprise-replay --episodes demos/episodes.json --auto-advance --episode-delay 1");
    println!("  reprise-replay --episodes run.json --port /dev/ttyUSB0 --home-on-exit --confirm");
}

#[cfg(feature = "so100")]
fn so100_gateway(port: &str, channels: &[String], ids: Option<&[u8]>) -> Result<reprise::so100::Sts3215Gateway> {
    let ids: Vec<u8> = match ids {
        Some(ids) => ids.to_vec(),
        None => (1..=channels.len())
            .map(u8::try_from)
            .collect::<Result<_, _>>()
            .context("too many channels for default servo ids")?,
    };
    if ids.len() != channels.len() {
        bail!(
            "{} servo ids given for {} channels",
            ids.len(),
            channels.len()
        );
    }
    Ok(reprise::so100::Sts3215Gateway::new(
        port,
        channels.iter().cloned().zip(ids),
    ))
}

async fn replay<G: ActuatorGateway>(
    source: MemorySource,
    gateway: G,
    config: ReplayConfig,
    state: Arc<ReplayState>,
) -> RunReport {
    ReplayController::new(source, gateway, config, state)
        .run()
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reprise=info".parse()?)
                .add_directive("reprise_replay=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    let Some(args) = parse_args()? else {
        print_usage();
        return Ok(());
    };
    let path = args.episodes.as_deref().unwrap_or_default();
    let source = MemorySource::load_json(path)
        .with_context(|| format!("failed to load episodes from {}", path))?;

    let mut builder = ReplayConfig::builder()
        .episodes(args.start, args.end)
        .auto_advance(args.auto_advance)
        .episode_delay(args.episode_delay)
        .send_timeout(args.send_timeout)
        .failure_policy(args.failure_policy)
        .home_on_exit(args.home_on_exit)
        .confirm_each_episode(args.confirm);
    if let Some(fps) = args.fps {
        builder = builder.fps(fps);
    }
    match args.home.as_deref() {
        Some("so101") => builder = builder.home_position(so101_home()),
        Some(_) => builder = builder.home_position(bi_so101_home()),
        None => {}
    }
    let config = builder.build(source.episode_count(), source.fps())?;
    let channels = source.channel_names(config.start_episode)?;
    config.check_home_channels(&channels)?;

    println!();
    println!("========================================");
    println!("Episode Replay");
    println!("========================================");
    println!("Episodes:   {}", path);
    println!(
        "Range:      {}..={} of {}",
        config.start_episode, config.end_episode, config.total_episodes
    );
    println!("Channels:   {}", channels.join(", "));
    println!("FPS:        {}", config.fps);
    println!(
        "Advance:    {}",
        if config.auto_advance {
            format!("auto ({:.1}s delay)", config.episode_delay.as_secs_f64())
        } else {
            "manual".to_string()
        }
    );
    println!(
        "Actuator:   {}",
        args.port.as_deref().unwrap_or("simulated")
    );
    println!("========================================");
    println!("{}", HELP);
    println!();

    let state = ReplayState::new();
    let listener = CommandListener::spawn(Arc::clone(&state), stdin_lines());

    // Ctrl+C behaves like 'q' so cleanup still runs
    let stopper = Arc::clone(&state);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping...");
            stopper.request_stop();
        }
    });

    let report = match args.port.as_deref() {
        #[cfg(feature = "so100")]
        Some(port) => {
            let gateway = so100_gateway(port, &channels, args.servo_ids.as_deref())?;
            replay(source, gateway, config, Arc::clone(&state)).await
        }
        #[cfg(not(feature = "so100"))]
        Some(_) => {
            listener.shutdown().await;
            bail!("--port needs the so100 feature (cargo build --features so100)");
        }
        None => {
            if args.servo_ids.is_some() {
                tracing::warn!("--servo-ids ignored without --port");
            }
            replay(source, SimulatedGateway::new(), config, Arc::clone(&state)).await
        }
    };
    listener.shutdown().await;

    println!();
    println!("========================================");
    println!("Result:     {}", report.result);
    println!("Summary:    {}", report.summary);
    println!("========================================");

    if !report.result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
