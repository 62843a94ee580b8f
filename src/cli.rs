use clap::{Args, Parser, Subcommand};
use std::error::Error;
use std::io::{stdin, BufRead};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::warn;

use crate::bridge::Bridge;
use crate::clock::SystemClock;
use crate::config::{self, DEFAULT_CONFIG_FILE};
use crate::player::Player;
use crate::ports::{list_input_ports, list_output_ports};
use crate::routes::ChannelMode;
use crate::session::BridgeController;
use crate::status::StatusLog;
use crate::transport::UdpOscClient;
use crate::{set_shutdown_flag, should_shutdown};

const POLL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "e_oscmidi")]
#[command(about = "Bidirectional MIDI <-> OSC bridge with a tempo-aware MIDI file player")]
#[command(version)]
pub struct Cli {
    /// Settings file, rewritten after every successful start
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List MIDI input and output ports
    Ports,

    /// Start the bridge and read playback commands from stdin
    Serve(ServeArgs),

    /// Play MIDI files over OSC without opening MIDI devices
    Play(PlayArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// UDP port to receive OSC commands on
    #[arg(long)]
    pub in_port: Option<String>,

    /// Host to send OSC messages to
    #[arg(long)]
    pub out_host: Option<String>,

    /// UDP port to send OSC messages to
    #[arg(long)]
    pub out_port: Option<String>,

    /// MIDI input port name
    #[arg(long)]
    pub midi_in: Option<String>,

    /// MIDI output port name
    #[arg(long)]
    pub midi_out: Option<String>,

    /// Listen on a single OSC channel (1-16)
    #[arg(long, conflicts_with = "all_channels")]
    pub channel: Option<u8>,

    /// Listen on all 16 OSC channels
    #[arg(long)]
    pub all_channels: bool,

    /// Loop the playlist continuously
    #[arg(long)]
    pub loop_playlist: bool,

    /// Add MIDI files to the playlist
    #[arg(long = "add-song")]
    pub add_songs: Vec<PathBuf>,

    /// Add every MIDI file in these directories to the playlist
    #[arg(long = "scan-directory")]
    pub scan_directories: Vec<PathBuf>,

    /// Playback tempo in BPM (20-420)
    #[arg(long)]
    pub tempo: Option<u32>,

    /// Start playing the playlist right away
    #[arg(long)]
    pub play: bool,
}

#[derive(Args, Debug)]
pub struct PlayArgs {
    /// MIDI files or directories to play
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Host to send OSC messages to (defaults to this machine's address)
    #[arg(long)]
    pub out_host: Option<String>,

    /// UDP port to send OSC messages to
    #[arg(long, default_value = config::DEFAULT_OSC_OUT_PORT)]
    pub out_port: u16,

    /// Loop the playlist continuously
    #[arg(long)]
    pub loop_playlist: bool,

    /// Playback tempo in BPM (20-420)
    #[arg(long)]
    pub tempo: Option<u32>,
}

/// One line typed at the console while serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    TogglePause,
    Next,
    Back,
    Stop,
    Play,
    ToggleLoop,
    Tempo(u32),
    ResetTempo,
    TestNote,
    Add(PathBuf),
    Remove(usize),
    List,
    Channel(ChannelMode),
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match (word, rest) {
        ("p", "") => ConsoleCommand::TogglePause,
        ("n", "") => ConsoleCommand::Next,
        ("b", "") => ConsoleCommand::Back,
        ("s", "") => ConsoleCommand::Stop,
        ("g", "") => ConsoleCommand::Play,
        ("l", "") => ConsoleCommand::ToggleLoop,
        ("r", "") => ConsoleCommand::ResetTempo,
        ("x", "") => ConsoleCommand::TestNote,
        ("ls", "") => ConsoleCommand::List,
        ("h", "") | ("?", "") => ConsoleCommand::Help,
        ("q", "") => ConsoleCommand::Quit,
        ("a", path) if !path.is_empty() => ConsoleCommand::Add(PathBuf::from(path)),
        ("rm", index) => ConsoleCommand::Remove(index.parse::<usize>().ok()?.checked_sub(1)?),
        ("t", bpm) => ConsoleCommand::Tempo(bpm.parse().ok()?),
        ("c", "all") => ConsoleCommand::Channel(ChannelMode::All16),
        ("c", ch) => ConsoleCommand::Channel(ChannelMode::single(ch.parse().ok()?).ok()?),
        (word, "") => {
            // "t120" or a bare BPM
            let bpm = word.strip_prefix('t').unwrap_or(word);
            ConsoleCommand::Tempo(bpm.parse().ok()?)
        }
        _ => return None,
    };
    Some(command)
}

fn print_console_help() {
    println!("🎮 Controls: 'p' = pause/resume, 'n' = next, 'b' = back, 'g' = play, 's' = stop (clears playlist)");
    println!("   'l' = toggle loop, 't<BPM>' or a bare number = tempo, 'r' = reset tempo, 'x' = test note");
    println!("   'a <path>' = add file or folder, 'rm <N>' = remove entry, 'ls' = show playlist");
    println!("   'c <1-16>' or 'c all' = channel mode, 'q' = quit");
}

fn flush_status(log: &StatusLog) {
    for line in log.drain() {
        println!("{}", line);
    }
}

fn install_ctrlc() {
    if let Err(e) = ctrlc::set_handler(set_shutdown_flag) {
        warn!("Could not install Ctrl+C handler: {}", e);
    }
}

pub fn run_cli() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Ports) => list_ports()?,
        Some(Commands::Serve(args)) => serve(&cli.config, args)?,
        Some(Commands::Play(args)) => play(args)?,
        None => {
            list_ports()?;
            println!("\n💡 Run 'e_oscmidi serve --midi-in <NAME> --midi-out <NAME>' to start the bridge.");
        }
    }

    Ok(())
}

fn list_ports() -> Result<(), Box<dyn Error>> {
    let inputs = list_input_ports()?;
    let outputs = list_output_ports()?;
    println!("🎹 MIDI inputs:");
    if inputs.is_empty() {
        println!("  (none)");
    }
    for (i, name) in inputs.iter().enumerate() {
        println!("  {}: {}", i, name);
    }
    println!("🔌 MIDI outputs:");
    if outputs.is_empty() {
        println!("  (none)");
    }
    for (i, name) in outputs.iter().enumerate() {
        println!("  {}: {}", i, name);
    }
    Ok(())
}

fn add_path(controller: &BridgeController, path: &Path) {
    let result = if path.is_dir() {
        controller.add_directory(path).map(|_| ())
    } else {
        controller.add_file(path)
    };
    if let Err(e) = result {
        controller.log().error(format!("❌ Failed to add {}: {}", path.display(), e));
    }
}

fn serve(config_path: &Path, args: ServeArgs) -> Result<(), Box<dyn Error>> {
    install_ctrlc();
    let log = StatusLog::new();
    let mut controller = BridgeController::open(config_path, log.clone())?;

    let mut settings = controller.current_settings();
    if let Some(port) = args.in_port {
        settings.osc_in_port = port;
    }
    if let Some(host) = args.out_host {
        settings.osc_out_ip = host;
    }
    if let Some(port) = args.out_port {
        settings.osc_out_port = port;
    }
    if let Some(name) = args.midi_in {
        settings.midi_input = name;
    }
    if let Some(name) = args.midi_out {
        settings.midi_output = name;
    }
    if args.all_channels {
        settings.channel_mode = ChannelMode::All16;
    } else if let Some(ch) = args.channel {
        settings.channel_mode = ChannelMode::single(ch)?;
    }

    for path in args.add_songs.iter().chain(&args.scan_directories) {
        add_path(&controller, path);
    }
    controller.set_looping(args.loop_playlist);
    if let Some(bpm) = args.tempo {
        controller.set_tempo(bpm)?;
    }

    let started = controller.start(&settings);
    flush_status(&log);
    started?;

    if args.play {
        controller.play();
    }
    print_console_help();

    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        flush_status(&log);
        if should_shutdown() {
            println!("\n🛑 Shutdown requested");
            break;
        }
        let line = match rx.recv_timeout(POLL) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = parse_command(&line) else {
            println!("⚠️  Unknown command: {} ('h' for help)", line.trim());
            continue;
        };
        if command == ConsoleCommand::Quit {
            break;
        }
        run_console_command(&mut controller, command);
    }

    controller.stop();
    flush_status(&log);
    println!("👋 Goodbye!");
    Ok(())
}

fn run_console_command(controller: &mut BridgeController, command: ConsoleCommand) {
    match command {
        ConsoleCommand::TogglePause => {
            controller.toggle_pause();
        }
        ConsoleCommand::Next => controller.skip_forward(),
        ConsoleCommand::Back => controller.skip_back(),
        ConsoleCommand::Stop => controller.stop_playback(),
        ConsoleCommand::Play => {
            controller.play();
        }
        ConsoleCommand::ToggleLoop => {
            let looping = !controller.looping();
            controller.set_looping(looping);
        }
        ConsoleCommand::Tempo(bpm) => {
            if let Err(e) = controller.set_tempo(bpm) {
                controller.log().warn(format!("⚠️  {}", e));
            }
        }
        ConsoleCommand::ResetTempo => {
            let _ = controller.reset_tempo();
        }
        ConsoleCommand::TestNote => {
            if let Err(e) = controller.send_test_note() {
                controller.log().error(format!("❌ Test note failed: {}", e));
            }
        }
        ConsoleCommand::Add(path) => add_path(controller, &path),
        ConsoleCommand::Remove(index) => {
            if controller.remove_file(index).is_none() {
                controller.log().warn(format!("⚠️  No playlist entry {}", index + 1));
            }
        }
        ConsoleCommand::List => println!("{}", controller.describe_playlist()),
        ConsoleCommand::Channel(mode) => {
            if let Err(e) = controller.restart_with_mode(mode) {
                controller.log().error(format!("❌ {}", e));
            }
        }
        ConsoleCommand::Help => print_console_help(),
        ConsoleCommand::Quit => {}
    }
}

fn play(args: PlayArgs) -> Result<(), Box<dyn Error>> {
    install_ctrlc();
    let log = StatusLog::new();
    let bridge = Bridge::new(Arc::new(SystemClock::new()), log.clone());

    let host = args.out_host.unwrap_or_else(config::local_ip);
    let client = UdpOscClient::connect(&host, args.out_port)?;
    println!("📡 Sending OSC to {}", client.target());
    bridge.lock().osc_out = Some(Arc::new(client));

    {
        let mut state = bridge.lock();
        for path in &args.files {
            let added = if path.is_dir() {
                state.playlist.add_directory(path).map(|_| ())
            } else {
                state.playlist.add_file(path)
            };
            if let Err(e) = added {
                log.error(format!("❌ Failed to add {}: {}", path.display(), e));
            }
        }
    }

    let mut player = Player::new(Arc::clone(&bridge));
    player.set_looping(args.loop_playlist);
    if let Some(bpm) = args.tempo {
        player.set_tempo(bpm)?;
    }

    if player.play() {
        while player.is_running() {
            flush_status(&log);
            if should_shutdown() {
                println!("\n🛑 Shutdown requested");
                player.stop();
                break;
            }
            thread::sleep(POLL);
        }
    }
    flush_status(&log);
    println!("✅ Done!");
    Ok(())
}
