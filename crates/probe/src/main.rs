use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use common::Environment;
use coprocessor::camera::Exposure;
use coprocessor::protocol::{Command, Control, Opcode, STATUS_FAILURE, STATUS_SUCCESS};
use framebus::DetectionBox;
use indicatif::ProgressBar;
use std::fs;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Longer than the server watchdog, so a stalled read surfaces as a closed
/// connection rather than a client-side timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "probe", about = "Send requests to a running coprocessor and print the replies")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:1234")]
    addr: String,

    /// Repeat the request this many times over one connection
    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Retry until the server accepts the connection
    #[arg(long)]
    wait: bool,

    #[command(subcommand)]
    request: Request,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Request {
    /// Wait for the next frame and print its detections
    Coords,
    /// Wait for the next frame and fetch its JPEG
    Image {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Keepalive
    Noop,
    /// Save a still on the coprocessor
    Picture,
    Overlay {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Manual exposure time (microseconds) and ISO
    Exposure { time_us: u16, iso: u16 },
    AutoExposure,
    /// Manual lens position
    Focus { position: u16 },
    AutoFocus,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Toggle {
    On,
    Off,
}

impl Request {
    fn command(&self) -> Command {
        match self {
            Request::Coords => Command::Coords,
            Request::Image { .. } => Command::Image,
            Request::Noop => Command::NoOp,
            Request::Picture => Command::Control(Control::TakePicture),
            Request::Overlay { state } => Command::Control(Control::Overlay(*state == Toggle::On)),
            Request::Exposure { time_us, iso } => {
                Command::Control(Control::Exposure(Some(Exposure {
                    time_us: *time_us,
                    iso: *iso,
                })))
            }
            Request::AutoExposure => Command::Control(Control::Exposure(None)),
            Request::Focus { position } => Command::Control(Control::Focus(Some(*position))),
            Request::AutoFocus => Command::Control(Control::Focus(None)),
        }
    }
}

fn main() -> anyhow::Result<()> {
    common::setup_logging(Environment::from_env());
    let cli = Cli::parse();

    let mut stream = if cli.wait {
        common::wait_for_resource(|| TcpStream::connect(&cli.addr), 500, "coprocessor")
    } else {
        TcpStream::connect(&cli.addr)
            .with_context(|| format!("Failed to connect to {}", cli.addr))?
    };
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    stream.set_nodelay(true)?;
    tracing::debug!(addr = %cli.addr, request = ?cli.request, "Connected");

    let command = cli.request.command();
    let request = command.encode();
    let out = match &cli.request {
        Request::Image { out } => out.as_deref(),
        _ => None,
    };

    let progress = if cli.count > 1 {
        ProgressBar::new(u64::from(cli.count))
    } else {
        ProgressBar::hidden()
    };
    let started = Instant::now();
    // A hidden bar drops printed lines.
    let emit = |line: String| {
        if progress.is_hidden() {
            println!("{line}");
        } else {
            progress.println(line);
        }
    };

    for i in 0..cli.count {
        stream
            .write_all(&request)
            .context("Failed to send request")?;

        let reply = read_reply(&mut stream, command)
            .with_context(|| format!("Failed to read {} reply", command.opcode().name()))?;

        if let (Reply::Image(jpeg), Some(path)) = (&reply, out) {
            let path = numbered(path, i, cli.count);
            fs::write(&path, jpeg)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            emit(format!("{} -> {}", reply, path.display()));
        } else {
            emit(reply.to_string());
        }
        progress.inc(1);
    }

    progress.finish_and_clear();
    if cli.count > 1 {
        println!("{} requests in {:.2?}", cli.count, started.elapsed());
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Reply {
    None,
    Coords(Vec<DetectionBox>),
    Image(Vec<u8>),
    Status(bool),
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::None => write!(f, "sent (no reply expected)"),
            Reply::Coords(boxes) if boxes.is_empty() => write!(f, "coords: none"),
            Reply::Coords(boxes) => {
                write!(f, "coords: {}", boxes.len())?;
                for b in boxes {
                    write!(f, " [{}, {}, {}, {}]", b.x_min, b.y_min, b.x_max, b.y_max)?;
                }
                Ok(())
            }
            Reply::Image(jpeg) => write!(f, "image: {} bytes", jpeg.len()),
            Reply::Status(true) => write!(f, "success"),
            Reply::Status(false) => write!(f, "failure"),
        }
    }
}

fn read_u16(reader: &mut impl Read) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn expect_echo(reader: &mut impl Read, opcode: Opcode) -> anyhow::Result<()> {
    let echo = read_u16(reader)?;
    if echo != opcode.as_u16() {
        bail!("Expected {:#06x} echo, got {echo:#06x}", opcode.as_u16());
    }
    Ok(())
}

fn read_reply(reader: &mut impl Read, command: Command) -> anyhow::Result<Reply> {
    match command {
        Command::NoOp => Ok(Reply::None),
        Command::Coords => {
            expect_echo(reader, Opcode::Coords)?;
            let count = read_u16(reader)?;
            let mut boxes = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                boxes.push(DetectionBox::new(
                    read_u16(reader)?,
                    read_u16(reader)?,
                    read_u16(reader)?,
                    read_u16(reader)?,
                ));
            }
            Ok(Reply::Coords(boxes))
        }
        Command::Image => {
            expect_echo(reader, Opcode::Image)?;
            let len = read_u16(reader)?;
            let mut jpeg = vec![0u8; usize::from(len)];
            reader.read_exact(&mut jpeg)?;
            Ok(Reply::Image(jpeg))
        }
        Command::Control(_) => match read_u16(reader)? {
            STATUS_SUCCESS => Ok(Reply::Status(true)),
            STATUS_FAILURE => Ok(Reply::Status(false)),
            other => bail!("Unexpected status {other:#06x}"),
        },
    }
}

/// `frame.jpg` -> `frame-0003.jpg` when several images are fetched.
fn numbered(path: &Path, index: u32, count: u32) -> PathBuf {
    if count <= 1 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".into());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jpg".into());
    path.with_file_name(format!("{stem}-{index:04}.{ext}"))
}
