use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use shared::codec::{self, Decoded, FrameDecoder, AUTH_FAILED_ID};
use shared::{RequestType, ResponseType, DEFAULT_MAX_FRAME_SIZE};

/// Authenticates against an RCON server and runs a few commands.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address
    #[arg(short = 'a', long, default_value = "127.0.0.1:37015")]
    address: String,

    /// RCON password
    #[arg(short = 'p', long)]
    password: String,

    /// Commands to run after authenticating
    #[arg(default_values_t = vec!["status".to_string()])]
    commands: Vec<String>,
}

/// How long to wait for further output chunks after a command's first reply.
const CHUNK_LULL: Duration = Duration::from_millis(200);

/// Next complete frame, or `None` if nothing arrives within `wait`.
async fn read_frame(
    stream: &mut TcpStream,
    decoder: &mut FrameDecoder,
    wait: Duration,
) -> Result<Option<codec::RconFrame>, Box<dyn std::error::Error>> {
    let mut buf = [0u8; 2048];
    loop {
        if let Decoded::Frame(frame) = decoder.decode()? {
            return Ok(Some(frame));
        }

        let len = match timeout(wait, stream.read(&mut buf)).await {
            Ok(read) => read?,
            Err(_) => return Ok(None),
        };
        if len == 0 {
            return Err("server closed the connection".into());
        }
        decoder.feed(&buf[..len]);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.address).await?;
    stream.set_nodelay(true)?;
    println!("Connected to {}", stream.peer_addr()?);

    let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE);

    let auth = codec::encode(
        1,
        args.password.as_bytes(),
        b"",
        RequestType::AUTH,
        DEFAULT_MAX_FRAME_SIZE,
    )?;
    stream.write_all(&auth).await?;

    let reply = read_frame(&mut stream, &mut decoder, Duration::from_secs(5))
        .await?
        .ok_or("no reply to the auth request")?;
    if reply.kind != ResponseType::AUTH_RESPONSE || reply.id == AUTH_FAILED_ID {
        println!("Authentication refused");
        return Ok(());
    }
    println!("Authenticated");

    for (index, command) in args.commands.iter().enumerate() {
        let id = index as i32 + 2;
        let frame = codec::encode(
            id,
            command.as_bytes(),
            b"",
            RequestType::EXECCOMMAND,
            DEFAULT_MAX_FRAME_SIZE,
        )?;
        println!("> {}", command);
        stream.write_all(&frame).await?;

        // Console log frames may arrive ahead of the reply, and long output
        // comes as several frames with the same id. Wait for the first reply,
        // then print until the server goes quiet.
        let mut replied = false;
        loop {
            let wait = if replied { CHUNK_LULL } else { Duration::from_secs(5) };
            let Some(frame) = read_frame(&mut stream, &mut decoder, wait).await? else {
                if replied {
                    break;
                }
                return Err(format!("no reply to '{}'", command).into());
            };
            print!("{}", frame.body_text());
            if frame.id == id && frame.kind == ResponseType::RESPONSE_VALUE {
                replied = true;
            }
        }
    }

    Ok(())
}
