use std::{
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use hickory_proto::{
    op::{Message, MessageType, OpCode, Query},
    rr::{Name, RecordType},
};
use shroud_lib::{
    AnyDialer, AnyStream, DialerFactory, DirectDialer, LogLevel, Network, setup_logging,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// forwarder url, repeat to chain them; the first one dials directly
    #[clap(short = 'f', long = "forward", value_name = "URL")]
    forward: Vec<String>,

    #[clap(short, long, value_parser, default_value = "info")]
    log_level: LogLevel,

    #[clap(long, value_parser, value_name = "FILE")]
    log_file: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// send one dns query through the chain and print the answers
    Resolve {
        name: String,

        #[clap(short = 't', long = "type", default_value = "A")]
        record_type: String,

        /// destination of the datagram, ignored by doh forwarders
        #[clap(short, long, default_value = "1.1.1.1:53")]
        server: String,
    },
    /// pipe stdin and stdout to a tcp connection made through the chain
    Connect { addr: String },
    /// list the supported forwarder schemes
    Schemes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level, cli.log_file);

    let factory = DialerFactory::new();
    match cli.command {
        Command::Schemes => {
            println!("{}", factory.usage());
            Ok(())
        }
        Command::Resolve {
            name,
            record_type,
            server,
        } => {
            let chain = factory.build_chain(&cli.forward, Arc::new(DirectDialer::new()))?;
            resolve(chain, &name, &record_type, &server).await
        }
        Command::Connect { addr } => {
            let chain = factory.build_chain(&cli.forward, Arc::new(DirectDialer::new()))?;
            connect(chain, &addr).await
        }
    }
}

async fn resolve(
    chain: AnyDialer,
    name: &str,
    record_type: &str,
    server: &str,
) -> anyhow::Result<()> {
    let mut query = Message::new();
    query
        .set_id(0)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(
            Name::from_str_relaxed(name)?.append_domain(&Name::root())?,
            RecordType::from_str(record_type)?,
        ));

    let pc = chain.dial_udp(Network::Udp, server).await?;
    pc.set_read_deadline(Some(Instant::now() + RESOLVE_TIMEOUT))?;
    pc.set_write_deadline(Some(Instant::now() + RESOLVE_TIMEOUT))?;

    pc.write_to(&query.to_vec()?, server).await?;
    let mut buf = vec![0u8; 64 * 1024];
    let (n, src) = pc.read_from(&mut buf).await?;
    debug!("{} bytes answer from {:?}", n, src);
    pc.close().await?;

    let answer = Message::from_vec(&buf[..n])?;
    info!("{} answers, rcode {}", answer.answer_count(), answer.response_code());
    for record in answer.answers() {
        println!("{record}");
    }
    Ok(())
}

async fn connect(chain: AnyDialer, addr: &str) -> anyhow::Result<()> {
    let s = chain.dial(Network::Tcp, addr).await?;
    let down = pipe(s, tokio::io::stdin(), tokio::io::stdout()).await?;
    debug!("connection to {} done, {} bytes received", addr, down);
    Ok(())
}

/// copies `input` to `s` and `s` to `output` until both sides are done,
/// returns the bytes received
async fn pipe<R, W>(s: AnyStream, mut input: R, mut output: W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut r, mut w) = tokio::io::split(s);

    let upload = async {
        tokio::io::copy(&mut input, &mut w).await?;
        w.shutdown().await
    };
    let download = async {
        let n = tokio::io::copy(&mut r, &mut output).await?;
        output.flush().await?;
        Ok(n)
    };

    let (_, down) = tokio::try_join!(upload, download)?;
    Ok(down)
}
