use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "nms-cli")]
#[command(about = "Management client for netconf-server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "127.0.0.1:6001")]
    address: String,

    #[arg(short, long, default_value = "admin")]
    username: String,

    /// Seconds to wait for each server message
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the session ID and capabilities from the server hello
    Hello,
    /// Read running content
    Get {
        #[arg(long)]
        filter: Option<String>,
    },
    /// Read a datastore
    GetConfig {
        #[arg(long, default_value = "running")]
        source: String,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Set one item (a `null` value deletes it)
    Edit {
        #[arg(long, default_value = "running")]
        target: String,
        path: String,
        /// JSON value
        value: String,
    },
    /// Lock a datastore, then hold the session open until Ctrl+C
    Lock {
        #[arg(long, default_value = "running")]
        target: String,
    },
    /// Send an arbitrary operation with JSON parameters
    Rpc {
        operation: String,
        #[arg(default_value = "{}")]
        params: String,
    },
}

struct Connection {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    timeout: Duration,
    next_id: u64,
}

impl Connection {
    async fn open(address: &str, username: &str, timeout: Duration) -> Result<(Self, Value), Box<dyn std::error::Error>> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address)).await??;
        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
            next_id: 1,
        };
        conn.send(&json!({"hello": {"username": username}})).await?;
        let hello = conn.receive().await?;
        Ok((conn, hello))
    }

    async fn send(&mut self, message: &Value) -> Result<(), Box<dyn std::error::Error>> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        let mut line = String::new();
        let read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut line)).await??;
        if read == 0 {
            return Err("server closed the connection".into());
        }
        Ok(serde_json::from_str(&line)?)
    }

    async fn rpc(&mut self, operation: &str, params: Value) -> Result<Value, Box<dyn std::error::Error>> {
        let message_id = self.next_id.to_string();
        self.next_id += 1;
        self.send(&json!({
            "rpc": {
                "message-id": message_id,
                "operation": operation,
                "params": params,
            }
        }))
        .await?;
        self.receive().await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (mut conn, hello) = Connection::open(&cli.address, &cli.username, Duration::from_secs(cli.timeout)).await?;

    let reply = match cli.command {
        Commands::Hello => hello,
        Commands::Get { filter } => conn.rpc("get", json!({ "filter": filter })).await?,
        Commands::GetConfig { source, filter } => {
            conn.rpc("get-config", json!({ "source": source, "filter": filter })).await?
        }
        Commands::Edit { target, path, value } => {
            let value: Value = serde_json::from_str(&value)?;
            conn.rpc("edit-config", json!({ "target": target, "config": { path: value } })).await?
        }
        Commands::Lock { target } => {
            let reply = conn.rpc("lock", json!({ "target": target })).await?;
            print_reply(&reply)?;
            if reply["rpc-reply"].get("ok").is_some() {
                eprintln!("Holding the {} lock, press Ctrl+C to release", target);
                tokio::signal::ctrl_c().await?;
            }
            return Ok(());
        }
        Commands::Rpc { operation, params } => {
            let params: Value = serde_json::from_str(&params)?;
            conn.rpc(&operation, params).await?
        }
    };

    print_reply(&reply)
}

fn print_reply(reply: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(reply)?);
    Ok(())
}
