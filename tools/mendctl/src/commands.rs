//! Command handlers

use std::path::Path;

use anyhow::{bail, Context as _, Result};
use colored::*;
use tracing::{debug, info, warn};

use common::hex;
use mendeleev::constants::MAX_MESSAGE_LENGTH;
use mendeleev::{frame, ClientConfig, Command, Context, MendeleevError};

use crate::args::Payload;

/// Build the context and open the link
async fn open(config: &ClientConfig) -> Result<Context> {
    if config.slave.is_none() {
        bail!("No slave address: pass --slave or set `slave` in the configuration");
    }
    let mut ctx = Context::from_config(config).context("Invalid client configuration")?;
    ctx.connect()
        .await
        .with_context(|| format!("Failed to open {} link", ctx.transport_type()))?;
    Ok(ctx)
}

fn ok(action: &str) {
    println!("{} {}", "OK".green().bold(), action);
}

pub async fn get_version(config: &ClientConfig) -> Result<()> {
    let mut ctx = open(config).await?;
    let version = ctx.get_version().await.context("get-version failed")?;
    ctx.free().await;

    println!(
        "{} {}",
        "Version:".bright_cyan(),
        String::from_utf8_lossy(&version).trim_end_matches('\0')
    );
    debug!("Version bytes: {}", hex::encode_spaced(&version));
    Ok(())
}

/// Send one of the fixed-size commands carrying `data`
pub async fn simple(config: &ClientConfig, command: Command, data: &Payload) -> Result<()> {
    let mut ctx = open(config).await?;
    let result = match command {
        Command::SetColor => ctx.set_color(data.as_bytes()).await,
        Command::SetMode => ctx.set_mode(data.as_bytes()).await,
        Command::SetOutput => ctx.set_output(data.as_bytes()).await,
        other => ctx.request(other.code(), data.as_bytes()).await.map(drop),
    };
    ctx.free().await;

    result.with_context(|| format!("{} failed", command.name()))?;
    ok(&format!("{} [{}]", command.name(), data));
    Ok(())
}

/// Raw command code with an arbitrary payload; prints the confirmation payload
pub async fn raw(config: &ClientConfig, code: u8, data: &Payload) -> Result<()> {
    let mut ctx = open(config).await?;
    let result = ctx.request(code, data.as_bytes()).await;
    ctx.free().await;

    let payload = result.with_context(|| format!("Command 0x{:02X} failed", code))?;
    println!("{} {}", "Payload:".bright_cyan(), hex::encode_spaced(&payload));
    Ok(())
}

/// Stream a firmware image to the device in OTA blocks
pub async fn ota(config: &ClientConfig, file: &Path, block_size: usize) -> Result<()> {
    let image = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if image.is_empty() {
        bail!("{} is empty", file.display());
    }

    let blocks = image.len().div_ceil(block_size);
    info!(
        "Sending {} ({} bytes) in {} blocks of {} bytes",
        file.display(),
        image.len(),
        blocks,
        block_size
    );

    let mut ctx = open(config).await?;
    for (index, block) in image.chunks(block_size).enumerate() {
        if let Err(e) = ctx.ota(block).await {
            ctx.free().await;
            return Err(e).with_context(|| format!("OTA block {} of {} failed", index + 1, blocks));
        }
        println!("  block {:>4}/{} ({} bytes)", index + 1, blocks, block.len());
    }
    ctx.free().await;

    ok(&format!("OTA of {} bytes", image.len()));
    Ok(())
}

/// Print incoming indications until `count` frames were seen or Ctrl-C
pub async fn listen(config: &ClientConfig, count: Option<usize>) -> Result<()> {
    let mut ctx = Context::from_config(config).context("Invalid client configuration")?;
    ctx.connect()
        .await
        .with_context(|| format!("Failed to open {} link", ctx.transport_type()))?;

    println!("{}", "Listening, Ctrl-C to stop".bright_cyan());
    let mut seen = 0usize;
    let mut buf = [0u8; MAX_MESSAGE_LENGTH];
    while count.map_or(true, |limit| seen < limit) {
        let received = tokio::select! {
            r = ctx.receive(&mut buf) => r,
            _ = tokio::signal::ctrl_c() => break,
        };
        match received {
            Ok(len) => {
                seen += 1;
                print_frame(&buf[..len]);
            },
            Err(MendeleevError::Timeout) => continue,
            Err(e) if e.is_protocol_error() => warn!("Dropped frame: {}", e),
            Err(e) => {
                ctx.free().await;
                return Err(e).context("Receive failed");
            },
        }
    }
    ctx.free().await;
    Ok(())
}

fn print_frame(msg: &[u8]) {
    let command = frame::command(msg);
    let name = Command::from_code(command & 0x7F).map_or("unknown", Command::name);
    println!(
        "{} dest=0x{:02X} src=0x{:02X} seq={} cmd=0x{:02X} ({}) data=[{}]",
        ">>".bright_green(),
        frame::destination(msg),
        frame::source(msg),
        frame::sequence(msg),
        command,
        name,
        hex::encode_spaced(frame::payload(msg))
    );
}

/// Drop whatever is pending on the link
pub async fn flush(config: &ClientConfig) -> Result<()> {
    let mut ctx = Context::from_config(config).context("Invalid client configuration")?;
    ctx.connect()
        .await
        .with_context(|| format!("Failed to open {} link", ctx.transport_type()))?;
    let flushed = ctx.flush().await;
    ctx.free().await;

    let flushed = flushed.context("Flush failed")?;
    ok(&format!("flushed {} bytes", flushed));
    Ok(())
}

pub fn show_config(config: &ClientConfig, json: bool) -> Result<()> {
    config.validate().context("Invalid client configuration")?;
    let rendered = if json {
        serde_json::to_string_pretty(config)?
    } else {
        serde_yaml::to_string(config)?
    };
    println!("{}", rendered);
    Ok(())
}
