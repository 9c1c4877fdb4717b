//! Scull CLI Demo
//!
//! Copies stdin into `scull0`, reads it back, then walks through the
//! admission policies of the other devices.
//!
//! Usage: `scull_demo [config.json]`

use std::fs::File;
use std::io::{self, BufRead, SeekFrom};
use std::time::Duration;

use scull::{AccessMode, Caller, OpenRequest, Registry, ScullConfig, ScullError, Session};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ScullConfig::from_reader(File::open(path)?)?,
        None => ScullConfig::default(),
    };
    let registry = Registry::new(config);
    info!("devices: {}", registry.names().join(", "));

    echo_stdin(&registry).await?;
    exclusive(&registry).await?;
    gated(&registry).await?;
    keyed(&registry).await?;

    registry.teardown().await;
    println!("All done");
    Ok(())
}

async fn echo_stdin(registry: &Registry) -> Result<(), ScullError> {
    let mut session = registry
        .open("scull0", OpenRequest::new(AccessMode::ReadWrite, Caller::new(1000)))
        .await?;

    println!("Enter text (empty line to quit):");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        session.write_all(trimmed.as_bytes()).await?;
        session.write_all(b"\n").await?;
    }

    session.seek(SeekFrom::Start(0)).await?;
    println!("(scull0) {} bytes stored:", session.device_size().await?);
    print!("{}", String::from_utf8_lossy(&read_to_end(&mut session).await?));
    session.close();
    Ok(())
}

async fn exclusive(registry: &Registry) -> Result<(), ScullError> {
    let first = registry
        .open("scullsingle", OpenRequest::new(AccessMode::ReadOnly, Caller::new(1000)))
        .await?;
    match registry
        .open("scullsingle", OpenRequest::new(AccessMode::ReadOnly, Caller::new(1000)))
        .await
    {
        Err(e) => println!("(scullsingle) second open: {e}"),
        Ok(_) => println!("(scullsingle) second open unexpectedly succeeded"),
    }
    first.close();
    Ok(())
}

async fn gated(registry: &Registry) -> Result<(), ScullError> {
    let mut owner = registry
        .open("scullwuid", OpenRequest::new(AccessMode::WriteOnly, Caller::new(1000)))
        .await?;
    owner.write_all(b"left by uid 1000").await?;

    let waiter = async {
        let mut session = registry
            .open("scullwuid", OpenRequest::new(AccessMode::ReadOnly, Caller::new(1001)))
            .await?;
        let data = read_to_end(&mut session).await?;
        println!("(scullwuid) uid 1001 got in and read: {}", String::from_utf8_lossy(&data));
        Ok::<(), ScullError>(())
    };
    let closer = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        println!("(scullwuid) uid 1000 closes");
        owner.close();
    };
    let (waited, ()) = tokio::join!(waiter, closer);
    waited
}

async fn keyed(registry: &Registry) -> Result<(), ScullError> {
    for key in ["tty1", "tty2"] {
        let mut session = registry
            .open("scullpriv", OpenRequest::new(AccessMode::WriteOnly, Caller::new(1000).with_key(key)))
            .await?;
        session.write_all(format!("private to {key}").as_bytes()).await?;
    }
    for key in ["tty1", "tty2"] {
        let mut session = registry
            .open("scullpriv", OpenRequest::new(AccessMode::ReadOnly, Caller::new(1000).with_key(key)))
            .await?;
        let data = read_to_end(&mut session).await?;
        println!("(scullpriv) {key}: {}", String::from_utf8_lossy(&data));
    }
    Ok(())
}

/// Read until the end of the device, stopping early at a hole
async fn read_to_end(session: &mut Session) -> Result<Vec<u8>, ScullError> {
    let mut data = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match session.read(&mut buf).await? {
            0 => return Ok(data),
            n => data.extend_from_slice(&buf[..n]),
        }
    }
}
