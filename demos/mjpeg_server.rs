//! MJPEG streaming server fed from stdin
//!
//! Run with: cargo run --example mjpeg_server [BIND_ADDR] [--config PATH]
//!
//! The camera pipeline writes raw MJPEG to stdin:
//!
//!   libcamera-vid -t 0 --codec mjpeg --width 1280 --height 720 -o - \
//!     | cargo run --example mjpeg_server
//!
//!   ffmpeg -f v4l2 -i /dev/video0 -f mjpeg - | cargo run --example mjpeg_server 0.0.0.0:8080
//!
//! Then open http://localhost:8000/ in a browser, or:
//!
//!   ffplay http://localhost:8000/stream.mjpg
//!
//! When stdin ends the stream ends for every viewer and the server exits.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::task::JoinError;

use mjpeg_rs::{FrameBroker, FrameSource, MjpegServer, ServerConfig};

const DEFAULT_CONFIG_PATH: &str = "config/dashcam.conf";

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:<port>
/// - "localhost:8080" -> 127.0.0.1:8080
/// - "0.0.0.0" -> 0.0.0.0:<port>
/// - "0.0.0.0:8080" -> 0.0.0.0:8080
fn parse_bind_addr(arg: &str, default_port: u16) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: mjpeg_server [BIND_ADDR] [--config PATH]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR        Address to bind to (default: 0.0.0.0:STREAMING_PORT)");
    eprintln!("  --config PATH    KEY=VALUE config file (default: {})", DEFAULT_CONFIG_PATH);
    eprintln!();
    eprintln!("Reads raw MJPEG from stdin.");
}

struct Args {
    bind: Option<String>,
    config_path: String,
}

fn parse_args() -> Result<Option<Args>, String> {
    let mut args = Args {
        bind: None,
        config_path: DEFAULT_CONFIG_PATH.to_string(),
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--config" => {
                args.config_path = iter
                    .next()
                    .ok_or_else(|| "--config requires a path".to_string())?;
            }
            _ if args.bind.is_none() => args.bind = Some(arg),
            _ => return Err(format!("Unexpected argument: '{}'", arg)),
        }
    }

    Ok(Some(args))
}

/// A failed or crashed frame source ends the process with an error
fn source_outcome(outcome: Result<mjpeg_rs::Result<u64>, JoinError>) -> Result<(), String> {
    match outcome {
        Ok(Ok(frames)) => {
            println!("Input ended after {} frames", frames);
            Ok(())
        }
        Ok(Err(e)) => Err(format!("Camera input failed: {}", e)),
        Err(e) => Err(format!("Frame source task failed: {}", e)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=debug".parse().expect("static directive"))
                .add_directive("mjpeg_server=debug".parse().expect("static directive")),
        )
        .init();

    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let mut config = match ServerConfig::from_conf_file(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading {}: {}", args.config_path, e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(bind) = args.bind {
        match parse_bind_addr(&bind, config.bind_addr.port()) {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    println!("Starting MJPEG server on {}", config.bind_addr);
    println!(
        "Camera: {}x{}, rotation: {}°",
        config.frame_width, config.frame_height, config.rotation
    );
    println!("Press Ctrl+C to stop");

    let broker = Arc::new(FrameBroker::new());
    let server = MjpegServer::new(config, Arc::clone(&broker));
    let source = FrameSource::new(tokio::io::stdin(), Arc::clone(&broker));

    let mut source_task = tokio::spawn(source.run());

    let result: Result<(), String> = tokio::select! {
        result = server.run() => result.map_err(|e| format!("Server error: {}", e)),
        source_result = &mut source_task => source_outcome(source_result),
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
            Ok(())
        }
    };

    // Release every viewer still waiting for a frame
    broker.close();
    source_task.abort();

    let stats = server.stats();
    println!(
        "Served {} connections, {} frames ({} bytes)",
        stats.total_connections, stats.total_frames_sent, stats.total_bytes_sent
    );

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_parse_bind_addr() {
        assert_eq!(
            parse_bind_addr("localhost", 8000).unwrap(),
            "127.0.0.1:8000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_bind_addr("0.0.0.0:8080", 8000).unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_bind_addr("nowhere", 8000).is_err());
    }

    #[test]
    fn test_source_end_is_success() {
        assert!(source_outcome(Ok(Ok(42))).is_ok());
    }

    #[test]
    fn test_source_failure_is_error() {
        let err = mjpeg_rs::Error::from(io::Error::new(io::ErrorKind::Other, "camera gone"));
        let outcome = source_outcome(Ok(Err(err)));
        assert!(outcome.unwrap_err().starts_with("Camera input failed"));
    }

    #[tokio::test]
    async fn test_source_panic_is_error() {
        let crashed = tokio::spawn(async { panic!("encoder crashed") }).await;
        let outcome = source_outcome(crashed.map(|()| Ok(0)));
        assert!(outcome.unwrap_err().starts_with("Frame source task failed"));
    }
}
