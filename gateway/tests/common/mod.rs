#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::print_stdout,
    clippy::allow_attributes
)]
use std::{net::SocketAddr, process::Stdio};

use tempfile::NamedTempFile;
use tokio::{
    io::AsyncBufReadExt,
    process::{Child, Command},
    sync::mpsc::UnboundedReceiver,
};

pub fn gateway_path() -> String {
    // Compatibility with 'cargo nextest archive': https://nexte.st/docs/ci-features/archiving/#making-tests-relocatable
    std::env::var("NEXTEST_BIN_EXE_gateway")
        .unwrap_or_else(|_| env!("CARGO_BIN_EXE_gateway").to_string())
}

fn gateway_command(config_file: &NamedTempFile) -> Command {
    let mut builder = Command::new(gateway_path());
    builder
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .args([
            "--config-file",
            config_file.path().to_str().unwrap(),
            "--log-format",
            "json",
        ])
        // Make sure we don't inherit settings from the outer `cargo test/nextest` invocation
        .env_remove("RUST_LOG")
        .env_remove("STATSYNC_VALKEY_URL")
        .env("STATSYNC_UPSTREAM_API_KEY", "test-key")
        .kill_on_drop(true);
    builder
}

fn write_config(config_suffix: &str) -> NamedTempFile {
    let config_str = format!(
        r#"
        [gateway]
        bind_address = "127.0.0.1:0"
        {config_suffix}
    "#
    );
    let tmpfile = NamedTempFile::new().unwrap();
    std::fs::write(tmpfile.path(), config_str).unwrap();
    tmpfile
}

pub async fn start_gateway_on_random_port(config_suffix: &str) -> ChildData {
    let config_file = write_config(config_suffix);
    let mut child = gateway_command(&config_file).spawn().unwrap();
    let mut stdout = tokio::io::BufReader::new(child.stdout.take().unwrap()).lines();

    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(line) = stdout.next_line().await.unwrap() {
            println!("{line}");
            let _ = line_tx.send(line);
        }
    });

    let mut listening_line = None;
    let mut output = Vec::new();
    while let Some(line) = line_rx.recv().await {
        if line.contains("listening on 127.0.0.1:") {
            listening_line = Some(line.clone());
        }
        output.push(line.clone());
        if line.contains("{\"message\":\"└") {
            // We're done logging the startup message
            break;
        }
    }

    let port = listening_line
        .expect("Gateway exited before listening")
        .split_once("listening on 127.0.0.1:")
        .expect("Gateway didn't log listening line")
        .1
        .split('"')
        .next()
        .unwrap()
        .parse::<u16>()
        .unwrap();

    ChildData {
        addr: format!("127.0.0.1:{port}").parse::<SocketAddr>().unwrap(),
        output,
        stdout: line_rx,
        child,
        _config_file: config_file,
    }
}

/// Runs the gateway with extra CLI arguments and returns its output once it exits.
pub async fn run_gateway_expect_failure(config_suffix: &str, extra_args: &[&str]) -> Vec<String> {
    let config_file = write_config(config_suffix);
    let output = gateway_command(&config_file)
        .args(extra_args)
        .output()
        .await
        .unwrap();
    assert!(!output.status.success(), "Gateway should have exited with an error");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[expect(dead_code)] // Not all tests use all fields
pub struct ChildData {
    pub addr: SocketAddr,
    pub output: Vec<String>,
    pub stdout: UnboundedReceiver<String>,
    // This kills the child on drop
    pub child: Child,
    _config_file: NamedTempFile,
}

impl ChildData {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}
