use serde_json::Value;
use ssh_probe::engine::Engine;
use ssh_probe::model::{Config, OutputConfig, OutputFormat, TargetSpec};
use ssh_probe::output::OutputChannel;
use ssh_probe::ssh::{ProbeConfig, ProbeOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn config(target: Option<SocketAddr>, options: ProbeOptions, out: &std::path::Path) -> Config {
    Config {
        target: target.map(|addr| TargetSpec {
            host: addr.ip().to_string(),
            port: addr.port(),
        }),
        input: None,
        default_port: 22,
        concurrency: 4,
        rate: 100,
        connect_timeout: Duration::from_millis(500),
        probe: ProbeConfig::assemble(&options).unwrap(),
        output: OutputConfig {
            format: OutputFormat::Jsonl,
            file: Some(out.to_path_buf()),
        },
    }
}

async fn run(cfg: Config) -> Vec<Value> {
    let path = cfg.output.file.clone().unwrap();
    let sink = OutputChannel::new(cfg.output.clone()).unwrap();
    let mut engine = Engine::new(cfg, sink).unwrap();
    engine.run().await.unwrap();
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Sends an identification line, reads the client's, then hangs up.
async fn banner_server(banner: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                write.write_all(banner.as_bytes()).await.unwrap();
                let mut line = String::new();
                let _ = BufReader::new(read).read_line(&mut line).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn hello_only_records_the_banner() {
    let addr = banner_server("SSH-2.0-OpenSSH_9.0\r\n").await;
    let dir = tempfile::tempdir().unwrap();
    let options = ProbeOptions {
        hello_only: true,
        ..ProbeOptions::default()
    };
    let lines = run(config(Some(addr), options, &dir.path().join("out.jsonl"))).await;

    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert_eq!(line["status"], "success");
    assert_eq!(line["port"], addr.port());
    assert_eq!(line["data"]["banner"], "SSH-2.0-OpenSSH_9.0");
    assert_eq!(line["data"]["server_id"]["software_version"], "OpenSSH_9.0");
    assert!(line["data"].get("client_id").is_none());
    assert!(line["data"].get("server_key_exchange").is_none());
}

#[tokio::test]
async fn close_after_banner_is_a_handshake_error() {
    let addr = banner_server("SSH-2.0-OpenSSH_9.0\r\n").await;
    let dir = tempfile::tempdir().unwrap();
    let lines = run(config(
        Some(addr),
        ProbeOptions::default(),
        &dir.path().join("out.jsonl"),
    ))
    .await;

    let line = &lines[0];
    assert_eq!(line["status"], "handshake-error");
    assert_eq!(line["data"]["banner"], "SSH-2.0-OpenSSH_9.0");
    assert!(line["data"].get("algorithm_selection").is_none());
    assert!(line["error"].as_str().unwrap().starts_with("key exchange failed"));
}

#[tokio::test]
async fn silent_server_times_out_with_an_empty_log() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(socket);
    });

    let dir = tempfile::tempdir().unwrap();
    let options = ProbeOptions {
        timeout: Duration::from_millis(300),
        ..ProbeOptions::default()
    };
    let lines = run(config(Some(addr), options, &dir.path().join("out.jsonl"))).await;

    let line = &lines[0];
    assert_eq!(line["status"], "timeout");
    assert_eq!(line["data"], serde_json::json!({}));
    assert!(line["connect_ms"].is_u64());
}

#[tokio::test]
async fn refused_connection_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let lines = run(config(
        Some(addr),
        ProbeOptions::default(),
        &dir.path().join("out.jsonl"),
    ))
    .await;

    let line = &lines[0];
    assert_eq!(line["status"], "connection-error");
    assert_eq!(line["data"], serde_json::json!({}));
    assert!(line.get("connect_ms").is_none());
}

#[tokio::test]
async fn input_file_targets_are_each_reported() {
    let first = banner_server("SSH-2.0-OpenSSH_9.0\r\n").await;
    let second = banner_server("SSH-2.0-dropbear_2022.83\r\n").await;

    let dir = tempfile::tempdir().unwrap();
    let mut input = tempfile::NamedTempFile::new().unwrap();
    writeln!(input, "# two fakes\n{first}\n{second}").unwrap();

    let options = ProbeOptions {
        hello_only: true,
        ..ProbeOptions::default()
    };
    let mut cfg = config(None, options, &dir.path().join("out.jsonl"));
    cfg.input = Some(input.path().display().to_string());
    let lines = run(cfg).await;

    let mut software: Vec<String> = lines
        .iter()
        .map(|line| {
            assert_eq!(line["status"], "success");
            line["data"]["server_id"]["software_version"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    software.sort();
    assert_eq!(software, vec!["OpenSSH_9.0", "dropbear_2022.83"]);
}

#[test]
fn bogus_cipher_fails_assembly() {
    let options = ProbeOptions {
        ciphers: "bogus-cipher".into(),
        ..ProbeOptions::default()
    };
    assert!(ProbeConfig::assemble(&options).is_err());
}
