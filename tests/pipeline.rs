//! End-to-end jobs against a local HTTP server

use games_store::archive::RarBackend;
use games_store::config::RuntimeConfig;
use games_store::installer::{self, RegistryDocument};
use games_store::pipeline::{Job, JobEvent, JobMode, JobPool, PipelineContext};
use games_store::PipelineError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct Env {
    _root: tempfile::TempDir,
    steam: PathBuf,
    downloads: PathBuf,
    registry: PathBuf,
    scratch: PathBuf,
}

fn env() -> Env {
    let root = tempfile::tempdir().unwrap();
    let steam = root.path().join("Steam");
    std::fs::create_dir_all(&steam).unwrap();
    Env {
        steam,
        downloads: root.path().join("downloads"),
        registry: root.path().join("GamesStore").join("game_registry.json"),
        scratch: root.path().join("scratch"),
        _root: root,
    }
}

fn pool(env: &Env, max_jobs: usize) -> JobPool {
    let config = RuntimeConfig {
        steam_path: Some(env.steam.clone()),
        registry_path: env.registry.clone(),
        scratch_root: env.scratch.clone(),
        download_dir: env.downloads.clone(),
        log_dir: env.registry.with_file_name("logs"),
        max_concurrent_jobs: max_jobs,
        rar_backend: RarBackend::Native,
        rar_tool_path: None,
        auto_install_rar_tool: false,
        api_url: None,
        auth_code: None,
    };
    JobPool::new(PipelineContext::new(config).unwrap())
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Serve `body` for every request; `None` answers 404
async fn serve(body: Option<Vec<u8>>, with_length: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let response = match body {
                    Some(body) => {
                        let mut head = String::from(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nConnection: close\r\n",
                        );
                        if with_length {
                            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
                        }
                        head.push_str("\r\n");
                        let mut response = head.into_bytes();
                        response.extend_from_slice(&body);
                        response
                    }
                    None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_vec(),
                };
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}/download?appid=620", addr)
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
}

#[tokio::test]
async fn test_download_install_and_uninstall() {
    let env = env();
    let package = zip_bytes(&[
        ("Portal 2 (620)/620.lua", b"addappid(620)"),
        ("Portal 2 (620)/620.st", b"stats"),
        ("Portal 2 (620)/UserGameStats_1_620.bin", b"bin"),
        ("Portal 2 (620)/621_123.manifest", b"manifest"),
    ]);
    let url = serve(Some(package), true).await;
    let pool = pool(&env, 2);

    let job = Job::download("620").with_name("Portal 2").with_url(url);
    let mut handle = pool.submit(job);

    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.game_id, "620");
    assert!(outcome.message.starts_with("Portal 2 installed successfully (4 files)"));
    assert!(outcome.message.contains("Average speed"));

    // Exactly one terminal event, and it comes last
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(events.last(), Some(JobEvent::Succeeded { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, JobEvent::Downloaded { total_mb: Some(_), .. })));

    let config = env.steam.join("config");
    assert!(config.join("stplug-in/620.lua").is_file());
    assert!(config.join("stplug-in/620.st").is_file());
    assert!(config.join("StatsExport/UserGameStats_1_620.bin").is_file());
    assert!(config.join("depotcache/621_123.manifest").is_file());

    let doc = RegistryDocument::load(&env.registry).unwrap();
    let entry = doc.get("Portal 2").unwrap();
    assert_eq!(entry.id, "620");
    assert_eq!(entry.paths.total(), 4);
    assert!(entry.install_type.is_none());

    // Downloaded package and scratch directory are removed
    assert!(dir_is_empty(&env.downloads));
    assert!(dir_is_empty(&env.scratch));

    let report = installer::uninstall(&pool.context().registry, "Portal 2", &env.steam)
        .await
        .unwrap();
    assert_eq!(report.files_removed, 4);
    assert!(!config.join("stplug-in/620.lua").exists());
    assert!(!config.join("stplug-in/620.st").exists());
    assert!(!config.join("StatsExport/UserGameStats_1_620.bin").exists());
    assert!(RegistryDocument::load(&env.registry).unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_length_download_installs() {
    let env = env();
    let package = zip_bytes(&[("Hades (1145360)/1145360.lua", b"addappid(1145360)")]);
    let url = serve(Some(package), false).await;
    let pool = pool(&env, 1);

    let mut handle = pool.submit(Job::download("1145360").with_name("Hades").with_url(url));
    let mut saw_unknown_total = false;
    while let Some(event) = handle.next_event().await {
        if let JobEvent::Downloaded { total_mb: None, .. } = event {
            saw_unknown_total = true;
        }
    }
    handle.wait().await.unwrap();
    assert!(saw_unknown_total);

    let doc = RegistryDocument::load(&env.registry).unwrap();
    assert_eq!(doc.get("Hades").unwrap().id, "1145360");
}

#[tokio::test]
async fn test_download_only_keeps_package() {
    let env = env();
    let url = serve(Some(zip_bytes(&[("a.lua", b"x")])), true).await;
    let pool = pool(&env, 1);

    let job = Job::download("620")
        .with_name("Portal 2")
        .with_url(url)
        .with_mode(JobMode::DownloadOnly);
    let outcome = pool.submit(job).wait().await.unwrap();

    let path = outcome.path.unwrap();
    assert_eq!(path, env.downloads.join("Portal 2 (620).zip"));
    assert!(path.is_file());
    assert!(outcome.message.contains("downloaded"));
    assert!(!env.registry.exists());
    assert!(!env.steam.join("config").exists());
}

#[tokio::test]
async fn test_http_error_fails_job_without_leftovers() {
    let env = env();
    let url = serve(None, true).await;
    let pool = pool(&env, 1);

    let mut handle = pool.submit(Job::download("620").with_name("Portal 2").with_url(url));
    let mut last = None;
    while let Some(event) = handle.next_event().await {
        last = Some(event);
    }
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, PipelineError::HttpStatus { status: 404, .. }));
    match last {
        Some(JobEvent::Failed { message }) => assert!(message.starts_with("Error: ")),
        other => panic!("expected a failure event, got {:?}", other),
    }
    assert!(dir_is_empty(&env.downloads));
    assert!(!env.registry.exists());
}

#[tokio::test]
async fn test_concurrent_jobs_share_registry() {
    let env = env();
    let first = serve(Some(zip_bytes(&[("One (10001)/10001.lua", b"1")])), true).await;
    let second = serve(Some(zip_bytes(&[("Two (10002)/10002.lua", b"2")])), true).await;
    let pool = pool(&env, 2);

    let a = pool.submit(Job::download("10001").with_name("One").with_url(first));
    let b = pool.submit(Job::download("10002").with_name("Two").with_url(second));
    let (a, b) = tokio::join!(a.wait(), b.wait());
    a.unwrap();
    b.unwrap();

    let doc = RegistryDocument::load(&env.registry).unwrap();
    assert_eq!(doc.len(), 2);
    assert_eq!(doc.get("One").unwrap().paths.lua, vec!["10001.lua"]);
    assert_eq!(doc.get("Two").unwrap().paths.lua, vec!["10002.lua"]);
}

#[tokio::test]
async fn test_unidentified_package_installs_nothing() {
    let env = env();
    let package = zip_bytes(&[("pkg/script.lua", b"-- lua"), ("pkg/data.manifest", b"m")]);
    let url = serve(Some(package), true).await;
    let pool = pool(&env, 1);

    let mut handle = pool.submit(Job::download("620").with_name("Portal 2").with_url(url));
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, PipelineError::UnidentifiedGame));

    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(events.last(), Some(JobEvent::Failed { .. })));
    assert!(!env.steam.join("config").exists());
    assert!(!env.registry.exists());
    assert!(dir_is_empty(&env.downloads));
    assert!(dir_is_empty(&env.scratch));
}
