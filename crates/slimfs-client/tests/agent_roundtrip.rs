// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client against a real agent running in a thread

use std::fs;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;
use slimfs_agent::{AgentServer, ExportRoot};
use slimfs_client::{
    CacheConfig, ClientError, ClientResult, DirectorySource, MetadataCache, ProtocolClient,
};
use slimfs_proto::{DirectoryRecord, ErrorKind, Payload, ACCESS_READ};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    client: Arc<ProtocolClient>,
    agent: Option<JoinHandle<()>>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (client_end, agent_end) = UnixStream::pair().unwrap();
        let root = ExportRoot::new(dir.path()).unwrap();
        let agent = thread::spawn(move || {
            let mut server = AgentServer::new(root);
            let mut reader = agent_end.try_clone().unwrap();
            let mut writer = agent_end;
            let _ = server.serve(&mut reader, &mut writer);
        });
        let client = ProtocolClient::from_streams(client_end.try_clone().unwrap(), client_end);
        Self {
            dir,
            client: Arc::new(client),
            agent: Some(agent),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        // Dropping the last client handle closes the socket and ends the agent.
        let client = std::mem::replace(
            &mut self.client,
            Arc::new(ProtocolClient::from_streams(std::io::empty(), std::io::sink())),
        );
        drop(client);
        if let Some(agent) = self.agent.take() {
            let _ = agent.join();
        }
    }
}

/// Counts `xreaddir` round trips made through the cache.
struct Counting {
    client: Arc<ProtocolClient>,
    calls: AtomicUsize,
}

impl DirectorySource for Counting {
    fn xreaddir(&self, path: &str) -> ClientResult<DirectoryRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.client.xreaddir(path)
    }
}

fn counting(client: &Arc<ProtocolClient>) -> Arc<Counting> {
    Arc::new(Counting {
        client: Arc::clone(client),
        calls: AtomicUsize::new(0),
    })
}

#[test]
fn test_directory_scenario_costs_one_round_trip() {
    let h = Harness::new();
    fs::create_dir(h.dir.path().join("a")).unwrap();
    fs::write(h.dir.path().join("a/x"), b"0123456789").unwrap();
    fs::create_dir(h.dir.path().join("a/y")).unwrap();

    let source = counting(&h.client);
    let cache = MetadataCache::new(Arc::clone(&source), CacheConfig::default());

    assert_eq!(cache.readdir("/a").unwrap(), ["..", ".", "x", "y"]);
    assert_eq!(cache.getattr("/a/x").unwrap().st_size, 10);
    assert!(cache.getattr("/a/y").unwrap().is_dir());
    assert!(cache.access("/a/x", ACCESS_READ).unwrap());
    assert_eq!(cache.getattr("/a/z").unwrap_err().errno(), libc::ENOENT);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_ttl_expiry_refetches() {
    let h = Harness::new();
    fs::write(h.dir.path().join("f"), b"").unwrap();

    let source = counting(&h.client);
    let cache = MetadataCache::new(
        Arc::clone(&source),
        CacheConfig {
            ttl: Duration::from_millis(40),
            capacity: 32,
        },
    );

    cache.getattr("/f").unwrap();
    thread::sleep(Duration::from_millis(80));
    cache.getattr("/f").unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_invalidation_shows_new_entries() {
    let h = Harness::new();
    let cache = MetadataCache::new(Arc::clone(&h.client), CacheConfig::default());

    assert_eq!(cache.readdir("/").unwrap(), ["..", "."]);
    h.client.mkdir("/new", 0o755).unwrap();

    // Still served from the stale record until invalidated.
    assert_eq!(cache.readdir("/").unwrap(), ["..", "."]);
    cache.invalidate("/new");
    assert_eq!(cache.readdir("/").unwrap(), ["..", ".", "new"]);
    assert!(cache.getattr("/new").unwrap().is_dir());
}

#[test]
fn test_handles_are_unique_and_die_on_release() {
    let h = Harness::new();
    let first = h.client.create("/one", 0o644).unwrap();
    let second = h.client.create("/two", 0o644).unwrap();
    assert_ne!(first, second);

    assert_eq!(h.client.write(first, 0, b"payload").unwrap(), 7);
    h.client.flush(first).unwrap();
    h.client.fsync(first, true).unwrap();
    h.client.release(first).unwrap();

    let err = h.client.write(first, 0, b"late").unwrap_err();
    assert!(matches!(err, ClientError::Remote { kind: ErrorKind::Os, code } if code == libc::EBADF));
    let third = h.client.open("/one", libc::O_RDONLY, None).unwrap();
    assert!(third > second);
    assert_eq!(h.client.read(third, 0, 64).unwrap(), b"payload");
    h.client.release(third).unwrap();
    h.client.release(second).unwrap();
}

#[test]
fn test_errno_fidelity() {
    let h = Harness::new();
    fs::create_dir(h.dir.path().join("d")).unwrap();
    fs::write(h.dir.path().join("d/f"), b"").unwrap();

    assert_eq!(h.client.rmdir("/d").unwrap_err().errno(), libc::ENOTEMPTY);
    assert_eq!(h.client.unlink("/missing").unwrap_err().errno(), libc::ENOENT);
    assert_eq!(h.client.mkdir("/d", 0o755).unwrap_err().errno(), libc::EEXIST);
    assert_eq!(h.client.rmdir("/d/f").unwrap_err().errno(), libc::ENOTDIR);

    let err = h.client.call("chown", Payload::Structured(json!({}))).unwrap_err();
    assert!(matches!(err, ClientError::Remote { kind: ErrorKind::Protocol, code } if code == libc::ENOSYS));
}

#[test]
fn test_namespace_operations() {
    let h = Harness::new();
    let root = h.dir.path();
    fs::write(root.join("f"), b"abcdef").unwrap();

    h.client.symlink("f", "/link").unwrap();
    assert_eq!(h.client.readlink("/link").unwrap(), b"f");
    h.client.link("/f", "/hard").unwrap();
    assert_eq!(h.client.getattr("/f").unwrap().st_nlink, 2);
    h.client.rename("/hard", "/renamed").unwrap();
    h.client.truncate("/renamed", 3).unwrap();
    assert_eq!(fs::read(root.join("f")).unwrap(), b"abc");
    h.client.chmod("/f", 0o600).unwrap();
    h.client.utimens("/f", Some((10.0, 20.0))).unwrap();
    let attrs = h.client.getattr("/f").unwrap();
    assert_eq!((attrs.permissions(), attrs.st_mtime), (0o600, 20));
    assert!(h.client.access("/f", ACCESS_READ).unwrap());
    h.client.unlink("/renamed").unwrap();
    assert!(h.client.statfs("/").unwrap().f_blocks > 0);
    assert_eq!(h.client.readdir("/").unwrap(), [".", "..", "f", "link"]);
}

#[test]
fn test_broken_transport_fails_every_later_call() {
    let (client_end, agent_end) = UnixStream::pair().unwrap();
    drop(agent_end);
    let client = ProtocolClient::from_streams(client_end.try_clone().unwrap(), client_end);

    let first = client.getattr("/").unwrap_err();
    assert!(matches!(first, ClientError::Transport(_)));
    assert_eq!(first.errno(), libc::EIO);
    assert!(client.is_broken());
    assert!(matches!(client.getattr("/"), Err(ClientError::Broken)));
    assert!(matches!(client.statfs("/"), Err(ClientError::Broken)));
}

#[test]
fn test_concurrent_callers_are_serialized() {
    let h = Harness::new();
    for i in 0..8 {
        fs::write(h.dir.path().join(format!("f{}", i)), vec![b'x'; i]).unwrap();
    }

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let client = Arc::clone(&h.client);
            thread::spawn(move || {
                for _ in 0..20 {
                    let attrs = client.getattr(&format!("/f{}", i)).unwrap();
                    assert_eq!(attrs.st_size, i as u64);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}
