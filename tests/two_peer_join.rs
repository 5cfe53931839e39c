//! End-to-end join handshake over real localhost sockets (§4.5, §8
//! "Two-peer join"): a bootstrap peer with one local image joins a second
//! peer with one local image of its own, and both ends converge on a
//! two-entry catalog whose hash-sets include the bootstrap-replication
//! copy exchanged during the handshake.

use std::io::Cursor;
use std::time::Duration;

use photomesh::net;
use photomesh::runner::{bootstrap, join};
use tokio::net::TcpListener;

fn write_png(dir: &std::path::Path, name: &str, color: [u8; 3]) {
    let mut img = image::RgbImage::new(6, 6);
    for p in img.pixels_mut() {
        *p = image::Rgb(color);
    }
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    std::fs::write(dir.join(name), buf.into_inner()).unwrap();
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition did not become true in time");
}

#[tokio::test]
async fn joiner_and_introducer_converge_on_a_shared_catalog() {
    let dir1 = tempfile::tempdir().unwrap();
    write_png(dir1.path(), "a.png", [10, 20, 30]);
    let dir2 = tempfile::tempdir().unwrap();
    write_png(dir2.path(), "b.png", [40, 50, 60]);

    let listener1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr1 = listener1.local_addr().unwrap();
    let shared1 = bootstrap(dir1.path().to_path_buf(), addr1).await.unwrap();
    tokio::spawn(net::serve(listener1, shared1.clone()));

    // Reserve a free port for peer 2, then release it immediately so
    // `join` can bind it itself — exercising the real bind-before-join
    // ordering instead of a test-only stand-in for it.
    let addr2 = {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap()
    };
    let (shared2, _serve_handle) = join(dir2.path().to_path_buf(), addr2, addr1)
        .await
        .unwrap();

    wait_until(|| {
        shared2
            .try_lock()
            .map(|g| g.self_id == Some(2))
            .unwrap_or(false)
    })
    .await;

    // Bootstrap-replication (§4.5 step 2, two-node shortcut) sends peer 1's
    // only image to peer 2, and step 3's round-robin distribution sends
    // peer 2's only image back out — so each peer ends up storing both.
    wait_until(|| {
        shared2
            .try_lock()
            .map(|g| g.store.hashes().len() == 2)
            .unwrap_or(false)
    })
    .await;
    wait_until(|| {
        shared1
            .try_lock()
            .map(|g| g.catalog.hashes(2).len() == 2)
            .unwrap_or(false)
    })
    .await;

    let guard1 = shared1.lock().await;
    let guard2 = shared2.lock().await;

    assert_eq!(guard1.catalog.get_addr(2), Some(addr2));
    assert_eq!(guard1.catalog.hashes(1), guard2.catalog.hashes(1));
    assert_eq!(guard1.catalog.hashes(2), guard2.catalog.hashes(2));
    assert_eq!(guard2.store.hashes(), guard2.catalog.hashes(2));
}
