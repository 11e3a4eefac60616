//! End-to-end protocol tests against a live server instance.

mod common;

use amftpd::policy::{Section, SectionMap};
use amftpd::users::crypto::hash_password;
use amftpd::users::Account;
use common::*;

fn archive_sections() -> SectionMap {
    SectionMap::new(vec![Section {
        name: "ARCHIVE".to_string(),
        aliases: vec![],
        virtual_root: "/archive".to_string(),
        free_leech: false,
        ratio_ul_unit: 1,
        ratio_dl_unit: 3,
        nuke_multiplier: Some(3.0),
    }])
}

#[tokio::test(flavor = "multi_thread")]
async fn banner_noop_quit() {
    let site = start_site(21811, 50700..=50709, |b| b).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.cmd_expect("NOOP", "200").await;
    client.cmd_expect("SYST", "215").await;
    let feat = client.cmd_expect("FEAT", "211").await;
    assert!(feat.contains("MLSD"), "{feat}");
    assert!(feat.contains("REST STREAM"), "{feat}");
    let goodbye = client.cmd_expect("QUIT", "221").await;
    assert_eq!(goodbye, "221 Goodbye.");
}

#[tokio::test(flavor = "multi_thread")]
async fn commands_require_login() {
    let site = start_site(21812, 50710..=50719, |b| b).await;
    let mut client = TestClient::connect(&site.addr).await;
    let reply = client.cmd("PWD").await;
    assert_eq!(reply, "530 Please login with USER and PASS.");
    client.cmd_expect("PASV", "530").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_and_malformed_commands() {
    let site = start_site(21813, 50720..=50729, |b| b).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.cmd_expect("MACB something", "502").await;
    client.cmd_expect("REST notanumber", "501").await;
}

// Scenario S1: anonymous download of a small file.
#[tokio::test(flavor = "multi_thread")]
async fn anonymous_retr_small_file() {
    let site = start_site(21814, 50730..=50739, |b| b.allow_anonymous(true)).await;
    std::fs::write(site.root.join("hello.txt"), b"hi\n").unwrap();

    let mut client = TestClient::connect(&site.addr).await;
    let prompt = client.cmd_expect("USER anonymous", "331").await;
    assert_eq!(prompt, "331 Anonymous login ok, send your email as password.");
    let welcome = client.cmd_expect("PASS a@b", "230").await;
    assert_eq!(welcome, "230 Login successful.");
    let typed = client.cmd_expect("TYPE I", "200").await;
    assert_eq!(typed, "200 Type set to I.");

    let data = client.open_passive().await;
    client.send_line("RETR /hello.txt").await;
    let preliminary = client.read_reply().await;
    assert!(preliminary.starts_with("150 "), "{preliminary}");
    let bytes = read_all(data).await;
    assert_eq!(bytes, b"hi\n");
    let done = client.read_reply().await;
    assert_eq!(done, "226 Closing data connection.");
}

// Scenario S2: aborting a STOR, then resuming with REST.
#[tokio::test(flavor = "multi_thread")]
async fn stor_with_rest_resume() {
    let site = start_site(21815, 50740..=50749, |b| b).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.login("uploader", "up").await;

    let data = client.open_passive().await;
    client.send_line("STOR /up/file.bin").await;
    let preliminary = client.read_reply().await;
    assert!(preliminary.starts_with("150 "), "{preliminary}");
    write_all_and_close(data, &[0xAAu8; 1024]).await;
    let done = client.read_reply().await;
    assert!(done.starts_with("226 "), "{done}");

    let rest = client.cmd_expect("REST 512", "350").await;
    assert_eq!(rest, "350 Restarting at 512. Send STORE or RETRIEVE.");

    let data = client.open_passive().await;
    client.send_line("STOR /up/file.bin").await;
    let preliminary = client.read_reply().await;
    assert!(preliminary.starts_with("150 "), "{preliminary}");
    write_all_and_close(data, &[0xBBu8; 512]).await;
    let done = client.read_reply().await;
    assert!(done.starts_with("226 "), "{done}");

    let written = std::fs::read(site.root.join("up/file.bin")).unwrap();
    assert_eq!(written.len(), 1024);
    assert!(written[..512].iter().all(|&b| b == 0xAA));
    assert!(written[512..].iter().all(|&b| b == 0xBB));
}

// Scenario S2, abort variant: ABOR mid-STOR keeps the partial file.
#[tokio::test(flavor = "multi_thread")]
async fn abor_cancels_stor_and_keeps_partial() {
    let site = start_site(21822, 50900..=50909, |b| b).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.login("uploader", "up").await;

    let mut data = client.open_passive().await;
    client.send_line("STOR /up/partial.bin").await;
    let preliminary = client.read_reply().await;
    assert!(preliminary.starts_with("150 "), "{preliminary}");

    tokio::io::AsyncWriteExt::write_all(&mut data, &[0xCCu8; 1024]).await.unwrap();
    tokio::io::AsyncWriteExt::flush(&mut data).await.unwrap();
    // Give the server a beat to drain the kernel buffer before aborting.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let cancelled = client.cmd("ABOR").await;
    assert_eq!(cancelled, "226 Abort command successful; transfer cancelled.");
    drop(data);

    let written = std::fs::read(site.root.join("up/partial.bin")).unwrap();
    assert_eq!(written.len(), 1024);

    // Resuming over the partial file works as if the upload had paused.
    client.cmd_expect("REST 512", "350").await;
    let data = client.open_passive().await;
    client.send_line("STOR /up/partial.bin").await;
    assert!(client.read_reply().await.starts_with("150 "));
    write_all_and_close(data, &[0xDDu8; 512]).await;
    assert!(client.read_reply().await.starts_with("226 "));
    let written = std::fs::read(site.root.join("up/partial.bin")).unwrap();
    assert_eq!(written.len(), 1024);
    assert!(written[512..].iter().all(|&b| b == 0xDD));
}

// Scenario S3: FXP refusal on PORT with a foreign target address.
#[tokio::test(flavor = "multi_thread")]
async fn fxp_denied_for_plain_accounts() {
    let site = start_site(21816, 50750..=50759, |b| b).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.login("uploader", "up").await;
    let reply = client.cmd("PORT 203,0,113,5,10,20").await;
    assert_eq!(reply, "504 FXP not allowed: IP mismatch.");
}

// Scenario S4: ratio charging and the not-enough-credits refusal.
#[tokio::test(flavor = "multi_thread")]
async fn ratio_charge_and_refusal() {
    let site = start_site(21817, 50760..=50769, |b| b.sections(archive_sections())).await;
    let leecher = Account::new("leecher", &hash_password("dl")).with_credits(10 * 1024);
    site.store.try_add(leecher).await.unwrap();

    std::fs::create_dir_all(site.root.join("archive")).unwrap();
    std::fs::write(site.root.join("archive/1MB.bin"), vec![0u8; 1024 * 1024]).unwrap();

    let mut client = TestClient::connect(&site.addr).await;
    client.login("leecher", "dl").await;

    let data = client.open_passive().await;
    client.send_line("RETR /archive/1MB.bin").await;
    let preliminary = client.read_reply().await;
    assert!(preliminary.starts_with("150 "), "{preliminary}");
    let bytes = read_all(data).await;
    assert_eq!(bytes.len(), 1024 * 1024);
    let done = client.read_reply().await;
    assert!(done.starts_with("226 "), "{done}");

    // 1024 KB at 1:3 costs 3072 KB.
    let account = site.store.find("leecher").unwrap();
    assert_eq!(account.credits_kb, 10 * 1024 - 3072);

    // With only 2048 KB left the next download is refused before any 150.
    site.store.try_update(account.with_credits(2048)).await.unwrap();
    let _data = client.open_passive().await;
    let refusal = client.cmd("RETR /archive/1MB.bin").await;
    assert_eq!(refusal, "550 Not enough credits for download.");
}

// Scenario S5: RNFR/RNTO rename.
#[tokio::test(flavor = "multi_thread")]
async fn rename_roundtrip() {
    let site = start_site(21818, 50770..=50779, |b| b).await;
    std::fs::create_dir_all(site.root.join("a")).unwrap();
    std::fs::create_dir_all(site.root.join("b")).unwrap();
    std::fs::write(site.root.join("a/x"), b"payload").unwrap();

    let mut client = TestClient::connect(&site.addr).await;
    client.login("uploader", "up").await;

    let ready = client.cmd_expect("RNFR /a/x", "350").await;
    assert_eq!(ready, "350 File exists, ready for destination name.");
    let done = client.cmd_expect("RNTO /b/y", "250").await;
    assert_eq!(done, "250 Requested file action okay, completed.");

    assert!(!site.root.join("a/x").exists());
    assert_eq!(std::fs::read(site.root.join("b/y")).unwrap(), b"payload");

    // RNTO without a pending RNFR is a sequence error.
    client.cmd_expect("RNTO /b/z", "503").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_registers_race_and_awards_credits() {
    let site = start_site(21819, 50780..=50789, |b| b.sections(archive_sections())).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.login("uploader", "up").await;

    let data = client.open_passive().await;
    client.send_line("STOR /archive/REL/part1.rar").await;
    let preliminary = client.read_reply().await;
    assert!(preliminary.starts_with("150 "), "{preliminary}");
    let payload = vec![7u8; 2 * 1024 * 1024];
    write_all_and_close(data, &payload).await;
    let done = client.read_reply().await;
    assert!(done.starts_with("226 "), "{done}");

    // 2048 KB at 1:3 earns 6144 KB.
    let account = site.store.find("uploader").unwrap();
    assert_eq!(account.credits_kb, 6144);

    let race = site.race.get("/archive/REL").unwrap();
    assert_eq!(race.total_bytes, 2 * 1024 * 1024);
    assert_eq!(race.file_count, 1);
    assert_eq!(race.user_bytes.get("uploader"), Some(&(2 * 1024 * 1024)));
    assert_eq!(race.section, "ARCHIVE");
}

#[tokio::test(flavor = "multi_thread")]
async fn listing_formats() {
    let site = start_site(21820, 50790..=50799, |b| b).await;
    std::fs::create_dir_all(site.root.join("sub")).unwrap();
    std::fs::write(site.root.join("file.txt"), b"12345").unwrap();

    let mut client = TestClient::connect(&site.addr).await;
    client.login("uploader", "up").await;

    let data = client.open_passive().await;
    client.send_line("LIST").await;
    assert!(client.read_reply().await.starts_with("150 "));
    let listing = String::from_utf8(read_all(data).await).unwrap();
    assert!(client.read_reply().await.starts_with("226 "));
    assert!(listing.lines().any(|l| l.starts_with("drwxr-xr-x") && l.ends_with("sub")), "{listing}");
    assert!(listing.lines().any(|l| l.starts_with("-rw-r--r--") && l.ends_with("file.txt")), "{listing}");

    let data = client.open_passive().await;
    client.send_line("MLSD").await;
    assert!(client.read_reply().await.starts_with("150 "));
    let mlsd = String::from_utf8(read_all(data).await).unwrap();
    assert!(client.read_reply().await.starts_with("226 "));
    assert!(mlsd.lines().any(|l| l.starts_with("type=dir;modify=") && l.ends_with(" sub")), "{mlsd}");
    assert!(mlsd.lines().any(|l| l.starts_with("type=file;modify=") && l.contains("size=5;") && l.ends_with(" file.txt")), "{mlsd}");

    client.cmd_expect("SIZE /file.txt", "213 5").await;
    let mdtm = client.cmd_expect("MDTM /file.txt", "213").await;
    assert_eq!(mdtm.len(), "213 YYYYMMDDHHMMSS".len());
}

#[tokio::test(flavor = "multi_thread")]
async fn pwd_cwd_mkd() {
    let site = start_site(21821, 50800..=50809, |b| b).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.login("uploader", "up").await;

    assert_eq!(client.cmd("PWD").await, "257 \"/\"");
    client.cmd_expect("MKD /deep/nest", "257").await;
    client.cmd_expect("CWD /deep/nest", "250").await;
    assert_eq!(client.cmd("PWD").await, "257 \"/deep/nest\"");
    client.cmd_expect("CDUP", "250").await;
    assert_eq!(client.cmd("PWD").await, "257 \"/deep\"");
    client.cmd_expect("CWD /nowhere", "550").await;
}
