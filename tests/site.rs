//! SITE command surface tests, including the nuke flow of a raced
//! release.

mod common;

use amftpd::policy::{Section, SectionMap};
use amftpd::users::crypto::hash_password;
use amftpd::users::Account;
use common::*;

fn one_to_two_sections() -> SectionMap {
    SectionMap::new(vec![Section {
        name: "ARCHIVE".to_string(),
        aliases: vec!["ARC".to_string()],
        virtual_root: "/archive".to_string(),
        free_leech: false,
        ratio_ul_unit: 1,
        ratio_dl_unit: 2,
        nuke_multiplier: Some(3.0),
    }])
}

#[tokio::test(flavor = "multi_thread")]
async fn site_requires_subcommand_and_knows_unknowns() {
    let site = start_site(21831, 50810..=50819, |b| b).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.login("uploader", "up").await;

    let reply = client.cmd("SITE").await;
    assert_eq!(reply, "500 SITE requires a subcommand.");
    let reply = client.cmd("SITE FROBNICATE now").await;
    assert_eq!(reply, "502 Unknown SITE command 'FROBNICATE'.");
}

#[tokio::test(flavor = "multi_thread")]
async fn site_authorization_gates_plain_users() {
    let site = start_site(21832, 50820..=50829, |b| b).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.login("uploader", "up").await;

    client.cmd_expect("SITE WHO", "550").await;
    client.cmd_expect("SITE ADDUSER eve pw", "550").await;
    // Non-privileged commands still work.
    client.cmd_expect("SITE HELP", "200").await;
    client.cmd_expect("SITE CREDITS", "200").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn admin_manages_users_and_credits() {
    let site = start_site(21833, 50830..=50839, |b| b).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.login("admin", "admin").await;

    client.cmd_expect("SITE ADDUSER carol secret /home", "200").await;
    assert!(site.store.find("carol").is_some());

    client.cmd_expect("SITE GIVECRED carol 4096", "200").await;
    assert_eq!(site.store.find("carol").unwrap().credits_kb, 4096);
    client.cmd_expect("SITE TAKECRED carol 9999", "200").await;
    assert_eq!(site.store.find("carol").unwrap().credits_kb, 0);

    client.cmd_expect("SITE SETFLAGS carol UD", "200").await;
    let carol = site.store.find("carol").unwrap();
    assert!(!carol.is_siteop());
    assert_eq!(carol.raw_flags, "UD");

    let shown = client.cmd_expect("SITE SHOWUSER carol", "200").await;
    assert!(shown.contains("carol"), "{shown}");
    assert!(shown.contains("Credits"), "{shown}");

    let who = client.cmd_expect("SITE WHO", "200").await;
    assert!(who.contains("admin"), "{who}");

    let users = client.cmd_expect("SITE USERS", "200").await;
    assert!(users.contains("carol"), "{users}");
    assert!(users.contains("uploader"), "{users}");
}

#[tokio::test(flavor = "multi_thread")]
async fn sections_and_dirflags() {
    let site = start_site(21834, 50840..=50849, |b| b.sections(one_to_two_sections())).await;
    let mut client = TestClient::connect(&site.addr).await;
    client.login("uploader", "up").await;

    let sections = client.cmd_expect("SITE SECTIONS", "200").await;
    assert!(sections.contains("ARCHIVE"), "{sections}");
    assert!(sections.contains("1:2"), "{sections}");

    let flags = client.cmd_expect("SITE DIRFLAGS /archive/rel", "200").await;
    assert!(flags.contains("section=ARCHIVE"), "{flags}");
}

// Scenario S6: nuking a raced release charges multiplied earnings back.
#[tokio::test(flavor = "multi_thread")]
async fn nuke_penalizes_racers_and_renames() {
    let site = start_site(21835, 50850..=50859, |b| b.sections(one_to_two_sections())).await;

    site.store
        .try_add(Account::new("alice", &hash_password("a")).with_credits(20_000))
        .await
        .unwrap();
    site.store
        .try_add(Account::new("bob", &hash_password("b")).with_credits(5_000))
        .await
        .unwrap();

    std::fs::create_dir_all(site.root.join("archive/REL")).unwrap();
    site.race.register_upload("alice", "/archive/REL", "ARCHIVE", 2 * 1024 * 1024);
    site.race.register_upload("bob", "/archive/REL", "ARCHIVE", 1024 * 1024);

    let mut client = TestClient::connect(&site.addr).await;
    client.login("admin", "admin").await;
    let reply = client.cmd_expect("SITE NUKE /archive/REL dupe", "200").await;
    assert!(reply.contains("2 user(s) penalized"), "{reply}");

    // alice earned 4096 KB on a 1:2 section; x3 penalty is 12288 KB.
    assert_eq!(site.store.find("alice").unwrap().credits_kb, 20_000 - 12_288);
    // bob earned 2048 KB; the 6144 KB penalty clamps at zero.
    assert_eq!(site.store.find("bob").unwrap().credits_kb, 0);

    assert!(!site.root.join("archive/REL").exists());
    assert!(site.root.join("archive/REL.NUKED").exists());
    assert!(site.race.get("/archive/REL").is_none());

    let log = std::fs::read_to_string(&site.nukes_log).unwrap();
    assert!(log.contains("| NUKE | /archive/REL | admin | dupe | 3 |"), "{log}");
    assert!(log.contains("alice:2097152:-12288=>7712"), "{log}");
    assert!(log.contains("bob:1048576:-6144=>0"), "{log}");

    let raced = client.cmd_expect("SITE RACELOG", "200").await;
    assert!(raced.contains("NUKE"), "{raced}");
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_disconnects_target_session() {
    let site = start_site(21836, 50860..=50869, |b| b).await;

    let mut victim = TestClient::connect(&site.addr).await;
    victim.login("uploader", "up").await;

    let mut admin = TestClient::connect(&site.addr).await;
    admin.login("admin", "admin").await;
    admin.cmd_expect("SITE KILL uploader", "200").await;

    // The victim's next read sees the 421 goodbye.
    let notice = victim.read_reply().await;
    assert!(notice.starts_with("421 "), "{notice}");
}
