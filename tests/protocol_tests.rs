//! End-to-end protocol scenarios.
//!
//! Two sessions in separate local stores exchange messages over shared
//! in-process loopback backends: each side derives its chat from the same
//! negotiator set, so their lookup tables line up and the full
//! publish/retrieve path runs without touching the network.

use deaddrop::chat::ChatLogEntry;
use deaddrop::crypto::{gen_rand_hex_id, Cipher};
use deaddrop::error::DeaddropError;
use deaddrop::handshake::Negotiator;
use deaddrop::session::{Session, SessionOptions};
use deaddrop::storage::{MemoryStore, Storage};
use deaddrop::strategy::Strategy;
use tempfile::TempDir;

const ALICE_ENTROPY: [u8; 96] = [0x11; 96];
const BOB_ENTROPY: [u8; 96] = [0x22; 96];

/// Lookup size for tests; yields `LOOKUP_COUNT - 1` usable entries.
const LOOKUP_COUNT: usize = 16;

fn loopback_strategy(bus: &str, owner: &str) -> Strategy {
    Strategy {
        rendezvous: Storage::Memory(MemoryStore::attach(&format!("{bus}-{owner}-rendezvous"))),
        storage: Storage::Memory(MemoryStore::attach(&format!("{bus}-{owner}-blobs"))),
        cipher: Cipher::default_cipher(),
    }
}

fn negotiators(bus: &str) -> Vec<Negotiator> {
    vec![
        Negotiator {
            alias: "alice".to_string(),
            entropy: ALICE_ENTROPY,
            strategy: loopback_strategy(bus, "alice"),
        },
        Negotiator {
            alias: "bob".to_string(),
            entropy: BOB_ENTROPY,
            strategy: loopback_strategy(bus, "bob"),
        },
    ]
}

struct Pair {
    alice: Session,
    bob: Session,
    alice_chat: String,
    bob_chat: String,
    bus: String,
    _dirs: (TempDir, TempDir),
}

fn open_session(password: &str, alias: &str) -> (Session, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let opts = SessionOptions::with_path(dir.path().join("db"));
    Session::create_profile(password, alias, &opts).expect("create profile");
    (Session::open(password, &opts).expect("open session"), dir)
}

async fn setup_pair(lookup_count: usize) -> Pair {
    let bus = gen_rand_hex_id(8);
    let (mut alice, alice_dir) = open_session("alice-pass", "alice");
    let (mut bob, bob_dir) = open_session("bob-pass", "bob");

    let alice_chat = alice
        .new_chat_with_count(negotiators(&bus), &ALICE_ENTROPY, lookup_count)
        .await
        .expect("alice chat");
    let bob_chat = bob
        .new_chat_with_count(negotiators(&bus), &BOB_ENTROPY, lookup_count)
        .await
        .expect("bob chat");

    Pair {
        alice,
        bob,
        alice_chat,
        bob_chat,
        bus,
        _dirs: (alice_dir, bob_dir),
    }
}

fn parse_log(bytes: &[u8]) -> Vec<ChatLogEntry> {
    serde_json::from_slice(bytes).expect("log JSON")
}

#[tokio::test]
async fn two_peer_hello_round_trip() {
    let mut pair = setup_pair(LOOKUP_COUNT).await;

    let sent = pair
        .alice
        .send_message(&pair.alice_chat, br#"{"message": "hello"}"#)
        .await
        .unwrap();
    let sent = parse_log(&sent);
    assert_eq!(sent.len(), 1);
    let blob_hash = sent[0].id.clone();

    let received = pair.bob.retrieve_messages(&pair.bob_chat).await.unwrap();
    let received = parse_log(&received);
    assert_eq!(received.len(), 1);

    let entry = &received[0];
    assert_eq!(entry.id, blob_hash);
    assert_eq!(entry.data.message, "hello");
    assert_eq!(entry.data.parent, "");
    assert!(entry.sent > 0);
    assert_eq!(entry.sent, entry.data.timestamp);
    assert_eq!(entry.ttl, 604_800);

    // The sender id is bob's name for alice, never bob himself.
    let bob_peer_id = pair.bob.my_peer_id(&pair.bob_chat).await.unwrap();
    assert!(!entry.sender.is_empty());
    assert_ne!(entry.sender, bob_peer_id);
}

#[tokio::test]
async fn causal_chain_is_backfilled_in_one_retrieve() {
    let mut pair = setup_pair(LOOKUP_COUNT).await;

    let first = pair
        .alice
        .send_message(&pair.alice_chat, br#"{"message": "a"}"#)
        .await
        .unwrap();
    let first_id = parse_log(&first)[0].id.clone();

    let second = pair
        .alice
        .send_message(&pair.alice_chat, br#"{"message": "b"}"#)
        .await
        .unwrap();
    let second = parse_log(&second);
    assert_eq!(second.len(), 2);

    // Bob was never told about "a"; one retrieve recovers both.
    let log = parse_log(&pair.bob.retrieve_messages(&pair.bob_chat).await.unwrap());
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].data.message, "a");
    assert_eq!(log[1].data.message, "b");
    assert_eq!(log[0].id, first_id);
    assert_eq!(log[1].data.parent, first_id);
    assert_eq!(log[0].data.parent, "");
}

#[tokio::test]
async fn retrieve_is_idempotent_without_new_publishes() {
    let mut pair = setup_pair(LOOKUP_COUNT).await;

    pair.alice
        .send_message(&pair.alice_chat, br#"{"message": "once"}"#)
        .await
        .unwrap();

    let first = pair.bob.retrieve_messages(&pair.bob_chat).await.unwrap();
    let second = pair.bob.retrieve_messages(&pair.bob_chat).await.unwrap();
    let third = pair.bob.retrieve_messages(&pair.bob_chat).await.unwrap();
    assert_eq!(parse_log(&first).len(), 1);
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[tokio::test]
async fn retrieve_before_any_publish_is_empty() {
    let mut pair = setup_pair(LOOKUP_COUNT).await;
    let log = pair.bob.retrieve_messages(&pair.bob_chat).await.unwrap();
    assert!(parse_log(&log).is_empty());
}

#[tokio::test]
async fn conversation_flows_both_ways() {
    let mut pair = setup_pair(LOOKUP_COUNT).await;

    pair.alice
        .send_message(&pair.alice_chat, br#"{"message": "ping"}"#)
        .await
        .unwrap();
    pair.bob.retrieve_messages(&pair.bob_chat).await.unwrap();
    pair.bob
        .send_message(&pair.bob_chat, br#"{"message": "pong"}"#)
        .await
        .unwrap();

    let log = parse_log(&pair.alice.retrieve_messages(&pair.alice_chat).await.unwrap());
    assert_eq!(log.len(), 2);
    let messages: Vec<&str> = log.iter().map(|e| e.data.message.as_str()).collect();
    assert_eq!(messages, vec!["ping", "pong"]);

    // Bob's copy converges to the same two messages.
    let bob_log = parse_log(&pair.bob.chat_log(&pair.bob_chat).await.unwrap());
    assert_eq!(bob_log.len(), 2);
}

#[tokio::test]
async fn exhausted_lookup_fails_send_without_publishing() {
    // Three slots yield two usable entries: exactly one send.
    let mut pair = setup_pair(3).await;

    pair.alice
        .send_message(&pair.alice_chat, br#"{"message": "only"}"#)
        .await
        .unwrap();

    let blobs = MemoryStore::attach(&format!("{}-alice-blobs", pair.bus));
    let published_before = blobs.list("").unwrap().len();
    assert_eq!(published_before, 1);

    let result = pair
        .alice
        .send_message(&pair.alice_chat, br#"{"message": "never"}"#)
        .await;
    assert!(matches!(result, Err(DeaddropError::LookupExhausted)));

    // Nothing new was published and the log still has one entry.
    assert_eq!(blobs.list("").unwrap().len(), published_before);
    let log = parse_log(&pair.alice.chat_log(&pair.alice_chat).await.unwrap());
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].data.message, "only");

    // The failed send consumed nothing visible to bob.
    let bob_log = parse_log(&pair.bob.retrieve_messages(&pair.bob_chat).await.unwrap());
    assert_eq!(bob_log.len(), 1);
    assert_eq!(bob_log[0].data.parent, "");
}

#[tokio::test]
async fn oversized_message_is_rejected_before_any_mutation() {
    let mut pair = setup_pair(LOOKUP_COUNT).await;

    let oversized = vec![b'x'; 250_001];
    let result = pair.alice.send_message(&pair.alice_chat, &oversized).await;
    assert!(matches!(
        result,
        Err(DeaddropError::MessageTooLarge { size: 250_001, .. })
    ));

    let blobs = MemoryStore::attach(&format!("{}-alice-blobs", pair.bus));
    assert!(blobs.list("").unwrap().is_empty());
    let log = parse_log(&pair.alice.chat_log(&pair.alice_chat).await.unwrap());
    assert!(log.is_empty());
}

#[tokio::test]
async fn list_chats_and_peer_ids() {
    let mut pair = setup_pair(LOOKUP_COUNT).await;

    let chats = pair.alice.list_chats().await.unwrap();
    assert_eq!(chats, vec![pair.alice_chat.clone()]);

    let alice_peer = pair.alice.my_peer_id(&pair.alice_chat).await.unwrap();
    let bob_peer = pair.bob.my_peer_id(&pair.bob_chat).await.unwrap();
    assert_eq!(alice_peer.len(), 24);
    assert_eq!(bob_peer.len(), 24);

    pair.alice.close().unwrap();
    pair.bob.close().unwrap();
}

#[tokio::test]
async fn media_hashes_survive_the_round_trip() {
    let mut pair = setup_pair(LOOKUP_COUNT).await;

    pair.alice
        .send_message(
            &pair.alice_chat,
            br#"{"message": "see attachment", "media": ["QmFakeMediaHash"]}"#,
        )
        .await
        .unwrap();

    let log = parse_log(&pair.bob.retrieve_messages(&pair.bob_chat).await.unwrap());
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].data.media, vec!["QmFakeMediaHash"]);
}
