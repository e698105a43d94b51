use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{DateTime, Duration, Utc};

use wifi_ids::frame::{AdvertisementFrame, FrameMeta, MacAddr, TaggedParameters};
use wifi_ids::networks::beacon_rate::BeaconRateManager;
use wifi_ids::networks::{IgnoredFingerprints, Networks, SignalTrackSettings};
use wifi_ids::oui::StaticOuiLookup;
use wifi_ids::persistence::MemoryStore;

fn networks() -> Networks {
    Networks::new(
        Arc::new(StaticOuiLookup::new().with_vendor([0xaa, 0xbb, 0xcc], "Acme")),
        Arc::new(IgnoredFingerprints::new()),
        SignalTrackSettings::default(),
    )
}

fn beacon(bssid: &str, ssid: &str, channel: u16, signal: i32, timestamp: DateTime<Utc>) -> AdvertisementFrame {
    AdvertisementFrame {
        transmitter: bssid.parse().unwrap(),
        destination: MacAddr::BROADCAST,
        ssid: Some(ssid.to_string()),
        tagged: TaggedParameters {
            fingerprint: Some("fp-1".to_string()),
            ..TaggedParameters::default()
        },
        meta: FrameMeta::new(channel, signal, timestamp),
    }
}

#[test]
fn beacon_counter_resets_after_write() {
    let networks = networks();
    let store = Arc::new(MemoryStore::new());
    let manager = BeaconRateManager::new(store.clone(), 60, 5);
    let address: MacAddr = "aa:bb:cc:00:00:01".parse().unwrap();

    for _ in 0..70 {
        networks.register_beacon(&beacon("aa:bb:cc:00:00:01", "CorpNet", 6, -50, Utc::now()));
    }

    let ssid = networks.bssid(&address).unwrap().ssid("CorpNet").unwrap();
    assert_eq!(ssid.beacon_count(), 70);

    assert_eq!(manager.write(&networks), 1);
    assert_eq!(ssid.beacon_count(), 0);

    let samples = store.beacon_rates();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].beacon_count, 70);
    assert_eq!(samples[0].ssid, "CorpNet");
}

#[test]
fn probe_responses_do_not_count_as_beacons() {
    let networks = networks();
    let address: MacAddr = "aa:bb:cc:00:00:01".parse().unwrap();

    networks.register_probe_response(&beacon("aa:bb:cc:00:00:01", "CorpNet", 6, -50, Utc::now()));

    let ssid = networks.bssid(&address).unwrap().ssid("CorpNet").unwrap();
    assert_eq!(ssid.beacon_count(), 0);
    assert_eq!(ssid.channel(6).unwrap().total_frames(), 1);
}

#[test]
fn concurrent_first_sight_creates_one_bssid() {
    let networks = networks();
    let barrier = Barrier::new(2);
    let now = Utc::now();

    thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| {
                barrier.wait();
                networks.register_beacon(&beacon("aa:bb:cc:00:00:02", "CorpNet", 11, -60, now));
            });
        }
    });

    assert_eq!(networks.bssid_count(), 1);
    let address: MacAddr = "aa:bb:cc:00:00:02".parse().unwrap();
    let bssid = networks.bssid(&address).unwrap();
    assert_eq!(bssid.oui(), "Acme");
    assert_eq!(bssid.ssids().len(), 1);

    let channel = networks.find_channel(&address, "CorpNet", 11).unwrap();
    assert_eq!(channel.total_frames(), 2);
    assert_eq!(channel.signal_strength_table().len(), 2);
}

#[test]
fn many_threads_keep_exact_counts() {
    let networks = networks();
    let threads = 8;
    let frames_per_thread = 250;
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                barrier.wait();
                for _ in 0..frames_per_thread {
                    networks.register_beacon(&beacon("aa:bb:cc:00:00:03", "CorpNet", 1, -55, Utc::now()));
                }
            });
        }
    });

    let address: MacAddr = "aa:bb:cc:00:00:03".parse().unwrap();
    let ssid = networks.bssid(&address).unwrap().ssid("CorpNet").unwrap();
    assert_eq!(ssid.beacon_count(), (threads * frames_per_thread) as u64);
    assert_eq!(ssid.channel(1).unwrap().total_frames(), (threads * frames_per_thread) as u64);
}

#[test]
fn retention_removes_only_idle_bssids() {
    let networks = networks();
    let now = Utc::now();

    networks.register_beacon(&beacon("aa:bb:cc:00:00:04", "Old", 1, -70, now - Duration::seconds(900)));
    networks.register_beacon(&beacon("aa:bb:cc:00:00:05", "Fresh", 1, -70, now - Duration::seconds(10)));

    assert_eq!(networks.retention_clean_at(now, 600), 1);
    assert_eq!(networks.bssid_count(), 1);
    assert!(networks.bssid(&"aa:bb:cc:00:00:05".parse().unwrap()).is_some());

    // Nothing left to remove.
    assert_eq!(networks.retention_clean_at(now, 600), 0);
}

#[test]
fn retention_keeps_bssids_that_reappear() {
    let networks = networks();
    let now = Utc::now();

    networks.register_beacon(&beacon("aa:bb:cc:00:00:06", "CorpNet", 1, -70, now - Duration::seconds(900)));
    networks.register_beacon(&beacon("aa:bb:cc:00:00:06", "CorpNet", 1, -70, now));

    assert_eq!(networks.retention_clean_at(now, 600), 0);
    assert_eq!(networks.bssid_count(), 1);
}

#[test]
fn retention_keeps_bssid_idle_exactly_for_the_limit() {
    let networks = networks();
    let now = Utc::now();

    networks.register_beacon(&beacon("aa:bb:cc:00:00:0b", "Edge", 1, -70, now - Duration::seconds(600)));
    networks.register_beacon(&beacon(
        "aa:bb:cc:00:00:0c",
        "Past",
        1,
        -70,
        now - Duration::seconds(600) - Duration::milliseconds(1),
    ));

    assert_eq!(networks.retention_clean_at(now, 600), 1);
    assert!(networks.bssid(&"aa:bb:cc:00:00:0b".parse().unwrap()).is_some());
    assert!(networks.bssid(&"aa:bb:cc:00:00:0c".parse().unwrap()).is_none());
}

#[test]
fn retention_never_drops_a_bssid_refreshed_during_the_sweep() {
    let address: MacAddr = "aa:bb:cc:00:00:0d".parse().unwrap();

    for _ in 0..200 {
        let networks = networks();
        let now = Utc::now();
        networks.register_beacon(&beacon("aa:bb:cc:00:00:0d", "CorpNet", 1, -70, now - Duration::seconds(900)));

        let barrier = Barrier::new(2);
        thread::scope(|s| {
            s.spawn(|| {
                barrier.wait();
                networks.register_beacon(&beacon("aa:bb:cc:00:00:0d", "CorpNet", 1, -70, now));
            });
            s.spawn(|| {
                barrier.wait();
                networks.retention_clean_at(now, 600);
            });
        });

        // Whichever ran first, the fresh sighting is never lost.
        let bssid = networks.bssid(&address).unwrap();
        assert_eq!(bssid.last_seen().timestamp_millis(), now.timestamp_millis());
        let channel = networks.find_channel(&address, "CorpNet", 1).unwrap();
        assert!(channel.total_frames() >= 1);
    }
}

#[test]
fn unbounded_retention_removes_nothing() {
    let networks = networks();
    let now = Utc::now();
    networks.register_beacon(&beacon("aa:bb:cc:00:00:0e", "Old", 1, -70, now - Duration::days(3650)));

    assert_eq!(networks.retention_clean_at(now, u64::MAX), 0);
    assert_eq!(networks.retention_clean_at(now, 10_000_000_000_000), 0);
    assert_eq!(networks.bssid_count(), 1);
}

#[test]
fn hidden_and_empty_ssids_are_not_tracked() {
    let networks = networks();
    let mut hidden = beacon("aa:bb:cc:00:00:07", "x", 1, -70, Utc::now());
    hidden.ssid = None;
    networks.register_beacon(&hidden);

    let empty = beacon("aa:bb:cc:00:00:07", "", 1, -70, Utc::now());
    networks.register_beacon(&empty);

    assert_eq!(networks.bssid_count(), 0);
}

#[test]
fn snapshot_and_reset() {
    let networks = networks();
    networks.register_beacon(&beacon("aa:bb:cc:00:00:08", "CorpNet", 6, -40, Utc::now()));
    networks.register_beacon(&beacon("aa:bb:cc:00:00:09", "Guest", 6, -40, Utc::now()));

    let snapshot = networks.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].ssids[0].channels[0].fingerprints, vec!["fp-1".to_string()]);

    let names: Vec<String> = networks.ssids().into_iter().collect();
    assert_eq!(names, vec!["CorpNet".to_string(), "Guest".to_string()]);

    networks.reset();
    assert_eq!(networks.bssid_count(), 0);
}

#[test]
fn signal_tracks_from_two_transmitters() {
    let networks = networks();
    let now = Utc::now();
    let address: MacAddr = "aa:bb:cc:00:00:0a".parse().unwrap();

    for _ in 0..20 {
        networks.register_beacon(&beacon("aa:bb:cc:00:00:0a", "CorpNet", 6, -40, now));
    }
    let channel = networks.find_channel(&address, "CorpNet", 6).unwrap();
    assert!(!channel.signal_strength_table().has_multiple_tracks_at(now));

    for _ in 0..20 {
        networks.register_beacon(&beacon("aa:bb:cc:00:00:0a", "CorpNet", 6, -70, now));
    }
    assert!(channel.signal_strength_table().has_multiple_tracks_at(now));
    assert_eq!(channel.signal_strength_table().tracks_at(now).len(), 2);
}
