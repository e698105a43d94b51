use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;

use wifi_ids::alerts::{AlertType, AlertsService, MemoryAlertSink};
use wifi_ids::config::{ProbeConfig, SenderProbeConfig, TrapDefinition};
use wifi_ids::error::InterceptorError;
use wifi_ids::frame::{AdvertisementFrame, Dot11Frame, FrameMeta, FrameSubtype, MacAddr, TaggedParameters};
use wifi_ids::parser::parse_packet;
use wifi_ids::probes::trap::{build_probe_request, build_trap, TrapType};
use wifi_ids::probes::{MonitorProbe, ScriptStep, ScriptedDeviceFactory, ScriptedOpen, SenderProbe, Trap};
use wifi_ids::processor::{FrameProcessor, FrameProcessorBuilder, Interceptor};

#[derive(Default)]
struct Counter {
    frames: AtomicU64,
    last_channel: AtomicU64,
}

impl Interceptor for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    fn subtypes(&self) -> Vec<FrameSubtype> {
        FrameSubtype::ALL.to_vec()
    }

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        self.last_channel.store(u64::from(frame.meta().channel), Ordering::SeqCst);
        Ok(())
    }
}

fn processor(counter: Arc<Counter>) -> Arc<FrameProcessor> {
    let mut builder = FrameProcessorBuilder::new();
    builder.register(counter);
    Arc::new(builder.build())
}

fn probe_config(channels: Vec<u16>) -> ProbeConfig {
    ProbeConfig {
        name: "probe-1".to_string(),
        interface: "wlan1".to_string(),
        channels,
        hop_interval_seconds: 1,
        hop_command: "true".to_string(),
        skip_enable_monitor: true,
        retry_seconds: 0,
    }
}

fn beacon(channel: u16) -> Dot11Frame {
    Dot11Frame::Beacon(AdvertisementFrame {
        transmitter: MacAddr([0xaa, 0, 0, 0, 0, 1]),
        destination: MacAddr::BROADCAST,
        ssid: Some("CorpNet".to_string()),
        tagged: TaggedParameters::default(),
        meta: FrameMeta::new(channel, -50, Utc::now()),
    })
}

fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn monitor_probe_processes_frames_in_order_and_closes_device() {
    let counter = Arc::new(Counter::default());
    let factory = Arc::new(ScriptedDeviceFactory::replaying(vec![beacon(11), beacon(0), beacon(0)]));
    let log = factory.log();
    let probe = Arc::new(MonitorProbe::new(probe_config(vec![6]), factory, processor(counter.clone())));
    let status = probe.status();
    let running = Arc::new(AtomicBool::new(true));

    let handle = Arc::clone(&probe).spawn(Arc::clone(&running)).unwrap();

    assert!(wait_for(Duration::from_secs(5), || counter.frames.load(Ordering::SeqCst) == 3));
    assert!(status.is_active());
    assert!(status.is_in_loop());
    assert_eq!(status.total_frames(), 3);
    assert_eq!(status.current_channel(), 6);
    // Frames without a decoded channel take the probe's channel.
    assert_eq!(counter.last_channel.load(Ordering::SeqCst), 6);

    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();

    assert!(!status.is_active());
    assert!(!status.is_in_loop());
    assert_eq!(log.opened.load(Ordering::SeqCst), 1);
    assert_eq!(log.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_initialization_is_retried() {
    let counter = Arc::new(Counter::default());
    let factory = Arc::new(ScriptedDeviceFactory::new(vec![
        ScriptedOpen::Fail("no such device".to_string()),
        ScriptedOpen::Device(vec![ScriptStep::Frame(beacon(1))]),
    ]));
    let log = factory.log();
    let probe = Arc::new(MonitorProbe::new(probe_config(vec![1]), factory, processor(counter.clone())));
    let running = Arc::new(AtomicBool::new(true));

    let handle = Arc::clone(&probe).spawn(Arc::clone(&running)).unwrap();
    assert!(wait_for(Duration::from_secs(5), || counter.frames.load(Ordering::SeqCst) == 1));
    assert!(probe.status().is_active());

    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();
    assert_eq!(log.opened.load(Ordering::SeqCst), 1);
}

#[test]
fn read_error_reopens_the_device() {
    let counter = Arc::new(Counter::default());
    let factory = Arc::new(ScriptedDeviceFactory::new(vec![
        ScriptedOpen::Device(vec![
            ScriptStep::Frame(beacon(1)),
            ScriptStep::Idle,
            ScriptStep::Fail("device went away".to_string()),
        ]),
        ScriptedOpen::Device(vec![ScriptStep::Frame(beacon(1))]),
    ]));
    let log = factory.log();
    let probe = Arc::new(MonitorProbe::new(probe_config(vec![1]), factory, processor(counter.clone())));
    let running = Arc::new(AtomicBool::new(true));

    let handle = Arc::clone(&probe).spawn(Arc::clone(&running)).unwrap();
    assert!(wait_for(Duration::from_secs(5), || counter.frames.load(Ordering::SeqCst) == 2));

    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();
    assert_eq!(log.opened.load(Ordering::SeqCst), 2);
    assert_eq!(log.closed.load(Ordering::SeqCst), 2);
}

#[test]
fn one_failing_probe_does_not_stop_another() {
    let counter = Arc::new(Counter::default());
    let broken = Arc::new(MonitorProbe::new(
        probe_config(vec![1]),
        Arc::new(ScriptedDeviceFactory::new(Vec::new())),
        processor(counter.clone()),
    ));
    let working = Arc::new(MonitorProbe::new(
        probe_config(vec![1]),
        Arc::new(ScriptedDeviceFactory::replaying(vec![beacon(1), beacon(1)])),
        processor(counter.clone()),
    ));
    let running = Arc::new(AtomicBool::new(true));

    let handles = vec![
        Arc::clone(&broken).spawn(Arc::clone(&running)).unwrap(),
        Arc::clone(&working).spawn(Arc::clone(&running)).unwrap(),
    ];

    assert!(wait_for(Duration::from_secs(5), || counter.frames.load(Ordering::SeqCst) == 2));
    assert!(!broken.status().is_active());
    assert!(working.status().is_active());

    running.store(false, Ordering::SeqCst);
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn monitor_probe_hops_channels() {
    let counter = Arc::new(Counter::default());
    let factory = Arc::new(ScriptedDeviceFactory::replaying(Vec::new()));
    let log = factory.log();
    let probe = Arc::new(MonitorProbe::new(probe_config(vec![1, 6, 11]), factory, processor(counter)));
    let running = Arc::new(AtomicBool::new(true));

    let handle = Arc::clone(&probe).spawn(Arc::clone(&running)).unwrap();
    assert!(wait_for(Duration::from_secs(5), || log.channels.lock().len() >= 2));

    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();

    let channels = log.channels.lock().clone();
    assert_eq!(&channels[..2], &[1, 6]);
}

#[test]
fn sender_probe_transmits_trap_frames() {
    let sink = Arc::new(MemoryAlertSink::new());
    let alerts = Arc::new(AlertsService::all_enabled(sink.clone()));
    let definition = TrapDefinition {
        trap_type: "probe_request".to_string(),
        configuration: json!({"ssids": ["Decoy-1", "Decoy-2"], "delay_seconds": 1})
            .as_object()
            .cloned()
            .unwrap(),
    };
    let trap = build_trap(&definition, alerts).unwrap();
    let config = SenderProbeConfig {
        name: "sender-1".to_string(),
        interface: "wlan2".to_string(),
        channel: 11,
        skip_enable_monitor: true,
        retry_seconds: 0,
        trap: definition,
    };

    let factory = Arc::new(ScriptedDeviceFactory::replaying(Vec::new()));
    let log = factory.log();
    let probe = Arc::new(SenderProbe::new(&config, Arc::clone(&trap), factory));
    let running = Arc::new(AtomicBool::new(true));

    let handle = Arc::clone(&probe).spawn(Arc::clone(&running)).unwrap();
    assert!(wait_for(Duration::from_secs(5), || log.sent.lock().len() >= 2));

    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();

    assert_eq!(log.channels.lock().clone(), vec![11]);
    let sent = log.sent.lock().clone();
    let ssids: Vec<Option<String>> = sent[..2]
        .iter()
        .map(|raw| parse_packet(raw, "loopback", Utc::now()).and_then(|f| f.ssid().map(str::to_string)))
        .collect();
    assert_eq!(ssids, vec![Some("Decoy-1".to_string()), Some("Decoy-2".to_string())]);

    let snapshot = probe.snapshot();
    assert_eq!(snapshot.name, "sender-1");
    assert!(snapshot.trap.is_some());
    assert_eq!(sink.count(AlertType::ProbeResponseTrap), 0);
}

#[test]
fn unknown_trap_type_is_rejected() {
    let sink = Arc::new(MemoryAlertSink::new());
    let definition = TrapDefinition {
        trap_type: "beacon_flood".to_string(),
        configuration: serde_json::Map::new(),
    };
    assert!(build_trap(&definition, Arc::new(AlertsService::all_enabled(sink))).is_err());
}

#[test]
fn trap_without_delay_is_rejected() {
    let sink = Arc::new(MemoryAlertSink::new());
    let definition = TrapDefinition {
        trap_type: "probe_request".to_string(),
        configuration: json!({"ssids": ["Decoy-1"], "delay_seconds": 0})
            .as_object()
            .cloned()
            .unwrap(),
    };
    assert!(build_trap(&definition, Arc::new(AlertsService::all_enabled(sink))).is_err());
}

struct Impatient;

impl Trap for Impatient {
    fn trap_type(&self) -> TrapType {
        TrapType::ProbeRequest
    }

    fn description(&self) -> String {
        "no pause between rounds".to_string()
    }

    fn frames(&self) -> Vec<Vec<u8>> {
        vec![build_probe_request(&MacAddr([0x02, 0, 0, 0, 0, 1]), "Decoy")]
    }

    fn delay(&self) -> Duration {
        Duration::ZERO
    }

    fn interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        Vec::new()
    }
}

#[test]
fn sender_probe_paces_traps_without_delay() {
    let config = SenderProbeConfig {
        name: "sender-1".to_string(),
        interface: "wlan2".to_string(),
        channel: 11,
        skip_enable_monitor: true,
        retry_seconds: 0,
        trap: TrapDefinition {
            trap_type: "probe_request".to_string(),
            configuration: serde_json::Map::new(),
        },
    };
    let factory = Arc::new(ScriptedDeviceFactory::replaying(Vec::new()));
    let log = factory.log();
    let probe = Arc::new(SenderProbe::new(&config, Arc::new(Impatient), factory));
    let running = Arc::new(AtomicBool::new(true));

    let handle = Arc::clone(&probe).spawn(Arc::clone(&running)).unwrap();
    thread::sleep(Duration::from_millis(350));
    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();

    let sent = log.sent.lock().len();
    assert!(sent >= 1);
    assert!(sent <= 10, "sent {} frames", sent);
}
