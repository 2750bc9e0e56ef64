use std::time::Duration;

use fsuipc_link::{
    FieldWidth, FsuipcLink, LinkError, Simulator,
    handshake::{LIBRARY_VERSION, OFFSET_LIBRARY_VERSION, OFFSET_PROBE_NARROW, OFFSET_PROBE_WIDE},
    testing::{CountingPace, ScriptedSim, queue_connector},
};

fn link_over(sim: ScriptedSim) -> (FsuipcLink<ScriptedSim>, CountingPace) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut link = FsuipcLink::with_connector(queue_connector(vec![sim]));
    let pace = CountingPace::default();
    link.set_pace(pace.clone());
    (link, pace)
}

#[test]
fn wide_peer_negotiates_wide() {
    let mut sim = ScriptedSim::live(Simulator::Fs2k4);
    sim.set_u32(OFFSET_PROBE_WIDE, 124_850_000);

    let (mut link, _) = link_over(sim);
    link.open(Simulator::Any).expect("open should succeed");

    assert!(link.is_open());
    assert_eq!(link.field_width(), FieldWidth::Wide);

    let version = link.version().expect("version present while open");
    assert_eq!(version.simulator, Simulator::Fs2k4 as u32);
    assert_eq!(version.fsuipc, 0x5001_0000);
    assert_eq!(version.library, LIBRARY_VERSION);
}

#[test]
fn narrow_only_peer_negotiates_narrow() {
    let mut sim = ScriptedSim::live(Simulator::Fs2k2);
    sim.set_u16(OFFSET_PROBE_NARROW, 0x2345);

    let (mut link, _) = link_over(sim);
    link.open(Simulator::Any).expect("open should succeed");
    assert_eq!(link.field_width(), FieldWidth::Narrow);
}

#[test]
fn wide_wins_when_the_peer_answers_both() {
    let mut sim = ScriptedSim::live(Simulator::P3d);
    sim.set_u16(OFFSET_PROBE_NARROW, 0x2345);
    sim.set_u32(OFFSET_PROBE_WIDE, 123_450_000);

    let (mut link, _) = link_over(sim);
    link.open(Simulator::Any).expect("open should succeed");
    assert_eq!(link.field_width(), FieldWidth::Wide);
}

#[test]
fn peer_without_frequency_data_stays_unknown() {
    let (mut link, _) = link_over(ScriptedSim::live(Simulator::Fsx));
    link.open(Simulator::Any).expect("open should succeed");

    assert_eq!(link.field_width(), FieldWidth::Unknown);
    // a re-probe against the same dead slots stays unknown, but must not
    // error on an open channel
    assert_eq!(
        link.refresh_field_width().expect("probe on open channel"),
        FieldWidth::Unknown
    );
}

#[test]
fn silent_peer_is_not_running() {
    // versions never leave zero: all five rounds run, with a pause between
    // consecutive rounds
    let (mut link, pace) = link_over(ScriptedSim::default());

    let err = link.open(Simulator::Any).unwrap_err();
    assert!(matches!(err, LinkError::NotRunning));
    assert!(!link.is_open());
    assert_eq!(pace.pauses(), vec![Duration::from_millis(100); 4]);
}

#[test]
fn garbage_versions_are_a_mismatch() {
    let mut sim = ScriptedSim::default();
    sim.set_u32(0x3304, 0x5001_0000);
    // non-zero but missing the host signature in the high half
    sim.set_u32(0x3308, 0x0000_1234);

    let (mut link, _) = link_over(sim);
    let err = link.open(Simulator::Any).unwrap_err();
    assert!(matches!(err, LinkError::VersionMismatch { .. }));
    assert!(!link.is_open());
}

#[test]
fn wrong_simulator_tears_the_channel_down() {
    let (mut link, _) = link_over(ScriptedSim::live(Simulator::Fs2k4));

    let err = link.open(Simulator::Fsx).unwrap_err();
    match err {
        LinkError::WrongSimulator { requested, found } => {
            assert_eq!(requested, Simulator::Fsx);
            assert_eq!(found, Simulator::Fs2k4 as u32);
        }
        other => panic!("expected WrongSimulator, got {other:?}"),
    }
    assert!(!link.is_open());
}

#[test]
fn second_open_fails_without_disturbing_the_channel() {
    let mut sim = ScriptedSim::live(Simulator::Fs2k4);
    sim.set_u32(OFFSET_PROBE_WIDE, 124_850_000);

    let (mut link, _) = link_over(sim);
    link.open(Simulator::Any).expect("first open");

    let err = link.open(Simulator::Any).unwrap_err();
    assert!(matches!(err, LinkError::AlreadyOpen));
    assert!(link.is_open());

    // the original channel keeps exchanging
    let handle = link.queue_read(OFFSET_PROBE_WIDE, 4).unwrap();
    link.flush().unwrap();
    assert_eq!(link.result_u32(&handle), Some(124_850_000));
}

#[test]
fn close_is_idempotent() {
    let (mut link, _) = link_over(ScriptedSim::live(Simulator::Fs2k4));
    link.open(Simulator::Any).expect("open");

    link.close().expect("first close succeeds");
    let err = link.close().unwrap_err();
    assert!(matches!(err, LinkError::NotOpen));
    assert!(!link.is_open());
}

#[test]
fn reopen_after_close_gets_a_fresh_channel() {
    let first = ScriptedSim::live(Simulator::Fs2k4);
    let mut second = ScriptedSim::live(Simulator::Fsx);
    second.set_u32(OFFSET_PROBE_WIDE, 118_000_000);

    let mut link =
        FsuipcLink::with_connector(queue_connector(vec![first, second]));
    link.set_pace(CountingPace::default());

    link.open(Simulator::Any).expect("first open");
    link.close().expect("close");

    link.open(Simulator::Any).expect("second open");
    assert_eq!(
        link.version().map(|v| v.simulator),
        Some(Simulator::Fsx as u32)
    );
    assert_eq!(link.field_width(), FieldWidth::Wide);
}

#[test]
fn library_version_is_announced_to_the_peer() {
    let (mut link, _) = link_over(ScriptedSim::live(Simulator::Fs2k4));
    link.open(Simulator::Any).expect("open");

    // the handshake wrote our library version into the peer's space;
    // reading it back goes through a full extra exchange
    let handle = link.queue_read(OFFSET_LIBRARY_VERSION, 2).unwrap();
    link.flush().unwrap();
    assert_eq!(link.result_u16(&handle), Some(LIBRARY_VERSION as u16));
}

#[test]
fn no_simulator_when_the_connector_runs_dry() {
    let mut link = FsuipcLink::with_connector(queue_connector(vec![]));
    let err = link.open(Simulator::Any).unwrap_err();
    assert!(matches!(err, LinkError::NoSimulator));
    assert!(!link.is_open());
}
