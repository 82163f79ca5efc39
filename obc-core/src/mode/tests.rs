use super::*;

const ALL_MODES: [SystemMode; 6] = [
    SystemMode::Boot,
    SystemMode::Safe,
    SystemMode::Detumble,
    SystemMode::Nominal,
    SystemMode::LowPower,
    SystemMode::Recovery,
];

fn manager_in(mode: SystemMode) -> ModeManager {
    let mut m = ModeManager::new();
    m.init(mode, 0);
    m
}

#[test]
fn initial_state() {
    let m = manager_in(SystemMode::Detumble);
    let s = m.state();
    assert_eq!(s.current, SystemMode::Detumble);
    assert_eq!(s.previous, SystemMode::Boot);
    assert_eq!(s.timeout_s, DETUMBLE_TIMEOUT_S);
    assert!(!s.transition_pending);
}

#[test]
fn every_disallowed_pair_returns_permission() {
    for &from in &ALL_MODES {
        for &to in &ALL_MODES {
            if can_transition(from, to) {
                continue;
            }
            let mut m = manager_in(from);
            assert_eq!(m.request(to), Err(FswError::Permission), "{:?}->{:?}", from, to);
            assert_eq!(m.state().current, from);
            assert!(m.process(1).is_none());
            assert_eq!(m.state().current, from);
        }
    }
}

#[test]
fn every_allowed_pair_executes() {
    for &from in &ALL_MODES {
        for &to in &ALL_MODES {
            if !can_transition(from, to) {
                continue;
            }
            let mut m = manager_in(from);
            m.request(to).unwrap();
            let t = m.process(5).expect("pending transition must execute");
            assert_eq!((t.from, t.to), (from, to));
            assert!(!t.forced);
            let s = m.state();
            assert_eq!(s.current, to);
            assert_eq!(s.previous, from);
            assert_eq!(s.entry_time_s, 5);
        }
    }
}

#[test]
fn self_transition_never_allowed_via_request() {
    for &mode in &ALL_MODES {
        assert!(!can_transition(mode, mode));
    }
}

#[test]
fn boot_to_nominal_is_blocked() {
    // Must pass through Detumble or Safe first.
    let mut m = manager_in(SystemMode::Boot);
    assert_eq!(m.request(SystemMode::Nominal), Err(FswError::Permission));
}

#[test]
fn force_bypasses_table() {
    let mut m = manager_in(SystemMode::Boot);
    m.force(SystemMode::Nominal);
    let t = m.process(0).unwrap();
    assert!(t.forced);
    assert_eq!(m.state().current, SystemMode::Nominal);
}

#[test]
fn force_is_idempotent() {
    let mut m = manager_in(SystemMode::Nominal);
    m.force(SystemMode::Safe);
    m.process(1);
    m.force(SystemMode::Safe);
    m.process(2);
    let s = m.state();
    assert_eq!(s.current, SystemMode::Safe);
    assert_eq!(s.previous, SystemMode::Safe);
}

#[test]
fn detumble_times_out_to_safe() {
    let mut m = manager_in(SystemMode::Detumble);
    assert!(m.process(DETUMBLE_TIMEOUT_S - 1).is_none());
    let t = m.process(DETUMBLE_TIMEOUT_S).unwrap();
    assert_eq!(t.to, SystemMode::Safe);
    assert!(t.forced);
    // Safe carries no timeout.
    assert_eq!(m.state().timeout_s, 0);
}

#[test]
fn recovery_times_out_to_safe() {
    let mut m = manager_in(SystemMode::Recovery);
    assert!(m.process(RECOVERY_TIMEOUT_S - 1).is_none());
    let t = m.process(RECOVERY_TIMEOUT_S).unwrap();
    assert_eq!(t.to, SystemMode::Safe);
}

#[test]
fn nominal_has_no_timeout() {
    let mut m = manager_in(SystemMode::Nominal);
    assert!(m.process(1_000_000).is_none());
    assert!(!m.is_timeout(1_000_000));
}

#[test]
fn time_in_mode_resets_on_transition() {
    let mut m = manager_in(SystemMode::Safe);
    assert_eq!(m.time_in_mode(30), 30);
    m.request(SystemMode::Nominal).unwrap();
    m.process(40);
    assert_eq!(m.time_in_mode(45), 5);
}

#[test]
fn pending_request_can_be_superseded() {
    let mut m = manager_in(SystemMode::Safe);
    m.request(SystemMode::Nominal).unwrap();
    m.request(SystemMode::Detumble).unwrap();
    let t = m.process(1).unwrap();
    assert_eq!(t.to, SystemMode::Detumble);
}
