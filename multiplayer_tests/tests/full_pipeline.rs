// End-to-end multiplayer scenarios: real relay, real NetClients.
//
// Each test starts its own relay on a free port. Players are admitted via
// `TestRelay::join`, which waits for the relay's `connected` notification so
// no update races the handshake.

use std::time::Duration;

use multiplayer_tests::TestRelay;
use plaza_protocol::Identity;
use plaza_relay::{Notification, RelayTimings};

fn fast_timings() -> RelayTimings {
    RelayTimings {
        liveness_interval: Duration::from_millis(50),
        disconnect_grace: Duration::from_millis(150),
    }
}

// ---------------------------------------------------------------------------
// Roster convergence
// ---------------------------------------------------------------------------

#[test]
fn three_players_converge_on_each_others_positions() {
    let relay = TestRelay::start(fast_timings());
    let mut a = relay.join("A");
    let mut b = relay.join("B");
    let mut c = relay.join("C");

    a.move_to(1.0, 1.0, 0);
    b.move_to(2.0, 2.0, 1);
    c.move_to(3.0, 3.0, 2);

    a.poll_until_sees("B", 2.0, 2.0);
    a.poll_until_sees("C", 3.0, 3.0);
    b.poll_until_sees("A", 1.0, 1.0);
    b.poll_until_sees("C", 3.0, 3.0);
    c.poll_until_sees("A", 1.0, 1.0);
    let seen = c.poll_until_sees("B", 2.0, 2.0);
    assert_eq!(seen.animation, 1);

    // Nobody sees themselves.
    assert!(!a.avatars().contains_key(&Identity::from("A")));
    assert!(!b.avatars().contains_key(&Identity::from("B")));
    assert!(!c.avatars().contains_key(&Identity::from("C")));
    assert_eq!(a.avatars().len(), 2);

    relay.stop();
}

#[test]
fn facing_arrives_with_next_update() {
    let relay = TestRelay::start(fast_timings());
    let mut a = relay.join("A");
    let mut b = relay.join("B");

    a.move_to(5.0, 5.0, 0);
    let before = b.poll_until_sees("A", 5.0, 5.0);
    assert_eq!(before.flip, 0);

    a.face(1);
    a.move_to(6.0, 5.0, 0);
    let after = b.poll_until_sees("A", 6.0, 5.0);
    assert_eq!(after.flip, 1);

    relay.stop();
}

#[test]
fn garbage_from_one_player_does_not_disturb_others() {
    let relay = TestRelay::start(fast_timings());
    let mut a = relay.join("A");
    let mut b = relay.join("B");

    a.send_raw(b"not json at all");
    a.send_raw(br#"{"eventName":"update","data":"[1,2"}"#);
    a.move_to(7.0, 8.0, 3);

    let seen = b.poll_until_sees("A", 7.0, 8.0);
    assert_eq!(seen.animation, 3);
    assert!(
        !relay
            .drain_notifications()
            .contains(&Notification::Disconnected("A".into()))
    );

    relay.stop();
}

// ---------------------------------------------------------------------------
// Departures and reconnects
// ---------------------------------------------------------------------------

#[test]
fn departed_player_disappears_from_remaining_views() {
    let relay = TestRelay::start(fast_timings());
    let mut a = relay.join("A");
    let mut b = relay.join("B");
    let mut c = relay.join("C");

    c.move_to(1.0, 0.0, 0);
    a.poll_until_sees("C", 1.0, 0.0);
    b.poll_until_sees("C", 1.0, 0.0);

    c.disconnect();
    relay.wait_for(&Notification::Disconnected("C".into()));

    a.poll_until_departed("C");
    b.poll_until_departed("C");
    assert!(!a.avatars().contains_key(&Identity::from("C")));
    assert!(!b.avatars().contains_key(&Identity::from("C")));

    // The remaining pair keeps relaying.
    a.move_to(4.0, 4.0, 0);
    let seen = b.poll_until_sees("A", 4.0, 4.0);
    assert_eq!(seen.name, Identity::from("A"));
    b.poll_until("only A in B's view", |client| client.avatars().len() == 1);

    relay.stop();
}

#[test]
fn quick_reconnect_is_not_announced_as_departure() {
    let timings = RelayTimings {
        liveness_interval: Duration::from_millis(50),
        disconnect_grace: Duration::from_millis(500),
    };
    let relay = TestRelay::start(timings);
    let mut a = relay.join("A");
    let mut b = relay.join("B");

    b.move_to(1.0, 1.0, 0);
    a.poll_until_sees("B", 1.0, 1.0);

    b.disconnect();
    relay.wait_for(&Notification::Disconnected("B".into()));
    let mut b = relay.join("B");
    b.move_to(2.0, 2.0, 0);
    a.poll_until_sees("B", 2.0, 2.0);

    // Outlast the grace period, then make sure nothing was announced.
    std::thread::sleep(Duration::from_millis(700));
    a.drain();
    assert!(a.departures().is_empty());
    assert!(a.avatars().contains_key(&Identity::from("B")));

    relay.stop();
}

#[test]
fn second_connection_with_same_name_takes_over() {
    let relay = TestRelay::start(fast_timings());
    let mut watcher = relay.join("W");
    let _old = relay.join("A");
    let mut new = relay.join("A");

    new.move_to(9.0, 9.0, 0);
    watcher.poll_until_sees("A", 9.0, 9.0);
    assert_eq!(watcher.avatars().len(), 1);

    // Displacement alone never produces a departure.
    std::thread::sleep(Duration::from_millis(300));
    watcher.drain();
    assert!(watcher.departures().is_empty());

    relay.stop();
}
