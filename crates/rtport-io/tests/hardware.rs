//! Hardware tests against the platform MIDI API.
//!
//! Uses virtual ports as a loopback, so only a working MIDI service is needed
//! (ALSA sequencer, CoreMIDI, or JACK). All tests are `#[ignore]` so CI doesn't
//! fail without one.
//!
//! Run with:
//!   cargo test -p rtport-io --test hardware -- --ignored --test-threads=1

#![cfg(all(feature = "midi-io", unix))]

use crossbeam_channel::unbounded;
use rtport_io::{Handler, IgnoreFlags, MidiContext};
use std::thread;
use std::time::Duration;

const SETTLE: Duration = Duration::from_millis(200);
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn context() -> MidiContext {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    MidiContext::builder()
        .client_name("rtport-hw-test")
        .ignore(IgnoreFlags::NONE)
        .build()
        .expect("failed to build MidiContext")
}

#[test]
#[ignore]
fn test_enumeration_does_not_fail() {
    let midi = context();
    let inputs = midi.list_readable_ports().unwrap();
    let outputs = midi.list_writable_ports().unwrap();
    for (i, info) in inputs.iter().enumerate() {
        assert_eq!(info.index, i);
    }
    println!("inputs: {:?}\noutputs: {:?}", inputs, outputs);
    assert!(!midi.list_available_apis().is_empty());
}

/// Virtual output → enumerated input → callback.
#[test]
#[ignore]
fn test_virtual_loopback_callback() {
    let midi = context();
    let mut source = midi.open_virtual_writable("rtport loopback").unwrap();
    thread::sleep(SETTLE);

    let info = midi
        .list_readable_ports()
        .unwrap()
        .into_iter()
        .find(|p| p.name.contains("rtport loopback"))
        .expect("virtual output not visible as an input");
    let mut sink = midi.open_readable(&info).unwrap();

    let (tx, rx) = unbounded();
    sink.set_callback(Handler::raw(move |bytes, _| {
        let _ = tx.send(bytes.to_vec());
    }))
    .unwrap();
    thread::sleep(SETTLE);

    assert!(source.send(&[0x93, 0x40, 0x7F]).unwrap() >= 0);
    let echoed = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(echoed, vec![0x90, 0x40, 0x7F]);

    sink.destroy().unwrap();
    source.destroy().unwrap();
}

/// Same loopback through the polling queue.
#[test]
#[ignore]
fn test_virtual_loopback_polling() {
    let midi = context();
    let mut source = midi.open_virtual_writable("rtport poll loopback").unwrap();
    thread::sleep(SETTLE);

    let info = midi
        .list_readable_ports()
        .unwrap()
        .into_iter()
        .find(|p| p.name.contains("rtport poll loopback"))
        .expect("virtual output not visible as an input");
    let mut sink = midi.open_readable(&info).unwrap();
    thread::sleep(SETTLE);

    source.send(&[0xB0, 7, 100]).unwrap();
    thread::sleep(SETTLE);

    let mut buf = Vec::new();
    assert!(sink.get_next_queued_message(&mut buf).unwrap().is_some());
    assert_eq!(buf, vec![0xB0, 7, 100]);
}
